//! JSON-RPC API Layer
//!
//! Exposes worker registration, job distribution and health queries of
//! Scribe Dispatch over JSON-RPC 2.0. Method names are versioned
//! (`<group>.<action>.v1`).

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
