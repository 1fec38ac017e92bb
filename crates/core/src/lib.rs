// Scribe Core - Job distribution, worker registry, fault tolerance
// NO infrastructure dependencies: adapters implement the ports in crate::port

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
