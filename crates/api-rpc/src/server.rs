//! JSON-RPC Server
//!
//! Serves the dispatch API over HTTP/WebSocket (jsonrpsee). Binds to
//! localhost by default; remote workers reach it through a tunnel or by
//! overriding the host.

use crate::handler::RpcHandler;
use crate::types::{
    CompleteRequest, JobRequest, SubmitRequest, SystemHealthRequest, WorkerRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use scribe_core::application::DispatchCoordinator;
use scribe_core::error::{AppError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9640;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, coordinator: Arc<DispatchCoordinator>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(coordinator)),
        }
    }

    /// Build the method table
    pub fn into_module(self) -> Result<RpcModule<()>> {
        build_module(self.handler)
    }

    /// Bind and start serving. Returns the bound address (useful with port 0)
    /// and the handle used to stop the server.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind RPC server on {}: {}", addr, e)))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| AppError::Internal(format!("RPC server has no local address: {}", e)))?;

        let module = build_module(self.handler)?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }
}

fn registration_error(err: impl std::fmt::Display) -> AppError {
    AppError::Internal(err.to_string())
}

fn build_module(handler: Arc<RpcHandler>) -> Result<RpcModule<()>> {
    let mut module = RpcModule::new(());

    // Worker lifecycle
    let h = handler.clone();
    module
        .register_async_method("worker.register.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: WorkerRequest = params.parse()?;
                h.register_worker(req).await
            }
        })
        .map_err(registration_error)?;

    let h = handler.clone();
    module
        .register_async_method("worker.unregister.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: WorkerRequest = params.parse()?;
                h.unregister_worker(req).await
            }
        })
        .map_err(registration_error)?;

    let h = handler.clone();
    module
        .register_async_method("worker.heartbeat.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: WorkerRequest = params.parse()?;
                h.heartbeat(req).await
            }
        })
        .map_err(registration_error)?;

    let h = handler.clone();
    module
        .register_async_method("worker.health.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: WorkerRequest = params.parse()?;
                h.worker_health(req).await
            }
        })
        .map_err(registration_error)?;

    // Distribution
    let h = handler.clone();
    module
        .register_async_method("job.claim.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: WorkerRequest = params.parse()?;
                h.claim_job(req).await
            }
        })
        .map_err(registration_error)?;

    let h = handler.clone();
    module
        .register_async_method("job.complete.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: CompleteRequest = params.parse()?;
                h.complete_job(req).await
            }
        })
        .map_err(registration_error)?;

    // Submission and lookup
    let h = handler.clone();
    module
        .register_async_method("job.submit.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: SubmitRequest = params.parse()?;
                h.submit_job(req).await
            }
        })
        .map_err(registration_error)?;

    let h = handler.clone();
    module
        .register_async_method("job.get.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: JobRequest = params.parse()?;
                h.get_job(req).await
            }
        })
        .map_err(registration_error)?;

    let h = handler.clone();
    module
        .register_async_method("job.cancel.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                let req: JobRequest = params.parse()?;
                h.cancel_job(req).await
            }
        })
        .map_err(registration_error)?;

    // System
    let h = handler.clone();
    module
        .register_async_method("system.health.v1", move |params, _, _| {
            let h = h.clone();
            async move {
                // Params are optional here
                let req: SystemHealthRequest = params.parse().unwrap_or_default();
                h.system_health(req).await
            }
        })
        .map_err(registration_error)?;

    let h = handler;
    module
        .register_async_method("system.jobs.v1", move |_, _, _| {
            let h = h.clone();
            async move { h.job_counts().await }
        })
        .map_err(registration_error)?;

    Ok(module)
}
