//! Scribe Dispatch client

use crate::error::{Result, SdkError};
use crate::types::{
    ClaimResponse, CompleteRequest, CompleteResponse, CompletionStatus, HealthRequest,
    HeartbeatResponse, Job, JobRequest, RegisterResponse, SubmitRequest, SystemHealth,
    UnregisterResponse, WorkerHealth, WorkerRequest,
};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::traits::ToRpcParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use std::time::Duration;

/// Sends a request struct as named params (a JSON object)
struct Named<T>(T);

impl<T: Serialize> ToRpcParams for Named<T> {
    fn to_rpc_params(self) -> std::result::Result<Option<Box<RawValue>>, serde_json::Error> {
        serde_json::value::to_raw_value(&self.0).map(Some)
    }
}

/// Client for the dispatch daemon
///
/// Used by remote transcription workers (register, heartbeat, claim,
/// complete) and by upload/ops tooling (submit, lookup, health).
///
/// # Example
///
/// ```no_run
/// use scribe_sdk::ScribeClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ScribeClient::connect("http://127.0.0.1:9640")?;
/// client.register_worker("gpu-box-1").await?;
/// if let Some(job) = client.claim_job("gpu-box-1").await? {
///     println!("claimed {}", job.id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ScribeClient {
    client: HttpClient,
}

impl ScribeClient {
    /// Build a client for `url` (e.g. `http://127.0.0.1:9640`). No request is
    /// made until the first call.
    pub fn connect(url: impl AsRef<str>) -> Result<Self> {
        Self::connect_with_timeout(url, Duration::from_secs(30))
    }

    pub fn connect_with_timeout(url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let url = url.as_ref();
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client for {}: {}", url, e)))?;

        Ok(Self { client })
    }

    async fn call<P: Serialize + Send, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        let response = self.client.request(method, Named(params)).await?;
        Ok(response)
    }

    pub async fn register_worker(&self, worker_id: &str) -> Result<RegisterResponse> {
        self.call("worker.register.v1", WorkerRequest { worker_id })
            .await
    }

    /// Leave the pool; held jobs go back to pending. Returns how many.
    pub async fn unregister_worker(&self, worker_id: &str) -> Result<usize> {
        let response: UnregisterResponse = self
            .call("worker.unregister.v1", WorkerRequest { worker_id })
            .await?;
        Ok(response.released_jobs)
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<HeartbeatResponse> {
        self.call("worker.heartbeat.v1", WorkerRequest { worker_id })
            .await
    }

    pub async fn worker_health(&self, worker_id: &str) -> Result<WorkerHealth> {
        self.call("worker.health.v1", WorkerRequest { worker_id })
            .await
    }

    /// Next job for this worker, or `None` when nothing is claimable or the
    /// worker already holds its maximum.
    pub async fn claim_job(&self, worker_id: &str) -> Result<Option<Job>> {
        let response: ClaimResponse = self
            .call("job.claim.v1", WorkerRequest { worker_id })
            .await?;
        Ok(response.job)
    }

    pub async fn complete_job(
        &self,
        job_id: &str,
        worker_id: &str,
        status: CompletionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let _: CompleteResponse = self
            .call(
                "job.complete.v1",
                CompleteRequest {
                    job_id,
                    worker_id,
                    status,
                    error,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn submit_job(&self, request: SubmitRequest) -> Result<Job> {
        self.call("job.submit.v1", request).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.call("job.get.v1", JobRequest { job_id }).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        self.call("job.cancel.v1", JobRequest { job_id }).await
    }

    pub async fn system_health(&self) -> Result<SystemHealth> {
        self.call("system.health.v1", HealthRequest { detailed: false })
            .await
    }
}
