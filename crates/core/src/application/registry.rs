// Worker Registry - per-worker lease bookkeeping and capacity enforcement
//
// Process-local cache: rebuilt from scratch on restart. The job store stays
// authoritative for lease ownership.

use crate::domain::{JobId, WorkerId};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Load snapshot for one worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerLoad {
    pub worker_id: WorkerId,
    /// Held job ids in claim order
    pub held_jobs: Vec<JobId>,
    pub max_jobs: usize,
    /// held / max * 100
    pub load_percent: f64,
}

/// Outcome of asking for a lease slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotReservation {
    Reserved,
    AtCapacity,
    NotRegistered,
}

#[derive(Debug, Default)]
struct WorkerSlots {
    held_jobs: Vec<JobId>,
    /// Claims in flight against the store
    reserved: usize,
}

impl WorkerSlots {
    fn in_use(&self) -> usize {
        self.held_jobs.len() + self.reserved
    }
}

pub struct WorkerRegistry {
    max_jobs_per_worker: usize,
    workers: Mutex<HashMap<WorkerId, WorkerSlots>>,
}

impl WorkerRegistry {
    pub fn new(max_jobs_per_worker: usize) -> Self {
        Self {
            max_jobs_per_worker,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent. Returns true if the worker was not registered before.
    pub async fn register(&self, worker_id: &str) -> bool {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(worker_id) {
            return false;
        }
        workers.insert(worker_id.to_string(), WorkerSlots::default());
        info!(worker_id = %worker_id, "Worker registered with registry");
        true
    }

    /// Forget the worker. Returns the job ids it still held, if it was known.
    ///
    /// Does not touch the jobs themselves.
    pub async fn unregister(&self, worker_id: &str) -> Option<Vec<JobId>> {
        let removed = self.workers.lock().await.remove(worker_id);
        if removed.is_some() {
            info!(worker_id = %worker_id, "Worker removed from registry");
        }
        removed.map(|slots| slots.held_jobs)
    }

    pub async fn is_registered(&self, worker_id: &str) -> bool {
        self.workers.lock().await.contains_key(worker_id)
    }

    pub async fn has_capacity(&self, worker_id: &str) -> bool {
        self.workers
            .lock()
            .await
            .get(worker_id)
            .map_or(false, |slots| slots.in_use() < self.max_jobs_per_worker)
    }

    /// Reserve one lease slot ahead of a store claim.
    ///
    /// Held jobs and in-flight reservations both count against capacity, so
    /// concurrent claims from one worker cannot overshoot the limit.
    pub async fn reserve_slot(&self, worker_id: &str) -> SlotReservation {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(worker_id) {
            None => SlotReservation::NotRegistered,
            Some(slots) if slots.in_use() >= self.max_jobs_per_worker => {
                debug!(
                    worker_id = %worker_id,
                    held = slots.held_jobs.len(),
                    max = self.max_jobs_per_worker,
                    "Worker at capacity"
                );
                SlotReservation::AtCapacity
            }
            Some(slots) => {
                slots.reserved += 1;
                SlotReservation::Reserved
            }
        }
    }

    /// Turn a reservation into a held job. False if the worker vanished meanwhile.
    pub async fn confirm_slot(&self, worker_id: &str, job_id: &str) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(worker_id) {
            Some(slots) => {
                slots.reserved = slots.reserved.saturating_sub(1);
                slots.held_jobs.push(job_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Drop a reservation that did not yield a job
    pub async fn cancel_slot(&self, worker_id: &str) {
        if let Some(slots) = self.workers.lock().await.get_mut(worker_id) {
            slots.reserved = slots.reserved.saturating_sub(1);
        }
    }

    /// Remove `job_id` from the worker's held list. False if it was not there.
    pub async fn release_job(&self, worker_id: &str, job_id: &str) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(worker_id) {
            Some(slots) => {
                let before = slots.held_jobs.len();
                slots.held_jobs.retain(|id| id != job_id);
                slots.held_jobs.len() != before
            }
            None => false,
        }
    }

    pub async fn load(&self, worker_id: &str) -> Option<WorkerLoad> {
        let workers = self.workers.lock().await;
        workers
            .get(worker_id)
            .map(|slots| self.to_load(worker_id, slots))
    }

    fn to_load(&self, worker_id: &str, slots: &WorkerSlots) -> WorkerLoad {
        WorkerLoad {
            worker_id: worker_id.to_string(),
            held_jobs: slots.held_jobs.clone(),
            max_jobs: self.max_jobs_per_worker,
            load_percent: slots.held_jobs.len() as f64 / self.max_jobs_per_worker as f64 * 100.0,
        }
    }
}
