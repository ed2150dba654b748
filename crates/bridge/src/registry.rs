//! Registry of compositor workers, one per render job.
//!
//! The registry owns at most one worker per render-job id. Entries are
//! created by `get_or_create`, wound down by `release` + `await_quit`, and
//! reclaimed only by an explicit `remove` — a quit worker's entry lingers
//! until then, so callers that skip `remove` grow the map without bound.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use renderweld_common::{WeldError, WeldResult};

use crate::worker::{CompositorWorker, WorkerConfig};

/// Maps render-job ids to their compositor workers.
#[derive(Default)]
pub struct CompositorRegistry {
    workers: Mutex<HashMap<String, Arc<CompositorWorker>>>,
}

impl CompositorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the worker for `render_job_id`, spawning it on first use.
    pub fn get_or_create(
        &self,
        render_job_id: &str,
        config: &WorkerConfig,
    ) -> WeldResult<Arc<CompositorWorker>> {
        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get(render_job_id) {
            return Ok(worker.clone());
        }

        tracing::debug!(render_job_id, "Spawning compositor worker");
        let worker = CompositorWorker::spawn(config)?;
        workers.insert(render_job_id.to_string(), worker.clone());
        Ok(worker)
    }

    /// Tell the worker for `render_job_id` that no further commands are
    /// coming. No-op when nothing is registered under that id. The entry
    /// stays registered so the exit can still be awaited; call
    /// [`remove`](Self::remove) after [`await_quit`](Self::await_quit) to
    /// reclaim it.
    pub async fn release(&self, render_job_id: &str) -> WeldResult<()> {
        let worker = self.workers.lock().get(render_job_id).cloned();
        match worker {
            Some(worker) => worker.finish_commands().await,
            None => Ok(()),
        }
    }

    /// Wait for the worker's process to exit. Fails immediately when no
    /// worker was ever registered for `render_job_id`.
    pub async fn await_quit(&self, render_job_id: &str) -> WeldResult<()> {
        let worker = self.workers.lock().get(render_job_id).cloned();
        match worker {
            Some(worker) => worker.wait_for_done().await,
            None => Err(WeldError::misuse(format!(
                "no compositor registered for render job {render_job_id}"
            ))),
        }
    }

    /// Drop the registry entry for `render_job_id`, returning whether one
    /// existed. Does not touch the process itself.
    pub fn remove(&self, render_job_id: &str) -> bool {
        self.workers.lock().remove(render_job_id).is_some()
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_await_quit_unknown_job_fails_fast() {
        let registry = CompositorRegistry::new();
        let err = registry.await_quit("job-1").await.unwrap_err();
        assert!(matches!(err, WeldError::Misuse { .. }));
    }

    #[tokio::test]
    async fn test_release_unknown_job_is_noop() {
        let registry = CompositorRegistry::new();
        assert!(registry.release("job-1").await.is_ok());
    }

    #[test]
    fn test_remove_reports_presence() {
        let registry = CompositorRegistry::new();
        assert!(!registry.remove("job-1"));
    }
}
