//! Worker registry service.

use super::SchedulingResult;
use crate::scheduler::{
    domain::{Worker, WorkerName},
    ports::SchedulerStore,
};
use mockable::Clock;
use std::sync::Arc;

/// Registers the workers allowed to claim jobs.
#[derive(Clone)]
pub struct WorkerRegistryService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> WorkerRegistryService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    /// Creates a new worker registry service.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Registers a worker under a display name.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError`] when the name is invalid or the
    /// store rejects the worker.
    pub async fn register(&self, name: impl Into<String> + Send) -> SchedulingResult<Worker> {
        let worker = Worker::new(WorkerName::new(name)?, &*self.clock);
        self.store.register_worker(&worker).await?;
        tracing::info!(worker_id = %worker.id(), name = %worker.name(), "registered worker");
        Ok(worker)
    }

    /// Lists registered workers, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence lookup
    /// fails.
    pub async fn list(&self) -> SchedulingResult<Vec<Worker>> {
        Ok(self.store.list_workers().await?)
    }
}
