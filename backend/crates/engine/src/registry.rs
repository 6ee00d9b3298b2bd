use std::collections::BTreeMap;
use std::sync::Arc;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};

use crate::worker::Worker;

/// `data_family -> Worker` table resolved at scheduling time.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) -> MarketsyncResult<()> {
        let family = worker.data_family().trim().to_string();
        if family.is_empty() {
            return Err(MarketsyncError::Validation(
                "worker data_family is empty".to_string(),
            ));
        }
        if self.workers.contains_key(&family) {
            return Err(MarketsyncError::Validation(format!(
                "worker for data family '{family}' is already registered"
            )));
        }
        tracing::debug!(data_family = %family, "registered worker");
        self.workers.insert(family, worker);
        Ok(())
    }

    pub fn get(&self, data_family: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(data_family).cloned()
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    /// Families the background loop runs, in stable (alphabetical) order.
    pub fn scheduled(&self) -> Vec<Arc<dyn Worker>> {
        self.workers
            .values()
            .filter(|w| w.policy().scheduled)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("families", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}
