//! Per-train mutual exclusion for roster writers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::TrackingError;

/// Lazily created lock per train id. Entries live for the life of the
/// registry; the set of real train numbers is small.
#[derive(Default)]
pub struct TrainLockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub type TrainGuard = OwnedMutexGuard<()>;

impl TrainLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `train_id`, creating it on first use. The map
    /// guard is only held for the lookup.
    pub fn lock_for(&self, train_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(train_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(
        &self,
        train_id: &str,
        timeout: Duration,
    ) -> Result<TrainGuard, TrackingError> {
        let lock = self.lock_for(train_id);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(train_id, "Timed out waiting for train roster lock");
                Err(TrackingError::LockTimeout(train_id.to_string()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
