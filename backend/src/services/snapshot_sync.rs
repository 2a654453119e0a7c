//! Copies every cached train aggregate into the object store.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StorageError;
use crate::services::{
    object_store::SnapshotStore, roster_cache::RosterCache, scheduler::PeriodicTask,
};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub failed: Vec<String>,
    /// Listed by the cache scan but gone before their snapshot was written.
    pub missing: Vec<String>,
}

#[derive(Clone)]
pub struct SnapshotSync {
    roster: RosterCache,
    snapshots: SnapshotStore,
}

impl SnapshotSync {
    pub fn new(roster: RosterCache, snapshots: SnapshotStore) -> Self {
        Self { roster, snapshots }
    }

    /// One full pass. Only the enumeration failing aborts the pass; a train
    /// that fails is reported and the rest continue.
    pub async fn run_once(&self) -> Result<SyncReport, StorageError> {
        let train_ids = self.roster.cached_train_ids().await?;
        let mut report = SyncReport::default();

        for train_id in train_ids {
            match self.sync_train(&train_id).await {
                Ok(true) => report.synced.push(train_id),
                Ok(false) => report.missing.push(train_id),
                Err(err) => {
                    tracing::warn!(train_id = %train_id, error = %err, "Snapshot sync failed for train");
                    report.failed.push(train_id);
                }
            }
        }

        tracing::info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            missing = report.missing.len(),
            "Snapshot sync finished"
        );
        Ok(report)
    }

    async fn sync_train(&self, train_id: &str) -> Result<bool, StorageError> {
        let Some(aggregate) = self.roster.get_aggregate(train_id).await? else {
            return Ok(false);
        };
        self.snapshots.put(&aggregate).await?;

        // The train may have emptied while the put was in flight.
        if self.roster.get_aggregate(train_id).await?.is_none() {
            tracing::debug!(train_id, "Train emptied during sync, removing snapshot");
            self.snapshots.delete(train_id).await?;
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl PeriodicTask for SnapshotSync {
    fn name(&self) -> &'static str {
        "snapshot_sync"
    }

    async fn tick(&self) {
        if let Err(err) = self.run_once().await {
            tracing::warn!(error = %err, "Snapshot sync skipped, cache enumeration failed");
        }
    }
}
