//! Typed view over the cache tier: one entry per session sample and one
//! computed entry per train.

use std::{sync::Arc, time::Duration};

use crate::error::StorageError;
use crate::models::{passenger::PassengerSample, train::TrainAggregate};
use crate::services::cache_store::CacheStore;
use crate::types::SessionId;

const PASSENGER_PREFIX: &str = "passenger:";
const TRAIN_PREFIX: &str = "train:";

#[derive(Clone)]
pub struct RosterCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl RosterCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn passenger_key(session_id: SessionId) -> String {
        format!("{}{}", PASSENGER_PREFIX, session_id)
    }

    fn train_key(train_id: &str) -> String {
        format!("{}{}", TRAIN_PREFIX, train_id)
    }

    pub async fn get_sample(
        &self,
        session_id: SessionId,
    ) -> Result<Option<PassengerSample>, StorageError> {
        let raw = self.store.get(&Self::passenger_key(session_id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    /// Overwrites the sample and restarts its expiry.
    pub async fn put_sample(&self, sample: &PassengerSample) -> Result<(), StorageError> {
        let json = serde_json::to_string(sample)?;
        self.store
            .set(&Self::passenger_key(sample.session_id), &json, self.ttl)
            .await
    }

    pub async fn delete_sample(&self, session_id: SessionId) -> Result<(), StorageError> {
        self.store.delete(&Self::passenger_key(session_id)).await
    }

    pub async fn get_aggregate(
        &self,
        train_id: &str,
    ) -> Result<Option<TrainAggregate>, StorageError> {
        let raw = self.store.get(&Self::train_key(train_id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    pub async fn put_aggregate(&self, aggregate: &TrainAggregate) -> Result<(), StorageError> {
        let json = serde_json::to_string(aggregate)?;
        self.store
            .set(&Self::train_key(&aggregate.train_id), &json, self.ttl)
            .await
    }

    pub async fn delete_aggregate(&self, train_id: &str) -> Result<(), StorageError> {
        self.store.delete(&Self::train_key(train_id)).await
    }

    /// Train ids that currently have a cached aggregate.
    pub async fn cached_train_ids(&self) -> Result<Vec<String>, StorageError> {
        let keys = self.store.scan_prefix(TRAIN_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(TRAIN_PREFIX).map(str::to_owned))
            .collect())
    }
}
