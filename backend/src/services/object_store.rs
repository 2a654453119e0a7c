//! Durable object tier: one JSON document per train.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream, Client};
use serde_json::Value;
use tracing::Instrument;

use crate::error::StorageError;
use crate::models::train::TrainAggregate;
use crate::utils::timeout::bounded;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_json(&self, key: &str, value: &Value) -> Result<(), StorageError>;
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    timeout: Duration,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            timeout,
        }
    }
}

fn s3_err<E>(err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::ObjectStore(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_json(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let body = serde_json::to_vec(value)?;
        bounded("s3_put_object", self.timeout, async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type("application/json")
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(s3_err)?;
            Ok::<_, StorageError>(())
        })
        .instrument(tracing::debug_span!("s3_put_object", bucket = %self.bucket, key))
        .await
    }

    async fn get_json(&self, key: &str) -> Result<Option<Value>, StorageError> {
        bounded("s3_get_object", self.timeout, async {
            let output = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(output) => output,
                Err(err) => {
                    if err
                        .as_service_error()
                        .map(|e| e.is_no_such_key())
                        .unwrap_or(false)
                    {
                        return Ok(None);
                    }
                    return Err(s3_err(err));
                }
            };
            let bytes = output.body.collect().await.map_err(s3_err)?.into_bytes();
            let value = serde_json::from_slice(&bytes)?;
            Ok::<_, StorageError>(Some(value))
        })
        .instrument(tracing::debug_span!("s3_get_object", bucket = %self.bucket, key))
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        bounded("s3_delete_object", self.timeout, async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(s3_err)?;
            Ok::<_, StorageError>(())
        })
        .instrument(tracing::debug_span!("s3_delete_object", bucket = %self.bucket, key))
        .await
    }
}

/// Process-local stand-in used when no bucket is configured. Offers no
/// durability across restarts.
#[derive(Default, Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Value>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_json(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.remove(key);
        Ok(())
    }
}

/// Train aggregates as stored in the object tier.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn key_for(&self, train_id: &str) -> String {
        format!("{}{}.json", self.prefix, train_id)
    }

    pub async fn put(&self, aggregate: &TrainAggregate) -> Result<(), StorageError> {
        let value = serde_json::to_value(aggregate)?;
        self.store
            .put_json(&self.key_for(&aggregate.train_id), &value)
            .await
    }

    pub async fn get(&self, train_id: &str) -> Result<Option<TrainAggregate>, StorageError> {
        let value = self.store.get_json(&self.key_for(train_id)).await?;
        value
            .map(|v| serde_json::from_value(v).map_err(StorageError::from))
            .transpose()
    }

    pub async fn delete(&self, train_id: &str) -> Result<(), StorageError> {
        self.store.delete(&self.key_for(train_id)).await
    }
}
