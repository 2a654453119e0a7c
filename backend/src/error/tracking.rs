use std::{fmt, time::Duration};

use thiserror::Error;

/// Failure talking to one of the three storage tiers.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("roster cache error: {0}")]
    Cache(String),
    #[error("session store error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Step of a roster write that failed. Lets callers tell which tiers were
/// already updated when a write is reported as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Session,
    Sample,
    Aggregate,
    Heartbeat,
    Trip,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WriteStage::Session => "session",
            WriteStage::Sample => "sample",
            WriteStage::Aggregate => "aggregate",
            WriteStage::Heartbeat => "heartbeat",
            WriteStage::Trip => "trip",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage unavailable while writing {stage}: {source}")]
    StorageUnavailable {
        stage: WriteStage,
        #[source]
        source: StorageError,
    },
    #[error("timed out waiting for the roster lock of train {0}")]
    LockTimeout(String),
}

impl TrackingError {
    pub fn storage(stage: WriteStage) -> impl FnOnce(StorageError) -> TrackingError {
        move |source| TrackingError::StorageUnavailable { stage, source }
    }

    /// Stage at which a storage failure happened, if this is one.
    pub fn failed_stage(&self) -> Option<WriteStage> {
        match self {
            TrackingError::StorageUnavailable { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
