use std::{future::Future, time::Duration};

use crate::error::StorageError;

/// Runs a storage call with an upper bound on its duration. An expired bound
/// fails only this call.
pub async fn bounded<T, E, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StorageError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Storage call timed out");
            Err(StorageError::Timeout {
                operation,
                after: limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let value = bounded("noop", Duration::from_secs(1), async {
            Ok::<_, StorageError>(7)
        })
        .await
        .expect("value");
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout() {
        let result = bounded("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StorageError>(())
        })
        .await;
        assert!(matches!(
            result,
            Err(StorageError::Timeout {
                operation: "slow",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn bounded_converts_source_errors() {
        let result: Result<(), StorageError> = bounded("db", Duration::from_secs(1), async {
            Err::<(), _>(sqlx::Error::PoolTimedOut)
        })
        .await;
        assert!(matches!(result, Err(StorageError::Database(_))));
    }
}
