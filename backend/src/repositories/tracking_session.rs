//! Tracking session rows: the source of truth for who is currently tracking.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StorageError;
use crate::models::tracking_session::{SessionStatus, TrackingSession};
use crate::types::{SessionId, UserId};
use crate::utils::timeout::bounded;

const SESSION_COLUMNS: &str =
    "id, user_id, train_number, client_type, started_at, last_heartbeat, status";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackingSessionRepository: Send + Sync {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<TrackingSession>, StorageError>;

    async fn find_active_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TrackingSession>, StorageError>;

    async fn find_active_by_train(
        &self,
        train_number: &str,
    ) -> Result<Vec<TrackingSession>, StorageError>;

    async fn list_active(&self) -> Result<Vec<TrackingSession>, StorageError>;

    async fn create(&self, session: &TrackingSession) -> Result<(), StorageError>;

    /// Only moves the heartbeat of an active row. Returns `false` when no
    /// active row matched.
    async fn update_heartbeat(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Returns `false` when no row matched.
    async fn update_status(&self, id: SessionId, status: SessionStatus)
        -> Result<bool, StorageError>;
}

pub struct PgTrackingSessionRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgTrackingSessionRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl TrackingSessionRepository for PgTrackingSessionRepository {
    async fn find_by_id(&self, id: SessionId) -> Result<Option<TrackingSession>, StorageError> {
        let sql = format!("SELECT {} FROM tracking_sessions WHERE id = $1", SESSION_COLUMNS);
        bounded(
            "find_session_by_id",
            self.timeout,
            sqlx::query_as::<_, TrackingSession>(&sql)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_active_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TrackingSession>, StorageError> {
        let sql = format!(
            "SELECT {} FROM tracking_sessions WHERE user_id = $1 AND status = 'active' \
             ORDER BY started_at DESC",
            SESSION_COLUMNS
        );
        bounded(
            "find_active_sessions_by_user",
            self.timeout,
            sqlx::query_as::<_, TrackingSession>(&sql)
                .bind(user_id)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn find_active_by_train(
        &self,
        train_number: &str,
    ) -> Result<Vec<TrackingSession>, StorageError> {
        let sql = format!(
            "SELECT {} FROM tracking_sessions WHERE train_number = $1 AND status = 'active' \
             ORDER BY started_at, id",
            SESSION_COLUMNS
        );
        bounded(
            "find_active_sessions_by_train",
            self.timeout,
            sqlx::query_as::<_, TrackingSession>(&sql)
                .bind(train_number)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn list_active(&self) -> Result<Vec<TrackingSession>, StorageError> {
        let sql = format!(
            "SELECT {} FROM tracking_sessions WHERE status = 'active' \
             ORDER BY train_number, started_at, id",
            SESSION_COLUMNS
        );
        bounded(
            "list_active_sessions",
            self.timeout,
            sqlx::query_as::<_, TrackingSession>(&sql).fetch_all(&self.pool),
        )
        .await
    }

    async fn create(&self, session: &TrackingSession) -> Result<(), StorageError> {
        bounded(
            "create_session",
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO tracking_sessions
                    (id, user_id, train_number, client_type, started_at, last_heartbeat, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.train_number)
            .bind(session.client_type.as_str())
            .bind(session.started_at)
            .bind(session.last_heartbeat)
            .bind(session.status.as_str())
            .execute(&self.pool),
        )
        .await
        .map(|_| ())
    }

    async fn update_heartbeat(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result = bounded(
            "update_session_heartbeat",
            self.timeout,
            sqlx::query(
                r#"
                UPDATE tracking_sessions
                SET last_heartbeat = GREATEST(last_heartbeat, $1)
                WHERE id = $2 AND status = 'active'
                "#,
            )
            .bind(at)
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<bool, StorageError> {
        let result = bounded(
            "update_session_status",
            self.timeout,
            sqlx::query("UPDATE tracking_sessions SET status = $1 WHERE id = $2")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryTrackingSessionRepository;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;

    /// Session table kept in a map, with read counting and failure injection
    /// for tests.
    #[derive(Default)]
    pub struct InMemoryTrackingSessionRepository {
        rows: Mutex<HashMap<SessionId, TrackingSession>>,
        reads: AtomicUsize,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl InMemoryTrackingSessionRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of read queries served so far.
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        pub fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn get(&self, id: SessionId) -> Option<TrackingSession> {
            self.rows().get(&id).cloned()
        }

        /// Overwrites a row as-is, bypassing the write failure switch.
        pub fn insert(&self, session: TrackingSession) {
            self.rows().insert(session.id, session);
        }

        fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, TrackingSession>> {
            self.rows.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn read(&self) -> Result<(), StorageError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StorageError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }

        fn write(&self) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }

        fn select(&self, filter: impl Fn(&TrackingSession) -> bool) -> Vec<TrackingSession> {
            let mut rows: Vec<TrackingSession> =
                self.rows().values().filter(|s| filter(s)).cloned().collect();
            rows.sort_by(|a, b| {
                (&a.train_number, a.started_at, a.id).cmp(&(&b.train_number, b.started_at, b.id))
            });
            rows
        }
    }

    #[async_trait]
    impl TrackingSessionRepository for InMemoryTrackingSessionRepository {
        async fn find_by_id(
            &self,
            id: SessionId,
        ) -> Result<Option<TrackingSession>, StorageError> {
            self.read()?;
            Ok(self.get(id))
        }

        async fn find_active_by_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<TrackingSession>, StorageError> {
            self.read()?;
            Ok(self.select(|s| s.is_active() && s.user_id == user_id))
        }

        async fn find_active_by_train(
            &self,
            train_number: &str,
        ) -> Result<Vec<TrackingSession>, StorageError> {
            self.read()?;
            Ok(self.select(|s| s.is_active() && s.train_number == train_number))
        }

        async fn list_active(&self) -> Result<Vec<TrackingSession>, StorageError> {
            self.read()?;
            Ok(self.select(TrackingSession::is_active))
        }

        async fn create(&self, session: &TrackingSession) -> Result<(), StorageError> {
            self.write()?;
            let mut rows = self.rows();
            if session.is_active()
                && rows
                    .values()
                    .any(|s| s.is_active() && s.user_id == session.user_id)
            {
                return Err(StorageError::Database(sqlx::Error::Protocol(
                    "duplicate active session for user".into(),
                )));
            }
            rows.insert(session.id, session.clone());
            Ok(())
        }

        async fn update_heartbeat(
            &self,
            id: SessionId,
            at: DateTime<Utc>,
        ) -> Result<bool, StorageError> {
            self.write()?;
            Ok(match self.rows().get_mut(&id) {
                Some(row) if row.is_active() => {
                    row.last_heartbeat = row.last_heartbeat.max(at);
                    true
                }
                _ => false,
            })
        }

        async fn update_status(
            &self,
            id: SessionId,
            status: SessionStatus,
        ) -> Result<bool, StorageError> {
            self.write()?;
            Ok(match self.rows().get_mut(&id) {
                Some(row) => {
                    row.status = status;
                    true
                }
                None => false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tracking_session::ClientType;

    fn session(user_id: UserId, train: &str) -> TrackingSession {
        let now = Utc::now();
        TrackingSession {
            id: SessionId::new(),
            user_id,
            train_number: train.to_string(),
            client_type: ClientType::Mobile,
            started_at: now,
            last_heartbeat: now,
            status: SessionStatus::Active,
        }
    }

    #[test]
    fn test_mock_tracking_session_repository_trait_bounds() {
        fn check_send_sync<T: Send + Sync>() {}
        check_send_sync::<MockTrackingSessionRepository>();
    }

    #[tokio::test]
    async fn in_memory_repository_enforces_single_active_session_per_user() {
        let repo = InMemoryTrackingSessionRepository::new();
        let user = UserId::new();
        let first = session(user, "T1");
        repo.create(&first).await.unwrap();
        assert!(repo.create(&session(user, "T2")).await.is_err());

        repo.update_status(first.id, SessionStatus::Terminated)
            .await
            .unwrap();
        repo.create(&session(user, "T2")).await.unwrap();
        let active = repo.find_active_by_user(user).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].train_number, "T2");
    }

    #[tokio::test]
    async fn in_memory_heartbeat_never_moves_backwards() {
        let repo = InMemoryTrackingSessionRepository::new();
        let row = session(UserId::new(), "T1");
        repo.create(&row).await.unwrap();
        let earlier = row.last_heartbeat - chrono::Duration::minutes(1);
        assert!(repo.update_heartbeat(row.id, earlier).await.unwrap());
        assert_eq!(repo.get(row.id).unwrap().last_heartbeat, row.last_heartbeat);
        assert!(!repo.update_heartbeat(SessionId::new(), earlier).await.unwrap());
    }

    #[tokio::test]
    async fn in_memory_heartbeat_skips_finished_sessions() {
        let repo = InMemoryTrackingSessionRepository::new();
        let row = session(UserId::new(), "T1");
        repo.create(&row).await.unwrap();
        repo.update_status(row.id, SessionStatus::Completed)
            .await
            .unwrap();

        let later = row.last_heartbeat + chrono::Duration::minutes(1);
        assert!(!repo.update_heartbeat(row.id, later).await.unwrap());
        assert_eq!(repo.get(row.id).unwrap().last_heartbeat, row.last_heartbeat);
    }
}
