//! Relational tracking session rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::{fmt, str::FromStr};

use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Terminated,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    Mobile,
    Web,
    Other,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Mobile => "mobile",
            ClientType::Web => "web",
            ClientType::Other => "other",
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, ClientType::Mobile)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl FromStr for SessionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "terminated" => Ok(SessionStatus::Terminated),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(UnknownVariant {
                kind: "session status",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for ClientType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile" => Ok(ClientType::Mobile),
            "web" => Ok(ClientType::Web),
            "other" => Ok(ClientType::Other),
            other => Err(UnknownVariant {
                kind: "client type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `tracking_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub train_number: String,
    pub client_type: ClientType,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: SessionStatus,
}

impl TrackingSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

impl<'r> FromRow<'r, PgRow> for TrackingSession {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let client_type: String = row.try_get("client_type")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            train_number: row.try_get("train_number")?,
            client_type: client_type
                .parse()
                .map_err(|e| decode_error("client_type", e))?,
            started_at: row.try_get("started_at")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            status: status.parse().map_err(|e| decode_error("status", e))?,
        })
    }
}

fn decode_error(column: &str, err: UnknownVariant) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    }
}
