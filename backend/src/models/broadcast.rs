//! Messages exchanged over the observer push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::train::TrainUpdate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainUpdatesPayload {
    pub trains: Vec<TrainUpdate>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BroadcastMessage {
    InitialData(TrainUpdatesPayload),
    TrainUpdates(TrainUpdatesPayload),
    Ping,
    Pong,
}

impl BroadcastMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_updates_use_type_and_data_envelope() {
        let message = BroadcastMessage::TrainUpdates(TrainUpdatesPayload {
            trains: Vec::new(),
            timestamp: Utc::now(),
        });
        let json: serde_json::Value =
            serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "train_updates");
        assert!(json["data"]["trains"].as_array().unwrap().is_empty());
    }

    #[test]
    fn ping_parses_without_data() {
        let message: BroadcastMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(message, BroadcastMessage::Ping);
        assert_eq!(BroadcastMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }
}
