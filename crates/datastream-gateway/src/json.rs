//! JSON request and response types for the HTTP gateway.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use datastream_core::{Capability, Record};

use crate::error::AppError;

/// Record on the wire. Values are hex encoded since they are raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordJson {
    /// Key identifier.
    pub key: String,
    /// Hex-encoded value bytes.
    pub value: String,
    /// Kind of value.
    pub value_type: String,
    /// Last change time; optional on push, where it defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Record> for RecordJson {
    fn from(record: Record) -> Self {
        Self {
            key: record.key,
            value: hex::encode(&record.value),
            value_type: record.value_type,
            updated_at: Some(record.updated_at),
        }
    }
}

impl TryFrom<RecordJson> for Record {
    type Error = AppError;

    fn try_from(json: RecordJson) -> Result<Self, AppError> {
        let value = hex::decode(&json.value)?;
        Ok(Record::at(
            json.key,
            value,
            json.value_type,
            json.updated_at.unwrap_or_else(Utc::now),
        ))
    }
}

/// Generic success response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Success flag.
    pub success: bool,
}

impl SuccessResponse {
    /// Create a new success response.
    pub fn new() -> Self {
        Self { success: true }
    }
}

impl Default for SuccessResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Backend family.
    pub backend: String,
    /// Whether the backend answered an enumeration.
    pub backend_reachable: bool,
}

/// Capability listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    /// Every key the backend can serve.
    pub capabilities: Vec<Capability>,
}

/// Pull request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct PullRequest {
    /// Keys to fetch.
    pub keys: Vec<String>,
}

/// Pull response.
#[derive(Debug, Serialize, Deserialize)]
pub struct PullResponse {
    /// Current record per key.
    pub data: HashMap<String, RecordJson>,
}

impl From<HashMap<String, Record>> for PullResponse {
    fn from(records: HashMap<String, Record>) -> Self {
        Self {
            data: records
                .into_iter()
                .map(|(key, record)| (key, record.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_json_encodes_hex() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let json = RecordJson::from(Record::at("k", "10", "int", ts));
        assert_eq!(json.value, "3130");

        let text = serde_json::to_value(&json).unwrap();
        assert_eq!(text["updated_at"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_push_body_without_timestamp() {
        let json: RecordJson =
            serde_json::from_str(r#"{"key":"k","value":"6869","value_type":"text"}"#).unwrap();
        assert!(json.updated_at.is_none());

        let before = Utc::now();
        let record = Record::try_from(json).unwrap();
        assert_eq!(record.value, b"hi");
        assert!(record.updated_at >= before);
    }

    #[test]
    fn test_invalid_hex_is_bad_request() {
        let json = RecordJson {
            key: "k".into(),
            value: "zz".into(),
            value_type: "text".into(),
            updated_at: None,
        };
        assert!(matches!(Record::try_from(json), Err(AppError::BadRequest(_))));
    }
}
