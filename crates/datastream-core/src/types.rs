//! Data model shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A key a backend can serve, with its declared value type.
///
/// Capabilities are a read-only projection of backend state and are
/// recomputed on every enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    /// Key identifier.
    pub key: String,
    /// Kind of value stored under the key.
    pub value_type: String,
}

impl Capability {
    /// Create a new capability.
    pub fn new(key: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_type: value_type.into(),
        }
    }
}

/// The unit of data moved by pull, subscribe and push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Key identifier.
    pub key: String,
    /// Raw value bytes.
    pub value: Vec<u8>,
    /// Kind of value.
    pub value_type: String,
    /// When the value was last changed.
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a record stamped with the current time.
    pub fn new(
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        value_type: impl Into<String>,
    ) -> Self {
        Self::at(key, value, value_type, Utc::now())
    }

    /// Create a record with an explicit update time.
    pub fn at(
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        value_type: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            value_type: value_type.into(),
            updated_at,
        }
    }

    /// Value interpreted as UTF-8, if it is valid.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Project this record onto its capability.
    pub fn capability(&self) -> Capability {
        Capability::new(&self.key, &self.value_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_constructors() {
        let before = Utc::now();
        let record = Record::new("max_connections", "10", "int");
        assert_eq!(record.key, "max_connections");
        assert_eq!(record.value_str(), Some("10"));
        assert!(record.updated_at >= before);
        assert_eq!(record.capability(), Capability::new("max_connections", "int"));
    }

    #[test]
    fn test_binary_value() {
        let record = Record::new("blob", vec![0xff, 0xfe], "binary");
        assert!(record.value_str().is_none());
    }
}
