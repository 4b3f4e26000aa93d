//! Log entry types submitted to the audit pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One unit of work to persist.
///
/// `attributes` accepts arbitrary nested JSON without a fixed schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the event happened.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Severity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Human-readable message. Entries with an empty message are discarded.
    pub message: String,
    /// Free-form structured context.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl LogEntry {
    /// Create an entry stamped with the current time and no attributes.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            attributes: Map::new(),
        }
    }

    /// Attach an attribute, replacing any previous value under `key`.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Entries without a message carry nothing worth persisting.
    pub fn is_valid(&self) -> bool {
        !self.message.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_serializes_uppercase() {
        let entry = LogEntry::new(LogLevel::Warn, "quota nearly exhausted");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""level":"WARN""#));
        assert!(!json.contains("attributes"));
    }

    #[test]
    fn test_nested_attributes_round_trip() {
        let entry = LogEntry::new(LogLevel::Info, "file uploaded")
            .with_attribute("user_id", 42)
            .with_attribute("file", json!({"name": "essay.pdf", "size": 1024, "tags": ["hw"]}));

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: LogEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, entry);
        assert_eq!(parsed.attributes["file"]["tags"][0], "hw");
    }

    #[test]
    fn test_deserialize_minimal_entry() {
        let entry: LogEntry = serde_json::from_str(r#"{"message":"login"}"#).unwrap();
        assert_eq!(entry.level, LogLevel::Info);
        assert!(entry.attributes.is_empty());
        assert!(entry.is_valid());
    }

    #[test]
    fn test_empty_message_is_invalid() {
        assert!(!LogEntry::new(LogLevel::Error, "").is_valid());
    }
}
