use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use crate::models::command::CommandId;

/// Status recorded by one progress log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    Starting,
    StartCommand,
    ResizeComplete,
    WroteFile,
    Error,
    OperationComplete,
    Fail,
}

/// One entry of a job's progress log. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub status: ProgressStatus,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,

    pub iso_time: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressEntry {
    /// Entry stamped with the current time.
    pub fn now(status: ProgressStatus) -> Self {
        let now = Utc::now();
        Self {
            status,
            timestamp: now.timestamp_millis(),
            iso_time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            command_id: None,
            extra: Map::new(),
        }
    }

    pub fn for_command(mut self, command_id: &CommandId) -> Self {
        self.command_id = Some(command_id.clone());
        self
    }

    /// Attach an extra field. Values that fail to serialize are dropped.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.extra.insert(key.to_string(), value);
            }
            Err(e) => tracing::warn!(key, error = %e, "Dropping unserializable progress field"),
        }
        self
    }

    /// Extra field rendered as a string, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(ProgressStatus::OperationComplete).unwrap(),
            Value::String("OPERATION_COMPLETE".into())
        );
        assert_eq!(ProgressStatus::StartCommand.to_string(), "START_COMMAND");
        assert_eq!(
            serde_json::from_str::<ProgressStatus>(r#""WROTE_FILE""#).unwrap(),
            ProgressStatus::WroteFile
        );
    }

    #[test]
    fn test_entry_json_shape() {
        let id = CommandId::generate();
        let entry = ProgressEntry::now(ProgressStatus::WroteFile)
            .for_command(&id)
            .with("filename", "out.jpeg");

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "WROTE_FILE");
        assert_eq!(json["commandId"], id.as_str());
        assert_eq!(json["filename"], "out.jpeg");
        assert!(json["timestamp"].is_i64());
        assert!(json["isoTime"].as_str().unwrap().ends_with('Z'));

        let text = serde_json::to_string(&entry).unwrap();
        assert!(!text.contains('\n'));

        let back: ProgressEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.field("filename"), Some("out.jpeg"));
    }

    #[test]
    fn test_job_scoped_entry_has_no_command_id() {
        let json = serde_json::to_value(ProgressEntry::now(ProgressStatus::Starting)).unwrap();
        assert!(json.get("commandId").is_none());
    }
}
