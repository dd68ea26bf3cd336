use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::command::{Command, Transform};

/// Job payload accepted by the gateway and the `run-job` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(alias = "pathname")]
    pub source_path: PathBuf,

    /// A single command object is accepted in place of an array.
    #[serde(default, deserialize_with = "one_or_many")]
    pub commands: Vec<Command>,

    /// Applied once to the source before any command runs.
    #[serde(default)]
    pub transform: Option<Transform>,
}

/// Extra settings for a job operation at creation time.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub transform: Option<Transform>,
    pub commands: Vec<Command>,
}

/// Aggregate result of a job, resolved exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub succeeded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            succeeded: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reason: Some(reason.into()),
        }
    }
}

/// Response returned by `POST /job`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub uuid: Uuid,
    pub output_dir: PathBuf,
    pub log: PathBuf,
    pub succeeded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_pathname_and_command_list() {
        let request: JobRequest = serde_json::from_str(
            r#"{"pathname":"/tmp/img1.jpeg","commands":[
                {"filename":"a.jpeg","width":480,"height":640,"transform":{}},
                {"filename":"b.jpeg","width":120,"height":160}]}"#,
        )
        .unwrap();

        assert_eq!(request.source_path, PathBuf::from("/tmp/img1.jpeg"));
        assert_eq!(request.commands.len(), 2);
        assert!(request.transform.is_none());
    }

    #[test]
    fn test_request_wraps_single_command() {
        let request: JobRequest = serde_json::from_str(
            r#"{"sourcePath":"/tmp/img1.jpeg","commands":{"filename":"a.png"}}"#,
        )
        .unwrap();

        assert_eq!(request.commands, vec![Command::new("a.png")]);
    }

    #[test]
    fn test_request_without_commands_is_empty() {
        let request: JobRequest = serde_json::from_str(r#"{"pathname":"/tmp/x.png"}"#).unwrap();
        assert!(request.commands.is_empty());
    }

    #[test]
    fn test_request_requires_source() {
        assert!(serde_json::from_str::<JobRequest>(r#"{"commands":[]}"#).is_err());
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = serde_json::to_value(JobOutcome::succeeded()).unwrap();
        assert_eq!(ok, serde_json::json!({"succeeded": true}));

        let failed = serde_json::to_value(JobOutcome::failed("boom")).unwrap();
        assert_eq!(failed, serde_json::json!({"succeeded": false, "reason": "boom"}));
    }
}
