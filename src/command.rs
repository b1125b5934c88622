use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

use crate::error::BridgeError;

/// One requested operation, as dropped into the command directory.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Command {
    pub(crate) action: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) timestamp: Option<f64>,
    #[serde(default, deserialize_with = "optional_id")]
    pub(crate) task_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub(crate) tag_id: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    pub(crate) project_id: Option<String>,
    #[serde(default, alias = "payload")]
    pub(crate) data: Option<Map<String, Value>>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) script: Option<String>,
    #[serde(default)]
    pub(crate) args: Vec<Value>,
}

impl Command {
    /// Identifier the response file is named after, if the command carries one.
    pub(crate) fn response_id(&self) -> Option<&str> {
        [&self.id, &self.tag_id, &self.task_id, &self.project_id]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|value| !value.trim().is_empty())
    }
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<RawId>::deserialize(deserializer)? {
        None => None,
        Some(RawId::Text(value)) => Some(value),
        Some(RawId::Number(value)) => Some(value.to_string()),
    })
}

pub(crate) fn parse_command(raw: &str) -> Result<Command, BridgeError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| BridgeError::MalformedCommand(format!("malformed JSON: {err}")))?;
    let Value::Object(object) = &value else {
        return Err(BridgeError::MalformedCommand(
            "command must be a JSON object".to_string(),
        ));
    };
    match object.get("action") {
        None | Some(Value::Null) => return Err(BridgeError::MissingField("action")),
        Some(Value::String(action)) if action.trim().is_empty() => {
            return Err(BridgeError::MissingField("action"))
        }
        _ => {}
    }

    serde_path_to_error::deserialize(value).map_err(|err| {
        let path = err.path().to_string();
        BridgeError::MalformedCommand(format!("{}: {}", path, err.into_inner()))
    })
}

/// Best-effort response id for a command that failed typed parsing: the first
/// usable `id`, `tagId`, `taskId` or `projectId` of a JSON object.
pub(crate) fn salvage_response_id(raw: &str) -> Option<String> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };
    ["id", "tagId", "taskId", "projectId"]
        .into_iter()
        .filter_map(|key| match object.get(key) {
            Some(Value::String(value)) if !value.trim().is_empty() => Some(value.clone()),
            Some(Value::Number(value)) => Some(value.to_string()),
            _ => None,
        })
        .next()
}

/// A command file discovered in the command directory.
#[derive(Clone, Debug)]
pub(crate) struct CommandFile {
    pub(crate) filename: String,
    pub(crate) path: PathBuf,
    pub(crate) command: Command,
}

impl CommandFile {
    pub(crate) fn response_id(&self) -> String {
        self.command
            .response_id()
            .map(str::to_string)
            .unwrap_or_else(|| file_stem(&self.filename))
    }
}

/// Filename without its final extension; the fallback response id.
pub(crate) fn file_stem(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => filename.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Response {
    pub(crate) success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    pub(crate) timestamp: i64,
}

impl Response {
    pub(crate) fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            timestamp: now_millis(),
        }
    }

    pub(crate) fn failure(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
            timestamp: now_millis(),
        }
    }
}

impl From<Result<Value, BridgeError>> for Response {
    fn from(outcome: Result<Value, BridgeError>) -> Self {
        match outcome {
            Ok(result) => Self::ok(result),
            Err(err) => Self::failure(err),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
