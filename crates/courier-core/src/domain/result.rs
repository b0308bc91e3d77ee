//! Task results as written by the external worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::TaskId;

/// A stored result value.
///
/// Payloads are not trusted to be well-formed: anything that does not parse
/// as JSON is kept byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Json(Value),
    Raw(Vec<u8>),
}

impl TaskResult {
    pub fn decode(raw: &[u8]) -> Self {
        match serde_json::from_slice(raw) {
            Ok(value) => TaskResult::Json(value),
            Err(err) => {
                tracing::debug!(error = %err, len = raw.len(), "result is not JSON, keeping raw bytes");
                TaskResult::Raw(raw.to_vec())
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            TaskResult::Json(value) => Some(value),
            TaskResult::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            TaskResult::Json(_) => None,
            TaskResult::Raw(bytes) => Some(bytes),
        }
    }

    /// Typed view of the standard result document, if it has that shape.
    pub fn meta(&self) -> Option<ResultMeta> {
        let value = self.as_json()?;
        if !value.get("status").is_some_and(Value::is_string) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

/// The document the worker's Redis result backend stores:
/// `{"status": "SUCCESS", "result": 3, "traceback": null, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    pub status: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub traceback: Option<String>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub date_done: Option<String>,
    #[serde(default)]
    pub children: Vec<Value>,
}

impl ResultMeta {
    pub fn is_success(&self) -> bool {
        self.status == "SUCCESS"
    }

    pub fn is_failure(&self) -> bool {
        self.status == "FAILURE"
    }
}

/// One entry of a result listing.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub task_id: TaskId,
    pub result: TaskResult,
}
