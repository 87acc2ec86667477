use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A requested download, as carried on the inbound lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier assigned at intake
    pub task_id: String,

    /// Media location to fetch
    #[serde(alias = "url")]
    pub source_url: String,

    /// Conversation to notify with the outcome
    #[serde(alias = "chat_id")]
    pub destination: String,
}

impl Task {
    /// Create a task with a freshly generated identifier
    pub fn new(source_url: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            source_url: source_url.into(),
            destination: destination.into(),
        }
    }
}

/// Terminal outcome of a task
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { file_path: PathBuf },
    Failed { reason: String },
}

/// Result of a task, as carried on the outbound lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ResultRecord", try_from = "ResultRecord")]
pub struct TaskResult {
    pub task_id: String,
    pub destination: String,
    pub outcome: Outcome,
}

impl TaskResult {
    pub fn completed(task: &Task, file_path: PathBuf) -> Self {
        Self {
            task_id: task.task_id.clone(),
            destination: task.destination.clone(),
            outcome: Outcome::Completed { file_path },
        }
    }

    pub fn failed(task: &Task, reason: impl Into<String>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            destination: task.destination.clone(),
            outcome: Outcome::Failed { reason: reason.into() },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed { .. })
    }
}

/// Flat JSON shape of a result record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: String,
    #[serde(alias = "chat_id")]
    pub destination: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

impl From<TaskResult> for ResultRecord {
    fn from(result: TaskResult) -> Self {
        match result.outcome {
            Outcome::Completed { file_path } => Self {
                task_id: result.task_id,
                destination: result.destination,
                status: STATUS_COMPLETED.to_string(),
                file_path: Some(file_path.to_string_lossy().into_owned()),
                error: None,
            },
            Outcome::Failed { reason } => Self {
                task_id: result.task_id,
                destination: result.destination,
                status: STATUS_FAILED.to_string(),
                file_path: None,
                error: Some(reason),
            },
        }
    }
}

impl TryFrom<ResultRecord> for TaskResult {
    type Error = String;

    fn try_from(record: ResultRecord) -> Result<Self, Self::Error> {
        let outcome = match record.status.as_str() {
            STATUS_COMPLETED => {
                let file_path = record
                    .file_path
                    .filter(|path| !path.is_empty())
                    .ok_or_else(|| "completed result without file_path".to_string())?;
                Outcome::Completed {
                    file_path: PathBuf::from(file_path),
                }
            }
            STATUS_FAILED => Outcome::Failed {
                reason: record.error.unwrap_or_else(|| "Unknown error".to_string()),
            },
            other => return Err(format!("unknown status: {}", other)),
        };

        Ok(Self {
            task_id: record.task_id,
            destination: record.destination,
            outcome,
        })
    }
}
