use std::path::PathBuf;

use thiserror::Error;

use crate::id::Id;

#[derive(Debug, Error)]
pub enum GleanerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Id },

    #[error("invalid id '{0}': expected a canonical uuid")]
    InvalidId(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot compile regex at {field}: {source}")]
    InvalidRegex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("cannot delete a default source type: {0}")]
    ProtectedSourceType(Id),

    #[error("action {action} still has queued work ({pending} pending, {inflight} in flight, {deadletter} dead-lettered)")]
    QueueNotEmpty {
        action: Id,
        pending: usize,
        inflight: usize,
        deadletter: usize,
    },

    #[error("queue item already exists: {0}")]
    AlreadyQueued(Id),

    #[error("queue item not found: {0}")]
    QueueItemNotFound(Id),

    #[error("cannot read queue item {}: {reason}", path.display())]
    CorruptQueueItem { path: PathBuf, reason: String },

    #[error("no queue manager registered for action {0}")]
    UnknownAction(Id),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("filesystem watch error: {0}")]
    Watch(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Exec(#[from] action_exec::ExecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GleanerError {
    pub(crate) fn not_found(kind: &'static str, id: Id) -> Self {
        Self::NotFound { kind, id }
    }
}

pub type Result<T> = std::result::Result<T, GleanerError>;
