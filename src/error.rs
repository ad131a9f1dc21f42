use serde_json::json;
use thiserror::Error;

/// Failures raised by the results engine.
///
/// Everything except `Db` is raised before any write is attempted, so callers can
/// surface the message verbatim.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{message}")]
    GuardViolation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("marks entry incomplete: {completed}/{total} subjects completed")]
    NotReady { completed: usize, total: usize },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{what} not found")]
    NotFound { what: &'static str },

    #[error("storage error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn guard(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::GuardViolation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(what: &'static str) -> Self {
        Self::NotFound { what }
    }

    /// Stable error code used on the IPC wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::GuardViolation { .. } => "guard_violation",
            Self::NotReady { .. } => "not_ready",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Db(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { details, .. } | Self::GuardViolation { details, .. } => {
                details.clone()
            }
            Self::NotReady { completed, total } => Some(json!({
                "completedSubjects": completed,
                "totalSubjects": total,
            })),
            Self::Conflict { .. } => Some(json!({ "retryable": true })),
            Self::NotFound { .. } | Self::Db(_) => None,
        }
    }

    /// Lock contention from another writer on the workspace database surfaces as a
    /// retryable conflict rather than a storage failure.
    pub fn from_write(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::conflict("another writer holds the workspace lock; retry")
            }
            _ => Self::Db(e),
        }
    }
}
