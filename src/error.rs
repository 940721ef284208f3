//! Error taxonomy shared by the scheduler and every domain manager.
//!
//! [`CoreError`] is the single error type that crosses module boundaries.
//! Task bodies return `Result<TaskOutput, CoreError>`; the scheduler turns an
//! `Err` into a Failed outcome and the owning manager translates it into an
//! [`ErrorDescriptor`] for the UI.

use serde::Serialize;
use thiserror::Error;

use crate::task::TaskKind;

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

/// All errors the core can produce.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Malformed input, rejected before any task is created.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// A collaborator failed while talking to the network.
    #[error("network error: {0}")]
    Network(String),

    /// The validator rejected an unsafe value (disallowed domain, port, path).
    #[error("security check failed ({issue}): {message}")]
    Security { issue: &'static str, message: String },

    /// Scheduler or registry invariant violation, or a panicking task body.
    #[error("task error: {0}")]
    Task(String),

    /// The playback engine reported a failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// Reading or writing a local file (settings, exports) failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An operation was requested in a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Work exited at a cancellation checkpoint.
    ///
    /// Never surfaced to the UI: the scheduler records the task as Cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn security(issue: &'static str, message: impl Into<String>) -> Self {
        CoreError::Security {
            issue,
            message: message.into(),
        }
    }

    /// Flatten an `anyhow` error from the I/O layer. A `CoreError` inside it
    /// (e.g. a rejected file name) is kept as is.
    pub fn from_storage(error: anyhow::Error) -> Self {
        match error.downcast::<CoreError>() {
            Ok(core) => core,
            Err(other) => CoreError::Storage(format!("{other:#}")),
        }
    }

    /// Short category name used in logs and error descriptors.
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "validation",
            CoreError::Network(_) => "network",
            CoreError::Security { .. } => "security",
            CoreError::Task(_) => "task",
            CoreError::Engine(_) => "engine",
            CoreError::Storage(_) => "storage",
            CoreError::InvalidState { .. } => "invalid_state",
            CoreError::Cancelled => "cancelled",
        }
    }

    /// The one-line message shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Validation { message, .. } => format!("Invalid input: {message}"),
            CoreError::Network(msg) => format!("Network error: {msg}"),
            CoreError::Security { message, .. } => format!("Security check failed: {message}"),
            CoreError::Task(_) => "Internal error while running a background task".into(),
            CoreError::Engine(msg) => format!("Media player error: {msg}"),
            CoreError::Storage(msg) => format!("Could not save: {msg}"),
            CoreError::InvalidState { operation, state } => {
                format!("Cannot {operation} while {state}")
            }
            CoreError::Cancelled => "Cancelled".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorDescriptor
// ---------------------------------------------------------------------------

/// UI-facing error payload: a human-readable message plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDescriptor {
    /// Kind of the task that failed, `None` for synchronous command errors.
    pub kind: Option<TaskKind>,
    /// Error category (see [`CoreError::category`]).
    pub category: &'static str,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn from_task(kind: TaskKind, error: &CoreError) -> Self {
        Self {
            kind: Some(kind),
            category: error.category(),
            message: error.user_message(),
        }
    }

    pub fn from_command(error: &CoreError) -> Self {
        Self {
            kind: None,
            category: error.category(),
            message: error.user_message(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
