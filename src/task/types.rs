//! Task identity, kinds, states and outcomes.

use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::collab::{MediaHandle, RawCue, StreamDescriptor, StreamSession, VideoInfo};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Unique task identifier; registry key and log correlator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(String);

impl TaskId {
    /// A fresh random (uuid v4) id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// A caller-assigned id.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// What a task does. The scheduler treats all kinds alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    VideoResolve,
    TranscriptFetch,
    PlaylistFetch,
    StreamStart,
    StreamStop,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::VideoResolve => "video-resolve",
            TaskKind::TranscriptFetch => "transcript-fetch",
            TaskKind::PlaylistFetch => "playlist-fetch",
            TaskKind::StreamStart => "stream-start",
            TaskKind::StreamStop => "stream-stop",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Task lifecycle.
///
/// ```text
/// Queued ──admit──▶ Running ──▶ Completed | Failed | Cancelled
///    └──────────cancel──────────────────────────────▶ Cancelled
/// ```
///
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// TaskOutput / TaskResult
// ---------------------------------------------------------------------------

/// Successful result of a task body, one variant per domain operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// VideoResolve: the extracted stream and the engine's media handle.
    Resolved {
        descriptor: StreamDescriptor,
        media: MediaHandle,
    },
    /// TranscriptFetch: raw cues as delivered by the collaborator.
    Cues {
        video_id: String,
        language: Option<String>,
        /// Every language the source offers for the video.
        available: Vec<String>,
        cues: Vec<RawCue>,
    },
    /// PlaylistFetch: metadata for one playlist item.
    Metadata { item_id: String, info: VideoInfo },
    /// StreamStart.
    StreamStarted(StreamSession),
    /// StreamStop.
    StreamStopped,
}

/// What every task body returns.
pub type TaskResult = Result<TaskOutput, CoreError>;

/// Cancellation checkpoint for task bodies.
///
/// Returns `Err(CoreError::Cancelled)` once cancellation was requested so the
/// body can bail out with `?`.
pub fn checkpoint(token: &CancellationToken) -> Result<(), CoreError> {
    if token.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// Terminal outcome handed to the owner exactly once.
///
/// `output` is present only for Completed, `error` only for Failed; a
/// Cancelled outcome carries neither.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    pub output: Option<TaskOutput>,
    pub error: Option<CoreError>,
}

impl TaskOutcome {
    pub fn completed(id: TaskId, kind: TaskKind, output: TaskOutput) -> Self {
        Self {
            id,
            kind,
            state: TaskState::Completed,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(id: TaskId, kind: TaskKind, error: CoreError) -> Self {
        Self {
            id,
            kind,
            state: TaskState::Failed,
            output: None,
            error: Some(error),
        }
    }

    pub fn cancelled(id: TaskId, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            state: TaskState::Cancelled,
            output: None,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRecord
// ---------------------------------------------------------------------------

/// Read-only snapshot of a registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    pub cancel_requested: bool,
    /// Failure message, present only when `state == Failed`.
    pub error: Option<String>,
    pub dispatched: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn checkpoint_follows_token() {
        let token = CancellationToken::new();
        assert!(checkpoint(&token).is_ok());
        token.cancel();
        assert_eq!(checkpoint(&token), Err(CoreError::Cancelled));
    }

    #[test]
    fn cancelled_outcome_has_no_payload() {
        let o = TaskOutcome::cancelled(TaskId::from_name("t"), TaskKind::StreamStop);
        assert!(o.output.is_none());
        assert!(o.error.is_none());
        assert_eq!(o.state, TaskState::Cancelled);
    }
}
