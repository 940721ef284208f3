//! Events pushed from the core to the UI layer.
//!
//! Managers emit [`AppEvent`]s through an [`EventSink`]; the UI drains the
//! receiving half of the channel. Payloads carry domain state or an
//! [`ErrorDescriptor`], never raw tasks.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::ErrorDescriptor;
use crate::playback::{MediaInfo, PlaybackState};
use crate::playlist::PlaylistItem;
use crate::streaming::StreamingState;
use crate::task::{TaskId, TaskKind, TaskState};

// ---------------------------------------------------------------------------
// AppEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    PlaybackStateChanged {
        state: PlaybackState,
        error: Option<ErrorDescriptor>,
    },
    /// A video finished resolving and playback started.
    MediaLoaded(MediaInfo),
    VolumeChanged(u8),
    PositionChanged {
        time_ms: u64,
        length_ms: u64,
    },
    TranscriptReady {
        video_id: String,
        language: Option<String>,
        cue_count: usize,
    },
    TranscriptCleared,
    TranscriptError(ErrorDescriptor),
    PlaylistChanged {
        items: Vec<PlaylistItem>,
        current: Option<usize>,
    },
    StreamingStateChanged {
        state: StreamingState,
        url: Option<String>,
        error: Option<ErrorDescriptor>,
    },
    /// A background task changed state.
    TaskProgress {
        id: TaskId,
        kind: TaskKind,
        state: TaskState,
    },
    /// A background task failed and no dedicated event covers it.
    TaskFailed(ErrorDescriptor),
    /// A UI command was refused before any work started.
    CommandRejected(ErrorDescriptor),
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Sending half of the UI event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<AppEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the UI reads from.
    pub fn channel() -> (Self, UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink whose events go nowhere.
    pub fn discard() -> Self {
        Self::channel().0
    }

    /// Send an event. A closed UI channel is not an error for the core.
    pub fn emit(&self, event: AppEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("events: receiver closed, event dropped");
        }
    }

    pub fn task_progress(&self, id: &TaskId, kind: TaskKind, state: TaskState) {
        self.emit(AppEvent::TaskProgress {
            id: id.clone(),
            kind,
            state,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
