//! Network audio streaming session lifecycle.
//!
//! ```text
//! Stopped ──start──▶ Starting ──ok──────▶ Active ──stop──▶ Stopping ──▶ Stopped
//!                       └──fail/cancel──▶ Stopped
//! ```
//!
//! The engine calls that open and close the stream are blocking, so the
//! StreamStart/StreamStop bodies run them on the blocking pool.

use std::net::TcpListener;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::collab::{PlaybackEngine, StreamSession, Validator};
use crate::error::{CoreError, ErrorDescriptor};
use crate::events::{AppEvent, EventSink};
use crate::task::{
    checkpoint, Inbox, Scheduler, TaskHandle, TaskId, TaskKind, TaskOutcome, TaskOutput,
    TaskResult, TaskState,
};

/// First port probed by [`StreamingManager::available_ports`].
pub const SCAN_START: u16 = 8080;
/// One past the last probed port.
pub const SCAN_END: u16 = 8100;
const SCAN_LIMIT: usize = 5;

// ---------------------------------------------------------------------------
// StreamingState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum StreamingState {
    #[default]
    Stopped,
    Starting,
    Active,
    Stopping,
}

impl StreamingState {
    pub fn label(&self) -> &'static str {
        match self {
            StreamingState::Stopped => "stopped",
            StreamingState::Starting => "starting",
            StreamingState::Active => "active",
            StreamingState::Stopping => "stopping",
        }
    }
}

/// `http://{host}:{port}/stream.mp3`
pub fn stream_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}/stream.mp3")
}

// ---------------------------------------------------------------------------
// StreamingManager
// ---------------------------------------------------------------------------

pub struct StreamingManager {
    scheduler: Scheduler,
    inbox: Inbox,
    events: EventSink,
    engine: Arc<dyn PlaybackEngine>,
    validator: Arc<dyn Validator>,

    state: StreamingState,
    task: Option<TaskHandle>,
    session: Option<StreamSession>,
    last_error: Option<ErrorDescriptor>,
}

impl StreamingManager {
    pub fn new(
        scheduler: Scheduler,
        engine: Arc<dyn PlaybackEngine>,
        validator: Arc<dyn Validator>,
        events: EventSink,
    ) -> Self {
        Self {
            scheduler,
            inbox: Inbox::new(),
            events,
            engine,
            validator,
            state: StreamingState::Stopped,
            task: None,
            session: None,
            last_error: None,
        }
    }

    /// Begin streaming on `host:port`. Only valid while Stopped.
    pub fn start(&mut self, port: u16, host: &str) -> Result<TaskId, CoreError> {
        let port = self.validator.validate_port(port)?;
        let host = self.validator.validate_bind_host(host)?;
        if self.state != StreamingState::Stopped {
            return Err(self.invalid("start streaming"));
        }

        let engine = Arc::clone(&self.engine);
        let handle = self.scheduler.submit(
            TaskKind::StreamStart,
            &self.inbox.route(),
            CancellationToken::new(),
            move |token| open_stream(engine, host, port, token),
        );
        log::info!("streaming: starting on port {port} ({})", handle.id());
        Ok(self.track(handle, StreamingState::Starting))
    }

    /// Tear the stream down. Only valid while Active.
    pub fn stop(&mut self) -> Result<TaskId, CoreError> {
        if self.state != StreamingState::Active {
            return Err(self.invalid("stop streaming"));
        }

        let engine = Arc::clone(&self.engine);
        let handle = self.scheduler.submit(
            TaskKind::StreamStop,
            &self.inbox.route(),
            CancellationToken::new(),
            move |token| close_stream(engine, token),
        );
        log::info!("streaming: stopping ({})", handle.id());
        Ok(self.track(handle, StreamingState::Stopping))
    }

    /// Start when Stopped, stop when Active.
    pub fn toggle(&mut self, port: u16, host: &str) -> Result<TaskId, CoreError> {
        match self.state {
            StreamingState::Active => self.stop(),
            _ => self.start(port, host),
        }
    }

    /// Abort a start that has not finished yet.
    pub fn cancel_start(&mut self) -> bool {
        match (&self.task, self.state) {
            (Some(handle), StreamingState::Starting) => self.scheduler.cancel(handle.id()),
            _ => false,
        }
    }

    fn track(&mut self, handle: TaskHandle, state: StreamingState) -> TaskId {
        let id = handle.id().clone();
        self.events
            .task_progress(&id, handle.kind(), handle.admitted_as());
        self.task = Some(handle);
        self.last_error = None;
        self.set_state(state, None);
        id
    }

    pub async fn next_outcome(&mut self) -> Option<TaskOutcome> {
        self.inbox.recv().await
    }

    /// Apply a StreamStart/StreamStop outcome. Returns `false` when stale.
    pub fn handle_outcome(&mut self, outcome: TaskOutcome) -> bool {
        self.events
            .task_progress(&outcome.id, outcome.kind, outcome.state);

        if self.task.as_ref().map(|h| h.id()) != Some(&outcome.id) {
            log::debug!("streaming: ignoring stale outcome for {}", outcome.id);
            return false;
        }
        self.task = None;

        match (outcome.state, outcome.output) {
            (TaskState::Completed, Some(TaskOutput::StreamStarted(session))) => {
                log::info!("streaming: active at {}", session.url);
                self.session = Some(session);
                self.set_state(StreamingState::Active, None);
            }
            (TaskState::Completed, Some(TaskOutput::StreamStopped)) => {
                log::info!("streaming: stopped");
                self.session = None;
                self.set_state(StreamingState::Stopped, None);
            }
            (TaskState::Failed, _) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| CoreError::Task("failed without error".into()));
                log::error!("streaming: {} failed: {error}", outcome.kind);
                let descriptor = ErrorDescriptor::from_task(outcome.kind, &error);
                self.last_error = Some(descriptor.clone());
                self.session = None;
                self.set_state(StreamingState::Stopped, Some(descriptor));
            }
            (TaskState::Cancelled, _) => {
                log::info!("streaming: {} cancelled", outcome.kind);
                if outcome.kind == TaskKind::StreamStart {
                    // The stream may have opened before the cancel landed.
                    if let Err(e) = self.engine.disable_streaming() {
                        log::warn!("streaming: close after cancelled start failed: {e}");
                    }
                }
                self.session = None;
                self.set_state(StreamingState::Stopped, None);
            }
            (state, output) => {
                log::error!(
                    "streaming: unexpected {} outcome {output:?}",
                    state.label()
                );
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> StreamingState {
        self.state
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.url.as_str())
    }

    pub fn last_error(&self) -> Option<&ErrorDescriptor> {
        self.last_error.as_ref()
    }

    /// One-line status for the status bar.
    pub fn status(&self) -> String {
        match (self.state, &self.session) {
            (StreamingState::Active, Some(session)) => {
                format!("Audio streaming enabled at {}", session.url)
            }
            (StreamingState::Starting, _) => "Starting audio streaming".into(),
            (StreamingState::Stopping, _) => "Stopping audio streaming".into(),
            _ => "Audio streaming disabled".into(),
        }
    }

    /// `true` when a TCP listener can bind `host:port` right now.
    pub fn is_port_available(host: &str, port: u16) -> bool {
        TcpListener::bind((host, port)).is_ok()
    }

    /// Up to five free ports in 8080 – 8099.
    pub fn available_ports(host: &str) -> Vec<u16> {
        (SCAN_START..SCAN_END)
            .filter(|&port| Self::is_port_available(host, port))
            .take(SCAN_LIMIT)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_state(&mut self, state: StreamingState, error: Option<ErrorDescriptor>) {
        if self.state == state && error.is_none() {
            return;
        }
        log::debug!("streaming: {} → {}", self.state.label(), state.label());
        self.state = state;
        self.events.emit(AppEvent::StreamingStateChanged {
            state,
            url: self.stream_url().map(str::to_string),
            error,
        });
    }

    fn invalid(&self, operation: &'static str) -> CoreError {
        CoreError::InvalidState {
            operation,
            state: self.state.label(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task bodies
// ---------------------------------------------------------------------------

async fn open_stream(
    engine: Arc<dyn PlaybackEngine>,
    host: String,
    port: u16,
    token: CancellationToken,
) -> TaskResult {
    checkpoint(&token)?;
    let bind = host.clone();
    let blocking = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || blocking.enable_streaming(&bind, port))
        .await
        .map_err(|e| CoreError::Task(format!("enable_streaming join failed: {e}")))??;

    if token.is_cancelled() {
        // Cancelled while the engine was opening the stream: close it again.
        if let Err(e) = engine.disable_streaming() {
            log::warn!("streaming: rollback after cancel failed: {e}");
        }
        return Err(CoreError::Cancelled);
    }

    Ok(TaskOutput::StreamStarted(StreamSession {
        url: stream_url(&host, port),
        host,
        port,
    }))
}

async fn close_stream(engine: Arc<dyn PlaybackEngine>, token: CancellationToken) -> TaskResult {
    checkpoint(&token)?;
    tokio::task::spawn_blocking(move || engine.disable_streaming())
        .await
        .map_err(|e| CoreError::Task(format!("disable_streaming join failed: {e}")))??;
    Ok(TaskOutput::StreamStopped)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
