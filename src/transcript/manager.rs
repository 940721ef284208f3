//! Transcript manager: owns the current [`TranscriptIndex`] and the one
//! TranscriptFetch whose result is still wanted.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::collab::{TranscriptSource, Validator};
use crate::error::{CoreError, ErrorDescriptor};
use crate::events::{AppEvent, EventSink};
use crate::task::{
    checkpoint, Inbox, Scheduler, TaskHandle, TaskId, TaskKind, TaskOutcome, TaskOutput,
    TaskResult, TaskState,
};

use super::export::{self, ExportFormat};
use super::index::{Cue, TranscriptIndex};

pub struct TranscriptManager {
    scheduler: Scheduler,
    inbox: Inbox,
    events: EventSink,
    source: Arc<dyn TranscriptSource>,
    validator: Arc<dyn Validator>,

    fetch: Option<TaskHandle>,
    index: TranscriptIndex,
    video_id: Option<String>,
    language: Option<String>,
    available_languages: Vec<String>,
    last_error: Option<ErrorDescriptor>,
}

impl TranscriptManager {
    pub fn new(
        scheduler: Scheduler,
        source: Arc<dyn TranscriptSource>,
        validator: Arc<dyn Validator>,
        events: EventSink,
    ) -> Self {
        Self {
            scheduler,
            inbox: Inbox::new(),
            events,
            source,
            validator,
            fetch: None,
            index: TranscriptIndex::default(),
            video_id: None,
            language: None,
            available_languages: Vec::new(),
            last_error: None,
        }
    }

    /// Fetch the transcript for `video_id`, replacing the current one.
    ///
    /// Without a `language` the source's first listed language is used.
    pub fn fetch_transcript(
        &mut self,
        video_id: &str,
        language: Option<&str>,
    ) -> Result<TaskId, CoreError> {
        let video_id = video_id.trim();
        if video_id.is_empty() {
            return Err(CoreError::validation("video_id", "video ID cannot be empty"));
        }

        self.clear();

        let source = Arc::clone(&self.source);
        let id = video_id.to_string();
        let lang = language.map(str::to_string);
        let handle = self.scheduler.submit(
            TaskKind::TranscriptFetch,
            &self.inbox.route(),
            CancellationToken::new(),
            move |token| fetch_cues(source, id, lang, token),
        );

        log::info!("transcript: fetching {video_id} ({})", handle.id());
        let task_id = handle.id().clone();
        self.events
            .task_progress(&task_id, TaskKind::TranscriptFetch, handle.admitted_as());
        self.fetch = Some(handle);
        Ok(task_id)
    }

    /// Drop the current transcript and any fetch still in flight.
    pub fn clear(&mut self) {
        if let Some(handle) = self.fetch.take() {
            self.scheduler.cancel(handle.id());
        }
        self.index = TranscriptIndex::default();
        self.video_id = None;
        self.language = None;
        self.available_languages.clear();
        self.last_error = None;
        self.events.emit(AppEvent::TranscriptCleared);
    }

    pub async fn next_outcome(&mut self) -> Option<TaskOutcome> {
        self.inbox.recv().await
    }

    /// Apply a TranscriptFetch outcome. Returns `false` when it was stale.
    pub fn handle_outcome(&mut self, outcome: TaskOutcome) -> bool {
        self.events
            .task_progress(&outcome.id, outcome.kind, outcome.state);

        if self.fetch.as_ref().map(|h| h.id()) != Some(&outcome.id) {
            log::debug!("transcript: ignoring stale outcome for {}", outcome.id);
            return false;
        }
        self.fetch = None;

        match (outcome.state, outcome.output) {
            (
                TaskState::Completed,
                Some(TaskOutput::Cues {
                    video_id,
                    language,
                    available,
                    cues,
                }),
            ) => {
                self.index = TranscriptIndex::from_raw(cues);
                log::info!(
                    "transcript: {} cue(s) ready for {video_id}",
                    self.index.len()
                );
                self.events.emit(AppEvent::TranscriptReady {
                    video_id: video_id.clone(),
                    language: language.clone(),
                    cue_count: self.index.len(),
                });
                self.video_id = Some(video_id);
                self.language = language;
                self.available_languages = available;
            }
            (TaskState::Failed, _) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| CoreError::Task("failed without error".into()));
                log::warn!("transcript: fetch failed: {error}");
                let descriptor = ErrorDescriptor::from_task(outcome.kind, &error);
                self.last_error = Some(descriptor.clone());
                self.events.emit(AppEvent::TranscriptError(descriptor));
            }
            (TaskState::Cancelled, _) => {
                log::debug!("transcript: fetch {} cancelled", outcome.id);
            }
            (state, output) => {
                log::error!(
                    "transcript: unexpected {} outcome {output:?}",
                    state.label()
                );
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn current_cue(&self, position_secs: f64) -> Option<&Cue> {
        self.index.current_cue(position_secs)
    }

    pub fn nearest_cue(&self, position_secs: f64) -> Option<&Cue> {
        self.index.nearest_cue(position_secs)
    }

    pub fn search(&self, query: &str) -> Result<Vec<(usize, &Cue)>, CoreError> {
        let query = self.validator.validate_search_query(query)?;
        Ok(self.index.search(&query))
    }

    /// Write the transcript to `path`. The file name goes through the
    /// validator first.
    pub fn export(&self, path: &Path, format: ExportFormat) -> anyhow::Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        self.validator.validate_filename(name)?;
        export::export(&self.index, path, format)
    }

    pub fn index(&self) -> &TranscriptIndex {
        &self.index
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Languages the source listed for the current video.
    pub fn available_languages(&self) -> &[String] {
        &self.available_languages
    }

    pub fn is_loading(&self) -> bool {
        self.fetch.is_some()
    }

    pub fn last_error(&self) -> Option<&ErrorDescriptor> {
        self.last_error.as_ref()
    }
}

/// TranscriptFetch work.
async fn fetch_cues(
    source: Arc<dyn TranscriptSource>,
    video_id: String,
    language: Option<String>,
    token: CancellationToken,
) -> TaskResult {
    let available = match source.list_languages(&video_id, &token).await {
        Ok(languages) => languages,
        Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
        Err(e) => {
            log::warn!("transcript: listing languages for {video_id} failed: {e}");
            Vec::new()
        }
    };
    let language = language.or_else(|| available.first().cloned());

    let cues = source
        .fetch_cues(&video_id, language.as_deref(), &token)
        .await?;
    checkpoint(&token)?;
    Ok(TaskOutput::Cues {
        video_id,
        language,
        available,
        cues,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::Semaphore;

    use crate::collab::testing::ScriptedTranscripts;
    use crate::collab::{BasicValidator, RawCue};

    const WAIT: Duration = Duration::from_secs(5);

    fn manager(source: ScriptedTranscripts) -> (TranscriptManager, UnboundedReceiver<AppEvent>) {
        let (sink, rx) = EventSink::channel();
        let m = TranscriptManager::new(
            Scheduler::new(2),
            Arc::new(source),
            Arc::new(BasicValidator::new()),
            sink,
        );
        (m, rx)
    }

    async fn step(m: &mut TranscriptManager) -> bool {
        let outcome = tokio::time::timeout(WAIT, m.next_outcome())
            .await
            .expect("outcome within timeout")
            .expect("inbox open");
        m.handle_outcome(outcome)
    }

    fn drain(rx: &mut UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            if !matches!(e, AppEvent::TaskProgress { .. }) {
                out.push(e);
            }
        }
        out
    }

    #[tokio::test]
    async fn fetch_builds_sorted_index() {
        let source = ScriptedTranscripts::default().with(
            "vid",
            vec![RawCue::new(10.0, 20.0, "x"), RawCue::new(0.0, 10.0, "y")],
        );
        let (mut m, mut rx) = manager(source);

        m.fetch_transcript("vid", Some("en")).unwrap();
        assert!(m.is_loading());
        assert!(step(&mut m).await);

        assert_eq!(m.current_cue(5.0).unwrap().text, "y");
        assert_eq!(m.current_cue(15.0).unwrap().text, "x");
        assert_eq!(m.video_id(), Some("vid"));
        assert_eq!(m.language(), Some("en"));
        assert_eq!(
            drain(&mut rx),
            vec![
                AppEvent::TranscriptCleared,
                AppEvent::TranscriptReady {
                    video_id: "vid".into(),
                    language: Some("en".into()),
                    cue_count: 2,
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_language_falls_back_to_first_listed() {
        let source = Arc::new(
            ScriptedTranscripts::default()
                .with("vid", vec![RawCue::new(0.0, 1.0, "hallo")])
                .with_languages("vid", &["de", "en"]),
        );
        let mut m = TranscriptManager::new(
            Scheduler::new(2),
            source.clone(),
            Arc::new(BasicValidator::new()),
            EventSink::discard(),
        );

        m.fetch_transcript("vid", None).unwrap();
        assert!(step(&mut m).await);
        assert_eq!(m.language(), Some("de"));
        assert_eq!(m.available_languages(), ["de", "en"]);
        assert_eq!(source.requested(), vec![Some("de".to_string())]);

        m.fetch_transcript("vid", Some("en")).unwrap();
        assert!(m.available_languages().is_empty());
        assert!(step(&mut m).await);
        assert_eq!(m.language(), Some("en"));
        assert_eq!(m.available_languages().len(), 2);
    }

    #[tokio::test]
    async fn empty_video_id_is_rejected() {
        let (mut m, _rx) = manager(ScriptedTranscripts::default());
        assert!(matches!(
            m.fetch_transcript("  ", None),
            Err(CoreError::Validation { field: "video_id", .. })
        ));
        assert!(!m.is_loading());
    }

    #[tokio::test]
    async fn failure_emits_error_event() {
        let (mut m, mut rx) = manager(ScriptedTranscripts::default());
        m.fetch_transcript("missing", None).unwrap();
        step(&mut m).await;

        assert!(m.index().is_empty());
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(AppEvent::TranscriptError(d)) if d.kind == Some(TaskKind::TranscriptFetch)
        ));
        assert_eq!(m.last_error().unwrap().category, "network");
    }

    #[tokio::test]
    async fn newer_fetch_supersedes_older() {
        let gate = Arc::new(Semaphore::new(0));
        let source = ScriptedTranscripts::gated(gate.clone())
            .with("a", vec![RawCue::new(0.0, 1.0, "from a")])
        .with("b", vec![RawCue::new(0.0, 1.0, "from b")]);
        let (mut m, mut rx) = manager(source);

        m.fetch_transcript("a", None).unwrap();
        m.fetch_transcript("b", None).unwrap();

        // "a" is cancelled at its gate and its outcome is stale.
        assert!(!step(&mut m).await);
        gate.add_permits(1);
        assert!(step(&mut m).await);

        assert_eq!(m.current_cue(0.5).unwrap().text, "from b");
        let ready: Vec<AppEvent> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AppEvent::TranscriptReady { .. }))
            .collect();
        assert_eq!(ready.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_fetch_emits_nothing() {
        let gate = Arc::new(Semaphore::new(0));
        let source = ScriptedTranscripts::gated(gate);
        let (mut m, mut rx) = manager(source);

        let id = m.fetch_transcript("a", None).unwrap();
        m.scheduler.cancel(&id);
        assert!(step(&mut m).await);
        assert_eq!(drain(&mut rx), vec![AppEvent::TranscriptCleared]);
        assert!(m.last_error().is_none());
    }

    #[tokio::test]
    async fn search_validates_query() {
        let source = ScriptedTranscripts::default().with(
            "vid",
            vec![RawCue::new(0.0, 1.0, "Hello world"), RawCue::new(1.0, 2.0, "bye")],
        );
        let (mut m, _rx) = manager(source);
        m.fetch_transcript("vid", None).unwrap();
        step(&mut m).await;

        let hits = m.search("WORLD").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
        assert!(matches!(
            m.search("<script>x"),
            Err(CoreError::Security { .. })
        ));
    }

    #[tokio::test]
    async fn export_checks_filename() {
        let source = ScriptedTranscripts::default().with("vid", vec![RawCue::new(0.0, 1.0, "hi")]);
        let (mut m, _rx) = manager(source);
        m.fetch_transcript("vid", None).unwrap();
        step(&mut m).await;

        let dir = tempfile::tempdir().expect("temp dir");
        m.export(&dir.path().join("talk.txt"), ExportFormat::Text)
            .expect("export");
        assert!(m
            .export(&dir.path().join("CON.txt"), ExportFormat::Text)
            .is_err());
    }
}
