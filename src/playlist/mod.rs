//! Ordered playlist with background metadata lookups.
//!
//! Items are unique by normalized URL. Adding items submits one
//! PlaylistFetch per new entry; the entry shows a placeholder title until the
//! lookup completes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::collab::{video_id_from_url, MetadataSource, Validator};
use crate::error::{CoreError, ErrorDescriptor};
use crate::events::{AppEvent, EventSink};
use crate::task::{
    checkpoint, Inbox, Scheduler, TaskHandle, TaskKind, TaskOutcome, TaskOutput, TaskResult,
    TaskState,
};

// ---------------------------------------------------------------------------
// PlaylistItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistItem {
    /// Normalized URL; unique within the playlist.
    pub id: String,
    pub title: String,
    pub source: String,
    /// 0-based, always equal to the item's index.
    pub position: usize,
}

// ---------------------------------------------------------------------------
// PlaylistManager
// ---------------------------------------------------------------------------

pub struct PlaylistManager {
    scheduler: Scheduler,
    inbox: Inbox,
    events: EventSink,
    metadata: Arc<dyn MetadataSource>,
    validator: Arc<dyn Validator>,

    items: Vec<PlaylistItem>,
    /// Pending metadata lookups keyed by item id.
    fetches: HashMap<String, TaskHandle>,
    current: Option<usize>,
}

impl PlaylistManager {
    pub fn new(
        scheduler: Scheduler,
        metadata: Arc<dyn MetadataSource>,
        validator: Arc<dyn Validator>,
        events: EventSink,
    ) -> Self {
        Self {
            scheduler,
            inbox: Inbox::new(),
            events,
            metadata,
            validator,
            items: Vec::new(),
            fetches: HashMap::new(),
            current: None,
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add one URL per line of `text`. Returns the ids of the items actually
    /// added; URLs already in the playlist are skipped.
    pub fn add_urls(&mut self, text: &str) -> Result<Vec<String>, CoreError> {
        let urls = self.validator.validate_playlist_urls(text)?;

        let mut added = Vec::new();
        for url in urls {
            if self.items.iter().any(|item| item.id == url) {
                log::debug!("playlist: {url} already present, skipped");
                continue;
            }
            let title = video_id_from_url(&url).unwrap_or_else(|| url.clone());
            self.items.push(PlaylistItem {
                id: url.clone(),
                title,
                source: url.clone(),
                position: self.items.len(),
            });
            self.submit_fetch(url.clone());
            added.push(url);
        }

        if !added.is_empty() {
            log::info!("playlist: added {} item(s)", added.len());
            self.changed();
        }
        Ok(added)
    }

    fn submit_fetch(&mut self, item_id: String) {
        let metadata = Arc::clone(&self.metadata);
        let id = item_id.clone();
        let handle = self.scheduler.submit(
            TaskKind::PlaylistFetch,
            &self.inbox.route(),
            CancellationToken::new(),
            move |token| fetch_metadata(metadata, id, token),
        );
        self.events
            .task_progress(handle.id(), TaskKind::PlaylistFetch, handle.admitted_as());
        self.fetches.insert(item_id, handle);
    }

    /// Remove the item with `id`, cancelling its metadata lookup.
    pub fn remove(&mut self, id: &str) -> Result<PlaylistItem, CoreError> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| CoreError::validation("item", format!("{id} is not in the playlist")))?;

        if let Some(handle) = self.fetches.remove(id) {
            self.scheduler.cancel(handle.id());
        }
        let removed = self.items.remove(index);
        self.current = match self.current {
            Some(c) if c == index => None,
            Some(c) if c > index => Some(c - 1),
            other => other,
        };
        self.changed();
        Ok(removed)
    }

    /// Move the item at `from` to index `to`.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), CoreError> {
        let len = self.items.len();
        if from >= len || to >= len {
            return Err(CoreError::validation(
                "index",
                format!("move {from} → {to} outside playlist of {len}"),
            ));
        }
        if from == to {
            return Ok(());
        }

        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.current = self.current.map(|c| {
            if c == from {
                to
            } else if from < c && c <= to {
                c - 1
            } else if to <= c && c < from {
                c + 1
            } else {
                c
            }
        });
        self.changed();
        Ok(())
    }

    /// Empty the playlist and cancel every pending lookup.
    pub fn clear(&mut self) {
        for (_, handle) in self.fetches.drain() {
            self.scheduler.cancel(handle.id());
        }
        self.items.clear();
        self.current = None;
        self.changed();
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    pub fn select(&mut self, index: usize) -> Result<&PlaylistItem, CoreError> {
        if index >= self.items.len() {
            return Err(CoreError::validation(
                "index",
                format!("no playlist item at {index}"),
            ));
        }
        self.current = Some(index);
        self.changed();
        Ok(&self.items[index])
    }

    /// Advance to the next item. At the end the selection stays put and
    /// `None` is returned.
    pub fn next(&mut self) -> Option<&PlaylistItem> {
        let next = match self.current {
            None => 0,
            Some(c) => c + 1,
        };
        if next >= self.items.len() {
            return None;
        }
        self.current = Some(next);
        self.changed();
        self.items.get(next)
    }

    pub fn previous(&mut self) -> Option<&PlaylistItem> {
        let prev = self.current?.checked_sub(1)?;
        self.current = Some(prev);
        self.changed();
        self.items.get(prev)
    }

    // -----------------------------------------------------------------------
    // Outcomes
    // -----------------------------------------------------------------------

    pub async fn next_outcome(&mut self) -> Option<TaskOutcome> {
        self.inbox.recv().await
    }

    /// Apply a PlaylistFetch outcome. Returns `false` when stale.
    pub fn handle_outcome(&mut self, outcome: TaskOutcome) -> bool {
        self.events
            .task_progress(&outcome.id, outcome.kind, outcome.state);

        let Some(item_id) = self
            .fetches
            .iter()
            .find(|(_, handle)| *handle.id() == outcome.id)
            .map(|(item_id, _)| item_id.clone())
        else {
            log::debug!("playlist: ignoring stale outcome for {}", outcome.id);
            return false;
        };
        self.fetches.remove(&item_id);

        match (outcome.state, outcome.output) {
            (TaskState::Completed, Some(TaskOutput::Metadata { info, .. })) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) {
                    item.title = info.title;
                }
                self.changed();
            }
            (TaskState::Failed, _) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| CoreError::Task("failed without error".into()));
                log::warn!("playlist: metadata for {item_id} failed: {error}");
                self.events.emit(AppEvent::TaskFailed(ErrorDescriptor::from_task(
                    outcome.kind,
                    &error,
                )));
            }
            (TaskState::Cancelled, _) => {
                log::debug!("playlist: metadata for {item_id} cancelled");
            }
            (state, output) => {
                log::error!("playlist: unexpected {} outcome {output:?}", state.label());
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn current(&self) -> Option<&PlaylistItem> {
        self.current.and_then(|c| self.items.get(c))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of metadata lookups still in flight.
    pub fn pending_fetches(&self) -> usize {
        self.fetches.len()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn changed(&mut self) {
        for (position, item) in self.items.iter_mut().enumerate() {
            item.position = position;
        }
        self.events.emit(AppEvent::PlaylistChanged {
            items: self.items.clone(),
            current: self.current,
        });
    }
}

/// PlaylistFetch work.
async fn fetch_metadata(
    metadata: Arc<dyn MetadataSource>,
    item_id: String,
    token: CancellationToken,
) -> TaskResult {
    let info = metadata.fetch_info(&item_id, &token).await?;
    checkpoint(&token)?;
    Ok(TaskOutput::Metadata { item_id, info })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use crate::collab::testing::ScriptedMetadata;
    use crate::collab::BasicValidator;

    const WAIT: Duration = Duration::from_secs(5);

    fn url(c: char) -> String {
        format!("https://www.youtube.com/watch?v={}", c.to_string().repeat(11))
    }

    fn manager(metadata: ScriptedMetadata) -> PlaylistManager {
        PlaylistManager::new(
            Scheduler::new(2),
            Arc::new(metadata),
            Arc::new(BasicValidator::new()),
            EventSink::discard(),
        )
    }

    async fn drain_fetches(m: &mut PlaylistManager) {
        while m.pending_fetches() > 0 {
            let outcome = tokio::time::timeout(WAIT, m.next_outcome())
                .await
                .expect("outcome within timeout")
                .expect("inbox open");
            m.handle_outcome(outcome);
        }
    }

    fn positions(m: &PlaylistManager) -> Vec<usize> {
        m.items().iter().map(|i| i.position).collect()
    }

    fn ids(m: &PlaylistManager) -> Vec<String> {
        m.items().iter().map(|i| i.id.clone()).collect()
    }

    #[tokio::test]
    async fn add_fetches_titles_and_skips_existing() {
        let mut m = manager(ScriptedMetadata::default());

        let added = m.add_urls(&format!("{}\n{}", url('a'), url('b'))).unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(m.items()[0].title, "aaaaaaaaaaa");
        drain_fetches(&mut m).await;
        assert_eq!(m.items()[0].title, "Video aaaaaaaaaaa");

        let added = m.add_urls(&format!("{}\n{}", url('b'), url('c'))).unwrap();
        assert_eq!(added, vec![url('c')]);
        assert_eq!(m.len(), 3);
        assert_eq!(positions(&m), vec![0, 1, 2]);
        drain_fetches(&mut m).await;
    }

    #[tokio::test]
    async fn duplicate_input_is_rejected() {
        let mut m = manager(ScriptedMetadata::default());
        let err = m.add_urls(&format!("{}\n{}", url('a'), url('a'))).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(m.is_empty());
        assert_eq!(m.pending_fetches(), 0);
    }

    #[tokio::test]
    async fn failed_lookup_keeps_placeholder() {
        let metadata = ScriptedMetadata::default();
        metadata.fail(&url('a'));
        let mut m = manager(metadata);

        m.add_urls(&url('a')).unwrap();
        drain_fetches(&mut m).await;
        assert_eq!(m.items()[0].title, "aaaaaaaaaaa");
    }

    #[tokio::test]
    async fn remove_cancels_pending_lookup() {
        let gate = Arc::new(Semaphore::new(0));
        let mut m = manager(ScriptedMetadata::gated(gate));

        m.add_urls(&format!("{}\n{}", url('a'), url('b'))).unwrap();
        let removed = m.remove(&url('a')).unwrap();
        assert_eq!(removed.id, url('a'));
        assert_eq!(m.pending_fetches(), 1);
        assert_eq!(positions(&m), vec![0]);

        // The cancelled lookup's outcome is no longer tracked.
        let outcome = tokio::time::timeout(WAIT, m.next_outcome())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.state, TaskState::Cancelled);
        assert!(!m.handle_outcome(outcome));

        assert!(m.remove(&url('z')).is_err());
        m.clear();
    }

    #[tokio::test]
    async fn move_keeps_selection_on_same_item() {
        let mut m = manager(ScriptedMetadata::default());
        m.add_urls(&format!("{}\n{}\n{}", url('a'), url('b'), url('c')))
            .unwrap();
        m.select(0).unwrap();

        m.move_item(0, 2).unwrap();
        assert_eq!(ids(&m), vec![url('b'), url('c'), url('a')]);
        assert_eq!(positions(&m), vec![0, 1, 2]);
        assert_eq!(m.current().unwrap().id, url('a'));

        m.move_item(1, 0).unwrap();
        assert_eq!(ids(&m), vec![url('c'), url('b'), url('a')]);
        assert_eq!(m.current_index(), Some(2));

        assert!(m.move_item(0, 3).is_err());
        drain_fetches(&mut m).await;
    }

    #[tokio::test]
    async fn navigation() {
        let mut m = manager(ScriptedMetadata::default());
        assert!(m.next().is_none());

        m.add_urls(&format!("{}\n{}", url('a'), url('b'))).unwrap();
        assert_eq!(m.next().unwrap().id, url('a'));
        assert_eq!(m.next().unwrap().id, url('b'));
        assert!(m.next().is_none());
        assert_eq!(m.current_index(), Some(1));
        assert_eq!(m.previous().unwrap().id, url('a'));
        assert!(m.previous().is_none());
        assert!(m.select(5).is_err());

        m.remove(&url('a')).unwrap();
        assert!(m.current().is_none());
        drain_fetches(&mut m).await;
    }

    #[tokio::test]
    async fn clear_cancels_everything() {
        let gate = Arc::new(Semaphore::new(0));
        let mut m = manager(ScriptedMetadata::gated(gate));
        m.add_urls(&format!("{}\n{}", url('a'), url('b'))).unwrap();

        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.pending_fetches(), 0);
        assert!(m.current().is_none());
    }
}
