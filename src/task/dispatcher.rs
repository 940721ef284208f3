//! Result dispatch from worker tasks to the owning context.
//!
//! Each manager owns an [`Inbox`]. The scheduler only ever sees a [`Route`],
//! a weak sender into that inbox, so it can route outcomes without keeping
//! the manager alive. Once the manager (and with it the inbox) is dropped,
//! delivery becomes a no-op.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};

use super::types::TaskOutcome;

// ---------------------------------------------------------------------------
// Inbox / Route
// ---------------------------------------------------------------------------

/// Mailbox drained by a manager on its owning context.
pub struct Inbox {
    tx: UnboundedSender<TaskOutcome>,
    rx: UnboundedReceiver<TaskOutcome>,
}

impl Inbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A weak back-reference for the scheduler.
    pub fn route(&self) -> Route {
        Route {
            tx: self.tx.downgrade(),
        }
    }

    /// Wait for the next outcome. Pends forever while the inbox is empty.
    pub async fn recv(&mut self) -> Option<TaskOutcome> {
        self.rx.recv().await
    }

    /// Take the next outcome if one is already waiting.
    pub fn try_recv(&mut self) -> Option<TaskOutcome> {
        self.rx.try_recv().ok()
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Weak reference to an owner's [`Inbox`].
#[derive(Clone)]
pub struct Route {
    tx: WeakUnboundedSender<TaskOutcome>,
}

impl Route {
    /// `true` while the owning inbox still exists.
    pub fn is_alive(&self) -> bool {
        self.tx.upgrade().is_some()
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Hands terminal outcomes to their owners.
///
/// The scheduler guarantees `deliver` is called once per task; the dispatcher
/// itself only counts what it delivered or dropped.
#[derive(Debug, Default)]
pub struct Dispatcher {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `outcome` into the owner's inbox. Returns `false` when the owner
    /// has been torn down and the outcome was discarded.
    pub fn deliver(&self, route: &Route, outcome: TaskOutcome) -> bool {
        let id = outcome.id.clone();
        let sent = match route.tx.upgrade() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        };

        if sent {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            log::trace!("dispatcher: delivered outcome for task {id}");
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("dispatcher: owner of task {id} is gone, outcome dropped");
        }
        sent
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::{TaskId, TaskKind};

    fn outcome(name: &str) -> TaskOutcome {
        TaskOutcome::cancelled(TaskId::from_name(name), TaskKind::VideoResolve)
    }

    #[tokio::test]
    async fn delivers_to_live_inbox_in_order() {
        let dispatcher = Dispatcher::new();
        let mut inbox = Inbox::new();
        let route = inbox.route();

        assert!(dispatcher.deliver(&route, outcome("a")));
        assert!(dispatcher.deliver(&route, outcome("b")));

        assert_eq!(inbox.recv().await.unwrap().id.as_str(), "a");
        assert_eq!(inbox.recv().await.unwrap().id.as_str(), "b");
        assert_eq!(dispatcher.delivered(), 2);
    }

    #[test]
    fn delivery_to_dropped_owner_is_noop() {
        let dispatcher = Dispatcher::new();
        let inbox = Inbox::new();
        let route = inbox.route();
        assert!(route.is_alive());

        drop(inbox);

        assert!(!route.is_alive());
        assert!(!dispatcher.deliver(&route, outcome("late")));
        assert_eq!(dispatcher.dropped(), 1);
        assert_eq!(dispatcher.delivered(), 0);
    }

    #[test]
    fn try_recv_on_empty_inbox_is_none() {
        let mut inbox = Inbox::new();
        assert!(inbox.try_recv().is_none());
    }
}
