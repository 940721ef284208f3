//! Task registry and bounded scheduler.
//!
//! [`Scheduler`] is a cheap-to-clone handle (`Arc` inside) shared by every
//! manager. All registry mutation happens behind one `std::sync::Mutex` that
//! is never held across an `.await`; task bodies run on tokio worker tasks.
//!
//! Invariants:
//!
//! - at most `max_concurrent` tasks are Running at any time;
//! - queued tasks are admitted in submission order (FIFO);
//! - every task reaches exactly one terminal state and is handed to the
//!   [`Dispatcher`] exactly once;
//! - the sweep only removes tasks that are terminal **and** dispatched.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::CoreError;

use super::dispatcher::{Dispatcher, Route};
use super::types::{TaskId, TaskKind, TaskOutcome, TaskRecord, TaskResult, TaskState};

type BoxFuture = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;
type BoxedWork = Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send + 'static>;

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// Returned by [`Scheduler::submit`]; identifies the task and carries its
/// cancellation token.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    token: CancellationToken,
    admitted_as: TaskState,
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// State the task was in when `submit` returned (Running, Queued, or
    /// Cancelled during shutdown).
    pub fn admitted_as(&self) -> TaskState {
        self.admitted_as
    }
}

// ---------------------------------------------------------------------------
// SchedulerStats
// ---------------------------------------------------------------------------

/// Registry counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Highest number of simultaneously Running tasks ever observed.
    pub peak_running: usize,
}

// ---------------------------------------------------------------------------
// Registry (internal)
// ---------------------------------------------------------------------------

struct Entry {
    kind: TaskKind,
    state: TaskState,
    token: CancellationToken,
    route: Route,
    work: Option<BoxedWork>,
    error: Option<String>,
    dispatched: bool,
    /// Fired when the task leaves the queue, either admitted or cancelled.
    dequeued: CancellationToken,
}

impl Entry {
    fn new(kind: TaskKind, state: TaskState, token: CancellationToken, route: &Route) -> Self {
        Self {
            kind,
            state,
            token,
            route: route.clone(),
            work: None,
            error: None,
            dispatched: false,
            dequeued: CancellationToken::new(),
        }
    }

    /// Queued → Cancelled. The work is dropped unrun.
    fn cancel_queued(&mut self, id: &TaskId) -> Pending {
        self.token.cancel();
        self.dequeued.cancel();
        self.state = TaskState::Cancelled;
        self.work = None;
        self.dispatched = true;
        Pending {
            route: self.route.clone(),
            outcome: TaskOutcome::cancelled(id.clone(), self.kind),
        }
    }
}

/// A task picked for execution by [`Registry::admit`].
struct Admitted {
    id: TaskId,
    token: CancellationToken,
    work: BoxedWork,
}

/// An outcome waiting to be delivered once the lock is released.
struct Pending {
    route: Route,
    outcome: TaskOutcome,
}

/// Result of one admission pass.
#[derive(Default)]
struct Admission {
    launch: Vec<Admitted>,
    /// Queued tasks whose token fired before a slot opened.
    cancelled: Vec<Pending>,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<TaskId, Entry>,
    queue: VecDeque<TaskId>,
    running: usize,
    peak_running: usize,
    shutting_down: bool,
}

impl Registry {
    /// Promote queued tasks while there are free slots. A task whose token
    /// was cancelled while it waited is finished as Cancelled instead.
    fn admit(&mut self, max_concurrent: usize) -> Admission {
        let mut admission = Admission::default();
        while self.running < max_concurrent {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Some(entry) = self.tasks.get_mut(&id) else {
                continue;
            };
            if entry.state != TaskState::Queued {
                continue;
            }
            if entry.token.is_cancelled() {
                admission.cancelled.push(entry.cancel_queued(&id));
                continue;
            }
            let Some(work) = entry.work.take() else {
                log::error!("scheduler: queued task {id} has no work attached");
                continue;
            };
            entry.state = TaskState::Running;
            entry.dequeued.cancel();
            self.running += 1;
            self.peak_running = self.peak_running.max(self.running);
            admission.launch.push(Admitted {
                id,
                token: entry.token.clone(),
                work,
            });
        }
        admission
    }

    /// Move a queued task straight to Cancelled; its work is dropped unrun.
    fn cancel_queued(&mut self, id: &TaskId) -> Option<Pending> {
        let entry = self.tasks.get_mut(id)?;
        if entry.state != TaskState::Queued {
            return None;
        }
        let pending = entry.cancel_queued(id);
        self.queue.retain(|queued| queued != id);
        Some(pending)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Shared {
    registry: Mutex<Registry>,
    dispatcher: Dispatcher,
    max_concurrent: usize,
    runtime: Handle,
    idle: Notify,
}

/// Bounded, cancellable task scheduler. See the module docs for invariants.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler running work on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_runtime(max_concurrent, Handle::current())
    }

    /// Create a scheduler that spawns work on `runtime`.
    ///
    /// A cap of `0` is clamped to `1`.
    pub fn with_runtime(max_concurrent: usize, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                dispatcher: Dispatcher::new(),
                max_concurrent: max_concurrent.max(1),
                runtime,
                idle: Notify::new(),
            }),
        }
    }

    pub fn from_config(config: &SchedulerConfig, runtime: Handle) -> Self {
        Self::with_runtime(config.max_concurrent, runtime)
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Register a task under a fresh id. Runs immediately when a slot is
    /// free, otherwise waits in the FIFO queue. Never fails because of load.
    pub fn submit<F, Fut>(
        &self,
        kind: TaskKind,
        route: &Route,
        token: CancellationToken,
        work: F,
    ) -> TaskHandle
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let boxed: BoxedWork = Box::new(move |token| Box::pin(work(token)));
        self.register(TaskId::generate(), kind, route, token, boxed)
    }

    /// Like [`submit`](Self::submit) with a caller-assigned id.
    ///
    /// Fails with [`CoreError::Task`] when a non-terminal task already uses
    /// `id`; a terminal one is replaced.
    pub fn submit_with_id<F, Fut>(
        &self,
        id: TaskId,
        kind: TaskKind,
        route: &Route,
        token: CancellationToken,
        work: F,
    ) -> Result<TaskHandle, CoreError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        if let Some(entry) = self.lock().tasks.get(&id) {
            if !entry.state.is_terminal() {
                return Err(CoreError::Task(format!("task id {id} is already in use")));
            }
        }
        let boxed: BoxedWork = Box::new(move |token| Box::pin(work(token)));
        Ok(self.register(id, kind, route, token, boxed))
    }

    fn register(
        &self,
        id: TaskId,
        kind: TaskKind,
        route: &Route,
        token: CancellationToken,
        work: BoxedWork,
    ) -> TaskHandle {
        let mut rejected = None;
        let mut dequeued = None;
        let (admission, admitted_as) = {
            let mut reg = self.lock();

            if reg.shutting_down || token.is_cancelled() {
                if reg.shutting_down {
                    log::warn!("scheduler: {kind} task {id} submitted during shutdown, cancelled");
                } else {
                    log::debug!("scheduler: {kind} task {id} submitted already cancelled");
                }
                token.cancel();
                let mut entry = Entry::new(kind, TaskState::Cancelled, token.clone(), route);
                entry.dispatched = true;
                entry.dequeued.cancel();
                reg.tasks.insert(id.clone(), entry);
                rejected = Some(TaskOutcome::cancelled(id.clone(), kind));
                (Admission::default(), TaskState::Cancelled)
            } else {
                let mut entry = Entry::new(kind, TaskState::Queued, token.clone(), route);
                entry.work = Some(work);
                reg.tasks.insert(id.clone(), entry);
                reg.queue.push_back(id.clone());
                let admission = reg.admit(self.shared.max_concurrent);
                let entry = reg.tasks.get(&id);
                let state = entry.map(|e| e.state).unwrap_or(TaskState::Queued);
                if state == TaskState::Queued {
                    dequeued = entry.map(|e| e.dequeued.clone());
                }
                (admission, state)
            }
        };

        if admitted_as != TaskState::Cancelled {
            log::debug!("scheduler: {kind} task {id} submitted ({})", admitted_as.label());
        }

        if let Some(outcome) = rejected {
            self.shared.dispatcher.deliver(route, outcome);
        }
        if let Some(dequeued) = dequeued {
            self.watch_queued(id.clone(), token.clone(), dequeued);
        }
        self.apply(admission);

        TaskHandle {
            id,
            kind,
            token,
            admitted_as,
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Turn a queued task Cancelled as soon as its own token fires, without
    /// waiting for a free slot.
    fn watch_queued(&self, id: TaskId, token: CancellationToken, dequeued: CancellationToken) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared.runtime.spawn(async move {
            tokio::select! {
                _ = dequeued.cancelled() => {}
                _ = token.cancelled() => {
                    if let Some(shared) = weak.upgrade() {
                        Scheduler { shared }.cancel(&id);
                    }
                }
            }
        });
    }

    /// Deliver early cancellations and launch admitted work.
    fn apply(&self, admission: Admission) {
        for pending in admission.cancelled {
            log::debug!(
                "scheduler: queued task {} cancelled by its token before running",
                pending.outcome.id
            );
            self.shared.dispatcher.deliver(&pending.route, pending.outcome);
        }
        for task in admission.launch {
            self.launch(task);
        }
    }

    fn launch(&self, task: Admitted) {
        let Admitted { id, token, work } = task;
        let scheduler = self.clone();

        self.shared.runtime.spawn(async move {
            let body_token = token.clone();
            // Inner spawn isolates panics in the body from the bookkeeping.
            let joined = tokio::spawn(async move { work(body_token).await }).await;
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(CoreError::Task(format!("task body aborted: {e}"))),
            };
            scheduler.finish(&id, result);
        });
    }

    /// Completion path for Running tasks.
    fn finish(&self, id: &TaskId, result: TaskResult) {
        let (pending, admission, now_idle) = {
            let mut reg = self.lock();
            let Some(entry) = reg.tasks.get_mut(id) else {
                log::error!("scheduler: finished task {id} is not registered");
                return;
            };
            if entry.state != TaskState::Running {
                log::error!(
                    "scheduler: task {id} finished while {}, ignoring",
                    entry.state.label()
                );
                return;
            }

            let kind = entry.kind;
            let outcome = if entry.token.is_cancelled() {
                TaskOutcome::cancelled(id.clone(), kind)
            } else {
                match result {
                    Ok(output) => TaskOutcome::completed(id.clone(), kind, output),
                    Err(CoreError::Cancelled) => {
                        // Body claimed cancellation without a request.
                        TaskOutcome::failed(
                            id.clone(),
                            kind,
                            CoreError::Task("work exited as cancelled without a request".into()),
                        )
                    }
                    Err(error) => TaskOutcome::failed(id.clone(), kind, error),
                }
            };

            entry.state = outcome.state;
            entry.error = outcome.error.as_ref().map(|e| e.to_string());
            entry.dispatched = true;
            let route = entry.route.clone();

            reg.running -= 1;
            let admission = reg.admit(self.shared.max_concurrent);
            (Pending { route, outcome }, admission, reg.running == 0)
        };

        match pending.outcome.state {
            TaskState::Failed => log::warn!(
                "scheduler: {} task {id} failed: {}",
                pending.outcome.kind,
                pending.outcome.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
            ),
            state => log::debug!(
                "scheduler: {} task {id} {}",
                pending.outcome.kind,
                state.label()
            ),
        }

        self.shared.dispatcher.deliver(&pending.route, pending.outcome);
        self.apply(admission);
        if now_idle {
            self.shared.idle.notify_waiters();
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Request cancellation of `id`.
    ///
    /// A queued task becomes Cancelled immediately without running. For a
    /// running task this only raises the flag; it turns Cancelled when its
    /// work exits. Returns `false` for unknown or already terminal tasks.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let pending = {
            let mut reg = self.lock();
            let Some(state) = reg.tasks.get(id).map(|e| e.state) else {
                return false;
            };
            match state {
                TaskState::Queued => reg.cancel_queued(id),
                TaskState::Running => {
                    if let Some(entry) = reg.tasks.get(id) {
                        entry.token.cancel();
                    }
                    None
                }
                _ => return false,
            }
        };

        match pending {
            Some(p) => {
                log::debug!("scheduler: queued task {id} cancelled before running");
                self.shared.dispatcher.deliver(&p.route, p.outcome);
            }
            None => log::debug!("scheduler: cancellation requested for running task {id}"),
        }
        true
    }

    /// Cancel every non-terminal task. Returns how many were affected.
    pub fn cancel_all(&self) -> usize {
        let (pending, signalled) = {
            let mut reg = self.lock();
            let queued: Vec<TaskId> = reg.queue.iter().cloned().collect();
            let pending: Vec<Pending> = queued
                .iter()
                .filter_map(|id| reg.cancel_queued(id))
                .collect();

            let mut signalled = 0;
            for entry in reg.tasks.values() {
                if entry.state == TaskState::Running {
                    entry.token.cancel();
                    signalled += 1;
                }
            }
            (pending, signalled)
        };

        let affected = pending.len() + signalled;
        if affected > 0 {
            log::info!(
                "scheduler: cancel_all dropped {} queued, signalled {signalled} running",
                pending.len()
            );
        }
        for p in pending {
            self.shared.dispatcher.deliver(&p.route, p.outcome);
        }
        affected
    }

    // -----------------------------------------------------------------------
    // Sweep / shutdown
    // -----------------------------------------------------------------------

    /// Drop terminal, already-dispatched tasks. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut reg = self.lock();
        let before = reg.tasks.len();
        reg.tasks
            .retain(|_, entry| !(entry.state.is_terminal() && entry.dispatched));
        let removed = before - reg.tasks.len();
        if removed > 0 {
            log::trace!("scheduler: sweep removed {removed} finished tasks");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown begins or
    /// the scheduler is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let scheduler = Scheduler { shared };
                if scheduler.is_shutting_down() {
                    break;
                }
                scheduler.sweep();
            }
            log::debug!("scheduler: sweeper stopped");
        })
    }

    /// Cancel everything and wait up to `grace` for running tasks to exit.
    ///
    /// Returns `false` when some tasks were still running at the deadline;
    /// those are abandoned, not aborted. Later submissions are cancelled
    /// on arrival.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.lock().shutting_down = true;
        self.cancel_all();

        let wait = async {
            loop {
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.lock().running == 0 {
                    return;
                }
                notified.await;
            }
        };

        let clean = tokio::time::timeout(grace, wait).await.is_ok();
        if clean {
            log::info!("scheduler: shutdown complete");
        } else {
            log::warn!(
                "scheduler: {} task(s) still running after {:?}, abandoning",
                self.lock().running,
                grace
            );
        }
        clean
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn state(&self, id: &TaskId) -> Option<TaskState> {
        self.lock().tasks.get(id).map(|e| e.state)
    }

    pub fn record(&self, id: &TaskId) -> Option<TaskRecord> {
        self.lock().tasks.get(id).map(|e| TaskRecord {
            id: id.clone(),
            kind: e.kind,
            state: e.state,
            cancel_requested: e.token.is_cancelled(),
            error: e.error.clone(),
            dispatched: e.dispatched,
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        let reg = self.lock();
        let mut stats = SchedulerStats {
            running: reg.running,
            peak_running: reg.peak_running,
            ..SchedulerStats::default()
        };
        for entry in reg.tasks.values() {
            match entry.state {
                TaskState::Queued => stats.queued += 1,
                TaskState::Running => {}
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Number of tasks currently held by the registry.
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
