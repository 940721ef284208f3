//! Background task lifecycle: registry, scheduler and result dispatch.
//!
//! # Architecture
//!
//! ```text
//! Manager ──submit(kind, route, token, work)──▶ Scheduler
//!                                                 │
//!                      running < max_concurrent ? │
//!                 ┌───────────── yes ─────────────┴──── no ──▶ FIFO queue
//!                 ▼                                               │
//!        tokio::spawn(work)  ◀──── admitted when a slot frees ────┘
//!                 │
//!                 ▼
//!        finish(): Completed | Failed | Cancelled
//!                 │
//!                 ▼
//!        Dispatcher::deliver(route, outcome) ──▶ owner Inbox
//!                                                   │
//!                          owning context drains ◀──┘
//! ```
//!
//! Work is any `FnOnce(CancellationToken) -> Future<Output = TaskResult>`.
//! Cancellation is cooperative: the work calls [`checkpoint`] (or selects on
//! `token.cancelled()`) at points where stopping is safe.

pub mod dispatcher;
pub mod scheduler;
pub mod types;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use dispatcher::{Dispatcher, Inbox, Route};
pub use scheduler::{Scheduler, SchedulerStats, TaskHandle};
pub use types::{
    checkpoint, TaskId, TaskKind, TaskOutcome, TaskOutput, TaskRecord, TaskResult, TaskState,
};
