//! Task handles and outcomes.
//!
//! A handle is registered in the session's outstanding set when its context
//! leaves the queue, and removed again by the completion guard once the
//! worker is done with it (or the job is dropped unrun).

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

pub type TaskId = u64;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

/// Lifecycle of one dispatched context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Handed to the pool, not yet picked up by a worker.
    Queued,
    Running,
    Finished,
    /// Cancelled before a worker started it.
    Cancelled,
}

impl TaskState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            QUEUED => Self::Queued,
            RUNNING => Self::Running,
            FINISHED => Self::Finished,
            _ => Self::Cancelled,
        }
    }
}

/// Shared view of a dispatched context's state.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    state: Arc<AtomicU8>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(QUEUED)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Finished | TaskState::Cancelled)
    }

    /// Cancel the task if no worker has started it yet.
    ///
    /// Returns `false` once the task is running or done.
    pub fn cancel(&self) -> bool {
        self.transition(QUEUED, CANCELLED)
    }

    /// Claim the task for a worker. Fails if it was cancelled first.
    pub(crate) fn try_start(&self) -> bool {
        self.transition(QUEUED, RUNNING)
    }

    pub(crate) fn mark_finished(&self) {
        self.transition(RUNNING, FINISHED);
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A reply was delivered (or a hook took over delivery).
    Completed,
    /// The pipeline finished without anything to send.
    NoReply,
    /// Generation or delivery failed, or the pipeline panicked.
    Failed(String),
    /// Cancelled before a worker started it.
    Cancelled,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NoReply => "no_reply",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}
