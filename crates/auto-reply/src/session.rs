//! Session table: per-session queue, gate, and outstanding tasks.
//!
//! One mutex guards the whole table and is only held for non-blocking
//! bookkeeping, never across an `.await`.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    courier_common::types::Context,
    courier_config::{DispatchConfig, MAX_CONCURRENCY_IN_SESSION},
    tokio::sync::{Notify, OwnedSemaphorePermit},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics, gauge};

use crate::{
    gate::ConcurrencyGate,
    pool::Job,
    queue::OrderedQueue,
    task::{TaskHandle, TaskId},
};

/// Session used for contexts that carry no session id. All of them share it.
pub const DEFAULT_SESSION_ID: &str = "0";

struct SessionEntry {
    queue: OrderedQueue,
    gate: ConcurrencyGate,
    outstanding: HashMap<TaskId, TaskHandle>,
}

impl SessionEntry {
    fn new(limit: usize) -> Self {
        Self {
            queue: OrderedQueue::new(),
            gate: ConcurrencyGate::new(limit),
            outstanding: HashMap::new(),
        }
    }

    fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            session_id: session_id.to_string(),
            queued: self.queue.len(),
            in_flight: self.gate.in_flight(),
            outstanding: self.outstanding.len(),
        }
    }

    /// Cancel not-yet-started tasks and drop the queue.
    fn cancel(&mut self) -> CancelSummary {
        let cancelled_tasks = self.outstanding.values().filter(|h| h.cancel()).count();
        CancelSummary {
            discarded: self.queue.clear(),
            cancelled_tasks,
        }
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub queued: usize,
    pub in_flight: usize,
    pub outstanding: usize,
}

/// What a cancel threw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelSummary {
    /// Contexts removed from the queue.
    pub discarded: usize,
    /// Tasks already handed to the pool that will now never start.
    pub cancelled_tasks: usize,
}

impl CancelSummary {
    pub fn total(&self) -> usize {
        self.discarded + self.cancelled_tasks
    }

    fn merge(self, other: Self) -> Self {
        Self {
            discarded: self.discarded + other.discarded,
            cancelled_tasks: self.cancelled_tasks + other.cancelled_tasks,
        }
    }
}

/// Map of session id to its queue, gate, and outstanding task handles.
pub struct SessionTable {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    limit: usize,
    admin_prefix: String,
    next_task_id: AtomicU64,
    wake: Notify,
}

impl SessionTable {
    /// `limit` is the per-session concurrency; text starting with
    /// `admin_prefix` is queued ahead of normal work.
    /// Limits above [`MAX_CONCURRENCY_IN_SESSION`] are clamped to it.
    pub fn new(limit: usize, admin_prefix: impl Into<String>) -> Self {
        if limit > MAX_CONCURRENCY_IN_SESSION {
            warn!(
                limit,
                max = MAX_CONCURRENCY_IN_SESSION,
                "session concurrency limit too large, clamping"
            );
        }
        Self {
            sessions: Mutex::new(HashMap::new()),
            limit: limit.min(MAX_CONCURRENCY_IN_SESSION),
            admin_prefix: admin_prefix.into(),
            next_task_id: AtomicU64::new(1),
            wake: Notify::new(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.concurrency_in_session, config.admin_prefix.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a context for its session. Never waits.
    ///
    /// Returns the session id the context was queued under.
    pub fn submit(&self, context: Context) -> String {
        let session_id = match context.session_id() {
            Some(id) => id.to_string(),
            None => {
                debug!(
                    session_id = DEFAULT_SESSION_ID,
                    "context has no session id, using default session"
                );
                DEFAULT_SESSION_ID.to_string()
            },
        };
        let admin = context.is_command(&self.admin_prefix);

        {
            let mut sessions = self.lock();
            let entry = sessions
                .entry(session_id.clone())
                .or_insert_with(|| SessionEntry::new(self.limit));
            if admin {
                entry.queue.push_front(context);
            } else {
                entry.queue.push_back(context);
            }
            debug!(
                session_id = %session_id,
                admin,
                queued = entry.queue.len(),
                "context queued"
            );

            #[cfg(feature = "metrics")]
            gauge!(dispatch_metrics::SESSIONS_ACTIVE).set(sessions.len() as f64);
        }

        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::CONTEXTS_QUEUED_TOTAL).increment(1);

        self.wake.notify_one();
        session_id
    }

    /// Drop a session's queued contexts and cancel its tasks that have not
    /// started. Running tasks are unaffected; the session stays in the table.
    pub fn cancel(&self, session_id: &str) -> CancelSummary {
        let summary = {
            let mut sessions = self.lock();
            match sessions.get_mut(session_id) {
                Some(entry) => entry.cancel(),
                None => CancelSummary::default(),
            }
        };
        if summary.total() > 0 {
            info!(
                session_id,
                discarded = summary.discarded,
                cancelled_tasks = summary.cancelled_tasks,
                "cancelled session messages"
            );
        }

        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::CONTEXTS_CANCELLED_TOTAL).increment(summary.total() as u64);

        summary
    }

    /// [`cancel`](Self::cancel) every session.
    pub fn cancel_all(&self) -> CancelSummary {
        let summary = {
            let mut sessions = self.lock();
            sessions.iter_mut().fold(CancelSummary::default(), |acc, (id, entry)| {
                let summary = entry.cancel();
                if summary.total() > 0 {
                    info!(
                        session_id = %id,
                        discarded = summary.discarded,
                        cancelled_tasks = summary.cancelled_tasks,
                        "cancelled session messages"
                    );
                }
                acc.merge(summary)
            })
        };

        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::CONTEXTS_CANCELLED_TOTAL).increment(summary.total() as u64);

        summary
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.lock()
            .get(session_id)
            .map(|entry| entry.snapshot(session_id))
    }

    /// Snapshot of every session, sorted by id.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self
            .lock()
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        all
    }

    // ── Dispatch loop side ──────────────────────────────────────────────────

    /// Wait until new work is submitted or a task completes.
    pub(crate) async fn notified(&self) {
        self.wake.notified().await;
    }

    /// One pass over every session.
    ///
    /// Pops as many contexts as the gate allows, registers their handles,
    /// and reaps sessions that are idle with an empty queue. The returned
    /// jobs are handed to the pool by the caller once no lock is held.
    pub(crate) fn dispatch_ready(self: &Arc<Self>) -> Vec<Job> {
        let session_ids: Vec<String> = self.lock().keys().cloned().collect();
        let mut jobs = Vec::new();

        for session_id in session_ids {
            let mut sessions = self.lock();
            let Some(entry) = sessions.get_mut(&session_id) else {
                continue;
            };

            while let Some(permit) = entry.gate.try_acquire() {
                let Some(context) = entry.queue.pop_front() else {
                    drop(permit);
                    break;
                };
                let handle = TaskHandle::new(self.next_task_id.fetch_add(1, Ordering::Relaxed));
                entry.outstanding.insert(handle.id(), handle.clone());
                debug!(
                    session_id = %session_id,
                    task_id = handle.id(),
                    in_flight = entry.gate.in_flight(),
                    "dispatching context"
                );
                jobs.push(Job {
                    context,
                    guard: CompletionGuard {
                        table: Arc::clone(self),
                        session_id: session_id.clone(),
                        task_id: handle.id(),
                        permit: Some(permit),
                    },
                    handle,
                });
            }

            if entry.queue.is_empty() && entry.gate.is_idle() {
                if entry.outstanding.is_empty() {
                    sessions.remove(&session_id);
                    debug!(session_id = %session_id, "session reaped");

                    #[cfg(feature = "metrics")]
                    {
                        counter!(dispatch_metrics::SESSIONS_REAPED_TOTAL).increment(1);
                        gauge!(dispatch_metrics::SESSIONS_ACTIVE).set(sessions.len() as f64);
                    }
                } else {
                    error!(
                        session_id = %session_id,
                        outstanding = entry.outstanding.len(),
                        "session idle with outstanding tasks, not reaping"
                    );

                    #[cfg(feature = "metrics")]
                    counter!(dispatch_metrics::INVARIANT_VIOLATIONS_TOTAL).increment(1);
                }
            }
        }

        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::CONTEXTS_DISPATCHED_TOTAL).increment(jobs.len() as u64);

        jobs
    }

    /// Forget a finished task and release its permit in one critical section.
    fn complete(&self, session_id: &str, task_id: TaskId, permit: Option<OwnedSemaphorePermit>) {
        {
            let mut sessions = self.lock();
            match sessions
                .get_mut(session_id)
                .and_then(|entry| entry.outstanding.remove(&task_id))
            {
                Some(handle) => handle.mark_finished(),
                None => error!(session_id, task_id, "completed task was not outstanding"),
            }
            drop(permit);
        }
        self.wake.notify_one();
    }
}

/// Runs the completion bookkeeping when a job is dropped, whether it ran to
/// the end, panicked, was cancelled, or never reached a worker.
pub(crate) struct CompletionGuard {
    table: Arc<SessionTable>,
    session_id: String,
    task_id: TaskId,
    permit: Option<OwnedSemaphorePermit>,
}

impl CompletionGuard {
    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.table
            .complete(&self.session_id, self.task_id, self.permit.take());
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::task::TaskState,
        courier_common::types::{Context, ContextKind},
    };

    fn table(limit: usize) -> Arc<SessionTable> {
        Arc::new(SessionTable::new(limit, "#"))
    }

    fn ctx(session: &str, content: &str) -> Context {
        Context::new(ContextKind::Text, content).with_session(session)
    }

    fn contents(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|j| j.context.content.as_str()).collect()
    }

    #[test]
    fn missing_session_id_uses_default() {
        let table = table(1);
        let id = table.submit(Context::new(ContextKind::Text, "hi"));
        assert_eq!(id, DEFAULT_SESSION_ID);
        assert_eq!(table.get(DEFAULT_SESSION_ID).unwrap().queued, 1);
    }

    #[test]
    fn dispatch_respects_limit_and_priority() {
        let table = table(2);
        table.submit(ctx("s", "a"));
        table.submit(ctx("s", "b"));
        table.submit(ctx("s", "c"));
        table.submit(ctx("s", "#status"));

        let jobs = table.dispatch_ready();
        assert_eq!(contents(&jobs), ["#status", "a"]);
        let snap = table.get("s").unwrap();
        assert_eq!((snap.queued, snap.in_flight, snap.outstanding), (2, 2, 2));

        // Nothing more while both permits are out.
        assert!(table.dispatch_ready().is_empty());

        drop(jobs);
        let jobs = table.dispatch_ready();
        assert_eq!(contents(&jobs), ["b", "c"]);
    }

    #[test]
    fn oversized_limit_is_clamped() {
        let table = table(usize::MAX);
        table.submit(ctx("s", "a"));
        table.submit(ctx("s", "b"));
        let jobs = table.dispatch_ready();
        assert_eq!(contents(&jobs), ["a", "b"]);
        assert_eq!(table.get("s").unwrap().in_flight, 2);
    }

    #[test]
    fn voice_with_prefix_is_not_admin() {
        let table = table(1);
        table.submit(ctx("s", "a"));
        table.submit(Context::new(ContextKind::Voice, "#voice").with_session("s"));
        let jobs = table.dispatch_ready();
        assert_eq!(contents(&jobs), ["a"]);
    }

    #[test]
    fn idle_session_is_reaped() {
        let table = table(1);
        table.submit(ctx("s", "a"));
        let jobs = table.dispatch_ready();
        assert_eq!(jobs.len(), 1);

        // Still running: not reaped.
        assert!(table.dispatch_ready().is_empty());
        assert!(table.contains("s"));

        drop(jobs);
        let snap = table.get("s").unwrap();
        assert_eq!((snap.in_flight, snap.outstanding), (0, 0));
        assert!(table.dispatch_ready().is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn reap_aborts_when_outstanding_is_not_empty() {
        let table = table(1);
        table.submit(ctx("s", "a"));
        let jobs = table.dispatch_ready();
        let job = jobs.into_iter().next().unwrap();

        // Release the permit without running completion, leaving a stray handle.
        let mut guard = job.guard;
        drop(guard.permit.take());
        std::mem::forget(guard);

        assert!(table.dispatch_ready().is_empty());
        let snap = table.get("s").unwrap();
        assert_eq!((snap.in_flight, snap.outstanding), (0, 1));
    }

    #[test]
    fn cancel_discards_queue_and_unstarted_tasks() {
        let table = table(2);
        for c in ["a", "b", "c", "d"] {
            table.submit(ctx("s", c));
        }
        table.submit(ctx("other", "x"));
        let jobs = table.dispatch_ready();
        assert_eq!(jobs.len(), 3);

        let started = jobs.iter().find(|j| j.context.content == "a").unwrap();
        assert!(started.handle.try_start());

        let summary = table.cancel("s");
        assert_eq!(summary.discarded, 2);
        assert_eq!(summary.cancelled_tasks, 1);
        assert_eq!(summary.total(), 3);

        let by_content = |c: &str| jobs.iter().find(|j| j.context.content == c).unwrap();
        assert_eq!(by_content("a").handle.state(), TaskState::Running);
        assert_eq!(by_content("b").handle.state(), TaskState::Cancelled);
        assert_eq!(by_content("x").handle.state(), TaskState::Queued);

        // Entry and gate survive the cancel.
        let snap = table.get("s").unwrap();
        assert_eq!((snap.queued, snap.in_flight), (0, 2));
        assert_eq!(table.get("other").unwrap().outstanding, 1);
    }

    #[test]
    fn cancel_all_covers_every_session() {
        let table = table(1);
        table.submit(ctx("s1", "a"));
        table.submit(ctx("s1", "b"));
        table.submit(ctx("s2", "c"));
        let summary = table.cancel_all();
        assert_eq!(summary.discarded, 3);
        assert_eq!(table.session_count(), 2);
        assert_eq!(table.cancel("missing"), CancelSummary::default());

        // Emptied sessions are reaped on the next pass.
        assert!(table.dispatch_ready().is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_is_sorted() {
        let table = table(1);
        table.submit(ctx("b", "1"));
        table.submit(ctx("a", "2"));
        let ids: Vec<String> = table.snapshot().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
