//! Metric name and label definitions.
//!
//! Centralizing these keeps names consistent across crates and documents
//! what is available.

/// Dispatcher metrics
pub mod dispatch {
    /// Contexts accepted by `submit`
    pub const CONTEXTS_QUEUED_TOTAL: &str = "courier_dispatch_contexts_queued_total";
    /// Contexts handed to the worker pool
    pub const CONTEXTS_DISPATCHED_TOTAL: &str = "courier_dispatch_contexts_dispatched_total";
    /// Queued contexts discarded by a cancel
    pub const CONTEXTS_CANCELLED_TOTAL: &str = "courier_dispatch_contexts_cancelled_total";
    /// Raw events the composer dropped
    pub const CONTEXTS_DROPPED_TOTAL: &str = "courier_dispatch_contexts_dropped_total";
    /// Finished tasks, labelled by outcome
    pub const TASKS_FINISHED_TOTAL: &str = "courier_dispatch_tasks_finished_total";
    /// Wall time of one pipeline run in seconds
    pub const TASK_DURATION_SECONDS: &str = "courier_dispatch_task_duration_seconds";
    /// Sessions removed by the reaper
    pub const SESSIONS_REAPED_TOTAL: &str = "courier_dispatch_sessions_reaped_total";
    /// Sessions currently in the session table
    pub const SESSIONS_ACTIVE: &str = "courier_dispatch_sessions_active";
    /// Reaps aborted because tasks were still outstanding
    pub const INVARIANT_VIOLATIONS_TOTAL: &str = "courier_dispatch_invariant_violations_total";
}

/// Outbound delivery metrics
pub mod send {
    /// Replies delivered
    pub const REPLIES_SENT_TOTAL: &str = "courier_send_replies_sent_total";
    /// Individual failed send attempts
    pub const FAILURES_TOTAL: &str = "courier_send_failures_total";
    /// Replies given up on after all retries
    pub const EXHAUSTED_TOTAL: &str = "courier_send_exhausted_total";
}

/// Hook metrics
pub mod hooks {
    /// Stages a hook took over or blocked
    pub const INTERVENTIONS_TOTAL: &str = "courier_hooks_interventions_total";
}

/// Common label keys
pub mod labels {
    pub const OUTCOME: &str = "outcome";
    pub const EVENT: &str = "event";
    pub const REPLY_KIND: &str = "reply_kind";
    pub const ERROR_TYPE: &str = "error_type";
}
