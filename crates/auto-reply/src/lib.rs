//! Per-session concurrent message dispatcher.
//!
//! Flow: transport message → compose into a [`Context`](courier_common::types::Context)
//! → queue per session → dispatch loop hands ready contexts to the worker pool
//! while honouring each session's concurrency limit → generate, decorate, and
//! send the reply.

pub mod commands;
pub mod compose;
pub mod dispatcher;
pub mod error;
pub mod gate;
mod pool;
pub mod queue;
pub mod reply;
pub mod session;
pub mod task;

pub use {
    compose::{Composer, ContextComposer},
    dispatcher::{Dispatcher, DispatcherBuilder},
    error::{Error, Result},
    reply::{ReplyGenerator, ReplyPipeline},
    session::{CancelSummary, DEFAULT_SESSION_ID, SessionSnapshot, SessionTable},
    task::{TaskHandle, TaskId, TaskOutcome, TaskState},
};
