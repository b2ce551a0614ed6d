//! Metric names for courier.
//!
//! Recording goes through the `metrics` crate facade; nothing is exported
//! until the host application installs a recorder.
//!
//! # Usage
//!
//! ```rust,ignore
//! use courier_metrics::{counter, dispatch, gauge};
//!
//! counter!(dispatch::CONTEXTS_QUEUED_TOTAL).increment(1);
//! gauge!(dispatch::SESSIONS_ACTIVE).set(3.0);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
