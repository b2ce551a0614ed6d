//! Shared types, hook system, and error plumbing used across all courier crates.

pub mod error;
pub mod hooks;
pub mod types;

pub use error::FromMessage;
