//! Transport seam of the dispatcher.
//!
//! A chat transport (WeChat bridge, console, test double) implements
//! [`ChannelOutbound`] to deliver replies. [`gating`] holds the text matching
//! helpers used to decide whether an inbound message is addressed to the bot.

pub mod error;
pub mod gating;
pub mod plugin;

pub use {
    error::{Error, Result},
    plugin::{BotIdentity, ChannelOutbound},
};
