//! Plugin hooks around the reply pipeline.
//!
//! Handlers subscribe to pipeline events, see the context (and reply) at that
//! stage, and may rewrite it, take over the stage, or drop the message.

use std::{collections::HashMap, fmt, sync::Arc};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::types::{Context, Reply};

// ── HookEvent ───────────────────────────────────────────────────────────────

/// Pipeline points that hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// A raw message was composed into a context, before content filtering.
    ReceiveMessage,
    /// A context is about to be turned into a reply.
    HandleContext,
    /// A reply is about to be decorated.
    DecorateReply,
    /// A decorated reply is about to be sent.
    SendReply,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl HookEvent {
    pub const ALL: &'static [HookEvent] = &[
        Self::ReceiveMessage,
        Self::HandleContext,
        Self::DecorateReply,
        Self::SendReply,
    ];
}

// ── HookPayload ─────────────────────────────────────────────────────────────

/// Data carried with each hook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum HookPayload {
    ReceiveMessage {
        context: Context,
    },
    HandleContext {
        context: Context,
        reply: Option<Reply>,
    },
    DecorateReply {
        context: Context,
        reply: Reply,
    },
    SendReply {
        context: Context,
        reply: Reply,
    },
}

impl HookPayload {
    pub fn event(&self) -> HookEvent {
        match self {
            Self::ReceiveMessage { .. } => HookEvent::ReceiveMessage,
            Self::HandleContext { .. } => HookEvent::HandleContext,
            Self::DecorateReply { .. } => HookEvent::DecorateReply,
            Self::SendReply { .. } => HookEvent::SendReply,
        }
    }

    pub fn context(&self) -> &Context {
        match self {
            Self::ReceiveMessage { context }
            | Self::HandleContext { context, .. }
            | Self::DecorateReply { context, .. }
            | Self::SendReply { context, .. } => context,
        }
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::ReceiveMessage { .. } => None,
            Self::HandleContext { reply, .. } => reply.as_ref(),
            Self::DecorateReply { reply, .. } | Self::SendReply { reply, .. } => Some(reply),
        }
    }

    /// Split into the context and the reply, if any.
    pub fn into_parts(self) -> (Context, Option<Reply>) {
        match self {
            Self::ReceiveMessage { context } => (context, None),
            Self::HandleContext { context, reply } => (context, reply),
            Self::DecorateReply { context, reply } | Self::SendReply { context, reply } => {
                (context, Some(reply))
            },
        }
    }
}

// ── HookAction ──────────────────────────────────────────────────────────────

/// What a handler wants to happen next.
#[derive(Debug, Default)]
pub enum HookAction {
    /// Let the event proceed normally.
    #[default]
    Continue,
    /// Replace the payload and keep running the remaining handlers.
    ModifyPayload(HookPayload),
    /// Stop the chain and skip the stage's default handling, using this
    /// payload as the stage result.
    Handled(HookPayload),
    /// Drop the message entirely, with a reason string.
    Block(String),
}

/// Result of dispatching an event through every handler.
#[derive(Debug)]
pub enum HookOutcome {
    /// Run the default handling on this (possibly modified) payload.
    Proceed(HookPayload),
    /// A handler took over the stage.
    Handled(HookPayload),
    /// A handler dropped the message.
    Blocked(String),
}

// ── HookHandler trait ───────────────────────────────────────────────────────

#[async_trait]
pub trait HookHandler: Send + Sync {
    /// A human-readable name for this handler.
    fn name(&self) -> &str;

    /// Which events this handler subscribes to.
    fn events(&self) -> &[HookEvent];

    /// Higher values run first. Default is 0.
    fn priority(&self) -> i32 {
        0
    }

    async fn handle(&self, event: HookEvent, payload: &HookPayload) -> Result<HookAction>;
}

// ── HookRegistry ────────────────────────────────────────────────────────────

/// Registered hook handlers, ordered by priority per event.
pub struct HookRegistry {
    handlers: HashMap<HookEvent, Vec<Arc<dyn HookHandler>>>,
    /// When true, Handled/Block/Modify results are logged but not applied.
    pub dry_run: bool,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Register a handler for all events it subscribes to.
    pub fn register(&mut self, handler: Arc<dyn HookHandler>) {
        for &event in handler.events() {
            let handlers = self.handlers.entry(event).or_default();
            handlers.push(Arc::clone(&handler));
            handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
        }
        info!(handler = handler.name(), "hook handler registered");
    }

    pub fn has_handlers(&self, event: HookEvent) -> bool {
        self.handlers.get(&event).is_some_and(|v| !v.is_empty())
    }

    /// All registered handler names (deduplicated).
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .values()
            .flatten()
            .map(|h| h.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Run the handlers for the payload's event in priority order.
    ///
    /// Modified payloads are passed on to later handlers. The first
    /// `Handled` or `Block` ends the chain. A handler that errors is logged
    /// and skipped. A replacement payload for a different event is ignored.
    pub async fn dispatch(&self, payload: HookPayload) -> HookOutcome {
        let event = payload.event();
        let handlers = match self.handlers.get(&event) {
            Some(h) if !h.is_empty() => h,
            _ => return HookOutcome::Proceed(payload),
        };

        debug!(event = %event, count = handlers.len(), "dispatching hook event");

        let mut current = payload;
        for handler in handlers {
            let name = handler.name();
            match handler.handle(event, &current).await {
                Ok(HookAction::Continue) => {},
                Ok(HookAction::ModifyPayload(next)) => {
                    if next.event() != event {
                        warn!(handler = name, event = %event, "hook returned payload for another event (ignored)");
                    } else if self.dry_run {
                        info!(handler = name, event = %event, "hook modify (dry-run, not applied)");
                    } else {
                        debug!(handler = name, event = %event, "hook modified payload");
                        current = next;
                    }
                },
                Ok(HookAction::Handled(result)) => {
                    if result.event() != event {
                        warn!(handler = name, event = %event, "hook returned payload for another event (ignored)");
                    } else if self.dry_run {
                        info!(handler = name, event = %event, "hook handled (dry-run, not applied)");
                    } else {
                        debug!(handler = name, event = %event, "hook handled event");
                        return HookOutcome::Handled(result);
                    }
                },
                Ok(HookAction::Block(reason)) => {
                    if self.dry_run {
                        info!(handler = name, event = %event, reason = %reason, "hook block (dry-run, not applied)");
                    } else {
                        info!(handler = name, event = %event, reason = %reason, "hook blocked event");
                        return HookOutcome::Blocked(reason);
                    }
                },
                Err(e) => {
                    warn!(handler = name, event = %event, error = %e, "hook handler failed");
                },
            }
        }

        HookOutcome::Proceed(current)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
