//! Built-in admin commands, implemented as `HandleContext` hooks.

use std::sync::Arc;

use {
    async_trait::async_trait,
    courier_common::{
        hooks::{HookAction, HookEvent, HookHandler, HookPayload},
        types::{Context, Reply},
    },
    tracing::info,
};

use crate::session::{DEFAULT_SESSION_ID, SessionTable};

/// `<prefix>reset` drops this session's pending messages;
/// `<prefix>reset all` drops every session's.
pub struct ResetCommand {
    table: Arc<SessionTable>,
    command: String,
}

impl ResetCommand {
    pub fn new(table: Arc<SessionTable>, admin_prefix: &str) -> Self {
        Self {
            table,
            command: format!("{admin_prefix}reset"),
        }
    }

    fn matches(&self, context: &Context) -> Option<Scope> {
        if !context.is_command(&self.command) {
            return None;
        }
        match context.content[self.command.len()..].trim() {
            "" => Some(Scope::Session),
            "all" => Some(Scope::All),
            _ => None,
        }
    }
}

enum Scope {
    Session,
    All,
}

#[async_trait]
impl HookHandler for ResetCommand {
    fn name(&self) -> &str {
        "reset-command"
    }

    fn events(&self) -> &[HookEvent] {
        &[HookEvent::HandleContext]
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn handle(&self, _event: HookEvent, payload: &HookPayload) -> anyhow::Result<HookAction> {
        let context = payload.context();
        let Some(scope) = self.matches(context) else {
            return Ok(HookAction::Continue);
        };

        let reply = match scope {
            Scope::Session => {
                let session_id = context.session_id().unwrap_or(DEFAULT_SESSION_ID);
                let summary = self.table.cancel(session_id);
                info!(session_id, cleared = summary.total(), "session reset");
                Reply::info(format!(
                    "Cleared {} pending message(s) for this session.",
                    summary.total()
                ))
            },
            Scope::All => {
                let summary = self.table.cancel_all();
                info!(cleared = summary.total(), "all sessions reset");
                Reply::info(format!(
                    "Cleared {} pending message(s) across all sessions.",
                    summary.total()
                ))
            },
        };

        Ok(HookAction::Handled(HookPayload::HandleContext {
            context: context.clone(),
            reply: Some(reply),
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_common::{
            hooks::{HookOutcome, HookRegistry},
            types::{ContextKind, ReplyKind},
        },
        rstest::rstest,
    };

    fn registry(table: &Arc<SessionTable>) -> HookRegistry {
        let mut hooks = HookRegistry::new();
        hooks.register(Arc::new(ResetCommand::new(Arc::clone(table), "#")));
        hooks
    }

    fn payload(session: &str, content: &str) -> HookPayload {
        HookPayload::HandleContext {
            context: Context::new(ContextKind::Text, content).with_session(session),
            reply: None,
        }
    }

    #[tokio::test]
    async fn reset_clears_only_this_session() {
        let table = Arc::new(SessionTable::new(1, "#"));
        for n in 0..3 {
            table.submit(Context::new(ContextKind::Text, format!("a{n}")).with_session("a"));
        }
        table.submit(Context::new(ContextKind::Text, "b0").with_session("b"));

        let outcome = registry(&table).dispatch(payload("a", "#reset")).await;
        let HookOutcome::Handled(payload) = outcome else {
            panic!("reset should handle the context");
        };
        let reply = payload.reply().cloned().unwrap();
        assert_eq!(reply.kind, ReplyKind::Info);
        assert!(reply.content.contains('3'));
        assert_eq!(table.get("a").unwrap().queued, 0);
        assert_eq!(table.get("b").unwrap().queued, 1);
    }

    #[tokio::test]
    async fn reset_all_clears_every_session() {
        let table = Arc::new(SessionTable::new(1, "#"));
        table.submit(Context::new(ContextKind::Text, "a0").with_session("a"));
        table.submit(Context::new(ContextKind::Text, "b0").with_session("b"));

        let outcome = registry(&table).dispatch(payload("a", "#reset all")).await;
        assert!(matches!(outcome, HookOutcome::Handled(_)));
        assert!(table.snapshot().iter().all(|s| s.queued == 0));
    }

    #[rstest]
    #[case("#resets")]
    #[case("#reset everything")]
    #[case("reset")]
    #[case("#status")]
    #[tokio::test]
    async fn other_text_passes_through(#[case] content: &str) {
        let table = Arc::new(SessionTable::new(1, "#"));
        table.submit(Context::new(ContextKind::Text, "pending").with_session("a"));

        let outcome = registry(&table).dispatch(payload("a", content)).await;
        assert!(matches!(outcome, HookOutcome::Proceed(_)));
        assert_eq!(table.get("a").unwrap().queued, 1);
    }
}
