use {
    async_trait::async_trait,
    courier_common::types::{Context, Reply, ReplyKind},
    serde::{Deserialize, Serialize},
};

use crate::Result;

/// Who the bot is on a transport, used to recognise self-sent messages and
/// @-mentions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub user_id: String,
    pub name: String,
}

impl BotIdentity {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
        }
    }
}

/// Send replies to a chat transport.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    /// Deliver `reply` to the receiver recorded in `context`.
    ///
    /// Return [`crate::Error::Unsupported`] when the transport can never
    /// deliver this reply kind; any other error may be retried.
    async fn send(&self, reply: &Reply, context: &Context) -> Result<()>;

    /// Reply kinds this transport cannot deliver.
    fn unsupported_reply_kinds(&self) -> &[ReplyKind] {
        &[]
    }

    fn supports(&self, kind: ReplyKind) -> bool {
        !self.unsupported_reply_kinds().contains(&kind)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::Error, courier_common::types::ContextKind};

    struct TextOnly;

    #[async_trait]
    impl ChannelOutbound for TextOnly {
        async fn send(&self, reply: &Reply, _context: &Context) -> Result<()> {
            if self.supports(reply.kind) {
                Ok(())
            } else {
                Err(Error::unsupported(reply.kind))
            }
        }

        fn unsupported_reply_kinds(&self) -> &[ReplyKind] {
            &[ReplyKind::Voice, ReplyKind::Image]
        }
    }

    #[tokio::test]
    async fn unsupported_kinds_are_rejected() {
        let ctx = Context::new(ContextKind::Text, "hi");
        let outbound = TextOnly;
        assert!(outbound.send(&Reply::text("ok"), &ctx).await.is_ok());
        let err = outbound
            .send(&Reply::new(ReplyKind::Voice, "a.mp3"), &ctx)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(outbound.supports(ReplyKind::Info));
    }
}
