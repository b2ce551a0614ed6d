//! Turning raw inbound messages into contexts.
//!
//! The composer decides whether a message is addressed to the bot, which
//! session it belongs to, and what the bot should actually read.

use std::sync::Arc;

use {
    async_trait::async_trait,
    courier_channels::{
        BotIdentity,
        gating::{contains_keyword, match_prefix, strip_bot_mentions, strip_prefix},
    },
    courier_common::{
        hooks::{HookOutcome, HookPayload, HookRegistry},
        types::{ChatMessage, Context, ContextKind, ContextMeta, ReplyKind},
    },
    courier_config::ChatConfig,
    tracing::{debug, info, warn},
};

/// Builds a [`Context`] from a message, or `None` to drop it.
#[async_trait]
pub trait Composer: Send + Sync {
    async fn compose(
        &self,
        kind: ContextKind,
        content: String,
        meta: ContextMeta,
    ) -> Option<Context>;
}

/// Filtering and session assignment driven by [`ChatConfig`].
pub struct ContextComposer {
    chat: ChatConfig,
    bot: BotIdentity,
    hooks: Arc<HookRegistry>,
    unsupported_replies: Vec<ReplyKind>,
}

impl ContextComposer {
    pub fn new(chat: ChatConfig, bot: BotIdentity, hooks: Arc<HookRegistry>) -> Self {
        Self {
            chat,
            bot,
            hooks,
            unsupported_replies: Vec::new(),
        }
    }

    /// Reply kinds the transport cannot send. Voice replies are only
    /// requested when voice is supported.
    #[must_use]
    pub fn with_unsupported_replies(mut self, kinds: Vec<ReplyKind>) -> Self {
        self.unsupported_replies = kinds;
        self
    }

    fn voice_supported(&self) -> bool {
        !self.unsupported_replies.contains(&ReplyKind::Voice)
    }

    /// Session id and receiver for a message seen for the first time.
    /// `None` when the group is not whitelisted.
    fn assign_session(&self, meta: &mut ContextMeta, msg: &ChatMessage) -> Option<()> {
        if !meta.is_group {
            meta.session_id = Some(msg.other_user_id.clone());
            meta.receiver = Some(msg.other_user_id.clone());
            return Some(());
        }

        let group_name = msg.other_user_nickname.clone().unwrap_or_default();
        let group_id = msg.other_user_id.clone();
        if !self.chat.group_allowed(&group_name) {
            debug!(group_name = %group_name, "group not whitelisted, ignoring");
            return None;
        }

        let shared = self.chat.group_shares_session(&group_name);
        meta.session_id = Some(if shared {
            group_id.clone()
        } else {
            format!("{}@@{}", msg.actual_user_id, group_id)
        });
        meta.is_shared_session_group = shared;
        meta.group_name = Some(group_name);
        meta.receiver = Some(group_id);
        Some(())
    }

    /// Decide whether group text addresses the bot; returns what it should read.
    fn filter_group_text(
        &self,
        content: String,
        msg: &ChatMessage,
        origin: Option<ContextKind>,
    ) -> Option<String> {
        let mut content = content;
        let mut triggered = false;

        if msg.to_user_id != msg.actual_user_id {
            let prefix = match_prefix(&content, &self.chat.group_chat_prefix);
            if prefix.is_some() || contains_keyword(&content, &self.chat.group_chat_keyword) {
                triggered = true;
                if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
                    content = strip_prefix(&content, prefix);
                }
            }
            if msg.is_at {
                if let Some(nick) = msg.actual_user_nickname.as_deref() {
                    if self.chat.is_blacklisted(nick) {
                        warn!(nick_name = %nick, "nickname is blacklisted, ignoring");
                        return None;
                    }
                }
                info!("group message mentions the bot");
                if !self.chat.group_at_off {
                    triggered = true;
                }
                content = strip_bot_mentions(
                    &content,
                    &self.bot.name,
                    &msg.at_list,
                    msg.self_display_name.as_deref(),
                );
            }
        }

        if !triggered {
            if origin == Some(ContextKind::Voice) {
                info!("group voice message did not match a trigger");
            }
            return None;
        }
        Some(content)
    }

    fn filter_private_text(
        &self,
        content: String,
        msg: &ChatMessage,
        origin: Option<ContextKind>,
    ) -> Option<String> {
        if let Some(nick) = msg.from_user_nickname.as_deref() {
            if self.chat.is_blacklisted(nick) {
                warn!(nick_name = %nick, "nickname is blacklisted, ignoring");
                return None;
            }
        }

        match match_prefix(&content, &self.chat.single_chat_prefix) {
            Some(prefix) => Some(strip_prefix(&content, prefix)),
            // Transcribed private voice does not need a prefix.
            None if origin == Some(ContextKind::Voice) => Some(content),
            None => None,
        }
    }
}

#[async_trait]
impl Composer for ContextComposer {
    async fn compose(
        &self,
        kind: ContextKind,
        content: String,
        meta: ContextMeta,
    ) -> Option<Context> {
        if kind == ContextKind::AcceptFriend {
            return Some(Context {
                kind,
                content,
                meta,
            });
        }

        let mut meta = meta;
        meta.origin_kind.get_or_insert(kind);
        let msg = meta.msg.clone().unwrap_or_default();

        let mut context = if meta.receiver.is_none() {
            self.assign_session(&mut meta, &msg)?;
            let payload = HookPayload::ReceiveMessage {
                context: Context {
                    kind,
                    content,
                    meta,
                },
            };
            let context = match self.hooks.dispatch(payload).await {
                HookOutcome::Proceed(payload) => payload.into_parts().0,
                HookOutcome::Handled(payload) => return Some(payload.into_parts().0),
                HookOutcome::Blocked(reason) => {
                    debug!(reason = %reason, "message blocked by hook");
                    return None;
                },
            };
            if !self.bot.user_id.is_empty()
                && msg.from_user_id == self.bot.user_id
                && !self.chat.trigger_by_self
            {
                debug!("message sent by the bot itself, ignoring");
                return None;
            }
            context
        } else {
            Context {
                kind,
                content,
                meta,
            }
        };

        match context.kind {
            ContextKind::Text => {
                let origin = context.meta.origin_kind;
                let content = std::mem::take(&mut context.content);
                let filtered = if context.meta.is_group {
                    self.filter_group_text(content, &msg, origin)?
                } else {
                    self.filter_private_text(content, &msg, origin)?
                };
                let filtered = filtered.trim();

                match match_prefix(filtered, &self.chat.image_create_prefix)
                    .filter(|p| !p.is_empty())
                {
                    Some(prefix) => {
                        context.kind = ContextKind::ImageCreate;
                        context.content = strip_prefix(filtered, prefix);
                    },
                    None => context.content = filtered.to_string(),
                }

                if context.meta.desire_reply.is_none()
                    && self.chat.always_reply_voice
                    && self.voice_supported()
                {
                    context.meta.desire_reply = Some(ReplyKind::Voice);
                }
            },
            ContextKind::Voice => {
                if context.meta.desire_reply.is_none()
                    && self.chat.voice_reply_voice
                    && self.voice_supported()
                {
                    context.meta.desire_reply = Some(ReplyKind::Voice);
                }
            },
            _ => {},
        }

        Some(context)
    }
}
