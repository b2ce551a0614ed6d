//! Console runner: stdin lines in, replies on stdout.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context as _,
    async_trait::async_trait,
    courier_auto_reply::{Dispatcher, ReplyGenerator},
    courier_channels::{BotIdentity, ChannelOutbound},
    courier_common::types::{ChatMessage, Context, ContextKind, Reply, ReplyKind},
    courier_config::{CourierConfig, discover_and_load, load_config},
    tokio::io::{AsyncBufReadExt, BufReader},
    tracing::info,
};

const BOT_ID: &str = "courier";

/// Replies with the text it was given.
struct EchoGenerator;

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn generate(&self, context: &Context) -> anyhow::Result<Option<Reply>> {
        let reply = match context.kind {
            ContextKind::ImageCreate => {
                Reply::new(ReplyKind::ImageUrl, format!("https://example.invalid/{}", context.content))
            },
            _ => Reply::text(context.content.clone()),
        };
        Ok(Some(reply))
    }
}

/// Prints replies as `[receiver] content`.
struct StdoutOutbound;

#[async_trait]
impl ChannelOutbound for StdoutOutbound {
    async fn send(&self, reply: &Reply, context: &Context) -> courier_channels::Result<()> {
        let receiver = context.meta.receiver.as_deref().unwrap_or("-");
        println!("[{receiver}] {}", reply.content);
        Ok(())
    }

    fn unsupported_reply_kinds(&self) -> &[ReplyKind] {
        &[ReplyKind::Voice, ReplyKind::File, ReplyKind::Video]
    }
}

fn load(path: Option<PathBuf>) -> anyhow::Result<CourierConfig> {
    match path {
        Some(path) => load_config(&path).with_context(|| format!("loading {}", path.display())),
        None => Ok(discover_and_load()),
    }
}

pub async fn run(config_path: Option<PathBuf>, user: String) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let tick = Duration::from_millis(config.dispatch.tick_ms);

    let dispatcher = Dispatcher::builder(config)
        .generator(Arc::new(EchoGenerator))
        .outbound(Arc::new(StdoutOutbound))
        .bot(BotIdentity::new(BOT_ID, "courier"))
        .start()?;
    info!(user = %user, "reading messages from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let msg = ChatMessage {
            msg_id: uuid::Uuid::new_v4().to_string(),
            from_user_id: user.clone(),
            from_user_nickname: Some(user.clone()),
            to_user_id: BOT_ID.into(),
            other_user_id: user.clone(),
            other_user_nickname: Some(user.clone()),
            actual_user_id: user.clone(),
            actual_user_nickname: Some(user.clone()),
            ..ChatMessage::default()
        };
        dispatcher.submit_event(ContextKind::Text, line, msg).await;
    }

    // Let queued work finish before shutdown discards it.
    while !dispatcher.table().is_empty() {
        tokio::time::sleep(tick).await;
    }
    dispatcher.shutdown().await;
    Ok(())
}
