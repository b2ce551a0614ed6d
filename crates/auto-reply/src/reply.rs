//! The reply pipeline run by each worker: generate, decorate, send.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    courier_channels::ChannelOutbound,
    courier_common::{
        hooks::{HookOutcome, HookPayload, HookRegistry},
        types::{Context, ContextKind, Reply, ReplyKind},
    },
    courier_config::{ChatConfig, DispatchConfig},
    futures::{FutureExt, future::BoxFuture},
    tracing::{debug, error, info, instrument, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, hooks as hook_metrics, labels, send as send_metrics};

use crate::{compose::Composer, task::TaskOutcome};

/// Produces replies for contexts. This is where the business logic lives.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Build a reply for a text, image-create, or other context.
    /// `Ok(None)` means there is nothing to say.
    async fn generate(&self, context: &Context) -> anyhow::Result<Option<Reply>>;

    /// Transcribe a voice context (its content is the audio location).
    /// A `Text` reply is fed back through compose and generate.
    async fn voice_to_text(&self, _context: &Context) -> anyhow::Result<Reply> {
        anyhow::bail!("voice transcription is not supported")
    }

    /// Synthesize speech for a text reply.
    async fn text_to_voice(&self, _text: &str) -> anyhow::Result<Reply> {
        anyhow::bail!("speech synthesis is not supported")
    }
}

/// Everything a worker needs to turn a context into a delivered reply.
pub struct ReplyPipeline {
    generator: Arc<dyn ReplyGenerator>,
    outbound: Arc<dyn ChannelOutbound>,
    composer: Arc<dyn Composer>,
    hooks: Arc<HookRegistry>,
    chat: ChatConfig,
    send_retries: u32,
    send_backoff: Duration,
}

impl ReplyPipeline {
    pub fn new(
        generator: Arc<dyn ReplyGenerator>,
        outbound: Arc<dyn ChannelOutbound>,
        composer: Arc<dyn Composer>,
        hooks: Arc<HookRegistry>,
        chat: ChatConfig,
        dispatch: &DispatchConfig,
    ) -> Self {
        Self {
            generator,
            outbound,
            composer,
            hooks,
            chat,
            send_retries: dispatch.send_retries,
            send_backoff: Duration::from_millis(dispatch.send_retry_backoff_ms),
        }
    }

    /// Run one context through the pipeline.
    ///
    /// The worker owns `context`, so metadata edits made here never leak
    /// into other runs of the same session.
    #[instrument(name = "pipeline", skip_all)]
    pub async fn run(&self, context: Context) -> TaskOutcome {
        if context.content.is_empty() {
            debug!("empty context, nothing to do");
            return TaskOutcome::NoReply;
        }

        let reply = match self.generate(&context).await {
            Ok(Some(reply)) if !reply.is_empty() => reply,
            Ok(_) => return TaskOutcome::NoReply,
            Err(e) => {
                error!(error = %e, "reply generation failed");
                return TaskOutcome::Failed(format!("generate: {e:#}"));
            },
        };

        match self.decorate(&context, reply).await {
            Some(reply) if !reply.is_empty() => self.send(context, reply).await,
            _ => TaskOutcome::NoReply,
        }
    }

    // ── Generate ────────────────────────────────────────────────────────────

    /// `HandleContext` hooks, then default handling by context kind.
    pub(crate) fn generate<'a>(
        &'a self,
        context: &'a Context,
    ) -> BoxFuture<'a, anyhow::Result<Option<Reply>>> {
        async move {
            let payload = HookPayload::HandleContext {
                context: context.clone(),
                reply: None,
            };
            let (context, hook_reply) = match self.hooks.dispatch(payload).await {
                HookOutcome::Proceed(payload) => payload.into_parts(),
                HookOutcome::Handled(payload) => {
                    record_intervention("handled");
                    return Ok(payload.into_parts().1);
                },
                HookOutcome::Blocked(reason) => {
                    record_intervention("blocked");
                    debug!(reason = %reason, "context blocked by hook");
                    return Ok(None);
                },
            };

            let generated = self.default_reply(&context).await?;
            Ok(generated.or(hook_reply))
        }
        .boxed()
    }

    async fn default_reply(&self, context: &Context) -> anyhow::Result<Option<Reply>> {
        debug!(kind = %context.kind, "handling context");
        match context.kind {
            ContextKind::Text | ContextKind::ImageCreate => {
                if context.is_group() && trigger_disabled(context) {
                    info!("group message did not trigger a reply");
                    return Ok(None);
                }
                self.generator.generate(context).await
            },
            ContextKind::Voice => {
                let transcript = self.generator.voice_to_text(context).await?;
                if transcript.kind != ReplyKind::Text {
                    return Ok(Some(transcript));
                }
                let recomposed = self
                    .composer
                    .compose(ContextKind::Text, transcript.content, context.meta.clone())
                    .await;
                match recomposed {
                    Some(text) => self.generate(&text).await,
                    None => Ok(None),
                }
            },
            ContextKind::AcceptFriend => Ok(Some(self.friend_request_reply(context))),
            ContextKind::Image
            | ContextKind::File
            | ContextKind::Video
            | ContextKind::Sharing
            | ContextKind::Xml => self.generator.generate(context).await,
        }
    }

    fn friend_request_reply(&self, context: &Context) -> Reply {
        info!(request = %context.content, "friend request");
        let accept = self
            .chat
            .accept_friend_commands
            .iter()
            .any(|c| *c == context.content);
        Reply::accept_friend(accept)
    }

    // ── Decorate ────────────────────────────────────────────────────────────

    /// `DecorateReply` hooks, then transport checks and text framing.
    pub(crate) async fn decorate(&self, context: &Context, reply: Reply) -> Option<Reply> {
        let payload = HookPayload::DecorateReply {
            context: context.clone(),
            reply,
        };
        let (context, reply) = match self.hooks.dispatch(payload).await {
            HookOutcome::Proceed(payload) => payload.into_parts(),
            HookOutcome::Handled(payload) => {
                record_intervention("handled");
                return payload.into_parts().1;
            },
            HookOutcome::Blocked(reason) => {
                record_intervention("blocked");
                debug!(reason = %reason, "reply blocked by hook");
                return None;
            },
        };
        let mut reply = reply?;
        let desired = context.meta.desire_reply;

        if !self.outbound.supports(reply.kind) {
            error!(kind = %reply.kind, "reply kind not supported by channel");
            reply = Reply::error(format!("unsupported reply type: {}", reply.kind));
        }

        if reply.kind == ReplyKind::Text
            && desired == Some(ReplyKind::Voice)
            && self.outbound.supports(ReplyKind::Voice)
        {
            reply = match self.generator.text_to_voice(&reply.content).await {
                Ok(voice) => voice,
                Err(e) => {
                    warn!(error = %e, "text to voice failed");
                    Reply::error(format!("text to voice failed: {e}"))
                },
            };
        }

        match reply.kind {
            ReplyKind::Text => {
                reply.content = if context.is_group() {
                    format!(
                        "{}{}{}",
                        self.chat.group_chat_reply_prefix,
                        reply.content.trim(),
                        self.chat.group_chat_reply_suffix
                    )
                } else {
                    format!(
                        "{}{}{}",
                        self.chat.single_chat_reply_prefix,
                        reply.content,
                        self.chat.single_chat_reply_suffix
                    )
                };
            },
            ReplyKind::Info | ReplyKind::Error => {
                reply.content = format!("[{}]\n{}", reply.kind, reply.content);
            },
            kind if kind.is_media() => debug!(kind = %kind, "media reply passed through"),
            _ => {},
        }

        match desired {
            Some(d) if d != reply.kind && !matches!(reply.kind, ReplyKind::Info | ReplyKind::Error) => {
                warn!(desired = %d, actual = %reply.kind, "reply kind differs from desired");
            },
            _ => {},
        }

        Some(reply)
    }

    // ── Send ────────────────────────────────────────────────────────────────

    /// `SendReply` hooks, then delivery with linear backoff retries.
    pub(crate) async fn send(&self, context: Context, reply: Reply) -> TaskOutcome {
        let payload = HookPayload::SendReply { context, reply };
        let (context, reply) = match self.hooks.dispatch(payload).await {
            HookOutcome::Proceed(payload) => payload.into_parts(),
            HookOutcome::Handled(_) => {
                record_intervention("handled");
                debug!("reply delivered by hook");
                return TaskOutcome::Completed;
            },
            HookOutcome::Blocked(reason) => {
                record_intervention("blocked");
                debug!(reason = %reason, "reply blocked by hook");
                return TaskOutcome::NoReply;
            },
        };
        let Some(reply) = reply.filter(|r| !r.is_empty()) else {
            return TaskOutcome::NoReply;
        };

        let mut attempt: u32 = 0;
        loop {
            match self.outbound.send(&reply, &context).await {
                Ok(()) => {
                    debug!(kind = %reply.kind, attempt, "reply sent");

                    #[cfg(feature = "metrics")]
                    counter!(
                        send_metrics::REPLIES_SENT_TOTAL,
                        labels::REPLY_KIND => reply.kind.to_string()
                    )
                    .increment(1);

                    return TaskOutcome::Completed;
                },
                Err(e) => {
                    #[cfg(feature = "metrics")]
                    counter!(send_metrics::FAILURES_TOTAL).increment(1);

                    if !e.is_retryable() {
                        error!(error = %e, "send failed, not retrying");
                        return TaskOutcome::Failed(format!("send: {e}"));
                    }
                    if attempt >= self.send_retries {
                        error!(error = %e, attempts = attempt + 1, "send failed, giving up");

                        #[cfg(feature = "metrics")]
                        counter!(send_metrics::EXHAUSTED_TOTAL).increment(1);

                        return TaskOutcome::Failed(format!("send: {e}"));
                    }
                    let delay = self.send_backoff * (attempt + 1);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "send failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}

/// Group contexts can carry `trigger_prefix = false` in `extra` to opt out
/// of generation.
fn trigger_disabled(context: &Context) -> bool {
    context
        .meta
        .extra
        .get("trigger_prefix")
        .and_then(serde_json::Value::as_bool)
        == Some(false)
}

fn record_intervention(_action: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(hook_metrics::INTERVENTIONS_TOTAL, labels::OUTCOME => _action).increment(1);
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::compose::ContextComposer,
        courier_channels::{BotIdentity, Error as ChannelError},
        courier_common::{
            hooks::{HookAction, HookEvent, HookHandler},
            types::ContextMeta,
        },
        rstest::rstest,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Echoes text, transcribes voice to its content.
    struct Echo;

    #[async_trait]
    impl ReplyGenerator for Echo {
        async fn generate(&self, context: &Context) -> anyhow::Result<Option<Reply>> {
            match context.content.as_str() {
                "fail" => anyhow::bail!("backend down"),
                "silent" => Ok(None),
                other => Ok(Some(Reply::text(format!("echo: {other}")))),
            }
        }

        async fn voice_to_text(&self, context: &Context) -> anyhow::Result<Reply> {
            Ok(Reply::text(context.content.trim_end_matches(".mp3")))
        }

        async fn text_to_voice(&self, text: &str) -> anyhow::Result<Reply> {
            Ok(Reply::new(ReplyKind::Voice, format!("{text}.mp3")))
        }
    }

    /// Records deliveries; fails the first `failures` sends.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Reply>>,
        attempts: AtomicUsize,
        failures: usize,
        unsupported: Vec<ReplyKind>,
        reject_all: bool,
    }

    #[async_trait]
    impl ChannelOutbound for Recorder {
        async fn send(&self, reply: &Reply, _context: &Context) -> courier_channels::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.reject_all {
                return Err(ChannelError::unsupported(reply.kind));
            }
            if attempt < self.failures {
                return Err(ChannelError::unavailable("connection reset"));
            }
            self.sent.lock().unwrap().push(reply.clone());
            Ok(())
        }

        fn unsupported_reply_kinds(&self) -> &[ReplyKind] {
            &self.unsupported
        }
    }

    fn pipeline_with(
        outbound: Arc<Recorder>,
        chat: ChatConfig,
        hooks: HookRegistry,
    ) -> ReplyPipeline {
        let hooks = Arc::new(hooks);
        let composer = Arc::new(ContextComposer::new(
            chat.clone(),
            BotIdentity::new("bot-id", "courier"),
            Arc::clone(&hooks),
        ));
        let dispatch = DispatchConfig {
            send_retry_backoff_ms: 1,
            ..DispatchConfig::default()
        };
        ReplyPipeline::new(Arc::new(Echo), outbound, composer, hooks, chat, &dispatch)
    }

    fn pipeline(outbound: Arc<Recorder>) -> ReplyPipeline {
        pipeline_with(outbound, ChatConfig::default(), HookRegistry::new())
    }

    fn private(content: &str) -> Context {
        Context::new(ContextKind::Text, content).with_meta(ContextMeta {
            session_id: Some("alice".into()),
            receiver: Some("alice".into()),
            ..ContextMeta::default()
        })
    }

    fn sent(outbound: &Recorder) -> Vec<Reply> {
        outbound.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn text_round_trip() {
        let outbound = Arc::new(Recorder::default());
        let chat = ChatConfig {
            single_chat_reply_prefix: "[bot] ".into(),
            ..ChatConfig::default()
        };
        let p = pipeline_with(Arc::clone(&outbound), chat, HookRegistry::new());
        assert_eq!(p.run(private("hi")).await, TaskOutcome::Completed);
        assert_eq!(sent(&outbound), [Reply::text("[bot] echo: hi")]);
    }

    #[tokio::test]
    async fn empty_and_silent_contexts_send_nothing() {
        let outbound = Arc::new(Recorder::default());
        let p = pipeline(Arc::clone(&outbound));
        assert_eq!(p.run(private("")).await, TaskOutcome::NoReply);
        assert_eq!(p.run(private("silent")).await, TaskOutcome::NoReply);
        assert!(sent(&outbound).is_empty());
    }

    #[tokio::test]
    async fn generator_error_fails_task() {
        let outbound = Arc::new(Recorder::default());
        let p = pipeline(Arc::clone(&outbound));
        match p.run(private("fail")).await {
            TaskOutcome::Failed(reason) => assert!(reason.contains("backend down")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn group_text_uses_group_framing() {
        let outbound = Arc::new(Recorder::default());
        let chat = ChatConfig {
            group_chat_reply_prefix: "@alice ".into(),
            group_chat_reply_suffix: " ~".into(),
            ..ChatConfig::default()
        };
        let p = pipeline_with(Arc::clone(&outbound), chat, HookRegistry::new());
        let mut ctx = private("x");
        ctx.meta.is_group = true;
        let reply = p.decorate(&ctx, Reply::text("  hello \n")).await.unwrap();
        assert_eq!(reply.content, "@alice hello ~");
    }

    #[tokio::test]
    async fn info_and_error_get_headers() {
        let p = pipeline(Arc::new(Recorder::default()));
        let ctx = private("x");
        let info = p.decorate(&ctx, Reply::info("done")).await.unwrap();
        assert_eq!(info.content, "[INFO]\ndone");
        let err = p.decorate(&ctx, Reply::error("nope")).await.unwrap();
        assert_eq!(err.content, "[ERROR]\nnope");
        let image = p
            .decorate(&ctx, Reply::new(ReplyKind::ImageUrl, "http://x/y.png"))
            .await
            .unwrap();
        assert_eq!(image.content, "http://x/y.png");
    }

    #[rstest]
    #[case(ReplyKind::Voice, "hello.mp3")]
    #[case(ReplyKind::Image, "cat.png")]
    #[case(ReplyKind::ImageUrl, "http://x/cat.png")]
    #[case(ReplyKind::File, "report.pdf")]
    #[case(ReplyKind::VideoUrl, "http://x/clip.mp4")]
    #[tokio::test]
    async fn media_replies_keep_their_content(#[case] kind: ReplyKind, #[case] content: &str) {
        let chat = ChatConfig {
            single_chat_reply_prefix: "[bot] ".into(),
            single_chat_reply_suffix: " ~".into(),
            ..ChatConfig::default()
        };
        let p = pipeline_with(Arc::new(Recorder::default()), chat, HookRegistry::new());
        let reply = p
            .decorate(&private("x"), Reply::new(kind, content))
            .await
            .unwrap();
        assert_eq!(reply, Reply::new(kind, content));
    }

    #[tokio::test]
    async fn unsupported_kind_becomes_error() {
        let outbound = Arc::new(Recorder {
            unsupported: vec![ReplyKind::Image],
            ..Recorder::default()
        });
        let p = pipeline(outbound);
        let reply = p
            .decorate(&private("x"), Reply::new(ReplyKind::Image, "cat.png"))
            .await
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Error);
        assert_eq!(reply.content, "[ERROR]\nunsupported reply type: IMAGE");
    }

    #[tokio::test]
    async fn desired_voice_converts_text() {
        let p = pipeline(Arc::new(Recorder::default()));
        let mut ctx = private("x");
        ctx.meta.desire_reply = Some(ReplyKind::Voice);
        let reply = p.decorate(&ctx, Reply::text("hello")).await.unwrap();
        assert_eq!(reply, Reply::new(ReplyKind::Voice, "hello.mp3"));
    }

    #[tokio::test]
    async fn voice_is_transcribed_and_answered() {
        let outbound = Arc::new(Recorder::default());
        let chat = ChatConfig {
            single_chat_prefix: vec!["bot".into()],
            ..ChatConfig::default()
        };
        let p = pipeline_with(Arc::clone(&outbound), chat, HookRegistry::new());
        let mut voice = private("what time.mp3");
        voice.kind = ContextKind::Voice;
        voice.meta.origin_kind = Some(ContextKind::Voice);
        assert_eq!(p.run(voice).await, TaskOutcome::Completed);
        // Transcripts of private voice skip the prefix requirement.
        assert_eq!(sent(&outbound), [Reply::text("echo: what time")]);
    }

    #[tokio::test]
    async fn friend_requests_match_commands() {
        let chat = ChatConfig {
            accept_friend_commands: vec!["let me in".into()],
            ..ChatConfig::default()
        };
        let p = pipeline_with(Arc::new(Recorder::default()), chat, HookRegistry::new());
        let accept = Context::new(ContextKind::AcceptFriend, "let me in");
        let reject = Context::new(ContextKind::AcceptFriend, "hello");
        assert_eq!(
            p.generate(&accept).await.unwrap(),
            Some(Reply::accept_friend(true))
        );
        assert_eq!(
            p.generate(&reject).await.unwrap(),
            Some(Reply::accept_friend(false))
        );
    }

    #[tokio::test]
    async fn disabled_group_trigger_skips_generation() {
        let p = pipeline(Arc::new(Recorder::default()));
        let mut ctx = private("hi");
        ctx.meta.is_group = true;
        ctx.meta
            .extra
            .insert("trigger_prefix".into(), serde_json::Value::Bool(false));
        assert_eq!(p.generate(&ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn transient_send_failures_are_retried() {
        let outbound = Arc::new(Recorder {
            failures: 2,
            ..Recorder::default()
        });
        let p = pipeline(Arc::clone(&outbound));
        assert_eq!(p.run(private("hi")).await, TaskOutcome::Completed);
        assert_eq!(outbound.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sent(&outbound).len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let outbound = Arc::new(Recorder {
            failures: 10,
            ..Recorder::default()
        });
        let p = pipeline(Arc::clone(&outbound));
        assert!(matches!(p.run(private("hi")).await, TaskOutcome::Failed(_)));
        assert_eq!(outbound.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unsupported_send_is_not_retried() {
        let outbound = Arc::new(Recorder {
            reject_all: true,
            ..Recorder::default()
        });
        let p = pipeline(Arc::clone(&outbound));
        assert!(matches!(p.run(private("hi")).await, TaskOutcome::Failed(_)));
        assert_eq!(outbound.attempts.load(Ordering::SeqCst), 1);
    }

    /// Answers every context itself.
    struct Canned;

    #[async_trait]
    impl HookHandler for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn events(&self) -> &[HookEvent] {
            &[HookEvent::HandleContext]
        }

        async fn handle(&self, _event: HookEvent, payload: &HookPayload) -> anyhow::Result<HookAction> {
            Ok(HookAction::Handled(HookPayload::HandleContext {
                context: payload.context().clone(),
                reply: Some(Reply::text("canned")),
            }))
        }
    }

    /// Drops every outgoing reply.
    struct Muzzle;

    #[async_trait]
    impl HookHandler for Muzzle {
        fn name(&self) -> &str {
            "muzzle"
        }

        fn events(&self) -> &[HookEvent] {
            &[HookEvent::SendReply]
        }

        async fn handle(&self, _event: HookEvent, _payload: &HookPayload) -> anyhow::Result<HookAction> {
            Ok(HookAction::Block("quiet hours".into()))
        }
    }

    #[tokio::test]
    async fn handled_hook_skips_generator() {
        let outbound = Arc::new(Recorder::default());
        let mut hooks = HookRegistry::new();
        hooks.register(Arc::new(Canned));
        let p = pipeline_with(Arc::clone(&outbound), ChatConfig::default(), hooks);
        assert_eq!(p.run(private("fail")).await, TaskOutcome::Completed);
        assert_eq!(sent(&outbound), [Reply::text("canned")]);
    }

    #[tokio::test]
    async fn blocking_send_hook_drops_reply() {
        let outbound = Arc::new(Recorder::default());
        let mut hooks = HookRegistry::new();
        hooks.register(Arc::new(Muzzle));
        let p = pipeline_with(Arc::clone(&outbound), ChatConfig::default(), hooks);
        assert_eq!(p.run(private("hi")).await, TaskOutcome::NoReply);
        assert_eq!(outbound.attempts.load(Ordering::SeqCst), 0);
    }
}
