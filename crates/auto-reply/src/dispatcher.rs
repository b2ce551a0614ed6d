//! The dispatcher: session table, dispatch loop, and worker pool wired
//! together.

use std::{sync::Arc, time::Duration};

use {
    courier_channels::{BotIdentity, ChannelOutbound},
    courier_common::{
        hooks::{HookHandler, HookRegistry},
        types::{ChatMessage, Context, ContextKind, ContextMeta},
    },
    courier_config::{CourierConfig, Severity, validate_config},
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tracing::{debug, error, info},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics};

use crate::{
    commands::ResetCommand,
    compose::{Composer, ContextComposer},
    error::{Error, Result},
    pool::{Job, WorkerPool},
    reply::{ReplyGenerator, ReplyPipeline},
    session::{CancelSummary, SessionTable},
};

/// Configures and starts a [`Dispatcher`].
pub struct DispatcherBuilder {
    config: CourierConfig,
    generator: Option<Arc<dyn ReplyGenerator>>,
    outbound: Option<Arc<dyn ChannelOutbound>>,
    composer: Option<Arc<dyn Composer>>,
    bot: BotIdentity,
    hooks: Vec<Arc<dyn HookHandler>>,
    hooks_dry_run: bool,
    reset_command: bool,
}

impl DispatcherBuilder {
    fn new(config: CourierConfig) -> Self {
        Self {
            config,
            generator: None,
            outbound: None,
            composer: None,
            bot: BotIdentity::default(),
            hooks: Vec::new(),
            hooks_dry_run: false,
            reset_command: true,
        }
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn ReplyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn outbound(mut self, outbound: Arc<dyn ChannelOutbound>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Replace the default [`ContextComposer`].
    #[must_use]
    pub fn composer(mut self, composer: Arc<dyn Composer>) -> Self {
        self.composer = Some(composer);
        self
    }

    #[must_use]
    pub fn bot(mut self, bot: BotIdentity) -> Self {
        self.bot = bot;
        self
    }

    #[must_use]
    pub fn hook(mut self, handler: Arc<dyn HookHandler>) -> Self {
        self.hooks.push(handler);
        self
    }

    #[must_use]
    pub fn hooks_dry_run(mut self, dry_run: bool) -> Self {
        self.hooks_dry_run = dry_run;
        self
    }

    /// Register the built-in `reset` admin command. On by default.
    #[must_use]
    pub fn reset_command(mut self, enabled: bool) -> Self {
        self.reset_command = enabled;
        self
    }

    /// Validate the configuration and spawn the dispatch loop and workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Dispatcher> {
        let errors: Vec<String> = validate_config(&self.config)
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(Error::invalid_config(errors.join("; ")));
        }
        let generator = self.generator.ok_or(Error::MissingComponent("reply generator"))?;
        let outbound = self.outbound.ok_or(Error::MissingComponent("channel outbound"))?;

        let dispatch = self.config.dispatch;
        let table = Arc::new(SessionTable::from_config(&dispatch));

        let mut registry = HookRegistry::new().with_dry_run(self.hooks_dry_run);
        if self.reset_command {
            registry.register(Arc::new(ResetCommand::new(
                Arc::clone(&table),
                &dispatch.admin_prefix,
            )));
        }
        for handler in self.hooks {
            registry.register(handler);
        }
        let hooks = Arc::new(registry);

        let composer = match self.composer {
            Some(composer) => composer,
            None => Arc::new(
                ContextComposer::new(self.config.chat.clone(), self.bot, Arc::clone(&hooks))
                    .with_unsupported_replies(outbound.unsupported_reply_kinds().to_vec()),
            ),
        };

        let pipeline = Arc::new(ReplyPipeline::new(
            generator,
            outbound,
            Arc::clone(&composer),
            Arc::clone(&hooks),
            self.config.chat,
            &dispatch,
        ));
        let pool = WorkerPool::spawn(dispatch.pool_size, pipeline);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_handle = tokio::spawn(dispatch_loop(
            Arc::clone(&table),
            pool.sender(),
            Duration::from_millis(dispatch.tick_ms),
            shutdown_rx,
        ));

        info!(
            concurrency_in_session = dispatch.concurrency_in_session,
            pool_size = dispatch.pool_size,
            tick_ms = dispatch.tick_ms,
            hooks = ?hooks.handler_names(),
            "dispatcher started"
        );

        Ok(Dispatcher {
            table,
            composer,
            shutdown_tx,
            loop_handle: Some(loop_handle),
            pool: Some(pool),
        })
    }
}

/// Per-session concurrent message dispatcher.
///
/// Contexts are queued per session; at most `concurrency_in_session` of a
/// session's contexts are processed at once, in submission order, with admin
/// commands jumping the queue.
///
/// Dropping the dispatcher without [`shutdown`](Self::shutdown) stops the
/// loop and discards queued work, but does not wait for running tasks.
pub struct Dispatcher {
    table: Arc<SessionTable>,
    composer: Arc<dyn Composer>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Option<JoinHandle<()>>,
    pool: Option<WorkerPool>,
}

impl Dispatcher {
    pub fn builder(config: CourierConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Compose a raw transport message and queue it.
    ///
    /// Returns the session id, or `None` when the message is not for the bot.
    pub async fn submit_event(
        &self,
        kind: ContextKind,
        content: impl Into<String>,
        msg: ChatMessage,
    ) -> Option<String> {
        let meta = ContextMeta {
            is_group: msg.is_group,
            msg: Some(msg),
            ..ContextMeta::default()
        };
        match self.composer.compose(kind, content.into(), meta).await {
            Some(context) => Some(self.table.submit(context)),
            None => {
                debug!(kind = %kind, "message dropped during compose");

                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::CONTEXTS_DROPPED_TOTAL).increment(1);

                None
            },
        }
    }

    /// Queue an already composed context. Never waits.
    pub fn submit(&self, context: Context) -> String {
        self.table.submit(context)
    }

    pub fn cancel(&self, session_id: &str) -> CancelSummary {
        self.table.cancel(session_id)
    }

    pub fn cancel_all(&self) -> CancelSummary {
        self.table.cancel_all()
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Stop dispatching, discard queued work, and wait for running tasks.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.loop_handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatch loop failed");
            }
        }
        let discarded = self.table.cancel_all();
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
        info!(discarded = discarded.total(), "dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.loop_handle.is_none() {
            return;
        }
        // Closing the pool channel lets workers exit once the loop's sender is gone.
        let _ = self.shutdown_tx.send(true);
        let discarded = self.table.cancel_all();
        debug!(discarded = discarded.total(), "dispatcher dropped without shutdown");
    }
}

async fn dispatch_loop(
    table: Arc<SessionTable>,
    jobs: mpsc::UnboundedSender<Job>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {},
            () = table.notified() => {},
            _ = shutdown.changed() => break,
        }

        for job in table.dispatch_ready() {
            if jobs.send(job).is_err() {
                error!("worker pool is gone, stopping dispatch loop");
                return;
            }
        }
    }
    debug!("dispatch loop stopped");
}
