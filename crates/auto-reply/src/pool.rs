//! Fixed-size worker pool shared by every session.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use {
    courier_common::types::Context,
    futures::FutureExt,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{Instrument, debug, error, info, info_span},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics, histogram, labels};

use crate::{
    reply::ReplyPipeline,
    session::CompletionGuard,
    task::{TaskHandle, TaskOutcome},
};

/// A dispatched context on its way to a worker.
///
/// Dropping the job, run or not, releases its gate permit through the guard.
pub(crate) struct Job {
    pub(crate) context: Context,
    pub(crate) handle: TaskHandle,
    pub(crate) guard: CompletionGuard,
}

/// Worker tasks pulling jobs FIFO from one shared channel.
pub(crate) struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(size: usize, pipeline: Arc<ReplyPipeline>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..size)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else {
                            break;
                        };
                        run_job(&pipeline, job).await;
                    }
                    debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self { tx, workers }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Job> {
        self.tx.clone()
    }

    /// Close the channel and wait for the workers to drain it.
    pub(crate) async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task failed");
            }
        }
    }
}

async fn run_job(pipeline: &ReplyPipeline, job: Job) {
    let Job {
        context,
        handle,
        guard,
    } = job;
    let span = info_span!(
        "task",
        session_id = %guard.session_id(),
        task_id = handle.id(),
        kind = %context.kind,
    );

    async {
        let started = Instant::now();
        let outcome = if handle.try_start() {
            match AssertUnwindSafe(pipeline.run(context)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => TaskOutcome::Failed(format!("panicked: {}", panic_message(&*panic))),
            }
        } else {
            TaskOutcome::Cancelled
        };

        match &outcome {
            TaskOutcome::Completed | TaskOutcome::NoReply => {
                debug!(outcome = %outcome, elapsed_ms = started.elapsed().as_millis() as u64, "task finished");
            },
            TaskOutcome::Cancelled => info!("task cancelled before start"),
            TaskOutcome::Failed(reason) => error!(reason = %reason, "task failed"),
        }

        #[cfg(feature = "metrics")]
        {
            counter!(
                dispatch_metrics::TASKS_FINISHED_TOTAL,
                labels::OUTCOME => outcome.label()
            )
            .increment(1);
            histogram!(dispatch_metrics::TASK_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }
    }
    .instrument(span)
    .await;

    drop(guard);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*payload), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
