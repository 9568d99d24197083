//! Bounded, partitioned event pipeline.
//!
//! Ingress submits into per-worker bounded queues; the worker is chosen by
//! `server_id mod W`, which keeps events FIFO per server while letting
//! servers proceed independently. A full queue blocks the submitter (never
//! drops) and the blocked time is counted.

use crate::handlers::{self, HandlerCtx};
use crate::metrics::Metrics;
use crate::repo::Repository;
use crate::session::SessionMap;
use events::Event;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is shut down")]
    Closed,
}

/// Cloneable submission side. Workers stop once every clone is dropped and
/// their queues drain.
#[derive(Clone)]
pub struct PipelineHandle {
    senders: Vec<mpsc::Sender<Event>>,
    metrics: Arc<Metrics>,
}

impl PipelineHandle {
    pub async fn submit(&self, event: Event) -> Result<(), PipelineError> {
        let worker = (event.server_id % self.senders.len() as u64) as usize;

        let started = Instant::now();
        self.senders[worker]
            .send(event)
            .await
            .map_err(|_| PipelineError::Closed)?;
        Metrics::add(
            &self.metrics.queue_wait_nanos,
            started.elapsed().as_nanos() as u64,
        );

        Ok(())
    }
}

pub fn spawn<R: Repository>(
    ctx: HandlerCtx<R>,
    workers: usize,
    capacity: usize,
    cancel: CancellationToken,
) -> (PipelineHandle, Vec<JoinHandle<()>>) {
    let workers = workers.max(1);
    let per_worker = (capacity / workers).max(1);
    let metrics = ctx.metrics.clone();

    let mut senders = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);

    for index in 0..workers {
        let (tx, rx) = mpsc::channel(per_worker);
        senders.push(tx);
        handles.push(tokio::spawn(worker_loop(
            ctx.clone(),
            rx,
            cancel.clone(),
            index,
        )));
    }

    (PipelineHandle { senders, metrics }, handles)
}

async fn worker_loop<R: Repository>(
    ctx: HandlerCtx<R>,
    mut queue: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    index: usize,
) {
    // Each worker owns the live sessions of the servers partitioned onto
    // it; no cross-worker sharing.
    let mut sessions = SessionMap::default();

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        process(&ctx, &mut sessions, &event).await;
    }

    debug!(worker = index, "pipeline worker stopped");
}

async fn process<R: Repository>(ctx: &HandlerCtx<R>, sessions: &mut SessionMap, event: &Event) {
    match handlers::handle_event(ctx, sessions, event).await {
        Ok(()) => Metrics::bump(&ctx.metrics.events_processed),
        Err(err) if err.is_transient() => {
            warn!(%err, event_id = %event.event_id, "transient failure, retrying once");

            // The commit-side UUID suppression makes the replay safe even
            // when the first attempt got part-way through.
            match handlers::handle_event(ctx, sessions, event).await {
                Ok(()) => Metrics::bump(&ctx.metrics.events_processed),
                Err(err) => {
                    Metrics::bump(&ctx.metrics.events_dead_lettered);
                    error!(%err, event_id = %event.event_id, "event dead-lettered after retry");
                }
            }
        }
        Err(err) => {
            Metrics::bump(&ctx.metrics.events_dead_lettered);
            error!(%err, event_id = %event.event_id, "event failed");
        }
    }
}
