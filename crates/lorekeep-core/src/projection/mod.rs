//! Event projection
//!
//! Committed graph mutations are published as [`DialogueEvent`]s onto a bounded
//! channel. A background task drains the channel and fans every event out to the
//! registered sinks. Delivery is at-most-once: a full channel drops the event,
//! and a failing sink is logged and skipped, never retried.
//!
//! # Usage
//!
//! ```ignore
//! let cache = Arc::new(GraphCache::new());
//! let dispatcher = ProjectionDispatcher::spawn(
//!     vec![Arc::new(CacheInvalidationSink::new(cache.clone()))],
//!     256,
//! );
//! let publisher = dispatcher.publisher();
//! publisher.publish(DialogueEvent::utterance_deleted("u1"));
//! dispatcher.shutdown().await;
//! ```

mod cache;
mod outbox;

pub use cache::{CacheInvalidationSink, GraphCache};
pub use outbox::{JsonlOutboxSink, OutboxRecord, read_outbox};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::dialogue::DialogueEvent;
use crate::error::Result;

/// Consumer of committed graph events
#[async_trait]
pub trait ProjectionSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Apply one event
    async fn project(&self, event: &DialogueEvent) -> Result<()>;
}

/// Cloneable handle for publishing events
#[derive(Debug, Clone, Default)]
pub struct ProjectionPublisher {
    tx: Option<mpsc::Sender<DialogueEvent>>,
}

impl ProjectionPublisher {
    /// A publisher that discards every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Enqueue an event without waiting; returns whether it was accepted
    pub fn publish(&self, event: DialogueEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(event = event.event_type_name(), "Projection channel full, event dropped");
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event = event.event_type_name(), "Projection channel closed, event dropped");
                false
            }
        }
    }
}

/// Owns the background task that drains the projection channel
pub struct ProjectionDispatcher {
    publisher: ProjectionPublisher,
    stop: CancellationToken,
    worker: JoinHandle<usize>,
}

impl ProjectionDispatcher {
    /// Start the drain task; must be called inside a Tokio runtime
    pub fn spawn(sinks: Vec<Arc<dyn ProjectionSink>>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = CancellationToken::new();
        let worker = tokio::spawn(drain(rx, sinks, stop.clone()));

        Self {
            publisher: ProjectionPublisher { tx: Some(tx) },
            stop,
            worker,
        }
    }

    pub fn publisher(&self) -> ProjectionPublisher {
        self.publisher.clone()
    }

    /// Deliver everything already queued, then stop; returns the number of events delivered
    pub async fn shutdown(self) -> usize {
        self.stop.cancel();
        match self.worker.await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(error = %e, "Projection task ended abnormally");
                0
            }
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<DialogueEvent>,
    sinks: Vec<Arc<dyn ProjectionSink>>,
    stop: CancellationToken,
) -> usize {
    let mut delivered = 0;

    loop {
        tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some(event) => {
                    fan_out(&sinks, &event).await;
                    delivered += 1;
                }
                None => break,
            },
            _ = stop.cancelled() => {
                rx.close();
                while let Some(event) = rx.recv().await {
                    fan_out(&sinks, &event).await;
                    delivered += 1;
                }
                break;
            }
        }
    }

    debug!(delivered, "Projection task finished");
    delivered
}

async fn fan_out(sinks: &[Arc<dyn ProjectionSink>], event: &DialogueEvent) {
    for sink in sinks {
        if let Err(e) = sink.project(event).await {
            warn!(
                sink = sink.name(),
                event = event.event_type_name(),
                error = %e,
                "Projection failed"
            );
        }
    }
}
