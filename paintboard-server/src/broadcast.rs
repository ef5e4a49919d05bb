//! Single-consumer FIFO fan-out of accepted paints and heartbeats.
//!
//! Producers push [`BroadcastJob`]s into an unbounded channel without
//! waiting. One consumer task drains it in order, encodes each frame once
//! and hands the shared bytes to every open connection in the registry.
//! A connection whose outbound channel is gone is evicted; nobody else is
//! affected.
//!
//! ```text
//! PaintEngine ─┐                      ┌──► conn A
//!              ├──► mpsc ──► consumer ├──► conn B
//! heartbeat ───┘    (FIFO)            └──► conn C (dead → evicted)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::ServerFrame;
use crate::registry::ConnectionRegistry;

/// One unit of fan-out work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastJob {
    Paint { x: u16, y: u16, color: u32 },
    Heartbeat,
}

impl BroadcastJob {
    pub fn frame(self) -> ServerFrame {
        match self {
            Self::Paint { x, y, color } => ServerFrame::Broadcast { x, y, color },
            Self::Heartbeat => ServerFrame::Heartbeat,
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub jobs_enqueued: u64,
    pub jobs_processed: u64,
    pub frames_delivered: u64,
    pub connections_evicted: u64,
}

/// Lock-free counters shared by producers and the consumer.
#[derive(Debug, Default)]
struct AtomicBroadcastStats {
    jobs_enqueued: AtomicU64,
    jobs_processed: AtomicU64,
    frames_delivered: AtomicU64,
    connections_evicted: AtomicU64,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastQueue {
    sender: mpsc::UnboundedSender<BroadcastJob>,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastQueue {
    /// Create the queue and spawn its one consumer over `registry`.
    ///
    /// The consumer exits once every producer handle has been dropped and
    /// the queue is drained.
    pub fn spawn(registry: Arc<ConnectionRegistry>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(AtomicBroadcastStats::default());
        let handle = tokio::spawn(consume(receiver, registry, stats.clone()));
        (Self { sender, stats }, handle)
    }

    /// Append a job. Never waits. Returns false if the consumer is gone.
    pub fn enqueue(&self, job: BroadcastJob) -> bool {
        match self.sender.send(job) {
            Ok(()) => {
                self.stats.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                log::warn!("Broadcast consumer stopped; dropping {job:?}");
                false
            }
        }
    }

    /// Lock-free stats snapshot.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            jobs_enqueued: self.stats.jobs_enqueued.load(Ordering::Relaxed),
            jobs_processed: self.stats.jobs_processed.load(Ordering::Relaxed),
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            connections_evicted: self.stats.connections_evicted.load(Ordering::Relaxed),
        }
    }
}

async fn consume(
    mut receiver: mpsc::UnboundedReceiver<BroadcastJob>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<AtomicBroadcastStats>,
) {
    while let Some(job) = receiver.recv().await {
        let encoded = Bytes::from(job.frame().encode());

        let mut delivered = 0u64;
        let failed = registry
            .for_each(|entry| {
                let ok = entry.send(encoded.clone());
                if ok {
                    delivered += 1;
                }
                ok
            })
            .await;

        for id in &failed {
            if let Some(entry) = registry.remove(id).await {
                log::debug!("Evicted connection {} ({})", id, entry.addr());
            }
        }

        stats.jobs_processed.fetch_add(1, Ordering::Relaxed);
        stats.frames_delivered.fetch_add(delivered, Ordering::Relaxed);
        stats
            .connections_evicted
            .fetch_add(failed.len() as u64, Ordering::Relaxed);
    }
    log::debug!("Broadcast consumer drained and stopped");
}
