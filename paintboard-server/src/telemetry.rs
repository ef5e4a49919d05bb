//! Periodic counters, logged and reset on fixed intervals.
//!
//! Hot paths only bump atomics. Two sampler tasks read-and-reset them:
//! ```text
//! every 1s: paint_attempts, bandwidth_bytes  → RateTracker → log
//! every 5s: ws_paint_attempts, ws_paint_successes, board_reads → log
//! ```
//! Nothing here feeds back into request handling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Smoothing factor for the attempts/s moving average.
pub const EMA_ALPHA: f64 = 0.1;

const FAST_INTERVAL: Duration = Duration::from_secs(1);
const SLOW_INTERVAL: Duration = Duration::from_secs(5);

/// Running max, min and exponential moving average of a per-second rate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateTracker {
    max: u64,
    min: u64,
    ema: f64,
    samples: u64,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one sample. The first sample seeds every statistic.
    pub fn observe(&mut self, value: u64) {
        if self.samples == 0 {
            self.max = value;
            self.min = value;
            self.ema = value as f64;
        } else {
            self.max = self.max.max(value);
            self.min = self.min.min(value);
            self.ema = EMA_ALPHA * value as f64 + (1.0 - EMA_ALPHA) * self.ema;
        }
        self.samples += 1;
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn ema(&self) -> f64 {
        self.ema
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// Counters from one fast sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastSample {
    pub paint_attempts: u64,
    pub bandwidth_bytes: u64,
}

/// Counters from one slow sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowSample {
    pub ws_paint_attempts: u64,
    pub ws_paint_successes: u64,
    pub board_reads: u64,
}

/// Shared counters.
#[derive(Debug, Default)]
pub struct Telemetry {
    paint_attempts: AtomicU64,
    bandwidth_bytes: AtomicU64,
    ws_paint_attempts: AtomicU64,
    ws_paint_successes: AtomicU64,
    board_reads: AtomicU64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any paint attempt, from either transport.
    pub fn record_paint_attempt(&self) {
        self.paint_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes received from clients.
    pub fn record_bandwidth(&self, bytes: u64) {
        self.bandwidth_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A paint attempt over WebSocket and whether it was accepted.
    pub fn record_ws_paint(&self, accepted: bool) {
        self.ws_paint_attempts.fetch_add(1, Ordering::Relaxed);
        if accepted {
            self.ws_paint_successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_board_read(&self) {
        self.board_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn take_fast(&self) -> FastSample {
        FastSample {
            paint_attempts: self.paint_attempts.swap(0, Ordering::Relaxed),
            bandwidth_bytes: self.bandwidth_bytes.swap(0, Ordering::Relaxed),
        }
    }

    pub fn take_slow(&self) -> SlowSample {
        SlowSample {
            ws_paint_attempts: self.ws_paint_attempts.swap(0, Ordering::Relaxed),
            ws_paint_successes: self.ws_paint_successes.swap(0, Ordering::Relaxed),
            board_reads: self.board_reads.swap(0, Ordering::Relaxed),
        }
    }

    /// Spawn both samplers. They exit when `shutdown` flips to true.
    pub fn spawn_samplers(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let fast = tokio::spawn(Self::run_fast(self.clone(), shutdown.clone()));
        let slow = tokio::spawn(Self::run_slow(self.clone(), shutdown));
        (fast, slow)
    }

    async fn run_fast(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(FAST_INTERVAL);
        ticker.tick().await;
        let mut rate = RateTracker::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = self.take_fast();
                    rate.observe(sample.paint_attempts);
                    log::info!(
                        target: "telemetry",
                        "paint_attempts={} bandwidth_bytes={} attempts_max={} attempts_min={} attempts_ema={:.2}",
                        sample.paint_attempts,
                        sample.bandwidth_bytes,
                        rate.max(),
                        rate.min(),
                        rate.ema(),
                    );
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        log::debug!("Fast telemetry sampler stopped");
    }

    async fn run_slow(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(SLOW_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = self.take_slow();
                    log::info!(
                        target: "telemetry",
                        "ws_paint_attempts={} ws_paint_successes={} board_reads={}",
                        sample.ws_paint_attempts,
                        sample.ws_paint_successes,
                        sample.board_reads,
                    );
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        log::debug!("Slow telemetry sampler stopped");
    }
}
