//! The single owner of the board and its gate.
//!
//! Every mutating call runs under one write lock:
//! ```text
//! write lock ┬ gate.validate(req, now)
//!            ├ board.set_pixel           (authorized only)
//!            ├ gate.record_accepted      (authorized only)
//!            └ queue.enqueue(Paint)      (authorized only)
//! ```
//! so authorization order, board order and broadcast order are the same.
//! Exports take the read lock and copy the buffer.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::board::BoardState;
use crate::broadcast::{BroadcastJob, BroadcastQueue};
use crate::gate::{MutationGate, PaintRequest, Rejection, Verdict};
use crate::telemetry::Telemetry;

/// Which transport a paint came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintSource {
    WebSocket,
    Http,
}

struct EngineState {
    board: BoardState,
    gate: MutationGate,
}

/// Lock-guarded board + gate.
pub struct PaintEngine {
    state: RwLock<EngineState>,
    queue: BroadcastQueue,
    telemetry: Arc<Telemetry>,
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl PaintEngine {
    pub fn new(
        board: BoardState,
        gate: MutationGate,
        queue: BroadcastQueue,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            state: RwLock::new(EngineState { board, gate }),
            queue,
            telemetry,
        }
    }

    /// Validate and, if authorized, apply one paint at the current time.
    pub async fn paint(&self, req: PaintRequest, source: PaintSource) -> Verdict {
        self.paint_at(req, source, now_ms()).await
    }

    /// [`paint`](Self::paint) with an explicit clock.
    pub async fn paint_at(&self, req: PaintRequest, source: PaintSource, now_ms: u64) -> Verdict {
        self.telemetry.record_paint_attempt();

        let verdict = {
            let mut state = self.state.write().await;
            let verdict = state.gate.validate(&req, now_ms);
            if verdict.is_authorized() {
                state.board.set_pixel(req.x, req.y, req.color);
                state.gate.record_accepted(req.uid, now_ms);
                // Fields were bounded by the gate against a board no wider than u16
                self.queue.enqueue(BroadcastJob::Paint {
                    x: req.x as u16,
                    y: req.y as u16,
                    color: req.color,
                });
            }
            verdict
        };

        if source == PaintSource::WebSocket {
            self.telemetry.record_ws_paint(verdict.is_authorized());
        }
        match verdict {
            Verdict::Authorized => log::trace!(
                "uid {} painted ({}, {}) #{:06X} via {:?}",
                req.uid, req.x, req.y, req.color, source
            ),
            Verdict::Rejected(r) => {
                log::debug!("uid {} paint rejected: {:?} via {:?}", req.uid, r, source)
            }
        }
        verdict
    }

    /// Verdict for a request whose fields could not even be typed.
    ///
    /// The window still takes priority over the malformed report.
    pub async fn reject_malformed(&self, source: PaintSource, now_ms: u64) -> Verdict {
        self.telemetry.record_paint_attempt();
        let rejection = self
            .state
            .read()
            .await
            .gate
            .check_window(now_ms)
            .unwrap_or(Rejection::Malformed);
        if source == PaintSource::WebSocket {
            self.telemetry.record_ws_paint(false);
        }
        Verdict::Rejected(rejection)
    }

    /// Copy of the packed pixel buffer.
    pub async fn snapshot(&self) -> Vec<u8> {
        self.telemetry.record_board_read();
        self.state.read().await.board.snapshot().to_vec()
    }

    /// Canonical hex form of the board.
    pub async fn serialize(&self) -> String {
        self.state.read().await.board.serialize()
    }

    pub async fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        let state = self.state.read().await;
        state.board.contains(x, y).then(|| state.board.pixel(x, y))
    }

    pub async fn dimensions(&self) -> (u32, u32) {
        let state = self.state.read().await;
        (state.board.width(), state.board.height())
    }

    pub fn queue(&self) -> &BroadcastQueue {
        &self.queue
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenCache;
    use crate::gate::GateConfig;
    use crate::permission::{Permission, PermissionCache};
    use crate::protocol::AckStatus;
    use crate::registry::{ConnectionEntry, ConnectionRegistry, Outbound};
    use uuid::Uuid;

    const DEFAULT: u32 = 0xAAAAAA;

    struct Harness {
        engine: PaintEngine,
        registry: Arc<ConnectionRegistry>,
        token: Uuid,
    }

    async fn harness() -> Harness {
        let tokens = Arc::new(TokenCache::new());
        let perms = Arc::new(PermissionCache::new());
        let token = Uuid::new_v4();
        tokens.insert(7, token);
        perms.insert(7, Permission::PAINT);

        let gate = MutationGate::new(
            GateConfig {
                width: 4,
                height: 4,
                cooldown_ms: 30_000,
                activity_start_ms: 0,
                activity_end_ms: u64::MAX,
            },
            tokens,
            perms,
        );
        let registry = Arc::new(ConnectionRegistry::new());
        let (queue, _consumer) = BroadcastQueue::spawn(registry.clone());
        let engine = PaintEngine::new(
            BoardState::init_default(4, 4, DEFAULT),
            gate,
            queue,
            Arc::new(Telemetry::new()),
        );
        Harness { engine, registry, token }
    }

    fn paint(h: &Harness, x: u32, y: u32, color: u32) -> PaintRequest {
        PaintRequest { x, y, color, uid: 7, token: h.token, request_id: 9 }
    }

    #[tokio::test]
    async fn test_four_by_four_scenario() {
        let h = harness().await;

        let verdict = h
            .engine
            .paint_at(paint(&h, 1, 2, 0x112233), PaintSource::WebSocket, 1_000)
            .await;
        assert_eq!(verdict.ack_status(), AckStatus::Success);

        let bytes = h.engine.snapshot().await;
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[27..30], &[0x11, 0x22, 0x33]);
        for (i, b) in bytes.iter().enumerate() {
            if !(27..30).contains(&i) {
                assert_eq!(*b, 0xAA, "byte {i} changed");
            }
        }

        let again = h
            .engine
            .paint_at(paint(&h, 1, 2, 0x445566), PaintSource::WebSocket, 1_001)
            .await;
        assert_eq!(again.ack_status(), AckStatus::Cooldown);
        assert_eq!(h.engine.pixel(1, 2).await, Some(0x112233));
    }

    #[tokio::test]
    async fn test_rejected_paint_leaves_no_trace() {
        let h = harness().await;
        let mut req = paint(&h, 0, 0, 0x010203);
        req.token = Uuid::new_v4();

        let verdict = h.engine.paint_at(req, PaintSource::Http, 5).await;
        assert_eq!(verdict, Verdict::Rejected(Rejection::InvalidToken));
        assert_eq!(h.engine.pixel(0, 0).await, Some(DEFAULT));
        assert_eq!(h.engine.queue().stats().jobs_enqueued, 0);

        // No cooldown was started by the rejection
        let ok = h.engine.paint_at(paint(&h, 0, 0, 0x010203), PaintSource::Http, 6).await;
        assert!(ok.is_authorized());
    }

    #[tokio::test]
    async fn test_accepted_paint_is_broadcast() {
        let h = harness().await;
        let (entry, mut rx) = ConnectionEntry::new("127.0.0.1:1".parse().unwrap());
        h.registry.add(entry).await;

        h.engine.paint_at(paint(&h, 3, 3, 0xFFFFFF), PaintSource::WebSocket, 1).await;

        let expected = BroadcastJob::Paint { x: 3, y: 3, color: 0xFFFFFF }.frame().encode();
        assert_eq!(rx.recv().await, Some(Outbound::Frame(bytes::Bytes::from(expected))));
    }

    #[tokio::test]
    async fn test_telemetry_counts() {
        let h = harness().await;
        h.engine.paint_at(paint(&h, 0, 0, 1), PaintSource::WebSocket, 1).await;
        h.engine.paint_at(paint(&h, 0, 1, 1), PaintSource::WebSocket, 2).await;
        h.engine.paint_at(paint(&h, 0, 2, 1), PaintSource::Http, 3).await;
        h.engine.snapshot().await;

        let fast = h.engine.telemetry().take_fast();
        let slow = h.engine.telemetry().take_slow();
        assert_eq!(fast.paint_attempts, 3);
        assert_eq!(slow.ws_paint_attempts, 2);
        assert_eq!(slow.ws_paint_successes, 1);
        assert_eq!(slow.board_reads, 1);
    }

    #[tokio::test]
    async fn test_reject_malformed() {
        let h = harness().await;
        assert_eq!(
            h.engine.reject_malformed(PaintSource::Http, 1).await,
            Verdict::Rejected(Rejection::Malformed)
        );
    }

    #[tokio::test]
    async fn test_serialize_matches_snapshot() {
        let h = harness().await;
        h.engine.paint_at(paint(&h, 2, 1, 0x0A0B0C), PaintSource::Http, 1).await;
        let hex = h.engine.serialize().await;
        let restored = BoardState::init_from_hex(4, 4, &hex).unwrap();
        assert_eq!(restored.snapshot(), &h.engine.snapshot().await[..]);
        assert_eq!(h.engine.dimensions().await, (4, 4));
    }
}
