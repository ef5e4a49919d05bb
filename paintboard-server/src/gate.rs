//! Ordered validation of one paint request.
//!
//! Checks run in a fixed order and the first failure wins:
//! ```text
//! 1. activity window   → OutOfWindow
//! 2. field validity    → Malformed
//! 3. cooldown (ROOT ✗) → Cooldown
//! 4. token             → InvalidToken
//! 5. PAINT capability  → PermissionDenied
//! ```
//! The window check is global, so it wins even for malformed requests.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::TokenAuthority;
use crate::permission::{Permission, PermissionStore};
use crate::protocol::{AckStatus, PaintFrame};

/// Largest representable colour.
pub const MAX_COLOR: u32 = 0xFF_FFFF;

/// One paint request, regardless of the transport it arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintRequest {
    pub x: u32,
    pub y: u32,
    /// 0xRRGGBB
    pub color: u32,
    pub uid: u32,
    pub token: Uuid,
    pub request_id: u16,
}

impl From<PaintFrame> for PaintRequest {
    fn from(frame: PaintFrame) -> Self {
        Self {
            x: u32::from(frame.x),
            y: u32::from(frame.y),
            color: frame.color,
            uid: frame.uid,
            token: frame.token,
            request_id: frame.request_id,
        }
    }
}

/// Why a request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OutOfWindow,
    Malformed,
    Cooldown { remaining_ms: u64 },
    InvalidToken,
    PermissionDenied,
}

impl Rejection {
    /// ACK status carried back over the binary channel.
    pub fn ack_status(self) -> AckStatus {
        match self {
            Self::OutOfWindow => AckStatus::OutOfWindow,
            Self::Malformed => AckStatus::Malformed,
            Self::Cooldown { .. } => AckStatus::Cooldown,
            Self::InvalidToken => AckStatus::InvalidToken,
            Self::PermissionDenied => AckStatus::PermissionDenied,
        }
    }

    /// HTTP status for the JSON paint endpoint.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Malformed => 400,
            Self::OutOfWindow | Self::InvalidToken | Self::PermissionDenied => 403,
            Self::Cooldown { .. } => 418,
        }
    }

    /// Error type string for the JSON paint endpoint.
    pub fn error_type(self) -> &'static str {
        match self {
            Self::OutOfWindow => "paintboard.notInActivity",
            Self::Malformed => "paintboard.illegalRequest",
            Self::Cooldown { .. } => "paintboard.paintInCooldown",
            Self::InvalidToken => "auth.invalidToken",
            Self::PermissionDenied => "paintboard.permissionDenied",
        }
    }
}

/// Outcome of [`MutationGate::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Authorized,
    Rejected(Rejection),
}

impl Verdict {
    pub fn ack_status(self) -> AckStatus {
        match self {
            Self::Authorized => AckStatus::Success,
            Self::Rejected(r) => r.ack_status(),
        }
    }

    pub fn is_authorized(self) -> bool {
        self == Self::Authorized
    }
}

/// Static limits the gate checks against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub width: u32,
    pub height: u32,
    pub cooldown_ms: u64,
    /// Inclusive window start (ms since epoch)
    pub activity_start_ms: u64,
    /// Inclusive window end (ms since epoch)
    pub activity_end_ms: u64,
}

/// uid → time of that uid's last accepted paint (ms). Never purged.
#[derive(Debug, Default)]
pub struct CooldownTable {
    last_accepted: HashMap<u32, u64>,
}

impl CooldownTable {
    pub fn last_accepted(&self, uid: u32) -> Option<u64> {
        self.last_accepted.get(&uid).copied()
    }

    pub fn record(&mut self, uid: u32, now_ms: u64) {
        self.last_accepted.insert(uid, now_ms);
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}

/// Validates and authorizes paint requests.
pub struct MutationGate {
    config: GateConfig,
    cooldowns: CooldownTable,
    auth: Arc<dyn TokenAuthority>,
    permissions: Arc<dyn PermissionStore>,
}

impl MutationGate {
    pub fn new(
        config: GateConfig,
        auth: Arc<dyn TokenAuthority>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        Self {
            config,
            cooldowns: CooldownTable::default(),
            auth,
            permissions,
        }
    }

    /// The activity window check on its own.
    pub fn check_window(&self, now_ms: u64) -> Option<Rejection> {
        let c = &self.config;
        let outside = now_ms < c.activity_start_ms || now_ms > c.activity_end_ms;
        outside.then_some(Rejection::OutOfWindow)
    }

    /// Run every check against `req` at time `now_ms`.
    pub fn validate(&self, req: &PaintRequest, now_ms: u64) -> Verdict {
        let c = &self.config;

        if let Some(rejection) = self.check_window(now_ms) {
            return Verdict::Rejected(rejection);
        }

        if req.x >= c.width || req.y >= c.height || req.color > MAX_COLOR || req.uid < 1 {
            return Verdict::Rejected(Rejection::Malformed);
        }

        if let Some(last) = self.cooldowns.last_accepted(req.uid) {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < c.cooldown_ms && !self.permissions.has_permission(req.uid, Permission::ROOT)
            {
                return Verdict::Rejected(Rejection::Cooldown {
                    remaining_ms: c.cooldown_ms - elapsed,
                });
            }
        }

        if !self.auth.auth_token(req.uid, &req.token) {
            return Verdict::Rejected(Rejection::InvalidToken);
        }

        if !self.permissions.has_permission(req.uid, Permission::PAINT) {
            return Verdict::Rejected(Rejection::PermissionDenied);
        }

        Verdict::Authorized
    }

    /// Start `uid`'s cooldown at `now_ms`. Call only after an authorized paint.
    pub fn record_accepted(&mut self, uid: u32, now_ms: u64) {
        self.cooldowns.record(uid, now_ms);
    }

    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenCache;
    use crate::permission::PermissionCache;

    const COOLDOWN: u64 = 1_000;

    struct Fixture {
        gate: MutationGate,
        tokens: Arc<TokenCache>,
        perms: Arc<PermissionCache>,
    }

    fn fixture(start: u64, end: u64) -> Fixture {
        let tokens = Arc::new(TokenCache::new());
        let perms = Arc::new(PermissionCache::new());
        let config = GateConfig {
            width: 4,
            height: 4,
            cooldown_ms: COOLDOWN,
            activity_start_ms: start,
            activity_end_ms: end,
        };
        let gate = MutationGate::new(config, tokens.clone(), perms.clone());
        Fixture { gate, tokens, perms }
    }

    fn painter(f: &Fixture, uid: u32, perm: Permission) -> PaintRequest {
        let token = Uuid::new_v4();
        f.tokens.insert(uid, token);
        f.perms.insert(uid, perm);
        PaintRequest {
            x: 1,
            y: 2,
            color: 0x112233,
            uid,
            token,
            request_id: 1,
        }
    }

    #[test]
    fn test_valid_request_authorized() {
        let f = fixture(0, u64::MAX);
        let req = painter(&f, 7, Permission::PAINT);
        assert_eq!(f.gate.validate(&req, 10), Verdict::Authorized);
    }

    #[test]
    fn test_window_has_top_priority() {
        let f = fixture(1_000, 2_000);
        let mut req = painter(&f, 7, Permission::PAINT);
        req.x = 99; // also malformed

        assert_eq!(f.gate.validate(&req, 999), Verdict::Rejected(Rejection::OutOfWindow));
        assert_eq!(f.gate.validate(&req, 2_001), Verdict::Rejected(Rejection::OutOfWindow));
        // Inside the window the malformed field is reported
        assert_eq!(f.gate.validate(&req, 1_000), Verdict::Rejected(Rejection::Malformed));
        assert_eq!(f.gate.validate(&req, 2_000), Verdict::Rejected(Rejection::Malformed));
    }

    #[test]
    fn test_window_beats_cooldown() {
        let mut f = fixture(0, 5_000);
        let req = painter(&f, 7, Permission::PAINT);
        f.gate.record_accepted(7, 4_999);
        assert_eq!(f.gate.validate(&req, 5_001), Verdict::Rejected(Rejection::OutOfWindow));
    }

    #[test]
    fn test_malformed_fields() {
        let f = fixture(0, u64::MAX);
        let base = painter(&f, 7, Permission::PAINT);

        let cases = [
            PaintRequest { x: 4, ..base },
            PaintRequest { y: 4, ..base },
            PaintRequest { color: 0x1000000, ..base },
            PaintRequest { uid: 0, ..base },
        ];
        for req in cases {
            assert_eq!(
                f.gate.validate(&req, 10),
                Verdict::Rejected(Rejection::Malformed),
                "{req:?}"
            );
        }

        let edge = PaintRequest { x: 3, y: 3, color: MAX_COLOR, ..base };
        assert_eq!(f.gate.validate(&edge, 10), Verdict::Authorized);
    }

    #[test]
    fn test_cooldown_window() {
        let mut f = fixture(0, u64::MAX);
        let req = painter(&f, 7, Permission::PAINT);

        f.gate.record_accepted(7, 10_000);
        assert_eq!(
            f.gate.validate(&req, 10_400),
            Verdict::Rejected(Rejection::Cooldown { remaining_ms: 600 })
        );
        assert_eq!(
            f.gate.validate(&req, 10_999),
            Verdict::Rejected(Rejection::Cooldown { remaining_ms: 1 })
        );
        assert_eq!(f.gate.validate(&req, 11_000), Verdict::Authorized);
    }

    #[test]
    fn test_cooldown_is_per_uid() {
        let mut f = fixture(0, u64::MAX);
        let _ = painter(&f, 7, Permission::PAINT);
        let other = painter(&f, 8, Permission::PAINT);
        f.gate.record_accepted(7, 100);
        assert_eq!(f.gate.validate(&other, 101), Verdict::Authorized);
        assert_eq!(f.gate.cooldowns().len(), 1);
    }

    #[test]
    fn test_root_bypasses_cooldown() {
        let mut f = fixture(0, u64::MAX);
        let req = painter(&f, 1, Permission::PAINT | Permission::ROOT);
        f.gate.record_accepted(1, 500);
        assert_eq!(f.gate.validate(&req, 500), Verdict::Authorized);
    }

    #[test]
    fn test_cooldown_checked_before_token() {
        let mut f = fixture(0, u64::MAX);
        let mut req = painter(&f, 7, Permission::PAINT);
        req.token = Uuid::new_v4();
        f.gate.record_accepted(7, 100);
        assert!(matches!(
            f.gate.validate(&req, 200),
            Verdict::Rejected(Rejection::Cooldown { .. })
        ));
        assert_eq!(f.gate.validate(&req, 5_000), Verdict::Rejected(Rejection::InvalidToken));
    }

    #[test]
    fn test_invalid_token() {
        let f = fixture(0, u64::MAX);
        let mut req = painter(&f, 7, Permission::PAINT);
        req.token = Uuid::new_v4();
        assert_eq!(f.gate.validate(&req, 1), Verdict::Rejected(Rejection::InvalidToken));
    }

    #[test]
    fn test_permission_denied() {
        let f = fixture(0, u64::MAX);
        let req = painter(&f, 7, Permission::ADMIN);
        assert_eq!(f.gate.validate(&req, 1), Verdict::Rejected(Rejection::PermissionDenied));
    }

    #[test]
    fn test_rejection_mappings() {
        assert_eq!(Rejection::OutOfWindow.ack_status(), AckStatus::OutOfWindow);
        assert_eq!(Rejection::Malformed.ack_status(), AckStatus::Malformed);
        assert_eq!(
            Rejection::Cooldown { remaining_ms: 1 }.ack_status(),
            AckStatus::Cooldown
        );
        assert_eq!(Rejection::InvalidToken.ack_status(), AckStatus::InvalidToken);
        assert_eq!(Rejection::PermissionDenied.ack_status(), AckStatus::PermissionDenied);
        assert_eq!(Verdict::Authorized.ack_status(), AckStatus::Success);

        assert_eq!(Rejection::Malformed.http_status(), 400);
        assert_eq!(Rejection::Cooldown { remaining_ms: 1 }.http_status(), 418);
        assert_eq!(Rejection::InvalidToken.error_type(), "auth.invalidToken");
    }

    #[test]
    fn test_request_from_frame() {
        let frame = PaintFrame {
            x: 65535,
            y: 2,
            color: 0xABCDEF,
            uid: 0xFFFFFF,
            token: Uuid::nil(),
            request_id: 3,
        };
        let req = PaintRequest::from(frame);
        assert_eq!(req.x, 65535);
        assert_eq!(req.uid, 0xFFFFFF);
        assert_eq!(req.request_id, 3);
    }
}
