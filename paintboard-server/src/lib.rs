//! # paintboard-server — Shared real-time pixel canvas
//!
//! Many clients paint single pixels over a binary WebSocket protocol and
//! receive live broadcasts of everyone's changes. Paints are gated by an
//! activity window, per-user cooldown, token and capability checks. The
//! canvas survives restarts through RocksDB.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   PAINT / ACK    ┌──────────────────────────────┐
//! │ WS client   │ ◄──────────────► │ connection task (per socket) │
//! └─────────────┘   BROADCAST      └──────────────┬───────────────┘
//!        ▲                                        │ PaintRequest
//!        │                                        ▼
//!        │                         ┌──────────────────────────────┐
//!        │                         │ PaintEngine (write lock)     │
//!        │                         │  MutationGate → BoardState   │
//!        │                         └──────────────┬───────────────┘
//!        │                                        │ enqueue (FIFO)
//!        │                                        ▼
//!        │                         ┌──────────────────────────────┐
//!        └──────────────────────── │ BroadcastQueue (1 consumer)  │
//!                                  │  → ConnectionRegistry        │
//!                                  └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`board`] — packed RGB pixel grid and its hex persisted form
//! - [`protocol`] — bit-exact binary wire frames
//! - [`gate`] — ordered validation of one paint request
//! - [`engine`] — lock-guarded owner of board + gate
//! - [`broadcast`] — single-consumer FIFO fan-out
//! - [`registry`] — live connection set
//! - [`telemetry`] — periodic counters, logged
//! - [`persistence`] — board load/save through the database
//! - [`storage`] — database collaborator (RocksDB, in-memory)
//! - [`auth`], [`permission`] — token and capability collaborators
//! - [`http`] — warp routes (`getboard`, `paint`) and JSON envelopes
//! - [`server`] — lifecycle supervisor, listeners and shutdown signals
//! - [`cli`] — command line arguments for the binary

pub mod auth;
pub mod board;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod engine;
pub mod gate;
pub mod http;
pub mod permission;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod storage;
pub mod telemetry;

// Re-exports for convenience
pub use auth::{TokenAuthority, TokenCache};
pub use board::{BoardError, BoardState};
pub use broadcast::{BroadcastJob, BroadcastQueue, BroadcastStats};
pub use config::{ConfigError, PaintboardConfig};
pub use engine::{PaintEngine, PaintSource};
pub use gate::{GateConfig, MutationGate, PaintRequest, Rejection, Verdict};
pub use permission::{Permission, PermissionCache, PermissionStore};
pub use persistence::{PersistenceBridge, PersistenceError};
pub use protocol::{AckStatus, ClientFrame, PaintFrame, ProtocolError, ServerFrame};
pub use registry::{ConnectionEntry, ConnectionRegistry, Outbound};
pub use server::{shutdown_signal, PaintboardServer, ServerError};
pub use storage::{Database, MemoryDatabase, RocksDatabase, Rows, Statement, StoreConfig, StoreError};
pub use telemetry::{RateTracker, Telemetry};
