//! Database collaborator for board, tokens and permissions.
//!
//! Architecture:
//! ```text
//! ┌───────────────────┐   Statement    ┌──────────────────────────────────┐
//! │ PersistenceBridge │ ─────────────► │ dyn Database                     │
//! │ TokenCache        │ ◄───────────── │  ├─ RocksDatabase (on disk)      │
//! │ PermissionCache   │     Rows       │  └─ MemoryDatabase (tests)       │
//! └───────────────────┘                └──────────────────────────────────┘
//! ```
//!
//! Statements are typed instead of query strings; each one knows whether it
//! only reads.

pub mod memory;
pub mod rocks;

pub use memory::MemoryDatabase;
pub use rocks::{BoardMetadata, RocksDatabase, StoreConfig};

use uuid::Uuid;

/// A single database operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Read the stored board record
    SelectBoard,
    /// Overwrite the stored board with its hex form
    UpdateBoard(String),
    /// Read every (uid, token) pair
    SelectTokens,
    /// Insert or replace one uid's token
    UpsertToken { uid: u32, token: Uuid },
    /// Read every (uid, permission bits) pair
    SelectPermissions,
    /// Insert or replace one uid's permission bits
    UpsertPermission { uid: u32, bits: u32 },
}

impl Statement {
    /// Whether the statement leaves the database unchanged.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::SelectBoard | Self::SelectTokens | Self::SelectPermissions
        )
    }
}

/// The stored board record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardRecord {
    /// Canonical hex form of the board
    pub board: String,
    /// Last write (seconds since epoch)
    pub updated_at: u64,
}

/// Result of executing a [`Statement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rows {
    Board(Option<BoardRecord>),
    Tokens(Vec<(u32, Uuid)>),
    Permissions(Vec<(u32, u32)>),
    /// Write acknowledged
    Ack,
}

impl Rows {
    pub fn into_board(self) -> Result<Option<BoardRecord>, StoreError> {
        match self {
            Self::Board(record) => Ok(record),
            other => Err(StoreError::UnexpectedRows(format!("{other:?}"))),
        }
    }

    pub fn into_tokens(self) -> Result<Vec<(u32, Uuid)>, StoreError> {
        match self {
            Self::Tokens(tokens) => Ok(tokens),
            other => Err(StoreError::UnexpectedRows(format!("{other:?}"))),
        }
    }

    pub fn into_permissions(self) -> Result<Vec<(u32, u32)>, StoreError> {
        match self {
            Self::Permissions(perms) => Ok(perms),
            other => Err(StoreError::UnexpectedRows(format!("{other:?}"))),
        }
    }
}

/// The database collaborator.
pub trait Database: Send + Sync {
    /// Run one statement.
    fn execute(&self, statement: Statement) -> Result<Rows, StoreError>;

    /// Flush and close. Later statements fail with [`StoreError::Disconnected`].
    fn disconnect(&self) -> Result<(), StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// Statement issued after disconnect
    Disconnected,
    /// Statement produced rows of a different shape
    UnexpectedRows(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::Disconnected => write!(f, "Database disconnected"),
            StoreError::UnexpectedRows(rows) => write!(f, "Unexpected rows: {rows}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
