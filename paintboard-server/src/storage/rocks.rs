//! RocksDB-backed database collaborator.
//!
//! Column families:
//! - `board`       — the board hex string (LZ4 compressed, single key)
//! - `metadata`    — board metadata (bincode: sizes, updated_at)
//! - `tokens`      — uid (4 bytes BE) → token (16 raw bytes)
//! - `permissions` — uid (4 bytes BE) → permission bits (u32 LE)
//!
//! A 1000×600 board is 3.6M hex characters; mostly-uniform boards compress
//! by two orders of magnitude under LZ4.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use uuid::Uuid;

use super::{BoardRecord, Database, Rows, Statement, StoreError};

/// Column family names.
const CF_BOARD: &str = "board";
const CF_METADATA: &str = "metadata";
const CF_TOKENS: &str = "tokens";
const CF_PERMISSIONS: &str = "permissions";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_BOARD, CF_METADATA, CF_TOKENS, CF_PERMISSIONS];

/// Key of the single board record.
const BOARD_KEY: &[u8] = b"board";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: true — writes are rare)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("paintboard_data"),
            block_cache_size: 64 * 1024 * 1024, // 64MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Metadata stored alongside the board record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardMetadata {
    /// Uncompressed hex length
    pub hex_len: u64,
    /// Compressed size in bytes
    pub compressed_size: u64,
    /// Number of board writes so far
    pub revision: u64,
    /// Last write (seconds since epoch)
    pub updated_at: u64,
}

impl BoardMetadata {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// RocksDB-backed database.
pub struct RocksDatabase {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
    /// Set by `disconnect`
    closed: AtomicBool,
}

impl RocksDatabase {
    /// Open the database at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened board database at {}", config.path.display());

        Ok(Self {
            db,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_BOARD => {
                // Value is already LZ4 compressed
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
        }

        opts
    }

    // ─── Board ────────────────────────────────────────────────────────

    /// Save the board hex string (LZ4 compressed) and its metadata.
    pub fn save_board(&self, hex: &str) -> Result<BoardMetadata, StoreError> {
        let cf_board = self.cf(CF_BOARD)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(hex.as_bytes());

        let revision = self.load_metadata()?.map_or(0, |m| m.revision) + 1;
        let meta = BoardMetadata {
            hex_len: hex.len() as u64,
            compressed_size: compressed.len() as u64,
            revision,
            updated_at: now_secs(),
        };

        // Atomic batch write: board + metadata
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_board, BOARD_KEY, &compressed);
        batch.put_cf(cf_meta, BOARD_KEY, meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    /// Load the board hex string, if one was ever saved.
    pub fn load_board(&self) -> Result<Option<BoardRecord>, StoreError> {
        let cf = self.cf(CF_BOARD)?;
        let Some(compressed) = self.db.get_cf(cf, BOARD_KEY)? else {
            return Ok(None);
        };

        let raw = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::CompressionError(e.to_string()))?;
        let board = String::from_utf8(raw)
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        let updated_at = self.load_metadata()?.map_or(0, |m| m.updated_at);

        Ok(Some(BoardRecord { board, updated_at }))
    }

    /// Load board metadata.
    pub fn load_metadata(&self) -> Result<Option<BoardMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, BOARD_KEY)? {
            Some(bytes) => BoardMetadata::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    // ─── Tokens & Permissions ─────────────────────────────────────────

    fn upsert_token(&self, uid: u32, token: Uuid) -> Result<(), StoreError> {
        let cf = self.cf(CF_TOKENS)?;
        self.db.put_cf(cf, uid.to_be_bytes(), token.as_bytes())?;
        Ok(())
    }

    fn load_tokens(&self) -> Result<Vec<(u32, Uuid)>, StoreError> {
        let cf = self.cf(CF_TOKENS)?;
        let mut tokens = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let uid = Self::decode_uid(&key)?;
            let bytes: [u8; 16] = value
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::DeserializationError("Invalid token value".into()))?;
            tokens.push((uid, Uuid::from_bytes(bytes)));
        }
        Ok(tokens)
    }

    fn upsert_permission(&self, uid: u32, bits: u32) -> Result<(), StoreError> {
        let cf = self.cf(CF_PERMISSIONS)?;
        self.db.put_cf(cf, uid.to_be_bytes(), bits.to_le_bytes())?;
        Ok(())
    }

    fn load_permissions(&self) -> Result<Vec<(u32, u32)>, StoreError> {
        let cf = self.cf(CF_PERMISSIONS)?;
        let mut perms = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let uid = Self::decode_uid(&key)?;
            let bits: [u8; 4] = value
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::DeserializationError("Invalid permission value".into()))?;
            perms.push((uid, u32::from_le_bytes(bits)));
        }
        Ok(perms)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn decode_uid(key: &[u8]) -> Result<u32, StoreError> {
        let bytes: [u8; 4] = key
            .try_into()
            .map_err(|_| StoreError::DeserializationError("Invalid uid key".into()))?;
        Ok(u32::from_be_bytes(bytes))
    }
}

impl Database for RocksDatabase {
    fn execute(&self, statement: Statement) -> Result<Rows, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        log::trace!("Executing {statement:?} (read: {})", statement.is_read());

        match statement {
            Statement::SelectBoard => self.load_board().map(Rows::Board),
            Statement::UpdateBoard(hex) => {
                let meta = self.save_board(&hex)?;
                log::debug!(
                    "Board revision {} saved: {} → {} bytes",
                    meta.revision,
                    meta.hex_len,
                    meta.compressed_size
                );
                Ok(Rows::Ack)
            }
            Statement::SelectTokens => self.load_tokens().map(Rows::Tokens),
            Statement::UpsertToken { uid, token } => {
                self.upsert_token(uid, token)?;
                Ok(Rows::Ack)
            }
            Statement::SelectPermissions => self.load_permissions().map(Rows::Permissions),
            Statement::UpsertPermission { uid, bits } => {
                self.upsert_permission(uid, bits)?;
                Ok(Rows::Ack)
            }
        }
    }

    fn disconnect(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for name in COLUMN_FAMILIES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        log::info!("Board database at {} disconnected", self.config.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_open_close() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        assert!(store.path().exists());
        store.disconnect().unwrap();
    }

    #[test]
    fn test_board_missing_initially() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        let rows = store.execute(Statement::SelectBoard).unwrap();
        assert_eq!(rows, Rows::Board(None));
    }

    #[test]
    fn test_board_save_load() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let hex = "aaaaaa".repeat(1000);
        assert_eq!(store.execute(Statement::UpdateBoard(hex.clone())).unwrap(), Rows::Ack);

        let record = store.execute(Statement::SelectBoard).unwrap().into_board().unwrap().unwrap();
        assert_eq!(record.board, hex);
        assert!(record.updated_at > 0);
    }

    #[test]
    fn test_board_metadata_revision() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        assert!(store.load_metadata().unwrap().is_none());
        store.save_board("aaaaaa").unwrap();
        let meta = store.save_board("bbbbbb").unwrap();
        assert_eq!(meta.revision, 2);
        assert_eq!(meta.hex_len, 6);
        assert_eq!(store.load_metadata().unwrap().unwrap(), meta);
    }

    #[test]
    fn test_board_compression_ratio() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let meta = store.save_board(&"aaaaaa".repeat(100_000)).unwrap();
        let ratio = meta.hex_len as f64 / meta.compressed_size as f64;

        // Uniform boards compress extremely well
        assert!(ratio > 50.0, "Compression ratio {ratio:.1}x too low");
    }

    #[test]
    fn test_tokens_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        store.execute(Statement::UpsertToken { uid: 7, token: t1 }).unwrap();
        store.execute(Statement::UpsertToken { uid: 3, token: t2 }).unwrap();
        store.execute(Statement::UpsertToken { uid: 7, token: t2 }).unwrap();

        let tokens = store.execute(Statement::SelectTokens).unwrap().into_tokens().unwrap();
        assert_eq!(tokens, vec![(3, t2), (7, t2)]);
    }

    #[test]
    fn test_permissions_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        store.execute(Statement::UpsertPermission { uid: 1, bits: 0x5 }).unwrap();
        store.execute(Statement::UpsertPermission { uid: 2, bits: 0x1 }).unwrap();

        let perms = store
            .execute(Statement::SelectPermissions)
            .unwrap()
            .into_permissions()
            .unwrap();
        assert_eq!(perms, vec![(1, 0x5), (2, 0x1)]);
    }

    #[test]
    fn test_board_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store = RocksDatabase::open(StoreConfig::for_testing(&path)).unwrap();
            store.execute(Statement::UpdateBoard("112233".into())).unwrap();
            store.disconnect().unwrap();
        }

        let store = RocksDatabase::open(StoreConfig::for_testing(&path)).unwrap();
        let record = store.load_board().unwrap().unwrap();
        assert_eq!(record.board, "112233");
    }

    #[test]
    fn test_execute_after_disconnect() {
        let dir = tempdir().unwrap();
        let store = RocksDatabase::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        store.disconnect().unwrap();
        // Second disconnect is a no-op
        store.disconnect().unwrap();

        let err = store.execute(Statement::SelectBoard).unwrap_err();
        assert!(matches!(err, StoreError::Disconnected));
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.block_cache_size, 64 * 1024 * 1024);
        assert_eq!(config.bloom_filter_bits, 10);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DatabaseError("test".into());
        assert!(err.to_string().contains("Database error"));
        assert!(StoreError::Disconnected.to_string().contains("disconnected"));
    }
}
