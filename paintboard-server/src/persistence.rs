//! Board load and save through the database collaborator.
//!
//! Startup: `reset_board` → default fill, otherwise parse the stored hex.
//! Shutdown: one `UpdateBoard` statement, then disconnect.

use std::sync::Arc;

use crate::board::{BoardError, BoardState};
use crate::storage::{Database, Statement, StoreError};

/// Fatal persistence failures.
#[derive(Debug, Clone)]
pub enum PersistenceError {
    /// Database rejected a statement
    Store(StoreError),
    /// Stored board could not be parsed
    CorruptBoard(BoardError),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "Persistence store error: {e}"),
            Self::CorruptBoard(e) => write!(f, "Stored board is corrupt: {e}"),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::CorruptBoard(e) => Some(e),
        }
    }
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<BoardError> for PersistenceError {
    fn from(e: BoardError) -> Self {
        Self::CorruptBoard(e)
    }
}

/// Moves the board between memory and the database.
pub struct PersistenceBridge {
    db: Arc<dyn Database>,
}

impl PersistenceBridge {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Build the startup board.
    ///
    /// A missing record falls back to the default fill. A record that does
    /// not parse is an error.
    pub fn load_board(
        &self,
        width: u32,
        height: u32,
        reset: bool,
        default_color: u32,
    ) -> Result<BoardState, PersistenceError> {
        if reset {
            log::info!("Board reset requested; filling {width}x{height} with #{default_color:06X}");
            return Ok(BoardState::init_default(width, height, default_color));
        }

        match self.db.execute(Statement::SelectBoard)?.into_board()? {
            Some(record) => {
                let board = BoardState::init_from_hex(width, height, &record.board)?;
                log::info!(
                    "Restored {width}x{height} board (last saved at {})",
                    record.updated_at
                );
                Ok(board)
            }
            None => {
                log::warn!("No stored board found; starting from default fill");
                Ok(BoardState::init_default(width, height, default_color))
            }
        }
    }

    /// Write the board's hex form.
    pub fn save_board(&self, hex: String) -> Result<(), PersistenceError> {
        let len = hex.len();
        self.db.execute(Statement::UpdateBoard(hex))?;
        log::info!("Saved board ({len} hex digits)");
        Ok(())
    }

    /// Disconnect the database.
    pub fn close(&self) -> Result<(), PersistenceError> {
        self.db.disconnect()?;
        log::info!("Database disconnected");
        Ok(())
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;

    #[test]
    fn test_reset_ignores_stored_board() {
        let db = Arc::new(MemoryDatabase::with_board("zz"));
        let bridge = PersistenceBridge::new(db);
        let board = bridge.load_board(2, 1, true, 0x010203).unwrap();
        assert_eq!(board.snapshot(), &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_restore_stored_board() {
        let db = Arc::new(MemoryDatabase::with_board("ff000000ff00"));
        let bridge = PersistenceBridge::new(db);
        let board = bridge.load_board(2, 1, false, 0).unwrap();
        assert_eq!(board.pixel(0, 0), 0xFF0000);
        assert_eq!(board.pixel(1, 0), 0x00FF00);
    }

    #[test]
    fn test_corrupt_board_is_fatal() {
        let bridge = PersistenceBridge::new(Arc::new(MemoryDatabase::with_board("ff00")));
        assert!(matches!(
            bridge.load_board(2, 1, false, 0),
            Err(PersistenceError::CorruptBoard(BoardError::LengthMismatch { .. }))
        ));

        let bridge = PersistenceBridge::new(Arc::new(MemoryDatabase::with_board("gg0000000000")));
        assert!(matches!(
            bridge.load_board(2, 1, false, 0),
            Err(PersistenceError::CorruptBoard(BoardError::InvalidHex { offset: 0 }))
        ));
    }

    #[test]
    fn test_missing_board_uses_default() {
        let bridge = PersistenceBridge::new(Arc::new(MemoryDatabase::new()));
        let board = bridge.load_board(1, 1, false, 0xAAAAAA).unwrap();
        assert_eq!(board.pixel(0, 0), 0xAAAAAA);
    }

    #[test]
    fn test_save_then_close() {
        let db = Arc::new(MemoryDatabase::new());
        let bridge = PersistenceBridge::new(db.clone());
        bridge.save_board("abcdef".into()).unwrap();
        bridge.close().unwrap();

        assert_eq!(db.board_text().as_deref(), Some("abcdef"));
        assert_eq!(db.write_count(), 1);
        assert!(db.is_disconnected());
        assert!(matches!(
            bridge.save_board("000000".into()),
            Err(PersistenceError::Store(StoreError::Disconnected))
        ));
    }
}
