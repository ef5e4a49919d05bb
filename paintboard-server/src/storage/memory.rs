//! In-memory database, used by tests and throwaway deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{BoardRecord, Database, Rows, Statement, StoreError};

#[derive(Default)]
struct Tables {
    board: Option<BoardRecord>,
    tokens: BTreeMap<u32, Uuid>,
    permissions: BTreeMap<u32, u32>,
}

/// A [`Database`] kept entirely in process memory.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
    closed: AtomicBool,
    writes: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a stored board record.
    pub fn with_board(hex: impl Into<String>) -> Self {
        let db = Self::new();
        db.lock().board = Some(BoardRecord {
            board: hex.into(),
            updated_at: 0,
        });
        db
    }

    /// Stored board text, if any.
    pub fn board_text(&self) -> Option<String> {
        self.lock().board.as_ref().map(|r| r.board.clone())
    }

    /// Number of write statements executed.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Database for MemoryDatabase {
    fn execute(&self, statement: Statement) -> Result<Rows, StoreError> {
        if self.is_disconnected() {
            return Err(StoreError::Disconnected);
        }
        if !statement.is_read() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }

        let mut tables = self.lock();
        let rows = match statement {
            Statement::SelectBoard => Rows::Board(tables.board.clone()),
            Statement::UpdateBoard(board) => {
                let updated_at = std::time::SystemTime::now()
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                tables.board = Some(BoardRecord { board, updated_at });
                Rows::Ack
            }
            Statement::SelectTokens => {
                Rows::Tokens(tables.tokens.iter().map(|(&u, &t)| (u, t)).collect())
            }
            Statement::UpsertToken { uid, token } => {
                tables.tokens.insert(uid, token);
                Rows::Ack
            }
            Statement::SelectPermissions => {
                Rows::Permissions(tables.permissions.iter().map(|(&u, &b)| (u, b)).collect())
            }
            Statement::UpsertPermission { uid, bits } => {
                tables.permissions.insert(uid, bits);
                Rows::Ack
            }
        };
        Ok(rows)
    }

    fn disconnect(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_board_roundtrip() {
        let db = MemoryDatabase::new();
        assert_eq!(db.execute(Statement::SelectBoard).unwrap(), Rows::Board(None));

        db.execute(Statement::UpdateBoard("abcdef".into())).unwrap();
        assert_eq!(db.board_text().as_deref(), Some("abcdef"));
        assert_eq!(db.write_count(), 1);
    }

    #[test]
    fn test_memory_with_board() {
        let db = MemoryDatabase::with_board("010203");
        let record = db.execute(Statement::SelectBoard).unwrap().into_board().unwrap();
        assert_eq!(record.unwrap().board, "010203");
        assert_eq!(db.write_count(), 0);
    }

    #[test]
    fn test_memory_disconnect() {
        let db = MemoryDatabase::new();
        db.disconnect().unwrap();
        assert!(db.is_disconnected());
        assert!(matches!(
            db.execute(Statement::SelectTokens),
            Err(StoreError::Disconnected)
        ));
    }
}
