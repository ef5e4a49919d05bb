//! Capability flags and the permission collaborator.
//!
//! A uid holds a bit set of capabilities. Checking a flag means every bit
//! of the flag is present, so composite flags work as expected.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::storage::{Database, Statement, StoreError};

/// A set of capability bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permission(u32);

impl Permission {
    /// No capabilities.
    pub const NONE: Self = Self(0);
    /// May paint.
    pub const PAINT: Self = Self(0x1);
    /// Administrative actions.
    pub const ADMIN: Self = Self(0x2);
    /// Bypasses the paint cooldown.
    pub const ROOT: Self = Self(0x4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The permission collaborator.
pub trait PermissionStore: Send + Sync {
    fn has_permission(&self, uid: u32, flag: Permission) -> bool;
}

/// Permissions cached in memory and written through to the database.
#[derive(Default)]
pub struct PermissionCache {
    permissions: RwLock<HashMap<u32, Permission>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored permission.
    pub fn load(db: &dyn Database) -> Result<Self, StoreError> {
        let rows = db.execute(Statement::SelectPermissions)?.into_permissions()?;
        let permissions = rows
            .into_iter()
            .map(|(uid, bits)| (uid, Permission::from_bits(bits)))
            .collect::<HashMap<_, _>>();
        log::info!("Loaded permissions for {} users", permissions.len());
        Ok(Self {
            permissions: RwLock::new(permissions),
        })
    }

    /// Replace a uid's permissions in the database, then in the cache.
    pub fn set_permission(
        &self,
        db: &dyn Database,
        uid: u32,
        permission: Permission,
    ) -> Result<(), StoreError> {
        db.execute(Statement::UpsertPermission {
            uid,
            bits: permission.bits(),
        })?;
        self.insert(uid, permission);
        Ok(())
    }

    /// Cache-only insert.
    pub fn insert(&self, uid: u32, permission: Permission) {
        self.permissions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid, permission);
    }

    pub fn get(&self, uid: u32) -> Permission {
        self.permissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uid)
            .copied()
            .unwrap_or(Permission::NONE)
    }
}

impl PermissionStore for PermissionCache {
    fn has_permission(&self, uid: u32, flag: Permission) -> bool {
        self.get(uid).contains(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;

    #[test]
    fn test_permission_contains() {
        let p = Permission::PAINT | Permission::ROOT;
        assert!(p.contains(Permission::PAINT));
        assert!(p.contains(Permission::ROOT));
        assert!(!p.contains(Permission::ADMIN));
        assert!(!p.contains(Permission::PAINT | Permission::ADMIN));
        assert!(p.contains(Permission::NONE));
    }

    #[test]
    fn test_unknown_uid_has_nothing() {
        let cache = PermissionCache::new();
        assert!(!cache.has_permission(42, Permission::PAINT));
        assert_eq!(cache.get(42), Permission::NONE);
    }

    #[test]
    fn test_load_from_database() {
        let db = MemoryDatabase::new();
        db.execute(Statement::UpsertPermission { uid: 1, bits: 0x1 }).unwrap();
        db.execute(Statement::UpsertPermission { uid: 2, bits: 0x7 }).unwrap();

        let cache = PermissionCache::load(&db).unwrap();
        assert!(cache.has_permission(1, Permission::PAINT));
        assert!(!cache.has_permission(1, Permission::ROOT));
        assert!(cache.has_permission(2, Permission::ROOT));
    }

    #[test]
    fn test_set_permission_writes_through() {
        let db = MemoryDatabase::new();
        let cache = PermissionCache::new();
        cache.set_permission(&db, 9, Permission::PAINT).unwrap();

        assert!(cache.has_permission(9, Permission::PAINT));
        let reloaded = PermissionCache::load(&db).unwrap();
        assert!(reloaded.has_permission(9, Permission::PAINT));
    }
}
