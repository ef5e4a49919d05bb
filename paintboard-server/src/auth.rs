//! Token collaborator.
//!
//! Tokens are UUIDs issued per uid. Issuing them through the external
//! verification flow is out of scope; this module only stores and checks
//! them.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::storage::{Database, Statement, StoreError};

/// The token collaborator.
pub trait TokenAuthority: Send + Sync {
    /// Whether `token` is the current token for `uid`.
    fn auth_token(&self, uid: u32, token: &Uuid) -> bool;
}

/// Tokens cached in memory and written through to the database.
#[derive(Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<u32, Uuid>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored token.
    pub fn load(db: &dyn Database) -> Result<Self, StoreError> {
        let tokens = db
            .execute(Statement::SelectTokens)?
            .into_tokens()?
            .into_iter()
            .collect::<HashMap<_, _>>();
        log::info!("Loaded {} tokens", tokens.len());
        Ok(Self {
            tokens: RwLock::new(tokens),
        })
    }

    /// Issue a fresh token for `uid`, replacing any previous one.
    pub fn refresh_token(&self, db: &dyn Database, uid: u32) -> Result<Uuid, StoreError> {
        let token = Uuid::new_v4();
        db.execute(Statement::UpsertToken { uid, token })?;
        self.insert(uid, token);
        log::debug!("Issued new token for uid {uid}");
        Ok(token)
    }

    /// Cache-only insert.
    pub fn insert(&self, uid: u32, token: Uuid) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid, token);
    }

    pub fn len(&self) -> usize {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenAuthority for TokenCache {
    fn auth_token(&self, uid: u32, token: &Uuid) -> bool {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uid)
            == Some(token)
    }
}
