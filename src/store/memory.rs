/// In-process stores.
///
/// Each store keeps its state behind a single `tokio::sync::RwLock`, so every
/// read-modify-write below runs under one write guard and is atomic per key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{revocation_key, FamilyStore, NewUser, RevocationCache, UserRecord, UserStore};
use crate::auth::{Clock, TokenFamily};
use crate::error::AppError;

// ============================================================================
// Users
// ============================================================================

#[derive(Default)]
struct UserTable {
    by_id: HashMap<Uuid, UserRecord>,
    id_by_email: HashMap<String, Uuid>,
}

#[derive(Default, Clone)]
pub struct InMemoryUserStore {
    inner: Arc<RwLock<UserTable>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let table = self.inner.read().await;
        Ok(table
            .id_by_email
            .get(email)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let mut table = self.inner.write().await;
        if table.id_by_email.contains_key(&user.email) {
            return Err(AppError::Conflict("Email already taken".to_string()));
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            role: user.role,
            created_at: Utc::now(),
        };
        table.id_by_email.insert(record.email.clone(), record.id);
        table.by_id.insert(record.id, record.clone());

        Ok(record)
    }
}

// ============================================================================
// Token families
// ============================================================================

#[derive(Default)]
struct FamilyTable {
    rows: HashMap<Uuid, TokenFamily>,
    // secondary index on absolute expiry
    by_expiry: BTreeSet<(DateTime<Utc>, Uuid)>,
}

impl FamilyTable {
    fn remove(&mut self, family_id: Uuid) -> bool {
        match self.rows.remove(&family_id) {
            Some(family) => {
                self.by_expiry.remove(&(family.absolute_expires_at, family_id));
                true
            }
            None => false,
        }
    }
}

#[derive(Default, Clone)]
pub struct InMemoryFamilyStore {
    inner: Arc<RwLock<FamilyTable>>,
}

impl InMemoryFamilyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl FamilyStore for InMemoryFamilyStore {
    async fn create(&self, family: &TokenFamily) -> Result<(), AppError> {
        let mut table = self.inner.write().await;
        if table.rows.contains_key(&family.family_id) {
            return Err(AppError::Internal(format!(
                "token family {} already exists",
                family.family_id
            )));
        }
        table
            .by_expiry
            .insert((family.absolute_expires_at, family.family_id));
        table.rows.insert(family.family_id, family.clone());
        Ok(())
    }

    async fn find(&self, family_id: Uuid) -> Result<Option<TokenFamily>, AppError> {
        Ok(self.inner.read().await.rows.get(&family_id).cloned())
    }

    async fn advance(
        &self,
        family_id: Uuid,
        expected_current: &str,
        next_token: &str,
        grace_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut table = self.inner.write().await;
        match table.rows.get_mut(&family_id) {
            Some(family) if family.current_token == expected_current => {
                *family = family.advanced(next_token, grace_expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, family_id: Uuid) -> Result<bool, AppError> {
        Ok(self.inner.write().await.remove(family_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut table = self.inner.write().await;
        let expired: Vec<Uuid> = table
            .by_expiry
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .map(|(_, family_id)| *family_id)
            .collect();

        for family_id in &expired {
            table.remove(*family_id);
        }
        Ok(expired.len() as u64)
    }
}

// ============================================================================
// Revocation cache
// ============================================================================

/// Entries expire lazily: a lookup past the TTL reports "not revoked"
/// without touching the map; `purge_expired` reclaims the memory.
#[derive(Clone)]
pub struct InMemoryRevocationCache {
    entries: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRevocationCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl RevocationCache for InMemoryRevocationCache {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), AppError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Internal(format!("revocation ttl out of range: {}", e)))?;
        let expires_at = self.clock.now() + ttl;

        let mut entries = self.entries.write().await;
        let entry = entries.entry(revocation_key(token)).or_insert(expires_at);
        if *entry < expires_at {
            *entry = expires_at;
        }
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, AppError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .await
            .get(&revocation_key(token))
            .map_or(false, |expires_at| *expires_at > now))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}
