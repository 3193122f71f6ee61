/// Backing stores consumed by the token authority.
///
/// Every store is injected as a trait object so the authority never knows
/// which engine sits behind it. In-memory implementations serve tests and
/// single-process deployments; Postgres and Redis serve production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{Role, TokenFamily};
use crate::error::AppError;

mod memory;
mod postgres;
mod redis_cache;

pub use self::memory::{InMemoryFamilyStore, InMemoryRevocationCache, InMemoryUserStore};
pub use self::postgres::{PgFamilyStore, PgUserStore};
pub use self::redis_cache::RedisRevocationCache;

/// Stored credential as read by the authority
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn safe_view(&self) -> SafeUser {
        SafeUser {
            id: self.id.to_string(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// User view without the password hash
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SafeUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: String,
}

/// Input for creating a user. `email` is already normalized.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError>;

    /// Fails with `AppError::Conflict` when the email is taken.
    async fn insert(&self, user: NewUser) -> Result<UserRecord, AppError>;
}

/// Persistent token families, one row per `family_id`.
#[async_trait]
pub trait FamilyStore: Send + Sync {
    async fn create(&self, family: &TokenFamily) -> Result<(), AppError>;

    async fn find(&self, family_id: Uuid) -> Result<Option<TokenFamily>, AppError>;

    /// Atomic compare-and-swap on `current_token`.
    ///
    /// Only if the stored current token still equals `expected_current`:
    /// previous becomes `expected_current`, current becomes `next_token`, and
    /// the grace expiry is set. Returns `false` when the swap lost a race or
    /// the family no longer exists.
    async fn advance(
        &self,
        family_id: Uuid,
        expected_current: &str,
        next_token: &str,
        grace_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Idempotent. Returns whether a row was removed.
    async fn delete(&self, family_id: Uuid) -> Result<bool, AppError>;

    /// Removes families whose absolute expiry is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// TTL-bounded record of access tokens revoked before their natural expiry.
#[async_trait]
pub trait RevocationCache: Send + Sync {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), AppError>;

    /// Read-only; must not mutate the cache.
    async fn is_revoked(&self, token: &str) -> Result<bool, AppError>;

    /// Drops entries whose TTL elapsed. Self-expiring backends do nothing.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(0)
    }
}

/// Cache key for a revoked access token. The raw token never leaves memory.
pub fn revocation_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("bl_{:x}", hasher.finalize())
}

/// Runs a store call under `limit`, surfacing a timeout as `Unavailable`.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Store call timed out");
            Err(AppError::Unavailable(format!("{} timed out", operation)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revocation_key_is_stable_and_opaque() {
        let key = revocation_key("header.payload.signature");

        assert_eq!(key, revocation_key("header.payload.signature"));
        assert_ne!(key, revocation_key("header.payload.signaturf"));
        assert!(key.starts_with("bl_"));
        assert!(!key.contains("payload"));
        assert_eq!(key.len(), 3 + 64);
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(Duration::from_millis(100), "op", async { Ok::<_, AppError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result = bounded(Duration::from_millis(10), "slow_op", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, AppError>(())
        })
        .await;

        match result {
            Err(AppError::Unavailable(msg)) => assert!(msg.contains("slow_op")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }
}
