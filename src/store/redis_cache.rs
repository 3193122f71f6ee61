/// Redis-backed revocation cache
///
/// Entries are written with `SET key 1 EX ttl`, so Redis expires them on its
/// own and `purge_expired` keeps the trait's no-op default.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use super::{revocation_key, RevocationCache};
use crate::error::{AppError, ConfigError};

#[derive(Clone)]
pub struct RedisRevocationCache {
    connection: MultiplexedConnection,
}

impl RedisRevocationCache {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = Client::open(url)
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid Redis URL: {}", e)))?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!("Connected to Redis revocation cache");
        Ok(Self { connection })
    }
}

#[async_trait]
impl RevocationCache for RedisRevocationCache {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), AppError> {
        // EX takes whole seconds; round up so the entry lives at least as long as the token
        let seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        if seconds == 0 {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(revocation_key(token), 1u8, seconds)
            .await?;

        debug!(ttl_seconds = seconds, "Access token added to revocation cache");
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, AppError> {
        let mut conn = self.connection.clone();
        let revoked = conn.exists::<_, bool>(revocation_key(token)).await?;
        Ok(revoked)
    }
}
