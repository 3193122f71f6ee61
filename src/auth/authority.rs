/// Token Authority
///
/// The service the HTTP layer talks to. Every dependency is injected at
/// construction; nothing here is process-global.

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, Role};
use crate::auth::clock::Clock;
use crate::auth::credentials::CredentialVerifier;
use crate::auth::family::TokenFamily;
use crate::auth::jwt::TokenCodec;
use crate::auth::password::hash_password_blocking;
use crate::auth::rotation::{RotationEngine, RotationOutcome};
use crate::configuration::SessionSettings;
use crate::error::{AppError, AuthError};
use crate::store::{bounded, FamilyStore, NewUser, RevocationCache, SafeUser, UserStore};
use crate::validators::{is_valid_email, is_valid_name};

/// Timing and cost knobs for session handling
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub grace_period: Duration,
    pub family_lifetime: Duration,
    pub op_timeout: std::time::Duration,
    pub bcrypt_cost: u32,
}

impl SessionPolicy {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            grace_period: Duration::seconds(settings.grace_period_seconds),
            family_lifetime: Duration::seconds(settings.family_lifetime_seconds),
            op_timeout: std::time::Duration::from_millis(settings.operation_timeout_ms),
            bcrypt_cost: settings.bcrypt_cost,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::seconds(60),
            family_lifetime: Duration::days(7),
            op_timeout: std::time::Duration::from_secs(2),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: SafeUser,
}

/// Counts removed by one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SweepReport {
    pub families: u64,
    pub revocations: u64,
}

#[derive(Clone)]
pub struct TokenAuthority {
    users: Arc<dyn UserStore>,
    families: Arc<dyn FamilyStore>,
    revocations: Arc<dyn RevocationCache>,
    verifier: CredentialVerifier,
    codec: TokenCodec,
    engine: RotationEngine,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl TokenAuthority {
    pub fn new(
        codec: TokenCodec,
        users: Arc<dyn UserStore>,
        families: Arc<dyn FamilyStore>,
        revocations: Arc<dyn RevocationCache>,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        let engine = RotationEngine::new(
            families.clone(),
            codec.clone(),
            clock.clone(),
            policy.grace_period,
            policy.op_timeout,
        );
        Self {
            verifier: CredentialVerifier::new(users.clone()),
            users,
            families,
            revocations,
            codec,
            engine,
            clock,
            policy,
        }
    }

    /// Creates a credential with role `user`.
    ///
    /// # Errors
    /// - `Validation` for a malformed email, empty name, or weak password
    /// - `Conflict` when the email is taken
    pub async fn register(&self, registration: Registration) -> Result<SafeUser, AppError> {
        let email = is_valid_email(&registration.email)?;
        let name = is_valid_name(&registration.name)?;
        let password_hash =
            hash_password_blocking(registration.password, self.policy.bcrypt_cost).await?;

        let user = bounded(
            self.policy.op_timeout,
            "user_insert",
            self.users.insert(NewUser {
                email,
                name,
                password_hash,
                role: Role::User,
            }),
        )
        .await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user.safe_view())
    }

    /// Verifies credentials and opens a new token family.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, AppError> {
        let user = bounded(
            self.policy.op_timeout,
            "credential_verify",
            self.verifier.verify(email, password),
        )
        .await?;

        let family_id = Uuid::new_v4();
        let refresh = self.codec.issue_refresh(user.id, family_id)?;
        let family = TokenFamily::new(
            family_id,
            user.id,
            refresh.token.clone(),
            self.clock.now() + self.policy.family_lifetime,
        );
        bounded(self.policy.op_timeout, "family_create", self.families.create(&family)).await?;

        let access = self.codec.issue_access(user.id, user.role)?;

        tracing::info!(user_id = %user.id, family_id = %family_id, "User logged in");
        Ok(LoginResult {
            tokens: self.token_pair(access.token, refresh.token),
            user: user.safe_view(),
        })
    }

    /// Exchanges a refresh token for a new pair. See `RotationEngine`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let outcome = self.engine.rotate(refresh_token).await?;
        let user_id = outcome.user_id();

        // the new access token carries the user's current role
        let user = bounded(self.policy.op_timeout, "user_find", self.users.find_by_id(user_id)).await?;
        let user = match user {
            Some(user) => user,
            None => {
                self.engine
                    .terminate(outcome.family_id(), "owning user no longer exists")
                    .await?;
                return Err(AuthError::FamilyRevoked.into());
            }
        };

        let access = self.codec.issue_access(user.id, user.role)?;
        if let RotationOutcome::GraceReuse { family_id, .. } = &outcome {
            tracing::debug!(user_id = %user_id, family_id = %family_id, "Refresh served from grace window");
        }

        Ok(self.token_pair(access.token, outcome.refresh_token().to_string()))
    }

    /// Terminates the session. Idempotent from the caller's point of view.
    ///
    /// A presented access token is blacklisted for its remaining lifetime.
    /// A refresh token that cannot be decoded at all is treated as already
    /// logged out; an expired but genuine one still deletes its family.
    pub async fn logout(&self, refresh_token: &str, access_token: Option<&str>) -> Result<(), AppError> {
        if let Some(access_token) = access_token {
            self.revoke_access(access_token).await?;
        }

        match self.codec.decode_refresh_ignoring_expiry(refresh_token) {
            Ok(claims) => {
                let family_id = claims.family_id()?;
                let removed =
                    bounded(self.policy.op_timeout, "family_delete", self.families.delete(family_id))
                        .await?;
                tracing::info!(family_id = %family_id, removed, "User logged out");
            }
            Err(e) => {
                tracing::warn!(reason = %e, "Logout with undecodable refresh token treated as done");
            }
        }
        Ok(())
    }

    /// Admission check for protected requests. Read-only.
    pub async fn admit(&self, access_token: Option<&str>) -> Result<AccessClaims, AppError> {
        let token = match access_token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthError::MissingToken.into()),
        };

        let claims = self.codec.verify_access(token)?;

        let revoked = bounded(
            self.policy.op_timeout,
            "revocation_lookup",
            self.revocations.is_revoked(token),
        )
        .await?;
        if revoked {
            return Err(AuthError::TokenRevoked.into());
        }

        Ok(claims)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<SafeUser, AppError> {
        bounded(self.policy.op_timeout, "user_find", self.users.find_by_id(user_id))
            .await?
            .map(|user| user.safe_view())
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Explicit administrative revocation of one session lineage.
    pub async fn revoke_family(&self, family_id: Uuid) -> Result<bool, AppError> {
        let removed =
            bounded(self.policy.op_timeout, "family_delete", self.families.delete(family_id)).await?;
        tracing::info!(family_id = %family_id, removed, "Token family revoked by administrator");
        Ok(removed)
    }

    /// Purges families past absolute expiry and elapsed revocation entries.
    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        let now = self.clock.now();
        let families =
            bounded(self.policy.op_timeout, "family_purge", self.families.purge_expired(now)).await?;
        let revocations = bounded(
            self.policy.op_timeout,
            "revocation_purge",
            self.revocations.purge_expired(now),
        )
        .await?;
        Ok(SweepReport {
            families,
            revocations,
        })
    }

    async fn revoke_access(&self, access_token: &str) -> Result<(), AppError> {
        let claims = match self.codec.verify_access(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(reason = %e, "Access token at logout not revocable, skipping");
                return Ok(());
            }
        };

        let remaining = claims.expires_at() - self.clock.now();
        if remaining <= Duration::zero() {
            return Ok(());
        }
        let ttl = remaining
            .to_std()
            .map_err(|e| AppError::Internal(format!("revocation ttl out of range: {}", e)))?;

        bounded(
            self.policy.op_timeout,
            "revocation_write",
            self.revocations.revoke(access_token, ttl),
        )
        .await?;
        tracing::info!(user_id = %claims.sub, "Access token revoked");
        Ok(())
    }

    fn token_pair(&self, access_token: String, refresh_token: String) -> TokenPair {
        TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.codec.access_ttl(),
        }
    }
}

/// Fails with `InsufficientRole` unless the caller holds `required`.
pub fn require_role(claims: &AccessClaims, required: Role) -> Result<(), AuthError> {
    if claims.role == required {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims_with(role: Role) -> AccessClaims {
        AccessClaims::new(Uuid::new_v4(), role, Utc::now(), 60, "test".to_string())
    }

    #[test]
    fn test_require_role() {
        assert!(require_role(&claims_with(Role::Admin), Role::Admin).is_ok());
        assert_eq!(
            require_role(&claims_with(Role::User), Role::Admin).unwrap_err(),
            AuthError::InsufficientRole
        );
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = SessionPolicy::from_settings(&SessionSettings {
            grace_period_seconds: 60,
            family_lifetime_seconds: 3600,
            operation_timeout_ms: 1500,
            sweep_interval_seconds: 30,
            bcrypt_cost: 4,
        });

        assert_eq!(policy.grace_period, Duration::seconds(60));
        assert_eq!(policy.family_lifetime, Duration::hours(1));
        assert_eq!(policy.op_timeout, std::time::Duration::from_millis(1500));
    }
}
