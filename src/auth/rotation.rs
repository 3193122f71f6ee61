/// Rotation Engine
///
/// Decides what a presented refresh token is worth and mutates the family
/// store accordingly:
///
/// - current token: rotate (compare-and-swap), return a new refresh token
/// - previous token inside the grace window: no rotation, hand back the
///   existing current token
/// - previous token after the grace window, or any other token: theft,
///   delete the family
///
/// Theft responses always delete the family before the error is returned.

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::clock::Clock;
use crate::auth::family::{Presented, TokenFamily};
use crate::auth::jwt::TokenCodec;
use crate::error::{AppError, AuthError};
use crate::store::{bounded, FamilyStore};

/// A lost compare-and-swap is re-evaluated once before giving up.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    /// Normal path: the family advanced one step.
    Rotated {
        user_id: Uuid,
        family_id: Uuid,
        refresh_token: String,
    },
    /// The just-superseded token came back within the grace window.
    GraceReuse {
        user_id: Uuid,
        family_id: Uuid,
        refresh_token: String,
    },
}

impl RotationOutcome {
    pub fn user_id(&self) -> Uuid {
        match self {
            RotationOutcome::Rotated { user_id, .. } | RotationOutcome::GraceReuse { user_id, .. } => {
                *user_id
            }
        }
    }

    pub fn family_id(&self) -> Uuid {
        match self {
            RotationOutcome::Rotated { family_id, .. }
            | RotationOutcome::GraceReuse { family_id, .. } => *family_id,
        }
    }

    pub fn refresh_token(&self) -> &str {
        match self {
            RotationOutcome::Rotated { refresh_token, .. }
            | RotationOutcome::GraceReuse { refresh_token, .. } => refresh_token,
        }
    }
}

#[derive(Clone)]
pub struct RotationEngine {
    families: Arc<dyn FamilyStore>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
    op_timeout: std::time::Duration,
}

impl RotationEngine {
    pub fn new(
        families: Arc<dyn FamilyStore>,
        codec: TokenCodec,
        clock: Arc<dyn Clock>,
        grace_period: Duration,
        op_timeout: std::time::Duration,
    ) -> Self {
        Self {
            families,
            codec,
            clock,
            grace_period,
            op_timeout,
        }
    }

    pub async fn rotate(&self, presented: &str) -> Result<RotationOutcome, AppError> {
        let claims = self.codec.verify_refresh(presented).map_err(|e| {
            tracing::debug!(reason = %e, "Refresh token failed verification");
            AuthError::InvalidRefreshToken
        })?;
        let family_id = claims.family_id()?;

        for attempt in 1..=MAX_ATTEMPTS {
            let family = bounded(self.op_timeout, "family_find", self.families.find(family_id))
                .await?
                .ok_or(AuthError::FamilyRevoked)?;

            let now = self.clock.now();
            if family.is_expired(now) {
                self.terminate(family_id, "family past absolute expiry").await?;
                return Err(AuthError::FamilyRevoked.into());
            }

            match family.classify(presented) {
                Presented::Current => {
                    if let Some(outcome) = self.advance(&family, presented, now).await? {
                        return Ok(outcome);
                    }
                    tracing::debug!(
                        family_id = %family_id,
                        attempt,
                        "Lost rotation race, re-reading family"
                    );
                }
                Presented::Previous { grace_expires_at } if now < grace_expires_at => {
                    tracing::info!(family_id = %family_id, "Superseded refresh token accepted within grace window");
                    return Ok(RotationOutcome::GraceReuse {
                        user_id: family.user_id,
                        family_id,
                        refresh_token: family.current_token,
                    });
                }
                Presented::Previous { .. } => {
                    self.terminate(family_id, "superseded refresh token replayed after grace window")
                        .await?;
                    return Err(AuthError::ReuseOutsideGrace.into());
                }
                Presented::Unknown => {
                    self.terminate(family_id, "stale refresh token replayed").await?;
                    return Err(AuthError::ReuseDetected.into());
                }
            }
        }

        tracing::warn!(family_id = %family_id, "Rotation did not settle after retry");
        Err(AppError::Unavailable(
            "concurrent rotation did not settle".to_string(),
        ))
    }

    /// Returns `None` when the compare-and-swap lost a race.
    async fn advance(
        &self,
        family: &TokenFamily,
        presented: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<RotationOutcome>, AppError> {
        let next = self.codec.issue_refresh(family.user_id, family.family_id)?;
        let grace_expires_at = now + self.grace_period;

        let swapped = bounded(
            self.op_timeout,
            "family_advance",
            self.families
                .advance(family.family_id, presented, &next.token, grace_expires_at),
        )
        .await?;

        if !swapped {
            return Ok(None);
        }

        tracing::debug!(family_id = %family.family_id, "Refresh token rotated");
        Ok(Some(RotationOutcome::Rotated {
            user_id: family.user_id,
            family_id: family.family_id,
            refresh_token: next.token,
        }))
    }

    /// Deletes the whole lineage.
    pub async fn terminate(&self, family_id: Uuid, reason: &'static str) -> Result<(), AppError> {
        bounded(self.op_timeout, "family_delete", self.families.delete(family_id)).await?;
        tracing::warn!(family_id = %family_id, reason, "Token family terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::Role;
    use crate::configuration::JwtSettings;
    use crate::store::InMemoryFamilyStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        engine: RotationEngine,
        store: InMemoryFamilyStore,
        codec: TokenCodec,
        clock: Arc<ManualClock>,
    }

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            access_secret: "test-access-secret-at-least-32-characters".to_string(),
            refresh_secret: "test-refresh-secret-at-least-32-characters".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let codec = TokenCodec::new(&jwt_settings(), clock.clone());
        let store = InMemoryFamilyStore::new();
        let engine = RotationEngine::new(
            Arc::new(store.clone()),
            codec.clone(),
            clock.clone(),
            Duration::seconds(60),
            std::time::Duration::from_secs(1),
        );
        Fixture {
            engine,
            store,
            codec,
            clock,
        }
    }

    /// Simulates a login: returns (family_id, R0)
    async fn login(f: &Fixture) -> (Uuid, String) {
        let family_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let r0 = f.codec.issue_refresh(user_id, family_id).unwrap().token;
        let family = TokenFamily::new(family_id, user_id, r0.clone(), f.clock.now() + Duration::days(1));
        f.store.create(&family).await.unwrap();
        (family_id, r0)
    }

    fn auth_kind(result: Result<RotationOutcome, AppError>) -> AuthError {
        match result {
            Err(AppError::Auth(kind)) => kind,
            other => panic!("expected auth failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_current_token_rotates() {
        let f = fixture();
        let (family_id, r0) = login(&f).await;

        let outcome = f.engine.rotate(&r0).await.unwrap();
        let r1 = outcome.refresh_token().to_string();

        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
        assert_ne!(r1, r0);

        let family = f.store.find(family_id).await.unwrap().unwrap();
        assert_eq!(family.current_token, r1);
        let previous = family.previous.unwrap();
        assert_eq!(previous.token, r0);
        assert_eq!(previous.grace_expires_at, f.clock.now() + Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_previous_token_within_grace_does_not_rotate() {
        let f = fixture();
        let (family_id, r0) = login(&f).await;
        let r1 = f.engine.rotate(&r0).await.unwrap().refresh_token().to_string();

        f.clock.advance(Duration::seconds(59));
        let outcome = f.engine.rotate(&r0).await.unwrap();

        assert!(matches!(outcome, RotationOutcome::GraceReuse { .. }));
        assert_eq!(outcome.refresh_token(), r1);
        let family = f.store.find(family_id).await.unwrap().unwrap();
        assert_eq!(family.current_token, r1);
    }

    #[tokio::test]
    async fn test_previous_token_after_grace_kills_family() {
        let f = fixture();
        let (family_id, r0) = login(&f).await;
        let r1 = f.engine.rotate(&r0).await.unwrap().refresh_token().to_string();

        f.clock.advance(Duration::seconds(60));

        assert_eq!(auth_kind(f.engine.rotate(&r0).await), AuthError::ReuseOutsideGrace);
        assert!(f.store.find(family_id).await.unwrap().is_none());
        assert_eq!(auth_kind(f.engine.rotate(&r1).await), AuthError::FamilyRevoked);
    }

    #[tokio::test]
    async fn test_stale_token_kills_family() {
        let f = fixture();
        let (family_id, r0) = login(&f).await;
        let r1 = f.engine.rotate(&r0).await.unwrap().refresh_token().to_string();
        let r2 = f.engine.rotate(&r1).await.unwrap().refresh_token().to_string();

        // R0 is two steps back: neither current nor previous
        assert_eq!(auth_kind(f.engine.rotate(&r0).await), AuthError::ReuseDetected);
        assert!(f.store.find(family_id).await.unwrap().is_none());

        for token in [&r0, &r1, &r2] {
            assert_eq!(auth_kind(f.engine.rotate(token).await), AuthError::FamilyRevoked);
        }
    }

    #[tokio::test]
    async fn test_forged_token_is_rejected_without_mutation() {
        let f = fixture();
        let (family_id, _r0) = login(&f).await;

        assert_eq!(
            auth_kind(f.engine.rotate("not.a.token").await),
            AuthError::InvalidRefreshToken
        );
        let access = f.codec.issue_access(Uuid::new_v4(), Role::User).unwrap();
        assert_eq!(
            auth_kind(f.engine.rotate(&access.token).await),
            AuthError::InvalidRefreshToken
        );
        assert!(f.store.find(family_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_validly_signed_token_not_in_family_is_reuse() {
        let f = fixture();
        let (family_id, _r0) = login(&f).await;
        let family = f.store.find(family_id).await.unwrap().unwrap();

        // genuine signature, right family, never stored
        let rogue = f.codec.issue_refresh(family.user_id, family_id).unwrap().token;

        assert_eq!(auth_kind(f.engine.rotate(&rogue).await), AuthError::ReuseDetected);
        assert!(f.store.find(family_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_family_is_revoked() {
        let f = fixture();
        let (family_id, r0) = login(&f).await;

        f.clock.advance(Duration::days(1));

        assert_eq!(auth_kind(f.engine.rotate(&r0).await), AuthError::FamilyRevoked);
        assert!(f.store.find(family_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_settles() {
        let f = fixture();
        let (family_id, r0) = login(&f).await;

        let (a, b) = tokio::join!(f.engine.rotate(&r0), f.engine.rotate(&r0));
        let (a, b) = (a.unwrap(), b.unwrap());

        let rotated = [&a, &b]
            .iter()
            .filter(|o| matches!(o, RotationOutcome::Rotated { .. }))
            .count();
        assert_eq!(rotated, 1);
        assert_eq!(a.refresh_token(), b.refresh_token());

        let family = f.store.find(family_id).await.unwrap().unwrap();
        assert_eq!(family.current_token, a.refresh_token());
        assert_eq!(family.previous.unwrap().token, r0);
    }

    /// Loses the first compare-and-swap as if another request committed
    /// R0 -> R1 in between the read and the write.
    struct RacingStore {
        inner: InMemoryFamilyStore,
        codec: TokenCodec,
        raced: AtomicBool,
    }

    #[async_trait]
    impl FamilyStore for RacingStore {
        async fn create(&self, family: &TokenFamily) -> Result<(), AppError> {
            self.inner.create(family).await
        }

        async fn find(&self, family_id: Uuid) -> Result<Option<TokenFamily>, AppError> {
            self.inner.find(family_id).await
        }

        async fn advance(
            &self,
            family_id: Uuid,
            expected_current: &str,
            next_token: &str,
            grace_expires_at: DateTime<Utc>,
        ) -> Result<bool, AppError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let family = self.inner.find(family_id).await?.unwrap();
                let winner = self.codec.issue_refresh(family.user_id, family_id)?.token;
                assert!(self.inner.advance(family_id, expected_current, &winner, grace_expires_at).await?);
                return Ok(false);
            }
            self.inner
                .advance(family_id, expected_current, next_token, grace_expires_at)
                .await
        }

        async fn delete(&self, family_id: Uuid) -> Result<bool, AppError> {
            self.inner.delete(family_id).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
            self.inner.purge_expired(now).await
        }
    }

    #[tokio::test]
    async fn test_lost_swap_is_retried_not_reported_as_theft() {
        let base = fixture();
        let racing = Arc::new(RacingStore {
            inner: base.store.clone(),
            codec: base.codec.clone(),
            raced: AtomicBool::new(false),
        });
        let engine = RotationEngine::new(
            racing,
            base.codec.clone(),
            base.clock.clone(),
            Duration::seconds(60),
            std::time::Duration::from_secs(1),
        );
        let (family_id, r0) = login(&base).await;

        let outcome = engine.rotate(&r0).await.unwrap();

        // the retry sees R0 as the in-grace previous token
        assert!(matches!(outcome, RotationOutcome::GraceReuse { .. }));
        let family = base.store.find(family_id).await.unwrap().unwrap();
        assert_eq!(outcome.refresh_token(), family.current_token);
    }
}
