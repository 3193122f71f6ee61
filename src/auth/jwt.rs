/// JWT Token Codec
///
/// Signs and verifies access and refresh tokens. Keys are derived once from
/// configuration; the codec holds no mutable state.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, Expiring, RefreshClaims, Role};
use crate::auth::clock::Clock;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// A freshly signed token and the moment it stops being valid
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: i64,
    refresh_ttl: i64,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(config: &JwtSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: config.access_token_expiry,
            refresh_ttl: config.refresh_token_expiry,
            issuer: config.issuer.clone(),
            clock,
        }
    }

    /// Lifetime of access tokens in seconds
    pub fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    pub fn issue_access(&self, user_id: Uuid, role: Role) -> Result<IssuedToken, AppError> {
        let claims = AccessClaims::new(
            user_id,
            role,
            self.clock.now(),
            self.access_ttl,
            self.issuer.clone(),
        );
        let expires_at = claims.expires_at();

        encode(&Header::new(ALGORITHM), &claims, &self.access_encoding)
            .map(|token| IssuedToken { token, expires_at })
            .map_err(|e| AppError::Internal(format!("Access token generation failed: {}", e)))
    }

    pub fn issue_refresh(&self, user_id: Uuid, family_id: Uuid) -> Result<IssuedToken, AppError> {
        let claims = RefreshClaims::new(
            user_id,
            family_id,
            self.clock.now(),
            self.refresh_ttl,
            self.issuer.clone(),
        );
        let expires_at = claims.expires_at();

        encode(&Header::new(ALGORITHM), &claims, &self.refresh_encoding)
            .map(|token| IssuedToken { token, expires_at })
            .map_err(|e| AppError::Internal(format!("Refresh token generation failed: {}", e)))
    }

    /// Fails with `TokenExpired` or `TokenInvalid`.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.decode_with(token, &self.access_decoding, true)
    }

    /// Fails with `TokenExpired` or `TokenInvalid`.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.decode_with(token, &self.refresh_decoding, true)
    }

    /// Checks signature and issuer only. Used at logout, where an expired
    /// but genuine refresh token still identifies the family to terminate.
    pub fn decode_refresh_ignoring_expiry(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.decode_with(token, &self.refresh_decoding, false)
    }

    /// Expiry is judged against the codec's clock, not the system time.
    fn decode_with<T: DeserializeOwned + Expiring>(
        &self,
        token: &str,
        key: &DecodingKey,
        check_expiry: bool,
    ) -> Result<T, AuthError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;
        validation.validate_exp = false;

        let claims = decode::<T>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                AuthError::TokenInvalid
            })?;

        if check_expiry && self.clock.now().timestamp() >= claims.exp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::{ManualClock, SystemClock};

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            access_secret: "test-access-secret-at-least-32-characters".to_string(),
            refresh_secret: "test-refresh-secret-at-least-32-characters".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    fn codec(config: &JwtSettings) -> TokenCodec {
        TokenCodec::new(config, Arc::new(SystemClock))
    }

    #[test]
    fn test_issue_and_verify_access() {
        let codec = codec(&get_test_config());
        let user_id = Uuid::new_v4();

        let issued = codec.issue_access(user_id, Role::Admin).expect("Failed to issue token");
        let claims = codec.verify_access(&issued.token).expect("Failed to verify token");

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.expires_at(), issued.expires_at);
    }

    #[test]
    fn test_issue_and_verify_refresh() {
        let codec = codec(&get_test_config());
        let user_id = Uuid::new_v4();
        let family_id = Uuid::new_v4();

        let issued = codec.issue_refresh(user_id, family_id).expect("Failed to issue token");
        let claims = codec.verify_refresh(&issued.token).expect("Failed to verify token");

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.family_id().unwrap(), family_id);
    }

    #[test]
    fn test_access_and_refresh_are_not_interchangeable() {
        let codec = codec(&get_test_config());
        let user_id = Uuid::new_v4();

        let access = codec.issue_access(user_id, Role::User).unwrap();
        let refresh = codec.issue_refresh(user_id, Uuid::new_v4()).unwrap();

        assert_eq!(codec.verify_refresh(&access.token).unwrap_err(), AuthError::TokenInvalid);
        assert_eq!(codec.verify_access(&refresh.token).unwrap_err(), AuthError::TokenInvalid);
    }

    #[test]
    fn test_tampered_token() {
        let codec = codec(&get_test_config());
        let issued = codec.issue_access(Uuid::new_v4(), Role::User).unwrap();

        let tampered = format!("{}X", issued.token);
        assert_eq!(codec.verify_access(&tampered).unwrap_err(), AuthError::TokenInvalid);
        assert_eq!(codec.verify_access("invalid.token.here").unwrap_err(), AuthError::TokenInvalid);
    }

    #[test]
    fn test_expired_token() {
        let mut config = get_test_config();
        config.access_token_expiry = -10;
        config.refresh_token_expiry = -10;
        let codec = codec(&config);

        let access = codec.issue_access(Uuid::new_v4(), Role::User).unwrap();
        let refresh = codec.issue_refresh(Uuid::new_v4(), Uuid::new_v4()).unwrap();

        assert_eq!(codec.verify_access(&access.token).unwrap_err(), AuthError::TokenExpired);
        assert_eq!(codec.verify_refresh(&refresh.token).unwrap_err(), AuthError::TokenExpired);
        assert!(codec.decode_refresh_ignoring_expiry(&refresh.token).is_ok());
    }

    #[test]
    fn test_expiry_follows_injected_clock() {
        let clock = Arc::new(ManualClock::new());
        let codec = TokenCodec::new(&get_test_config(), clock.clone());
        let access = codec.issue_access(Uuid::new_v4(), Role::User).unwrap();
        let refresh = codec.issue_refresh(Uuid::new_v4(), Uuid::new_v4()).unwrap();

        clock.advance(chrono::Duration::seconds(899));
        assert!(codec.verify_access(&access.token).is_ok());

        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(codec.verify_access(&access.token).unwrap_err(), AuthError::TokenExpired);
        assert!(codec.verify_refresh(&refresh.token).is_ok());

        clock.advance(chrono::Duration::days(7));
        assert_eq!(codec.verify_refresh(&refresh.token).unwrap_err(), AuthError::TokenExpired);
        assert!(codec.decode_refresh_ignoring_expiry(&refresh.token).is_ok());
    }

    #[test]
    fn test_wrong_issuer() {
        let config = get_test_config();
        let issued = codec(&config).issue_access(Uuid::new_v4(), Role::User).unwrap();

        let mut other = config.clone();
        other.issuer = "wrong-issuer".to_string();

        assert!(codec(&other).verify_access(&issued.token).is_err());
    }

    #[test]
    fn test_consecutive_refresh_tokens_differ() {
        let codec = codec(&get_test_config());
        let user_id = Uuid::new_v4();
        let family_id = Uuid::new_v4();

        let first = codec.issue_refresh(user_id, family_id).unwrap();
        let second = codec.issue_refresh(user_id, family_id).unwrap();

        assert_ne!(first.token, second.token);
    }
}
