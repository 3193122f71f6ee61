/// JWT Claims structures
///
/// Access and refresh tokens carry different payloads and are signed with
/// different secrets. Both carry a random `jti` so two tokens minted for the
/// same subject in the same second never collide.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AuthError;

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("{} is not a valid role", other)),
        }
    }
}

/// Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

impl AccessClaims {
    pub fn new(
        user_id: Uuid,
        role: Role,
        now: DateTime<Utc>,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let iat = now.timestamp();
        Self {
            sub: user_id.to_string(),
            role,
            iat,
            exp: iat + expiry_seconds,
            iss: issuer,
            jti: Uuid::new_v4().to_string(),
        }
    }

    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::TokenInvalid)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_utc(self.exp)
    }
}

/// Claims for refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub sub: String,
    /// Token family this refresh token belongs to
    pub fid: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

impl RefreshClaims {
    pub fn new(
        user_id: Uuid,
        family_id: Uuid,
        now: DateTime<Utc>,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let iat = now.timestamp();
        Self {
            sub: user_id.to_string(),
            fid: family_id.to_string(),
            iat,
            exp: iat + expiry_seconds,
            iss: issuer,
            jti: Uuid::new_v4().to_string(),
        }
    }

    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::InvalidRefreshToken)
    }

    pub fn family_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.fid).map_err(|_| AuthError::InvalidRefreshToken)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_utc(self.exp)
    }
}

/// Claims carrying an `exp` Unix timestamp
pub trait Expiring {
    fn exp(&self) -> i64;
}

impl Expiring for AccessClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl Expiring for RefreshClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

fn timestamp_to_utc(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}
