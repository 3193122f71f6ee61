/// Token family: one login session lineage
///
/// `previous` bundles the superseded token with its grace expiry, so the two
/// are always set together or absent together.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct PreviousToken {
    pub token: String,
    pub grace_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenFamily {
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub current_token: String,
    pub previous: Option<PreviousToken>,
    pub absolute_expires_at: DateTime<Utc>,
}

/// How a presented refresh token relates to the family's stored tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Presented {
    Current,
    Previous { grace_expires_at: DateTime<Utc> },
    Unknown,
}

impl TokenFamily {
    /// A family as created at login, before any rotation.
    pub fn new(
        family_id: Uuid,
        user_id: Uuid,
        current_token: String,
        absolute_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            family_id,
            user_id,
            current_token,
            previous: None,
            absolute_expires_at,
        }
    }

    /// Exact comparison on token values, never on decoded claims.
    pub fn classify(&self, presented: &str) -> Presented {
        if self.current_token == presented {
            return Presented::Current;
        }
        match &self.previous {
            Some(previous) if previous.token == presented => Presented::Previous {
                grace_expires_at: previous.grace_expires_at,
            },
            _ => Presented::Unknown,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.absolute_expires_at
    }

    /// The family after one rotation step.
    pub fn advanced(&self, next_token: &str, grace_expires_at: DateTime<Utc>) -> Self {
        Self {
            family_id: self.family_id,
            user_id: self.user_id,
            current_token: next_token.to_string(),
            previous: Some(PreviousToken {
                token: self.current_token.clone(),
                grace_expires_at,
            }),
            absolute_expires_at: self.absolute_expires_at,
        }
    }
}
