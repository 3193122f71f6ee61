/// Postgres-backed stores (see `migrations/`).
///
/// Rotation atomicity comes from a single conditional `UPDATE` keyed on
/// `family_id` and the expected current token; no row locks are held across
/// calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{FamilyStore, NewUser, UserRecord, UserStore};
use crate::auth::{PreviousToken, Role, TokenFamily};
use crate::error::AppError;

type UserRow = (Uuid, String, String, String, String, DateTime<Utc>);

type FamilyRow = (
    Uuid,
    Uuid,
    String,
    Option<String>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

fn user_from_row(row: UserRow) -> Result<UserRecord, AppError> {
    let (id, email, name, password_hash, role, created_at) = row;
    let role = role
        .parse::<Role>()
        .map_err(|e| AppError::Internal(format!("stored user {}: {}", id, e)))?;
    Ok(UserRecord {
        id,
        email,
        name,
        password_hash,
        role,
        created_at,
    })
}

fn family_from_row(row: FamilyRow) -> TokenFamily {
    let (family_id, user_id, current_token, previous_token, grace_expires_at, absolute_expires_at) =
        row;
    // the table CHECK keeps both columns set or both NULL
    let previous = match (previous_token, grace_expires_at) {
        (Some(token), Some(grace_expires_at)) => Some(PreviousToken {
            token,
            grace_expires_at,
        }),
        _ => None,
    };
    TokenFamily {
        family_id,
        user_id,
        current_token,
        previous,
        absolute_expires_at,
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let record = UserRecord {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            role: user.role,
            created_at: Utc::now(),
        };

        // a unique_violation on email maps to AppError::Conflict
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(&record.email)
        .bind(&record.name)
        .bind(&record.password_hash)
        .bind(record.role.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }
}

#[derive(Clone)]
pub struct PgFamilyStore {
    pool: PgPool,
}

impl PgFamilyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FamilyStore for PgFamilyStore {
    async fn create(&self, family: &TokenFamily) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO token_families
                (family_id, user_id, current_token, previous_token, grace_expires_at, absolute_expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, NULL, NULL, $4, $5, $5)
            "#,
        )
        .bind(family.family_id)
        .bind(family.user_id)
        .bind(&family.current_token)
        .bind(family.absolute_expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, family_id: Uuid) -> Result<Option<TokenFamily>, AppError> {
        let row = sqlx::query_as::<_, FamilyRow>(
            r#"
            SELECT family_id, user_id, current_token, previous_token, grace_expires_at, absolute_expires_at
            FROM token_families
            WHERE family_id = $1
            "#,
        )
        .bind(family_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(family_from_row))
    }

    async fn advance(
        &self,
        family_id: Uuid,
        expected_current: &str,
        next_token: &str,
        grace_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE token_families
            SET previous_token = current_token,
                current_token = $3,
                grace_expires_at = $4,
                updated_at = $5
            WHERE family_id = $1 AND current_token = $2
            "#,
        )
        .bind(family_id)
        .bind(expected_current)
        .bind(next_token)
        .bind(grace_expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, family_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM token_families WHERE family_id = $1")
            .bind(family_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM token_families WHERE absolute_expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
