//! Authentication repositories
//!
//! Storage access for the two auth entities:
//! - Users (lookup by id / email / external id, conditional insert, linking)
//! - Refresh token records (insert, atomic take, atomic replace, deletes)
//!
//! Traits are implemented for PostgreSQL here and for an in-process store
//! in [`super::memory`]. Every operation that decides whether a refresh
//! token is redeemable is a single statement or a single transaction, so
//! concurrent requests presenting the same token serialise on the row.

use super::models::{NewUser, RefreshTokenRecord, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use trail_core::UserId;

const USER_COLUMNS: &str = "id, email, name, external_id, password_hash, created_at, updated_at";

/// Unique constraint that rejected a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    ExternalId,
    TokenHash,
    Other,
}

impl UniqueField {
    fn from_constraint(name: Option<&str>) -> Self {
        match name {
            Some("users_email_key") => Self::Email,
            Some("users_external_id_key") => Self::ExternalId,
            Some("refresh_tokens_token_hash_key") => Self::TokenHash,
            _ => Self::Other,
        }
    }
}

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Unique constraint violated: {0:?}")]
    UniqueViolation(UniqueField),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::UniqueViolation(UniqueField::from_constraint(db_err.constraint()));
            }
        }
        Self::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for RepositoryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("Migration failed: {err}"))
    }
}

/// User storage
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find user by ID
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Find user by normalised email
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// Find user by external identity subject
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<User>, RepositoryError>;

    /// Insert a user; `UniqueViolation` when email or external id is taken
    async fn insert(&self, user: NewUser) -> Result<User, RepositoryError>;

    /// Attach `external_id` to a user that has none yet
    ///
    /// Returns `None` when the user is gone or already linked.
    async fn link_external_id(
        &self,
        id: UserId,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError>;

    /// Cheap connectivity probe for readiness checks
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Refresh token record storage
///
/// All methods take token digests; hashing raw tokens is the caller's job.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Store a new record
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), RepositoryError>;

    /// Atomically delete the live record with `token_hash` and return its owner
    async fn take_live(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, RepositoryError>;

    /// Atomically delete the live record `old_hash` owned by `owner` and
    /// insert `replacement`
    ///
    /// Writes nothing and returns `false` when no such live record exists.
    async fn replace_live(
        &self,
        old_hash: &str,
        owner: UserId,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Delete the record with `token_hash`, live or not
    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool, RepositoryError>;

    /// Delete every record owned by `user_id`
    async fn delete_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    /// Delete records that expired at or before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Open a PostgreSQL pool
pub async fn connect_postgres(url: &str, max_connections: u32) -> Result<PgPool, RepositoryError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| RepositoryError::Database(format!("PostgreSQL connection failed: {e}")))
}

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// PostgreSQL implementation of [`UserRepository`]
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<User, RepositoryError> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, name, external_id, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(uuid::Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.external_id)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn link_external_id(
        &self,
        id: UserId,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let linked = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET external_id = $2, updated_at = NOW()
            WHERE id = $1 AND external_id IS NULL
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(linked)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// PostgreSQL implementation of [`RefreshTokenRepository`]
#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_REFRESH_TOKEN: &str = r#"
    INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
    VALUES ($1, $2, $3, $4, $5)
"#;

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), RepositoryError> {
        sqlx::query(INSERT_REFRESH_TOKEN)
            .bind(record.id)
            .bind(record.user_id)
            .bind(&record.token_hash)
            .bind(record.expires_at)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn take_live(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, RepositoryError> {
        let owner = sqlx::query_scalar::<_, UserId>(
            "DELETE FROM refresh_tokens WHERE token_hash = $1 AND expires_at > $2 RETURNING user_id",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner)
    }

    async fn replace_live(
        &self,
        old_hash: &str,
        owner: UserId,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // A concurrent transaction deleting the same row blocks here until
        // the first one commits, then sees zero rows
        let taken = sqlx::query_scalar::<_, UserId>(
            r#"
            DELETE FROM refresh_tokens
            WHERE token_hash = $1 AND user_id = $2 AND expires_at > $3
            RETURNING user_id
            "#,
        )
        .bind(old_hash)
        .bind(owner)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if taken.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(INSERT_REFRESH_TOKEN)
            .bind(replacement.id)
            .bind(replacement.user_id)
            .bind(&replacement.token_hash)
            .bind(replacement.expires_at)
            .bind(replacement.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_mapping() {
        assert_eq!(
            UniqueField::from_constraint(Some("users_email_key")),
            UniqueField::Email
        );
        assert_eq!(
            UniqueField::from_constraint(Some("users_external_id_key")),
            UniqueField::ExternalId
        );
        assert_eq!(UniqueField::from_constraint(None), UniqueField::Other);
    }

    #[test]
    fn test_non_unique_errors_are_database_errors() {
        let err = RepositoryError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, RepositoryError::Database(_)));
    }
}
