//! Database models for authentication
//!
//! - User: identity anchor reachable by external identity, password, or both
//! - RefreshTokenRecord: proof that a refresh token was issued and is still
//!   redeemable; holds a digest of the token, never the token itself
//!
//! These map to the `users` and `refresh_tokens` tables created by the
//! migrations in `crates/trail-api/migrations`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trail_core::UserId;
use utoipa::ToSchema;

/// User account model
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    /// Normalised email, unique
    pub email: String,
    pub name: String,
    /// Subject id at the external identity provider, unique when present
    pub external_id: Option<String>,
    /// Argon2id PHC string; absent for external-identity-only accounts
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the account can sign in with a password
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Public projection safe to return to clients
    pub fn to_public(&self) -> UserPublic {
        UserPublic::from(self)
    }
}

/// Public user fields
///
/// The only user shape that crosses the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserPublic {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

impl From<&User> for UserPublic {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
        }
    }
}

/// Fields for inserting a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub external_id: Option<String>,
    pub password_hash: Option<String>,
}

/// Refresh token record
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    /// Hex SHA-256 of the raw token
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(user_id: UserId, token_hash: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id,
            token_hash,
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Redeemable iff not yet expired at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_public_projection_has_no_secrets() {
        let user = User {
            id: uuid::Uuid::new_v4(),
            email: "ann@x.com".to_string(),
            name: "Ann".to_string(),
            external_id: Some("google-123".to_string()),
            password_hash: Some("$argon2id$...".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(user.to_public()).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(json["email"], "ann@x.com");
        assert!(!json.to_string().contains("argon2"));
        assert!(!json.to_string().contains("google-123"));
    }

    #[test]
    fn test_record_liveness() {
        let now = Utc::now();
        let record = RefreshTokenRecord::new(uuid::Uuid::new_v4(), "abc".into(), now);
        assert!(!record.is_live(now));
        assert!(record.is_live(now - Duration::seconds(1)));
    }
}
