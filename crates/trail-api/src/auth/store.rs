//! Refresh credential bookkeeping
//!
//! Tracks which refresh tokens are currently redeemable. Only a SHA-256
//! digest of each token is persisted, never the bearer value.

use super::models::RefreshTokenRecord;
use super::repository::{RefreshTokenRepository, RepositoryError};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use trail_core::UserId;

/// Hex SHA-256 digest of a raw refresh token
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Credential store over a [`RefreshTokenRepository`] backend
///
/// Takes raw bearer values and never hands them to the backend.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn RefreshTokenRepository>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn RefreshTokenRepository>) -> Self {
        Self { backend }
    }

    /// Persist `raw` as live for `ttl`
    pub async fn record(
        &self,
        user_id: UserId,
        raw: &str,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        let record = RefreshTokenRecord::new(user_id, hash_token(raw), Utc::now() + ttl);
        self.backend.insert(record).await
    }

    /// Redeem `raw` once
    ///
    /// Returns the owner and deletes the record if it is live; `None` if it
    /// never existed, was already consumed, or has expired.
    pub async fn consume(&self, raw: &str) -> Result<Option<UserId>, RepositoryError> {
        self.backend.take_live(&hash_token(raw), Utc::now()).await
    }

    /// Redeem `old_raw` (which must belong to `owner`) and record `new_raw`
    /// in a single atomic step
    ///
    /// Returns `false` and leaves storage untouched when `old_raw` is not
    /// redeemable.
    pub async fn replace(
        &self,
        old_raw: &str,
        owner: UserId,
        new_raw: &str,
        ttl: Duration,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let replacement = RefreshTokenRecord::new(owner, hash_token(new_raw), now + ttl);
        self.backend
            .replace_live(&hash_token(old_raw), owner, replacement, now)
            .await
    }

    /// Forget `raw`; a no-op when it is unknown
    pub async fn revoke(&self, raw: &str) -> Result<(), RepositoryError> {
        self.backend.delete_by_hash(&hash_token(raw)).await?;
        Ok(())
    }

    /// Forget every refresh token of `user_id`
    pub async fn revoke_all(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        self.backend.delete_for_user(user_id).await
    }

    /// Delete expired records
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        self.backend.delete_expired(Utc::now()).await
    }
}
