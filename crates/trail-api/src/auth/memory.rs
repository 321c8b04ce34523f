//! In-process storage backend
//!
//! Implements the repository traits over mutex-guarded maps. Used by the
//! test suites and by `STORAGE_BACKEND=memory` for local development.
//! Each operation runs inside one critical section, which gives the same
//! atomicity as the single-statement PostgreSQL queries.

use super::models::{NewUser, RefreshTokenRecord, User};
use super::repository::{RefreshTokenRepository, RepositoryError, UniqueField, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use trail_core::UserId;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Database("memory store lock poisoned".to_string()))
}

/// In-memory [`UserRepository`]
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<UserId, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    pub fn len(&self) -> usize {
        self.users.lock().map(|users| users.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(lock(&self.users)?.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(lock(&self.users)?
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(lock(&self.users)?
            .values()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut users = lock(&self.users)?;

        if users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::UniqueViolation(UniqueField::Email));
        }
        if let Some(external_id) = user.external_id.as_deref() {
            if users
                .values()
                .any(|u| u.external_id.as_deref() == Some(external_id))
            {
                return Err(RepositoryError::UniqueViolation(UniqueField::ExternalId));
            }
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            external_id: user.external_id,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        users.insert(created.id, created.clone());

        Ok(created)
    }

    async fn link_external_id(
        &self,
        id: UserId,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let mut users = lock(&self.users)?;

        if users
            .values()
            .any(|u| u.external_id.as_deref() == Some(external_id))
        {
            return Err(RepositoryError::UniqueViolation(UniqueField::ExternalId));
        }

        Ok(users
            .get_mut(&id)
            .filter(|u| u.external_id.is_none())
            .map(|u| {
                u.external_id = Some(external_id.to_string());
                u.updated_at = Utc::now();
                u.clone()
            }))
    }
}

/// In-memory [`RefreshTokenRepository`], keyed by token digest
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenRepository {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the stored records
    pub fn records(&self) -> Vec<RefreshTokenRecord> {
        self.records
            .lock()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshTokenRepository {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), RepositoryError> {
        let mut records = lock(&self.records)?;

        if records.contains_key(&record.token_hash) {
            return Err(RepositoryError::UniqueViolation(UniqueField::TokenHash));
        }
        records.insert(record.token_hash.clone(), record);

        Ok(())
    }

    async fn take_live(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, RepositoryError> {
        let mut records = lock(&self.records)?;

        match records.get(token_hash) {
            Some(record) if record.is_live(now) => {
                Ok(records.remove(token_hash).map(|r| r.user_id))
            }
            _ => Ok(None),
        }
    }

    async fn replace_live(
        &self,
        old_hash: &str,
        owner: UserId,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut records = lock(&self.records)?;

        let redeemable = records
            .get(old_hash)
            .is_some_and(|r| r.user_id == owner && r.is_live(now));
        if !redeemable {
            return Ok(false);
        }
        if records.contains_key(&replacement.token_hash) {
            return Err(RepositoryError::UniqueViolation(UniqueField::TokenHash));
        }

        records.remove(old_hash);
        records.insert(replacement.token_hash.clone(), replacement);

        Ok(true)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<bool, RepositoryError> {
        Ok(lock(&self.records)?.remove(token_hash).is_some())
    }

    async fn delete_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|_, r| r.user_id != user_id);
        Ok((before - records.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|_, r| r.is_live(now));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str, external_id: Option<&str>) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: "Test".to_string(),
            external_id: external_id.map(str::to_string),
            password_hash: None,
        }
    }

    #[tokio::test]
    async fn test_user_uniqueness() {
        let repo = MemoryUserRepository::new();
        repo.insert(new_user("a@x.com", Some("g-1"))).await.unwrap();

        let dup_email = repo.insert(new_user("a@x.com", None)).await;
        assert!(matches!(
            dup_email,
            Err(RepositoryError::UniqueViolation(UniqueField::Email))
        ));

        let dup_external = repo.insert(new_user("b@x.com", Some("g-1"))).await;
        assert!(matches!(
            dup_external,
            Err(RepositoryError::UniqueViolation(UniqueField::ExternalId))
        ));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_link_external_id_only_once() {
        let repo = MemoryUserRepository::new();
        let user = repo.insert(new_user("a@x.com", None)).await.unwrap();

        let linked = repo.link_external_id(user.id, "g-1").await.unwrap();
        assert_eq!(linked.unwrap().external_id.as_deref(), Some("g-1"));

        let relinked = repo.link_external_id(user.id, "g-2").await.unwrap();
        assert!(relinked.is_none());
    }

    #[tokio::test]
    async fn test_take_live_ignores_expired() {
        let repo = MemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let owner = Uuid::new_v4();

        repo.insert(RefreshTokenRecord::new(owner, "live".into(), now + Duration::days(1)))
            .await
            .unwrap();
        repo.insert(RefreshTokenRecord::new(owner, "dead".into(), now - Duration::seconds(1)))
            .await
            .unwrap();

        assert_eq!(repo.take_live("dead", now).await.unwrap(), None);
        assert_eq!(repo.take_live("live", now).await.unwrap(), Some(owner));
        assert_eq!(repo.take_live("live", now).await.unwrap(), None);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_live_checks_owner() {
        let repo = MemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let expires = now + Duration::days(1);

        repo.insert(RefreshTokenRecord::new(owner, "old".into(), expires))
            .await
            .unwrap();

        let stranger = Uuid::new_v4();
        let swapped = repo
            .replace_live(
                "old",
                stranger,
                RefreshTokenRecord::new(stranger, "new".into(), expires),
                now,
            )
            .await
            .unwrap();
        assert!(!swapped);

        let swapped = repo
            .replace_live(
                "old",
                owner,
                RefreshTokenRecord::new(owner, "new".into(), expires),
                now,
            )
            .await
            .unwrap();
        assert!(swapped);

        let hashes: Vec<String> = repo.records().into_iter().map(|r| r.token_hash).collect();
        assert_eq!(hashes, vec!["new".to_string()]);
    }
}
