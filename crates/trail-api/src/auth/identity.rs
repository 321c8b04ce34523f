//! Identity resolution
//!
//! Turns an authentication assertion (a verified external identity or an
//! email/password pair) into a canonical [`User`], creating the user on
//! first sign-in or registration. Uniqueness of email and external id is
//! enforced by the storage layer; conflicts are resolved by re-reading the
//! row that won.

use super::models::{NewUser, User};
use super::password::{
    hash_password, validate_password_policy, verify_password, PasswordConfig, PasswordError,
};
use super::repository::{RepositoryError, UserRepository};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use trail_core::{normalize_email, ExternalIdentity, UserId};
use validator::ValidateEmail;

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;
/// Hashed once and verified against when no real hash exists
const DUMMY_PASSWORD: &str = "trail-dummy-password-for-timing";

/// Identity resolution errors
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Unknown email, no password set, or wrong password
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    AccountExists,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] RepositoryError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Maps assertions to users
#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserRepository>,
    password_config: PasswordConfig,
    dummy_hash: Arc<OnceCell<String>>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserRepository>, password_config: PasswordConfig) -> Self {
        Self {
            users,
            password_config,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Find or create the user bound to an external identity
    ///
    /// Concurrent first sign-ins for one external id converge on a single
    /// user: the losing insert re-reads the winner's row. An existing
    /// password account with the same email and no external id gets the
    /// external id linked to it.
    pub async fn resolve_external_identity(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<User, IdentityError> {
        let external_id = identity.external_id.trim();
        if external_id.is_empty() {
            return Err(IdentityError::Validation(
                "External identity has no subject".to_string(),
            ));
        }
        let email = validate_email(&identity.email)?;

        if let Some(user) = self.users.find_by_external_id(external_id).await? {
            return Ok(user);
        }

        let name = display_name(&identity.name, &email);
        let new_user = NewUser {
            email: email.clone(),
            name,
            external_id: Some(external_id.to_string()),
            password_hash: None,
        };

        match self.users.insert(new_user).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "Created user from external identity");
                Ok(user)
            }
            Err(RepositoryError::UniqueViolation(field)) => {
                tracing::debug!(?field, "External sign-in lost insert race, re-reading");
                self.resolve_after_conflict(external_id, &email).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_after_conflict(
        &self,
        external_id: &str,
        email: &str,
    ) -> Result<User, IdentityError> {
        if let Some(user) = self.users.find_by_external_id(external_id).await? {
            return Ok(user);
        }

        let existing = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| IdentityError::Internal("conflicting user row vanished".to_string()))?;

        if existing.external_id.is_some() {
            // Email already bound to a different external identity
            return Err(IdentityError::AccountExists);
        }

        match self.users.link_external_id(existing.id, external_id).await {
            Ok(Some(user)) => {
                tracing::info!(user_id = %user.id, "Linked external identity to existing account");
                Ok(user)
            }
            // Someone linked first; the winner might be this same identity
            Ok(None) | Err(RepositoryError::UniqueViolation(_)) => self
                .users
                .find_by_external_id(external_id)
                .await?
                .ok_or(IdentityError::AccountExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate with email and password
    ///
    /// Unknown email, an account without a password, and a wrong password
    /// all yield `InvalidCredentials`.
    pub async fn resolve_by_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<User, IdentityError> {
        let email = normalize_email(email);

        // Unknown emails and external-only accounts still run one verification
        let user = self.users.find_by_email(&email).await?;
        let stored_hash = match user.as_ref().and_then(|u| u.password_hash.clone()) {
            Some(hash) => hash,
            None => {
                if let Some(user) = &user {
                    tracing::debug!(user_id = %user.id, "Password login for external-only account");
                }
                self.dummy_hash().await?.clone()
            }
        };

        let password = password.to_string();
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
            .await
            .map_err(|e| IdentityError::Internal(format!("password verification task failed: {e}")))??;

        match user {
            Some(user) if valid && user.password_hash.is_some() => Ok(user),
            _ => Err(IdentityError::InvalidCredentials),
        }
    }

    async fn dummy_hash(&self) -> Result<&String, IdentityError> {
        self.dummy_hash
            .get_or_try_init(|| async {
                let config = self.password_config.clone();
                tokio::task::spawn_blocking(move || hash_password(DUMMY_PASSWORD, &config))
                    .await
                    .map_err(|e| {
                        IdentityError::Internal(format!("password hashing task failed: {e}"))
                    })?
                    .map_err(IdentityError::from)
            })
            .await
    }

    /// Create a password account
    pub async fn register_with_password(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, IdentityError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(IdentityError::Validation(format!(
                "Name must be between 1 and {MAX_NAME_LEN} characters"
            )));
        }
        let email = validate_email(email)?;
        validate_password_policy(password).map_err(IdentityError::Validation)?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::AccountExists);
        }

        let password = password.to_string();
        let config = self.password_config.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .map_err(|e| IdentityError::Internal(format!("password hashing task failed: {e}")))??;

        let new_user = NewUser {
            email,
            name: name.to_string(),
            external_id: None,
            password_hash: Some(password_hash),
        };

        match self.users.insert(new_user).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "Registered password account");
                Ok(user)
            }
            Err(RepositoryError::UniqueViolation(_)) => Err(IdentityError::AccountExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by id
    pub async fn find_user(&self, id: UserId) -> Result<Option<User>, IdentityError> {
        Ok(self.users.find_by_id(id).await?)
    }

    /// Storage connectivity probe
    pub async fn ping(&self) -> Result<(), IdentityError> {
        Ok(self.users.ping().await?)
    }
}

fn validate_email(email: &str) -> Result<String, IdentityError> {
    let email = normalize_email(email);
    if email.len() > MAX_EMAIL_LEN || !email.validate_email() {
        return Err(IdentityError::Validation("Invalid email address".to_string()));
    }
    Ok(email)
}

/// Trimmed provider name, or the email's local part when the provider gave none
fn display_name(name: &str, email: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        email.split('@').next().unwrap_or(email).to_string()
    } else {
        name.chars().take(MAX_NAME_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryUserRepository;

    fn resolver() -> (IdentityResolver, Arc<MemoryUserRepository>) {
        let users = Arc::new(MemoryUserRepository::new());
        (
            IdentityResolver::new(users.clone(), PasswordConfig::fast_for_tests()),
            users,
        )
    }

    fn google(sub: &str, email: &str) -> ExternalIdentity {
        ExternalIdentity::new(sub, email, "Ann Example")
    }

    #[tokio::test]
    async fn test_external_identity_created_once() {
        let (resolver, users) = resolver();

        let first = resolver
            .resolve_external_identity(&google("g-1", "Ann@X.com"))
            .await
            .unwrap();
        let second = resolver
            .resolve_external_identity(&google("g-1", "ann@x.com"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.email, "ann@x.com");
        assert!(!first.has_password());
        assert_eq!(users.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_external_sign_ins_converge() {
        let (resolver, users) = resolver();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    resolver
                        .resolve_external_identity(&google("g-race", "race@x.com"))
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_external_identity_links_password_account() {
        let (resolver, _) = resolver();
        let registered = resolver
            .register_with_password("Ann", "ann@x.com", "password123")
            .await
            .unwrap();

        let linked = resolver
            .resolve_external_identity(&google("g-1", "ann@x.com"))
            .await
            .unwrap();

        assert_eq!(linked.id, registered.id);
        assert_eq!(linked.external_id.as_deref(), Some("g-1"));
        assert!(linked.has_password());
    }

    #[tokio::test]
    async fn test_email_bound_to_other_external_identity() {
        let (resolver, _) = resolver();
        resolver
            .resolve_external_identity(&google("g-1", "ann@x.com"))
            .await
            .unwrap();

        let result = resolver
            .resolve_external_identity(&google("g-2", "ann@x.com"))
            .await;
        assert!(matches!(result, Err(IdentityError::AccountExists)));
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (resolver, _) = resolver();
        let registered = resolver
            .register_with_password("Ann", "ann@x.com", "password123")
            .await
            .unwrap();

        let duplicate = resolver
            .register_with_password("Ann", "ANN@x.com", "password123")
            .await;
        assert!(matches!(duplicate, Err(IdentityError::AccountExists)));

        let user = resolver
            .resolve_by_password("ann@x.com", "password123")
            .await
            .unwrap();
        assert_eq!(user.id, registered.id);
    }

    #[tokio::test]
    async fn test_password_failures_are_indistinguishable() {
        let (resolver, _) = resolver();
        resolver
            .register_with_password("Ann", "ann@x.com", "password123")
            .await
            .unwrap();
        resolver
            .resolve_external_identity(&google("g-1", "bob@x.com"))
            .await
            .unwrap();

        let wrong_password = resolver.resolve_by_password("ann@x.com", "password124").await;
        let unknown_email = resolver.resolve_by_password("nobody@x.com", "password123").await;
        let no_password = resolver.resolve_by_password("bob@x.com", "password123").await;

        for result in [wrong_password, unknown_email, no_password] {
            let err = result.unwrap_err();
            assert!(matches!(err, IdentityError::InvalidCredentials));
            assert_eq!(err.to_string(), "Invalid email or password");
        }
    }

    #[tokio::test]
    async fn test_unknown_email_still_verifies_a_hash() {
        let (resolver, _) = resolver();
        assert!(!resolver.dummy_hash.initialized());

        let result = resolver.resolve_by_password("nobody@x.com", DUMMY_PASSWORD).await;
        assert!(matches!(result, Err(IdentityError::InvalidCredentials)));
        assert!(resolver.dummy_hash.initialized());

        // The dummy hash never authenticates an external-only account
        resolver
            .resolve_external_identity(&google("g-1", "bob@x.com"))
            .await
            .unwrap();
        let result = resolver.resolve_by_password("bob@x.com", DUMMY_PASSWORD).await;
        assert!(matches!(result, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (resolver, users) = resolver();

        assert!(matches!(
            resolver.register_with_password("", "ann@x.com", "password123").await,
            Err(IdentityError::Validation(_))
        ));
        assert!(matches!(
            resolver.register_with_password("Ann", "not-an-email", "password123").await,
            Err(IdentityError::Validation(_))
        ));
        assert!(matches!(
            resolver.register_with_password("Ann", "ann@x.com", "short").await,
            Err(IdentityError::Validation(_))
        ));
        assert!(users.is_empty());
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(display_name("  ", "ann@x.com"), "ann");
        assert_eq!(display_name(" Ann ", "ann@x.com"), "Ann");
    }
}
