//! Session manager
//!
//! Orchestrates the signer, the credential store and the identity resolver
//! over the lifecycle of a refresh token:
//!
//! ```text
//! ISSUED --rotate/logout--> CONSUMED
//!    \------time passes---> EXPIRED
//! ```
//!
//! A consumed or expired token is never redeemable again. Rotation verifies
//! the signature first and only then touches storage; the swap of the old
//! record for the new one is a single atomic step, so of two requests
//! presenting the same token at most one gets a new pair.

use super::external::{IdentityVerifier, VerifierError};
use super::identity::{IdentityError, IdentityResolver};
use super::jwt::{JwtError, Subject, TokenSigner};
use super::models::{User, UserPublic};
use super::repository::RepositoryError;
use super::store::CredentialStore;
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use trail_core::{ExternalIdentity, UserId};

/// Session lifecycle errors as seen by the transport layer
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad signature, expired, reused or revoked refresh token
    #[error("Session expired, please sign in again")]
    Unauthorized,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    AccountExists,

    #[error("{0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for SessionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(msg) => SessionError::StorageUnavailable(msg),
            RepositoryError::UniqueViolation(field) => {
                SessionError::Internal(format!("unexpected unique violation on {field:?}"))
            }
        }
    }
}

impl From<IdentityError> for SessionError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidCredentials => SessionError::InvalidCredentials,
            IdentityError::AccountExists => SessionError::AccountExists,
            IdentityError::Validation(msg) => SessionError::Validation(msg),
            IdentityError::Storage(e) => e.into(),
            IdentityError::Password(e) => SessionError::Internal(e.to_string()),
            IdentityError::Internal(msg) => SessionError::Internal(msg),
        }
    }
}

impl From<VerifierError> for SessionError {
    fn from(err: VerifierError) -> Self {
        match err {
            VerifierError::Rejected(reason) => {
                tracing::debug!(%reason, "External identity token rejected");
                SessionError::Unauthorized
            }
            VerifierError::Unavailable(msg) => SessionError::ProviderUnavailable(msg),
        }
    }
}

/// Signing failures surface as `Internal`
fn signing_failed(err: JwtError) -> SessionError {
    SessionError::Internal(format!("token signing failed: {err}"))
}

/// Access and refresh token for one session
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of a successful sign-in
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserPublic,
}

/// Issues, rotates and revokes sessions
#[derive(Clone)]
pub struct SessionManager {
    signer: Arc<TokenSigner>,
    store: CredentialStore,
    identity: IdentityResolver,
    verifier: Option<Arc<dyn IdentityVerifier>>,
    refresh_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        signer: Arc<TokenSigner>,
        store: CredentialStore,
        identity: IdentityResolver,
        verifier: Option<Arc<dyn IdentityVerifier>>,
    ) -> Self {
        let refresh_ttl = Duration::seconds(signer.config().refresh_expiration_secs as i64);
        Self {
            signer,
            store,
            identity,
            verifier,
            refresh_ttl,
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Sign in with an already verified external identity
    pub async fn login_with_external(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<AuthSession, SessionError> {
        let user = self.identity.resolve_external_identity(identity).await?;
        self.start_session(&user).await
    }

    /// Sign in with a Google ID token
    ///
    /// Fails with `Unauthorized` when Google sign-in is not configured or the
    /// token does not verify.
    pub async fn login_with_google(&self, id_token: &str) -> Result<AuthSession, SessionError> {
        let Some(verifier) = &self.verifier else {
            tracing::warn!("Google sign-in requested but no client id is configured");
            return Err(SessionError::Unauthorized);
        };

        let identity = verifier.verify(id_token).await?;
        self.login_with_external(&identity).await
    }

    /// Sign in with email and password
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, SessionError> {
        let user = self.identity.resolve_by_password(email, password).await?;
        self.start_session(&user).await
    }

    /// Create a password account and sign it in
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, SessionError> {
        let user = self
            .identity
            .register_with_password(name, email, password)
            .await?;
        self.start_session(&user).await
    }

    async fn start_session(&self, user: &User) -> Result<AuthSession, SessionError> {
        let pair = self.sign_pair(user)?;
        self.store
            .record(user.id, &pair.refresh_token, self.refresh_ttl)
            .await?;

        Ok(AuthSession {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: user.to_public(),
        })
    }

    fn sign_pair(&self, user: &User) -> Result<TokenPair, SessionError> {
        Ok(TokenPair {
            user_id: user.id,
            access_token: self
                .signer
                .issue_access(user.id, &user.email)
                .map_err(signing_failed)?,
            refresh_token: self.signer.issue_refresh(user.id).map_err(signing_failed)?,
        })
    }

    /// Exchange a refresh token for a new pair
    ///
    /// The presented token is dead afterwards whether or not the new pair
    /// reaches the client. Every rejection is `Unauthorized`.
    pub async fn rotate(&self, raw_refresh: &str) -> Result<TokenPair, SessionError> {
        let user_id = match self
            .signer
            .verify_refresh(raw_refresh)
            .and_then(|claims| claims.user_id())
        {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(error = %e, "Refresh token failed verification");
                return Err(SessionError::Unauthorized);
            }
        };

        let Some(user) = self.identity.find_user(user_id).await? else {
            tracing::debug!(%user_id, "Refresh token for unknown user");
            return Err(SessionError::Unauthorized);
        };

        let pair = self.sign_pair(&user)?;
        let swapped = self
            .store
            .replace(raw_refresh, user.id, &pair.refresh_token, self.refresh_ttl)
            .await?;

        if !swapped {
            tracing::debug!(%user_id, "Refresh token not redeemable");
            return Err(SessionError::Unauthorized);
        }

        Ok(pair)
    }

    /// Revoke one refresh token; unknown tokens are ignored
    pub async fn logout(&self, raw_refresh: &str) -> Result<(), SessionError> {
        self.store.revoke(raw_refresh).await?;
        Ok(())
    }

    /// Revoke every refresh token of `user_id`, returning how many were live
    pub async fn logout_all(&self, user_id: UserId) -> Result<u64, SessionError> {
        Ok(self.store.revoke_all(user_id).await?)
    }

    /// Public profile of the signed-in user
    pub async fn current_user(&self, user_id: UserId) -> Result<UserPublic, SessionError> {
        self.identity
            .find_user(user_id)
            .await?
            .map(UserPublic::from)
            .ok_or(SessionError::Unauthorized)
    }

    /// Delete expired refresh records
    pub async fn purge_expired(&self) -> Result<u64, SessionError> {
        Ok(self.store.purge_expired().await?)
    }

    /// Storage connectivity probe
    pub async fn ping(&self) -> Result<(), SessionError> {
        Ok(self.identity.ping().await?)
    }
}
