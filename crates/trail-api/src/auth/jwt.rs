//! JWT token generation and validation
//!
//! Implements the two credential kinds with HMAC-SHA256 signing:
//! - Access tokens: short-lived, carry subject and email, never stored
//! - Refresh tokens: long-lived, carry subject and a unique token id,
//!   signed with a separate secret and mirrored by a stored digest
//!
//! The signer holds its keys from construction on and never reads the
//! process environment.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use trail_core::config::{MAX_ACCESS_TTL_SECS, MAX_REFRESH_TTL_DAYS};
use trail_core::{AuthConfig, UserId};
use uuid::Uuid;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Claims embedded in an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// User's email address
    pub email: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

/// Claims embedded in a refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// Unique token id, keeps two tokens minted in the same second distinct
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

/// Subject of a verified token
pub trait Subject {
    fn sub(&self) -> &str;

    /// Subject parsed as a user id
    fn user_id(&self) -> Result<UserId, JwtError> {
        Uuid::parse_str(self.sub()).map_err(|_| JwtError::InvalidToken)
    }
}

impl Subject for AccessClaims {
    fn sub(&self) -> &str {
        &self.sub
    }
}

impl Subject for RefreshClaims {
    fn sub(&self) -> &str {
        &self.sub
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Invalid signer configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// JWT Configuration
///
/// Contains settings for token generation and validation
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for access token signing
    pub access_secret: String,
    /// Secret key for refresh token signing
    pub refresh_secret: String,
    /// Access token lifetime in seconds (default: 900 = 15 minutes)
    pub access_expiration_secs: u64,
    /// Refresh token lifetime in seconds (default: 7 days)
    pub refresh_expiration_secs: u64,
    /// Token issuer identifier
    pub issuer: String,
    /// Accepted clock skew on `exp` in seconds (default: 0, strict)
    pub leeway_secs: u64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_expiration_secs", &self.access_expiration_secs)
            .field("refresh_expiration_secs", &self.refresh_expiration_secs)
            .field("issuer", &self.issuer)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for JwtConfig {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            access_secret: auth.access_secret.clone(),
            refresh_secret: auth.refresh_secret.clone(),
            access_expiration_secs: auth.access_ttl_secs,
            refresh_expiration_secs: u64::try_from(auth.refresh_ttl_days)
                .unwrap_or(0)
                .saturating_mul(SECS_PER_DAY),
            issuer: auth.issuer.clone(),
            leeway_secs: auth.leeway_secs,
        }
    }
}

/// Issues and verifies access and refresh tokens
#[derive(Clone)]
pub struct TokenSigner {
    config: JwtConfig,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Create a signer, rejecting empty or shared secrets and lifetimes
    /// outside `1..=MAX`
    pub fn new(config: JwtConfig) -> Result<Self, JwtError> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(JwtError::InvalidConfig("signing secrets must not be empty"));
        }
        if config.access_secret == config.refresh_secret {
            return Err(JwtError::InvalidConfig(
                "access and refresh secrets must differ",
            ));
        }
        if !(1..=MAX_ACCESS_TTL_SECS).contains(&config.access_expiration_secs) {
            return Err(JwtError::InvalidConfig("access token lifetime out of range"));
        }
        let max_refresh_secs = MAX_REFRESH_TTL_DAYS as u64 * SECS_PER_DAY;
        if !(1..=max_refresh_secs).contains(&config.refresh_expiration_secs) {
            return Err(JwtError::InvalidConfig("refresh token lifetime out of range"));
        }

        Ok(Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            config,
        })
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Access token lifetime in seconds
    pub fn access_expires_in(&self) -> u64 {
        self.config.access_expiration_secs
    }

    /// Sign an access token for `user_id` carrying `email`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use trail_api::auth::jwt::{JwtConfig, TokenSigner};
    /// use uuid::Uuid;
    ///
    /// let signer = TokenSigner::new(JwtConfig::default()).unwrap();
    /// let token = signer.issue_access(Uuid::new_v4(), "ann@example.com").unwrap();
    /// let claims = signer.verify_access(&token).unwrap();
    /// assert_eq!(claims.email, "ann@example.com");
    /// ```
    pub fn issue_access(&self, user_id: UserId, email: &str) -> Result<String, JwtError> {
        let now = unix_now()?;

        let claims = AccessClaims {
            iss: self.config.issuer.clone(),
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + self.config.access_expiration_secs,
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.access_encoding,
        )?)
    }

    /// Sign a refresh token for `user_id`
    pub fn issue_refresh(&self, user_id: UserId) -> Result<String, JwtError> {
        let now = unix_now()?;

        let claims = RefreshClaims {
            iss: self.config.issuer.clone(),
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.refresh_expiration_secs,
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.refresh_encoding,
        )?)
    }

    /// Validate an access token and extract claims
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, JwtError> {
        self.verify(token, &self.access_decoding)
    }

    /// Validate a refresh token and extract claims
    ///
    /// Fails with `InvalidSignature` on a signature mismatch (including a
    /// token signed with the access secret) and `ExpiredToken` past `exp`.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        self.verify(token, &self.refresh_decoding)
    }

    fn verify<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<T, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = self.config.leeway_secs;

        let token_data = decode::<T>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
            ErrorKind::InvalidSignature => JwtError::InvalidSignature,
            _ => JwtError::InvalidToken,
        })?;

        Ok(token_data.claims)
    }
}

fn unix_now() -> Result<u64, JwtError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
