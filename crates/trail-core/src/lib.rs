//! Trail Core - Configuration and shared identity types
//!
//! This crate defines what the API server and the operator CLI share:
//! - Configuration management
//! - Identity types exchanged with external identity providers
//! - Email normalisation used for uniqueness checks

pub mod config;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, Environment, LoggingConfig,
    ServerConfig, StorageBackend,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal user identifier
pub type UserId = Uuid;

/// A verified claim of identity from a third-party identity provider
///
/// Produced only after the provider's token has been checked; the
/// identity resolver trusts every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Stable subject id at the provider
    pub external_id: String,
    /// Verified email address
    pub email: String,
    /// Display name (may be empty)
    pub name: String,
}

impl ExternalIdentity {
    pub fn new(
        external_id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            email: email.into(),
            name: name.into(),
        }
    }
}

/// Canonical form of an email address used as the uniqueness key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
