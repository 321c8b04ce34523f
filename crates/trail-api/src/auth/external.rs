//! External identity verification
//!
//! Turns a third-party ID token into an [`ExternalIdentity`] assertion.
//! The Google implementation asks the provider's `tokeninfo` endpoint to
//! validate the token and then checks the returned claims locally.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use trail_core::ExternalIdentity;

/// Issuers Google uses for ID tokens
pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// External identity verification errors
#[derive(Debug, Error)]
pub enum VerifierError {
    /// Provider rejected the token or a claim check failed
    #[error("Identity token rejected: {0}")]
    Rejected(String),

    /// Provider could not be reached or answered garbage
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Verifies third-party ID tokens
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Validate `id_token` and return the identity it asserts
    async fn verify(&self, id_token: &str) -> Result<ExternalIdentity, VerifierError>;
}

/// Claims returned by Google's `tokeninfo` endpoint
///
/// Google encodes every value as a string, booleans included.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenInfo {
    pub aud: Option<String>,
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<String>,
    pub name: Option<String>,
}

impl TokenInfo {
    /// Check the claims against `client_id` and build the assertion
    pub fn into_identity(self, client_id: &str) -> Result<ExternalIdentity, VerifierError> {
        if self.aud.as_deref() != Some(client_id) {
            return Err(VerifierError::Rejected("audience mismatch".to_string()));
        }
        if !self
            .iss
            .as_deref()
            .is_some_and(|iss| GOOGLE_ISSUERS.contains(&iss))
        {
            return Err(VerifierError::Rejected("unexpected issuer".to_string()));
        }
        if self.email_verified.as_deref() != Some("true") {
            return Err(VerifierError::Rejected("email not verified".to_string()));
        }

        let sub = self
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VerifierError::Rejected("missing subject".to_string()))?;
        let email = self
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| VerifierError::Rejected("missing email".to_string()))?;

        Ok(ExternalIdentity::new(sub, email, self.name.unwrap_or_default()))
    }
}

/// Google Sign-In verifier backed by the `tokeninfo` endpoint
#[derive(Debug, Clone)]
pub struct GoogleIdentityVerifier {
    client: Client,
    client_id: String,
    tokeninfo_url: String,
}

impl GoogleIdentityVerifier {
    pub fn new(client_id: impl Into<String>, tokeninfo_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            client_id: client_id.into(),
            tokeninfo_url: tokeninfo_url.into(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdentityVerifier {
    async fn verify(&self, id_token: &str) -> Result<ExternalIdentity, VerifierError> {
        if id_token.trim().is_empty() {
            return Err(VerifierError::Rejected("empty token".to_string()));
        }

        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| VerifierError::Unavailable(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(VerifierError::Rejected(format!("provider answered {status}")));
        }
        if !status.is_success() {
            return Err(VerifierError::Unavailable(format!("provider answered {status}")));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| VerifierError::Unavailable(format!("Failed to parse response: {e}")))?;

        info.into_identity(&self.client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_ID: &str = "client-123.apps.googleusercontent.com";

    fn valid_info() -> TokenInfo {
        TokenInfo {
            aud: Some(CLIENT_ID.to_string()),
            iss: Some("https://accounts.google.com".to_string()),
            sub: Some("1098765".to_string()),
            email: Some("ann@example.com".to_string()),
            email_verified: Some("true".to_string()),
            name: Some("Ann Example".to_string()),
        }
    }

    #[test]
    fn test_valid_claims() {
        let identity = valid_info().into_identity(CLIENT_ID).unwrap();
        assert_eq!(identity.external_id, "1098765");
        assert_eq!(identity.email, "ann@example.com");
        assert_eq!(identity.name, "Ann Example");
    }

    #[test]
    fn test_bare_issuer_accepted() {
        let info = TokenInfo {
            iss: Some("accounts.google.com".to_string()),
            ..valid_info()
        };
        assert!(info.into_identity(CLIENT_ID).is_ok());
    }

    #[test]
    fn test_claim_checks() {
        let cases = [
            TokenInfo {
                aud: Some("someone-else".to_string()),
                ..valid_info()
            },
            TokenInfo {
                iss: Some("https://evil.example".to_string()),
                ..valid_info()
            },
            TokenInfo {
                email_verified: Some("false".to_string()),
                ..valid_info()
            },
            TokenInfo {
                sub: None,
                ..valid_info()
            },
            TokenInfo {
                email: Some(String::new()),
                ..valid_info()
            },
        ];

        for info in cases {
            assert!(matches!(
                info.into_identity(CLIENT_ID),
                Err(VerifierError::Rejected(_))
            ));
        }
    }

    #[test]
    fn test_missing_name_is_empty() {
        let info = TokenInfo {
            name: None,
            ..valid_info()
        };
        assert_eq!(info.into_identity(CLIENT_ID).unwrap().name, "");
    }

    #[test]
    fn test_tokeninfo_deserializes_string_booleans() {
        let info: TokenInfo = serde_json::from_str(
            r#"{"aud":"a","iss":"accounts.google.com","sub":"1","email":"x@y.z","email_verified":"true","exp":"1700000000"}"#,
        )
        .unwrap();
        assert_eq!(info.email_verified.as_deref(), Some("true"));
        assert!(info.name.is_none());
    }

    #[tokio::test]
    async fn test_empty_token_rejected_without_request() {
        let verifier = GoogleIdentityVerifier::new(CLIENT_ID, "http://127.0.0.1:9/tokeninfo");
        assert!(matches!(
            verifier.verify("  ").await,
            Err(VerifierError::Rejected(_))
        ));
    }
}
