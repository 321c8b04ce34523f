//! Security audit logging for session events
//!
//! Every sign-in, registration, refresh and logout outcome is logged at
//! INFO level with the "audit" target, so the events can be filtered and
//! routed apart from application logs. Raw tokens and passwords never
//! appear in an event.
//!
//! # Example
//!
//! ```ignore
//! use trail_api::audit::{audit_log, AuditEvent, LoginMethod};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     email: user.email.clone(),
//!     method: LoginMethod::Password,
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: None,
//! });
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// How a user proved their identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    Password,
    Google,
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful sign-in
    LoginSuccess {
        user_id: Uuid,
        email: String,
        method: LoginMethod,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed sign-in; `email` is absent for third-party tokens
    LoginFailure {
        email: Option<String>,
        method: LoginMethod,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Successful registration
    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed registration attempt
    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token rotated
    TokenRefresh {
        user_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token rejected (bad signature, expired, reused or revoked)
    TokenRefreshRejected {
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Single-session logout
    Logout {
        had_token: bool,
        ip_address: Option<String>,
    },

    /// Every session of a user revoked
    LogoutAll {
        user_id: Uuid,
        email: String,
        revoked: u64,
        ip_address: Option<String>,
    },

    /// Invalid or expired access token presented
    InvalidToken {
        ip_address: Option<String>,
        user_agent: Option<String>,
        reason: String,
    },
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::LoginSuccess {
            user_id,
            email,
            method,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                method = ?method,
                ip_address = ?ip_address,
                "Login successful"
            );
        }
        AuditEvent::LoginFailure {
            email,
            method,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = ?email,
                method = ?method,
                reason = %reason,
                ip_address = ?ip_address,
                "Login failed"
            );
        }
        AuditEvent::RegistrationSuccess {
            user_id,
            email,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                ip_address = ?ip_address,
                "Registration successful"
            );
        }
        AuditEvent::RegistrationFailure {
            email,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                reason = %reason,
                ip_address = ?ip_address,
                "Registration failed"
            );
        }
        AuditEvent::TokenRefresh {
            user_id,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                ip_address = ?ip_address,
                "Session refreshed"
            );
        }
        AuditEvent::TokenRefreshRejected { ip_address, .. } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                ip_address = ?ip_address,
                "Session refresh rejected"
            );
        }
        AuditEvent::Logout {
            had_token,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                had_token = %had_token,
                ip_address = ?ip_address,
                "Logout"
            );
        }
        AuditEvent::LogoutAll {
            user_id,
            email,
            revoked,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                revoked = %revoked,
                ip_address = ?ip_address,
                "All sessions revoked"
            );
        }
        AuditEvent::InvalidToken {
            ip_address, reason, ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                reason = %reason,
                ip_address = ?ip_address,
                "Invalid access token"
            );
        }
    }
}

/// Extract client IP address from request headers
///
/// Checks X-Forwarded-For first (first hop), then X-Real-IP.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            method: LoginMethod::Google,
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"login_success\""));
        assert!(json.contains("\"method\":\"google\""));
        assert!(json.contains("test@example.com"));
    }

    #[test]
    fn test_refresh_rejection_carries_no_reason() {
        let event = AuditEvent::TokenRefreshRejected {
            ip_address: None,
            user_agent: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event_type":"token_refresh_rejected","ip_address":null,"user_agent":null}"#
        );
    }

    #[test]
    fn test_audit_log_every_variant() {
        let user_id = Uuid::new_v4();
        let events = [
            AuditEvent::LoginFailure {
                email: None,
                method: LoginMethod::Google,
                reason: "rejected".to_string(),
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::RegistrationFailure {
                email: "a@x.com".to_string(),
                reason: "exists".to_string(),
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::TokenRefresh {
                user_id,
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::Logout {
                had_token: false,
                ip_address: None,
            },
            AuditEvent::LogoutAll {
                user_id,
                email: "a@x.com".to_string(),
                revoked: 3,
                ip_address: None,
            },
        ];

        for event in &events {
            audit_log(event);
        }
    }

    #[test]
    fn test_extract_ip_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_ip_address(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_ip_address(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(extract_ip_address(&headers).as_deref(), Some("203.0.113.7"));
    }
}
