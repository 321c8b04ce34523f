//! Authentication API handlers
//!
//! Sign-in endpoints return the access token in the JSON body and the
//! refresh token in the path-scoped cookie; the session endpoints read the
//! refresh token back from that cookie only.

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent, LoginMethod};
use crate::auth::{read_refresh_cookie, AuthSession, AuthenticatedUser, SessionError, UserPublic};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"))]
    pub password: String,
}

/// Email and password login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Google sign-in request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GoogleLoginRequest {
    #[validate(length(min = 1, message = "ID token is required"))]
    pub id_token: String,
}

/// Sign-in response; the refresh token is in the cookie
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub user: UserPublic,
}

/// Refresh response; the rotated refresh token is in the cookie
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Logout response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Logout-everywhere response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutAllResponse {
    /// Number of refresh tokens revoked
    pub revoked: u64,
}

/// Body plus refresh cookie for a new session
fn session_response(
    state: &AppState,
    status: StatusCode,
    session: AuthSession,
) -> Result<Response, AppError> {
    let cookie = state.cookie.set(&session.refresh_token)?;
    let body = AuthResponse {
        access_token: session.access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.sessions.signer().access_expires_in(),
        user: session.user,
    };

    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Register a new password account
///
/// Creates the account and signs it in immediately.
///
/// # Responses
///
/// * `201 Created` - Account created, session started
/// * `400 Bad Request` - Invalid name, email or password
/// * `409 Conflict` - Email already registered
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
        (status = 503, description = "Storage unavailable", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, AppError> {
    request.validate()?;

    match state
        .sessions
        .register(&request.name, &request.email, &request.password)
        .await
    {
        Ok(session) => {
            audit_log(&AuditEvent::RegistrationSuccess {
                user_id: session.user.id,
                email: session.user.email.clone(),
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });
            session_response(&state, StatusCode::CREATED, session)
        }
        Err(e) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email: request.email,
                reason: e.to_string(),
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });
            Err(e.into())
        }
    }
}

/// Login with email and password
///
/// Unknown email, an account without a password and a wrong password all
/// produce the same 401 response.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 503, description = "Storage unavailable", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AppError> {
    request.validate()?;

    let result = state
        .sessions
        .login_with_password(&request.email, &request.password)
        .await;
    finish_login(&state, &headers, LoginMethod::Password, Some(request.email), result)
}

/// Sign in with a Google ID token
#[utoipa::path(
    post,
    path = "/api/v1/auth/google",
    tag = "auth",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Token rejected or Google sign-in disabled", body = crate::error::ApiError),
        (status = 409, description = "Email bound to another Google account", body = crate::error::ApiError),
        (status = 503, description = "Identity provider or storage unavailable", body = crate::error::ApiError),
    )
)]
pub async fn google_login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GoogleLoginRequest>,
) -> Result<Response, AppError> {
    request.validate()?;

    let result = state.sessions.login_with_google(&request.id_token).await;
    finish_login(&state, &headers, LoginMethod::Google, None, result)
}

fn finish_login(
    state: &AppState,
    headers: &HeaderMap,
    method: LoginMethod,
    email: Option<String>,
    result: Result<AuthSession, SessionError>,
) -> Result<Response, AppError> {
    match result {
        Ok(session) => {
            audit_log(&AuditEvent::LoginSuccess {
                user_id: session.user.id,
                email: session.user.email.clone(),
                method,
                ip_address: extract_ip_address(headers),
                user_agent: extract_user_agent(headers),
            });
            session_response(state, StatusCode::OK, session)
        }
        Err(e) => {
            audit_log(&AuditEvent::LoginFailure {
                email,
                method,
                reason: e.to_string(),
                ip_address: extract_ip_address(headers),
                user_agent: extract_user_agent(headers),
            });
            Err(e.into())
        }
    }
}

/// Rotate the refresh token from the session cookie
///
/// The presented token is spent; a new one comes back in the cookie. Any
/// failure clears the cookie and answers with the same generic 401.
#[utoipa::path(
    post,
    path = "/api/v1/auth/session/refresh",
    tag = "auth",
    responses(
        (status = 200, description = "Session refreshed", body = RefreshResponse),
        (status = 401, description = "Session expired", body = crate::error::ApiError),
        (status = 503, description = "Storage unavailable", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let result = match read_refresh_cookie(&headers) {
        Some(raw) => state.sessions.rotate(&raw).await,
        None => Err(SessionError::Unauthorized),
    };

    match result {
        Ok(pair) => {
            audit_log(&AuditEvent::TokenRefresh {
                user_id: pair.user_id,
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });

            let cookie = state.cookie.set(&pair.refresh_token)?;
            let body = RefreshResponse {
                access_token: pair.access_token,
                token_type: "Bearer".to_string(),
                expires_in: state.sessions.signer().access_expires_in(),
            };
            Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
        }
        Err(SessionError::Unauthorized) => {
            audit_log(&AuditEvent::TokenRefreshRejected {
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });
            let cleared = state.cookie.clear()?;
            Ok(([(header::SET_COOKIE, cleared)], AppError::SessionExpired).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// Revoke the refresh token from the session cookie
///
/// Always succeeds when storage is reachable, cookie or not.
#[utoipa::path(
    post,
    path = "/api/v1/auth/session/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 503, description = "Storage unavailable", body = crate::error::ApiError),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let raw = read_refresh_cookie(&headers);
    if let Some(raw) = &raw {
        state.sessions.logout(raw).await?;
    }

    audit_log(&AuditEvent::Logout {
        had_token: raw.is_some(),
        ip_address: extract_ip_address(&headers),
    });

    let cleared = state.cookie.clear()?;
    Ok((
        [(header::SET_COOKIE, cleared)],
        Json(LogoutResponse { success: true }),
    )
        .into_response())
}

/// Revoke every session of the signed-in user
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    tag = "auth",
    responses(
        (status = 200, description = "All sessions revoked", body = LogoutAllResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 503, description = "Storage unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let revoked = state.sessions.logout_all(user.user_id).await?;

    audit_log(&AuditEvent::LogoutAll {
        user_id: user.user_id,
        email: user.email,
        revoked,
        ip_address: extract_ip_address(&headers),
    });

    let cleared = state.cookie.clear()?;
    Ok((
        [(header::SET_COOKIE, cleared)],
        Json(LogoutAllResponse { revoked }),
    )
        .into_response())
}

/// Get the signed-in user's public profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user profile", body = UserPublic),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.sessions.current_user(user.user_id).await?;
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_is_camel_case() {
        let response = AuthResponse {
            access_token: "a.b.c".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 900,
            user: UserPublic {
                id: uuid::Uuid::nil(),
                email: "ann@x.com".to_string(),
                name: "Ann".to_string(),
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accessToken"], "a.b.c");
        assert_eq!(json["expiresIn"], 900);
        assert_eq!(json["user"]["email"], "ann@x.com");
        assert!(json.get("refreshToken").is_none());
    }

    #[test]
    fn test_register_request_validation() {
        let valid = RegisterRequest {
            name: "Ann".to_string(),
            email: "ann@x.com".to_string(),
            password: "password123".to_string(),
        };
        assert!(valid.validate().is_ok());

        let short = RegisterRequest {
            password: "short".to_string(),
            ..valid.clone()
        };
        assert!(short.validate().is_err());

        let bad_email = RegisterRequest {
            email: "nope".to_string(),
            ..valid
        };
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_google_request_field_name() {
        let request: GoogleLoginRequest = serde_json::from_str(r#"{"idToken":"xyz"}"#).unwrap();
        assert_eq!(request.id_token, "xyz");
    }
}
