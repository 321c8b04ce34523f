//! Refresh token cookie
//!
//! The refresh token travels only in an HttpOnly cookie scoped to the
//! session routes (`/api/v1/auth/session/*`), so the browser sends it to
//! refresh and logout and nowhere else.

use axum::http::{header, HeaderMap, HeaderValue};

/// Cookie name carrying the raw refresh token
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Path the cookie is scoped to
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth/session";

/// Builds `Set-Cookie` values for the refresh token
#[derive(Debug, Clone, Copy)]
pub struct RefreshCookie {
    secure: bool,
    max_age_secs: u64,
}

impl RefreshCookie {
    pub fn new(secure: bool, max_age_secs: u64) -> Self {
        Self {
            secure,
            max_age_secs,
        }
    }

    /// `Set-Cookie` value delivering `token`
    pub fn set(&self, token: &str) -> Result<HeaderValue, header::InvalidHeaderValue> {
        HeaderValue::from_str(&self.render(token, self.max_age_secs))
    }

    /// `Set-Cookie` value that makes the browser drop the cookie
    pub fn clear(&self) -> Result<HeaderValue, header::InvalidHeaderValue> {
        HeaderValue::from_str(&self.render("", 0))
    }

    fn render(&self, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{REFRESH_COOKIE}={value}; HttpOnly; SameSite=Lax; Path={REFRESH_COOKIE_PATH}; Max-Age={max_age}"
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Raw refresh token from the request's `Cookie` headers, if any
pub fn read_refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_cookie_attributes() {
        let cookie = RefreshCookie::new(false, 604_800).set("abc.def.ghi").unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "refresh_token=abc.def.ghi; HttpOnly; SameSite=Lax; Path=/api/v1/auth/session; Max-Age=604800"
        );
    }

    #[test]
    fn test_secure_flag() {
        let cookie = RefreshCookie::new(true, 604_800).set("t").unwrap();
        assert!(cookie.to_str().unwrap().ends_with("; Secure"));
    }

    #[test]
    fn test_clear_cookie() {
        let cookie = RefreshCookie::new(true, 604_800).clear().unwrap();
        let value = cookie.to_str().unwrap();
        assert!(value.starts_with("refresh_token=;"));
        assert!(value.contains("Max-Age=0"));
        assert!(value.contains("Path=/api/v1/auth/session"));
    }

    #[test]
    fn test_read_refresh_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; refresh_token=abc.def; lang=en"),
        );
        assert_eq!(read_refresh_cookie(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_read_refresh_cookie_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(header::COOKIE, HeaderValue::from_static("refresh_token=xyz"));
        assert_eq!(read_refresh_cookie(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_missing_or_empty_cookie() {
        let mut headers = HeaderMap::new();
        assert!(read_refresh_cookie(&headers).is_none());

        headers.insert(header::COOKIE, HeaderValue::from_static("refresh_token="));
        assert!(read_refresh_cookie(&headers).is_none());
    }
}
