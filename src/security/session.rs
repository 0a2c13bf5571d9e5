//! Signed session cookies
//!
//! A session is an HS256 JWT carrying the user id, stored in an `HttpOnly`
//! cookie. Logging out only clears the cookie.

use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "mm_session";

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// Keys and lifetime for issuing and checking sessions
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// Create session keys from a shared secret
    #[must_use]
    pub fn new(secret: &SecretString, ttl_hours: i64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    /// Issue a session token for a user
    ///
    /// # Errors
    ///
    /// Returns error if the token cannot be signed
    pub fn issue(&self, user_id: i64) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Auth(format!("failed to sign session: {e}")))
    }

    /// Check a token and return the user id it carries
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<i64> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<SessionClaims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims.sub.parse().ok(),
            Err(e) => {
                tracing::debug!(error = %e, "rejected session token");
                None
            }
        }
    }

    /// `Set-Cookie` value that stores a session token
    #[must_use]
    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.ttl.num_seconds()
        )
    }

    /// `Set-Cookie` value that removes the session
    #[must_use]
    pub fn clear_cookie() -> String {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

/// Extract the session token from `Cookie` headers
#[must_use]
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn keys() -> SessionKeys {
        SessionKeys::new(&SecretString::from("test-secret".to_string()), 1)
    }

    #[test]
    fn test_issue_and_verify() {
        let keys = keys();
        let token = keys.issue(42).unwrap();
        assert_eq!(keys.verify(&token), Some(42));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = keys().issue(7).unwrap();
        let other = SessionKeys::new(&SecretString::from("other".to_string()), 1);
        assert_eq!(other.verify(&token), None);
        assert_eq!(keys().verify("garbage"), None);
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token_from_headers(&headers), None);

        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; mm_session=abc.def.ghi; lang=zh"),
        );
        assert_eq!(
            session_token_from_headers(&headers).as_deref(),
            Some("abc.def.ghi")
        );
    }

    #[test]
    fn test_cleared_cookie_has_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("mm_session="),
        );
        assert_eq!(session_token_from_headers(&headers), None);
        assert!(SessionKeys::clear_cookie().contains("Max-Age=0"));
    }
}
