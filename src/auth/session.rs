//! Session identity resolution.
//!
//! A session is an opaque token stored in the `session` table. Clients carry it
//! in the `topics_session` cookie set at login, or as a bearer token.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use chrono::Duration;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::User;
use crate::AppState;

/// Name of the cookie holding the session token.
pub const SESSION_COOKIE: &str = "topics_session";

/// Per-request context handed to handlers: who is calling, and the store.
pub struct RequestContext {
    pub user: Option<User>,
    pub token: Option<String>,
    pub repo: Arc<Repository>,
}

impl RequestContext {
    /// The logged-in user, or `401 Unauthorized`.
    pub fn require_user(&self) -> Result<&User, AppError> {
        self.user
            .as_ref()
            .ok_or_else(|| AppError::Unauthorized("Login required".to_string()))
    }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers);

        let user = match token.as_deref() {
            Some(token) => {
                let user = state.repo.resolve_session(token).await?;
                if user.is_none() {
                    tracing::debug!("Ignoring unknown or expired session token");
                }
                user
            }
            None => None,
        };

        Ok(Self {
            user,
            token,
            repo: state.repo.clone(),
        })
    }
}

/// Extract the session token, preferring the cookie over a bearer header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    })
}

/// `Set-Cookie` value that stores `token` for `ttl`.
pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        ttl.num_seconds()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that makes the client drop its session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::zero(), secure)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_token_from_cookie() {
        let map = headers(&[(header::COOKIE, "theme=dark; topics_session=abc-123; lang=en")]);
        assert_eq!(session_token(&map).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_token_from_second_cookie_header() {
        let map = headers(&[
            (header::COOKIE, "theme=dark"),
            (header::COOKIE, "topics_session=xyz"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_token_from_bearer() {
        let map = headers(&[(header::AUTHORIZATION, "Bearer tok-1")]);
        assert_eq!(session_token(&map).as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_cookie_wins_over_bearer() {
        let map = headers(&[
            (header::AUTHORIZATION, "Bearer from-header"),
            (header::COOKIE, "topics_session=from-cookie"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_no_token() {
        assert!(session_token(&HeaderMap::new()).is_none());
        assert!(session_token(&headers(&[(header::COOKIE, "topics_session=")])).is_none());
        assert!(session_token(&headers(&[(header::AUTHORIZATION, "Basic abc")])).is_none());
        assert!(session_token(&headers(&[(header::COOKIE, "other_session=abc")])).is_none());
    }

    #[test]
    fn test_cookie_strings() {
        assert_eq!(
            session_cookie("abc", Duration::hours(1), false),
            "topics_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600"
        );
        assert!(session_cookie("abc", Duration::hours(1), true).ends_with("; Secure"));
        assert_eq!(
            clear_session_cookie(false),
            "topics_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
        );
    }
}
