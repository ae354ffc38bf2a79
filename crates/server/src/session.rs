use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, StatusCode},
    Json,
};

use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
};

use crate::AppState;

pub const SESSION_COOKIE: &str = "jwt";
const SESSION_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// `Set-Cookie` value carrying the session token: HTTP-only, strict
/// same-site, 7 days, `Secure` only in production deployments.
pub fn session_cookie(token: &str, secure: bool) -> HeaderValue {
    build_cookie(token, SESSION_MAX_AGE_SECS, secure)
}

/// Logout: same attributes, empty value, immediate expiry.
pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    build_cookie("", 0, secure)
}

fn build_cookie(value: &str, max_age: i64, secure: bool) -> HeaderValue {
    let mut cookie = format!(
        "{SESSION_COOKIE}={value}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    // JWTs are base64url text; this only fires on a hand-crafted bad value.
    HeaderValue::from_str(&cookie)
        .unwrap_or_else(|_| HeaderValue::from_static("jwt=; HttpOnly; Path=/; Max-Age=0"))
}

fn session_token(parts: &Parts) -> Option<String> {
    let raw = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

/// Rejects with 401 unless the request carries a valid session cookie.
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new(ErrorCode::Unauthorized, "missing session cookie")),
            ));
        };
        let user_id = state
            .api
            .sessions
            .verify(&token)
            .map_err(|err| (StatusCode::UNAUTHORIZED, Json(err)))?;
        Ok(AuthUser(user_id))
    }
}
