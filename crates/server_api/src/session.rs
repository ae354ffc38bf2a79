use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
};

/// Session lifetime; matches the cookie max-age the server sets.
pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    iat: i64,
    exp: i64,
}

/// Stateless signed session tokens. No server-side revocation: a token is
/// valid until its expiry, logout only clears the client's cookie.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::days(SESSION_TTL_DAYS),
        }
    }

    pub fn issue(&self, user_id: UserId) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.0,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|err| {
            tracing::error!(error = %err, "failed to sign session token");
            ApiError::new(ErrorCode::Internal, "internal server error")
        })
    }

    pub fn verify(&self, token: &str) -> Result<UserId, ApiError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| UserId(data.claims.sub))
            .map_err(|_| ApiError::new(ErrorCode::Unauthorized, "invalid or expired session"))
    }
}
