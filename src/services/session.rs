//! Session tokens: HS256 JWTs carrying the user id

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id as string
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    Expired,
}

const ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 60;

/// Sign a one-hour access token for `user_id`. Used by the `issue_token`
/// binary; sign-in itself happens outside this service.
pub fn create_access_token(user_id: i64, secret: &[u8]) -> Result<String, SessionError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES)).timestamp(),
        iat: now.timestamp(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).map_err(|_| SessionError::InvalidToken)
}

/// Validate an access token and return the user_id
pub fn validate_access_token(token: &str, secret: &[u8]) -> Result<i64, SessionError> {
    // HS256 only; rejects algorithm confusion
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub", "iat"]);

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).map_err(|e| {
        tracing::debug!(error = ?e, "JWT decode error");
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::InvalidToken,
        }
    })?;

    token_data.claims.sub.parse::<i64>().map_err(|_| SessionError::InvalidToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let token = create_access_token(42, b"secret").unwrap();
        assert_eq!(validate_access_token(&token, b"secret"), Ok(42));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = create_access_token(42, b"secret").unwrap();
        assert_eq!(validate_access_token(&token, b"other"), Err(SessionError::InvalidToken));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let now = Utc::now();
        let claims = Claims {
            sub: "7".into(),
            exp: (now - Duration::hours(2)).timestamp(),
            iat: (now - Duration::hours(3)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert_eq!(validate_access_token(&token, b"secret"), Err(SessionError::Expired));
    }
}
