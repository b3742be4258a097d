use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use secrecy::ExposeSecret;

// ============================================================================
// Account Access Claims
// ============================================================================

/// Access token claims. Tokens are minted by the product's auth service;
/// this service only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Operator tokens may act on any account
    #[serde(default)]
    pub admin: bool,
}

impl Claims {
    pub fn account_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::InvalidCredentials)
    }
}

pub fn issue(
    account_id: Uuid,
    admin: bool,
    secret: &secrecy::SecretString,
    ttl: Duration,
) -> AppResult<String> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let exp = now + ttl.whole_seconds();
    let claims = Claims {
        sub: account_id.to_string(),
        iat: now,
        exp,
        admin,
    };
    let header = Header::new(Algorithm::HS256);
    encode(
        &header,
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn verify(token: &str, secret: &secrecy::SecretString) -> AppResult<Claims> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::InvalidCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn issued_token_verifies() {
        let account_id = Uuid::new_v4();
        let token = issue(account_id, false, &secret("k1"), Duration::hours(1)).unwrap();

        let claims = verify(&token, &secret("k1")).unwrap();
        assert_eq!(claims.account_id().unwrap(), account_id);
        assert!(!claims.admin);
    }

    #[test]
    fn wrong_secret_is_invalid_credentials() {
        let token = issue(Uuid::new_v4(), true, &secret("k1"), Duration::hours(1)).unwrap();
        assert!(matches!(
            verify(&token, &secret("k2")),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue(Uuid::new_v4(), false, &secret("k1"), Duration::hours(-2)).unwrap();
        assert!(verify(&token, &secret("k1")).is_err());
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let claims = Claims {
            sub: "someone".into(),
            exp: 0,
            iat: 0,
            admin: false,
        };
        assert!(matches!(
            claims.account_id(),
            Err(AppError::InvalidCredentials)
        ));
    }
}
