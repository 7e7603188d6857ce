//! Bearer-token identity.
//!
//! Accounts are issued by an external identity provider; this service only
//! verifies an HS256 JWT and trusts its `sub` claim as the acting account.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{errors::ExchangeError, orders::AccountId, state::AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

/// Shared-secret verifier for bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        TokenVerifier {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AccountId, ExchangeError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| ExchangeError::Unauthorized(format!("invalid token: {}", e)))?;
        if data.claims.sub.is_empty() {
            return Err(ExchangeError::Unauthorized("token has no subject".into()));
        }
        Ok(AccountId(data.claims.sub))
    }
}

/// Mints a token for `account` valid for `ttl`. Used by the `token`
/// subcommand and by tests; production tokens come from the identity provider.
pub fn issue_token(
    secret: &str,
    account: &AccountId,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = SystemTime::now()
        .checked_add(ttl)
        .unwrap_or(SystemTime::now())
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let claims = Claims {
        sub: account.0.clone(),
        exp,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// The account making the request, taken from `Authorization: Bearer <jwt>`.
pub struct Authenticated(pub AccountId);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ExchangeError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ExchangeError::Unauthorized("missing bearer token".into()))?
            .to_str()
            .map_err(|_| ExchangeError::Unauthorized("invalid authorization header".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ExchangeError::Unauthorized("expected a bearer token".into()))?;
        state.verifier.verify(token.trim()).map(Authenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_its_account() {
        let token = issue_token("s3cret", &AccountId::new("42"), Duration::from_secs(60)).unwrap();
        let account = TokenVerifier::new("s3cret").verify(&token).unwrap();
        assert_eq!(account, AccountId::new("42"));
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = issue_token("one", &AccountId::new("42"), Duration::from_secs(60)).unwrap();
        let err = TokenVerifier::new("two").verify(&token).unwrap_err();
        assert!(matches!(err, ExchangeError::Unauthorized(_)));
    }

    #[test]
    fn garbage_is_unauthorized() {
        assert!(matches!(
            TokenVerifier::new("x").verify("not.a.jwt"),
            Err(ExchangeError::Unauthorized(_))
        ));
    }
}
