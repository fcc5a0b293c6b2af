use crate::config::AccessMode;
use crate::error::AppError;
use crate::models::OwnerScope;
use crate::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use bcrypt::{hash, verify, BcryptError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Work factor used for PINs and file codes unless configured otherwise.
pub const DEFAULT_HASH_COST: u32 = 10;

pub const TOKEN_TTL_DAYS: i64 = 7;

/// One-way salted hashing shared by account PINs and file codes.
#[derive(Debug, Clone, Copy)]
pub struct Hasher {
    cost: u32,
}

impl Hasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, secret: &str) -> Result<String, BcryptError> {
        hash(secret, self.cost)
    }

    pub fn verify(&self, candidate: &str, stored_hash: &str) -> bool {
        verify(candidate, stored_hash).unwrap_or(false)
    }

    /// Runs `hash` on the blocking pool.
    pub async fn hash_blocking(&self, secret: &str) -> Result<String, AppError> {
        let hasher = *self;
        let secret = secret.to_owned();
        let hashed = tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AppError::dependency(e.to_string()))?;
        hashed.map_err(|e| AppError::dependency(e.to_string()))
    }

    /// Runs `verify` on the blocking pool.
    pub async fn verify_blocking(&self, candidate: &str, stored_hash: &str) -> Result<bool, AppError> {
        let hasher = *self;
        let candidate = candidate.to_owned();
        let stored_hash = stored_hash.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&candidate, &stored_hash))
            .await
            .map_err(|e| AppError::dependency(e.to_string()))
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_COST)
    }
}

/// Random signing secret for deployments that did not configure one.
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid or expired token")]
    Invalid,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies the HS256 bearer tokens handed out at signup and login.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::days(TOKEN_TTL_DAYS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issue(&self, account_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: account_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(TokenError::Sign)
    }

    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            TokenError::Invalid
        })?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| TokenError::Invalid)
    }
}

/// Owner scope of the current request.
///
/// Authenticated deployments require `Authorization: Bearer <token>` and scope
/// the request to the token's account. Anonymous deployments accept every
/// request and scope it to the ownerless records.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub OwnerScope);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        if state.mode == AccessMode::Anonymous {
            return Ok(Caller(OwnerScope::Global));
        }

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(' ').nth(1))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Auth("No token provided".into()))?;

        let account_id = state
            .tokens
            .verify(token)
            .map_err(|e| AppError::Auth(e.to_string()))?;

        Ok(Caller(OwnerScope::Account(account_id)))
    }
}
