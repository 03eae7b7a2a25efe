//! Session tokens
//!
//! Stateless HS256 JWTs minted after a successful challenge
//! verification. Validity is the MAC plus `exp`; there is no server-side
//! session table, so individual sessions cannot be revoked.
//!
//! Secrets can be rotated. A retired secret keeps validating tokens for
//! a grace window so a rotation does not log every agent out at once.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Shortest secret accepted for signing
pub const MIN_SECRET_LENGTH: usize = 32;
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session secret must be at least 32 characters")]
    WeakSecret,
    #[error("Session token invalid")]
    Invalid,
    #[error("Session token expired")]
    Expired,
    #[error("Failed to sign session token: {0}")]
    Signing(String),
}

/// Token payload. Deliberately minimal: no reputation or telos, which
/// would go stale over the token's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Agent address
    pub sub: String,
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub claims: Claims,
    pub expires_at: DateTime<Utc>,
}

struct RetiredSecret {
    secret: String,
    retired_at: DateTime<Utc>,
}

struct Secrets {
    current: String,
    retired: Vec<RetiredSecret>,
}

pub struct SessionIssuer {
    secrets: RwLock<Secrets>,
    ttl: Duration,
    rotation_grace: Duration,
}

fn check_secret(secret: &str) -> Result<(), SessionError> {
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(SessionError::WeakSecret);
    }
    Ok(())
}

impl SessionIssuer {
    pub fn new(secret: String, ttl: Duration, rotation_grace: Duration) -> Result<Self, SessionError> {
        check_secret(&secret)?;
        Ok(Self {
            secrets: RwLock::new(Secrets {
                current: secret,
                retired: Vec::new(),
            }),
            ttl,
            rotation_grace,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, address: &Address, name: &str) -> Result<Session, SessionError> {
        self.issue_at(address, name, Utc::now())
    }

    pub fn issue_at(
        &self,
        address: &Address,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: address.to_string(),
            name: name.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secrets.current.as_bytes()),
        )
        .map_err(|e| SessionError::Signing(e.to_string()))?;

        Ok(Session {
            token,
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
            claims,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Claims, SessionError> {
        self.validate_at(token, Utc::now())
    }

    /// Check the MAC against the current secret, then any retired secret
    /// still inside its grace window; then require `exp > now`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the caller's clock, without leeway
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = ["exp", "iat", "sub"]
            .into_iter()
            .map(String::from)
            .collect::<HashSet<_>>();

        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        let candidates = std::iter::once(secrets.current.as_str()).chain(
            secrets
                .retired
                .iter()
                .filter(|r| now < r.retired_at + self.rotation_grace)
                .map(|r| r.secret.as_str()),
        );

        let claims = candidates
            .filter_map(|secret| {
                decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
                    .ok()
            })
            .map(|data| data.claims)
            .next()
            .ok_or(SessionError::Invalid)?;

        if claims.exp <= now.timestamp() {
            return Err(SessionError::Expired);
        }

        Ok(claims)
    }

    /// Install a new signing secret. The previous one keeps validating
    /// for the grace window.
    pub fn rotate(&self, new_secret: String, now: DateTime<Utc>) -> Result<(), SessionError> {
        check_secret(&new_secret)?;
        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut secrets.current, new_secret);
        secrets.retired.push(RetiredSecret {
            secret: previous,
            retired_at: now,
        });
        let grace = self.rotation_grace;
        secrets.retired.retain(|r| now < r.retired_at + grace);
        tracing::info!("Session secret rotated ({} retired)", secrets.retired.len());
        Ok(())
    }

    /// Accept tokens signed with a secret from a previous deployment
    pub fn retire_secret(&self, secret: String, retired_at: DateTime<Utc>) -> Result<(), SessionError> {
        check_secret(&secret)?;
        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        secrets.retired.push(RetiredSecret { secret, retired_at });
        Ok(())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
