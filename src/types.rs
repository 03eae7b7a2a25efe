//! Core types for the AGORA auth service
//!
//! Identity records, API request/response bodies and the response
//! envelope shared by every endpoint.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::witness::WitnessEntry;

/// Length of an address in hex characters
pub const ADDRESS_LENGTH: usize = 16;

/// Agent address: first 8 bytes of SHA-256(public key), lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub(crate) fn from_digest_prefix(prefix: &[u8]) -> Self {
        Self(hex::encode(prefix))
    }

    /// Parse a user-supplied address. Accepts 16 hex characters in any
    /// case and normalizes to lowercase.
    pub fn parse(s: &str) -> Result<Self, &'static str> {
        let s = s.trim();
        if s.len() != ADDRESS_LENGTH {
            return Err("Address must be 16 hex characters");
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("Address must be hex encoded");
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============ Identity Types ============

/// Account standing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Active,
    /// Barred from requesting challenges or authenticating
    Banned,
}

/// Stored identity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub address: Address,
    pub name: String,
    /// Raw Ed25519 public key
    #[serde(with = "hex::serde")]
    pub public_key: [u8; 32],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telos: Option<String>,
    pub reputation: f64,
    #[serde(default)]
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Public view of an agent, safe for unauthenticated reads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicProfile {
    pub address: Address,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telos: Option<String>,
    pub reputation: f64,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<&AgentIdentity> for PublicProfile {
    fn from(a: &AgentIdentity) -> Self {
        Self {
            address: a.address.clone(),
            name: a.name.clone(),
            telos: a.telos.clone(),
            reputation: a.reputation,
            created_at: a.created_at,
            last_seen: a.last_seen,
        }
    }
}

/// Full identity snapshot handed back on deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExport {
    pub address: Address,
    pub name: String,
    pub public_key_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telos: Option<String>,
    pub reputation: f64,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<&AgentIdentity> for AgentExport {
    fn from(a: &AgentIdentity) -> Self {
        Self {
            address: a.address.clone(),
            name: a.name.clone(),
            public_key_hex: hex::encode(a.public_key),
            telos: a.telos.clone(),
            reputation: a.reputation,
            status: a.status,
            created_at: a.created_at,
            last_seen: a.last_seen,
        }
    }
}

/// Data portability artifact produced by account deletion. Not stored
/// server-side; the caller must keep it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionExport {
    pub agent: AgentExport,
    pub witness_history: Vec<WitnessEntry>,
    pub exported_at: DateTime<Utc>,
}

// ============ API Request/Response Types ============

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub public_key_hex: String,
    #[serde(default)]
    pub telos: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub address: Address,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Hex-encoded nonce; sign the decoded bytes
    pub challenge: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub address: String,
    pub signature_hex: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub jwt_token: String,
    pub expires_at: DateTime<Utc>,
    pub agent: PublicProfile,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteAccountQuery {
    #[serde(default)]
    pub confirmed: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteAccountResponse {
    pub status: String,
    pub export_data: DeletionExport,
}

// ============ Response Types ============

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            hint: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            hint: None,
        }
    }

    pub fn error_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            hint: Some(hint.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub agents_count: usize,
    pub pending_challenges: usize,
    pub witness_entries: usize,
}
