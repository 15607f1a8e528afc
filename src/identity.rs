//! Credential verification for connection upgrades.
//!
//! The server extracts an opaque bearer credential from the upgrade request
//! (the `Authorization` header, or the `token` query parameter for browser
//! clients that cannot set headers on a WebSocket) and asks an
//! [`IdentityVerifier`] for the user it belongs to. A failed verification is
//! answered with HTTP 401 and never reaches the hub.

// Rust guideline compliant 2026-02

use std::collections::HashMap;

use crate::store::UserId;

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented.
    Missing,
    /// The credential is unknown or expired.
    Invalid,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "No authentication token provided"),
            Self::Invalid => write!(f, "Invalid authentication token"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Maps an opaque credential to a user identity.
pub trait IdentityVerifier: Send + Sync {
    /// Verify `credential` (already stripped of any `Bearer ` prefix).
    fn verify(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// Static token → user table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, UserId>,
}

impl TokenTable {
    /// Build a table from `(token, user)` pairs.
    pub fn new(tokens: impl IntoIterator<Item = (String, UserId)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the table has no tokens (every upgrade will be rejected).
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityVerifier for TokenTable {
    fn verify(&self, credential: &str) -> Result<UserId, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        self.tokens
            .get(credential)
            .copied()
            .ok_or(AuthError::Invalid)
    }
}

/// Pick the credential from an upgrade request.
///
/// The `Authorization` header wins over the `token` query parameter. A
/// leading `Bearer ` is removed. Blank values count as absent.
pub fn extract_credential<'a>(
    authorization: Option<&'a str>,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    authorization
        .and_then(clean_credential)
        .or_else(|| query_token.and_then(clean_credential))
}

fn clean_credential(raw: &str) -> Option<&str> {
    let value = raw.trim();
    let token = match value.strip_prefix("Bearer ") {
        Some(rest) => rest.trim(),
        None if value == "Bearer" => "",
        None => value,
    };
    (!token.is_empty()).then_some(token)
}
