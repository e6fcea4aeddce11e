use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Who a request acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account_id: String,
    pub device_id: String,
}

/// Maps an opaque bearer token to an identity.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<Identity>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub token: String,
    pub account_id: String,
    pub device_id: String,
}

/// Fixed token table loaded from settings.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: Vec<Credential>,
}

impl StaticCredentials {
    pub fn new(entries: Vec<Credential>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .filter(|entry| !entry.token.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, token: &str) -> Option<Identity> {
        // Compare against every entry so timing doesn't reveal which matched.
        let mut found = None;
        for entry in &self.entries {
            if constant_time_eq(token.as_bytes(), entry.token.as_bytes()) && found.is_none() {
                found = Some(Identity {
                    account_id: entry.account_id.clone(),
                    device_id: entry.device_id.clone(),
                });
            }
        }
        found
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
