/// Authentication utilities for secure API key validation
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// A wrapper around String that uses constant-time equality comparison
/// to prevent timing attacks on API key validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConstantTimeString(String);

impl From<String> for ConstantTimeString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// This is the point: use the subtle crate for comparisons
impl PartialEq for ConstantTimeString {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for ConstantTimeString {}

/// The single API key clients must present as `Authorization: Bearer`.
#[derive(Clone, Debug)]
pub struct ApiKey(ConstantTimeString);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(ConstantTimeString::from(key.into()))
    }

    /// Check a presented bearer token against the configured key.
    pub fn verify(&self, token: &str) -> bool {
        self.0 == ConstantTimeString::from(token.to_string())
    }
}

/// Extract the bearer token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}
