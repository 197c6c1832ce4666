//! Credential handling.
//!
//! The core never stores or logs a cleartext key. Keys arrive through a
//! [`KeyResolver`] as a [`Secret`], whose `Debug` and `Display` output is
//! always masked.

use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const VISIBLE_CHARS: usize = 8;

/// A decrypted credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The cleartext value. Only provider constructors should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masked form suitable for logs: first and last four characters kept.
    pub fn masked(&self) -> String {
        mask_key(&self.0, VISIBLE_CHARS)
    }

    /// Replace every occurrence of the secret in `text` with its masked form.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, &self.masked())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&self.masked()).finish()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Mask a key, keeping up to `visible` characters split between both ends.
///
/// At most a quarter of the key is ever shown; short keys are masked
/// completely.
pub fn mask_key(key: &str, visible: usize) -> String {
    let chars: Vec<char> = key.chars().collect();
    let visible = visible.min(chars.len() / 4);
    if visible < 2 {
        return "*".repeat(chars.len());
    }

    let half = visible / 2;
    let start: String = chars[..half].iter().collect();
    let end: String = chars[chars.len() - half..].iter().collect();
    format!("{}{}{}", start, "*".repeat(chars.len() - 2 * half), end)
}

/// Resolves a caller identity to a decrypted credential.
///
/// Implementations back onto whatever credential store the host application
/// uses; the core only ever sees the resulting [`Secret`].
pub trait KeyResolver: Send + Sync + 'static {
    fn resolve(&self, identity: &str) -> Result<Secret, FlowError>;
}

/// Fixed identity → key map, mostly useful for tests and single-user setups.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StaticKeyResolver {
    keys: HashMap<String, String>,
    #[serde(default)]
    fallback: Option<String>,
}

impl StaticKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key for one identity
    pub fn with_key(mut self, identity: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(identity.into(), key.into());
        self
    }

    /// Key returned for identities without their own entry
    pub fn with_fallback(mut self, key: impl Into<String>) -> Self {
        self.fallback = Some(key.into());
        self
    }
}

impl fmt::Debug for StaticKeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyResolver")
            .field("identities", &self.keys.keys().collect::<Vec<_>>())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl KeyResolver for StaticKeyResolver {
    fn resolve(&self, identity: &str) -> Result<Secret, FlowError> {
        self.keys
            .get(identity)
            .or(self.fallback.as_ref())
            .filter(|k| !k.is_empty())
            .map(|k| Secret::new(k.clone()))
            .ok_or_else(|| {
                FlowError::authentication(format!("no credential for identity '{}'", identity))
            })
    }
}
