//! Request fingerprints.

use std::fmt;

/// Deterministic fingerprint of a request.
///
/// Built from the request target plus the modifiers that change the
/// response (method, selected headers). Structurally identical requests
/// always produce equal keys: modifier names are lowercased and sorted,
/// and values are trimmed before they are folded in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a bare target with no modifiers.
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn builder(target: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            method: None,
            target: target.to_string(),
            modifiers: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates the parts of a key before normalizing them.
#[derive(Debug)]
pub struct CacheKeyBuilder {
    method: Option<String>,
    target: String,
    modifiers: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    pub fn method(mut self, method: &str) -> Self {
        self.method = Some(method.to_ascii_uppercase());
        self
    }

    pub fn modifier(mut self, name: &str, value: &str) -> Self {
        self.modifiers
            .push((name.to_ascii_lowercase(), value.trim().to_string()));
        self
    }

    pub fn build(mut self) -> CacheKey {
        self.modifiers.sort();

        let mut key = String::with_capacity(self.target.len() + 16);
        if let Some(method) = &self.method {
            key.push_str(method);
            key.push(' ');
        }
        key.push_str(&self.target);
        for (name, value) in &self.modifiers {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        CacheKey(key)
    }
}
