//! Credential store: keyed lookup, format checks, masked rendering.
//!
//! Grounded in the teacher's pattern of loading provider keys from
//! environment variables at router construction time
//! (`llm::router::LLMRouter::new_with_keys`), generalized here into a
//! standalone, provider-agnostic store per `spec.md` §4.1.

use dashmap::DashMap;
use std::fmt;
use std::time::SystemTime;

#[derive(Clone)]
pub struct CredentialRecord {
    pub provider_tag: String,
    pub secret: String,
    pub format_hint: Option<String>,
    pub acquired_at: SystemTime,
}

impl CredentialRecord {
    pub fn new(provider_tag: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            provider_tag: provider_tag.into(),
            secret: secret.into(),
            format_hint: None,
            acquired_at: SystemTime::now(),
        }
    }

    /// `<first4>…<last4>`, never exposing the middle. Used everywhere a
    /// credential might otherwise land in a log line.
    pub fn masked(&self) -> String {
        mask_secret(&self.secret)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("provider_tag", &self.provider_tag)
            .field("secret", &self.masked())
            .field("format_hint", &self.format_hint)
            .finish()
    }
}

pub fn mask_secret(secret: &str) -> String {
    let n = secret.len();
    if n <= 8 {
        return "…".repeat(n.min(4)).to_string();
    }
    format!("{}…{}", &secret[..4], &secret[n - 4..])
}

/// A provider's declared key-format check. Failure is a warning, never a
/// refusal — "keys for new key schemes must still work" (`spec.md` §4.1).
pub type FormatCheck = fn(&str) -> bool;

pub fn looks_like_sk_key(secret: &str) -> bool {
    secret.starts_with("sk-") && secret.len() >= 20
}

pub struct CredentialStore {
    records: DashMap<String, CredentialRecord>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Scan `{PROVIDER_TAG}_API_KEY` environment variables (case-insensitive
    /// on the prefix) and populate the store. Called once at boot.
    pub fn load_from_env(provider_tags: &[&str]) -> Self {
        let store = Self::new();
        for tag in provider_tags {
            let var = format!("{}_API_KEY", tag.to_uppercase());
            if let Ok(secret) = std::env::var(&var) {
                store.insert(tag, secret, None);
            }
        }
        store
    }

    /// Insert (or replace) a credential. A failing `format_check` produces a
    /// warning via `tracing`, never a rejection.
    pub fn insert_checked(
        &self,
        provider_tag: impl Into<String>,
        secret: impl Into<String>,
        format_check: Option<FormatCheck>,
    ) {
        let provider_tag = provider_tag.into();
        let secret = secret.into();
        if let Some(check) = format_check {
            if !check(&secret) {
                tracing::warn!(
                    provider = %provider_tag,
                    "credential does not match the provider's declared key format; accepting anyway"
                );
            }
        }
        let record = CredentialRecord::new(provider_tag.clone(), secret);
        self.records.insert(provider_tag, record);
    }

    pub fn insert(&self, provider_tag: impl Into<String>, secret: impl Into<String>, hint: Option<String>) {
        let provider_tag = provider_tag.into();
        let mut record = CredentialRecord::new(provider_tag.clone(), secret);
        record.format_hint = hint;
        self.records.insert(provider_tag, record);
    }

    pub fn get(&self, provider_tag: &str) -> Option<CredentialRecord> {
        self.records.get(provider_tag).map(|r| r.clone())
    }

    pub fn contains(&self, provider_tag: &str) -> bool {
        self.records.contains_key(provider_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_keeps_only_edges() {
        assert_eq!(mask_secret("sk-abcdefghijklmnop"), "sk-a…mnop");
    }

    #[test]
    fn short_secret_is_fully_masked() {
        assert_eq!(mask_secret("abc"), "…".repeat(3));
    }

    #[test]
    fn format_check_warns_but_still_inserts() {
        let store = CredentialStore::new();
        store.insert_checked("acme", "not-an-sk-key", Some(looks_like_sk_key));
        assert!(store.contains("acme"));
        assert_eq!(store.get("acme").unwrap().secret, "not-an-sk-key");
    }
}
