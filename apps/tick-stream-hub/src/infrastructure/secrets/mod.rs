//! Secret Provider Adapters
//!
//! The core consumes secrets through the [`SecretProvider`] port and never
//! persists them. The environment adapter is the in-process default;
//! platform credential managers plug in behind the same port from outside.
//!
//! Public trade channels on every integrated venue need no credentials, so
//! lookups returning `None` are the normal case.

use async_trait::async_trait;

use crate::application::ports::SecretProvider;

/// Environment-variable-backed secret provider.
///
/// A key like `binance.api_key` resolves from `TICKHUB_SECRET_BINANCE_API_KEY`.
#[derive(Clone, Default)]
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    /// Provider with the standard `TICKHUB_SECRET_` prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: "TICKHUB_SECRET_".to_string(),
        }
    }

    /// Provider with a custom prefix (tests).
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_key(&self, key: &str) -> String {
        let suffix: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

impl std::fmt::Debug for EnvSecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never echo resolved values.
        f.debug_struct("EnvSecretProvider")
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, key: &str) -> Option<String> {
        std::env::var(self.env_key(key)).ok().filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_prefixed_env_names() {
        let provider = EnvSecretProvider::new();
        assert_eq!(
            provider.env_key("binance.api_key"),
            "TICKHUB_SECRET_BINANCE_API_KEY"
        );
        assert_eq!(provider.env_key("a-b c"), "TICKHUB_SECRET_A_B_C");
    }

    #[tokio::test]
    async fn resolves_from_the_environment() {
        // PATH is present in any test environment; an empty prefix maps the
        // key "path" straight onto it.
        let provider = EnvSecretProvider::with_prefix("");
        assert!(provider.get_secret("path").await.is_some());
    }

    #[tokio::test]
    async fn absent_keys_read_as_none() {
        let provider = EnvSecretProvider::new();
        assert!(
            provider
                .get_secret("no.such.provisioned.secret")
                .await
                .is_none()
        );
    }

    #[test]
    fn debug_output_never_contains_values() {
        let provider = EnvSecretProvider::new();
        let debug = format!("{provider:?}");
        assert!(debug.contains("TICKHUB_SECRET_"));
    }
}
