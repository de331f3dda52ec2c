//! Runtime configuration with environment overrides.

use std::env;
use std::time::Duration;

use tracing::warn;

/// Prefix shared by every key the crate writes, unless overridden.
pub const DEFAULT_KEY_PREFIX: &str = "studykit:";

/// Tunables for the cache, lock, and identity layers.
///
/// `Default` gives production-shaped values; `from_env` layers `STUDYKIT_*`
/// variables on top. Unparseable values are logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Prefix on every stored key.
    pub key_prefix: String,
    /// TTL on population and exclusion locks.
    pub lock_ttl: Duration,
    /// How long a blocking acquire waits before giving up.
    pub lock_timeout: Duration,
    /// One-time code lifetime.
    pub code_ttl: Duration,
    /// How long a pending destination stays attached to an account.
    pub pending_ttl: Duration,
    /// Session token lifetime.
    pub token_ttl: Duration,
    /// Code accepted in place of any stored one. Empty disables it.
    pub override_code: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            lock_ttl: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(5),
            code_ttl: Duration::from_secs(300),
            pending_ttl: Duration::from_secs(30 * 60),
            token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            override_code: None,
        }
    }
}

impl Config {
    /// Defaults overlaid with `STUDYKIT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(prefix) = env::var("STUDYKIT_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        read_secs("STUDYKIT_LOCK_TTL_SECS", &mut config.lock_ttl);
        read_secs("STUDYKIT_LOCK_TIMEOUT_SECS", &mut config.lock_timeout);
        read_secs("STUDYKIT_CODE_TTL_SECS", &mut config.code_ttl);
        read_secs("STUDYKIT_PENDING_TTL_SECS", &mut config.pending_ttl);
        read_secs("STUDYKIT_TOKEN_TTL_SECS", &mut config.token_ttl);
        if let Ok(code) = env::var("STUDYKIT_OVERRIDE_CODE") {
            config = config.with_override_code(code);
        }
        config
    }

    /// Set the override code, treating empty as disabled.
    pub fn with_override_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        self.override_code = if code.is_empty() { None } else { Some(code) };
        self
    }
}

fn read_secs(name: &str, slot: &mut Duration) {
    if let Ok(raw) = env::var(name) {
        match raw.parse::<u64>() {
            Ok(secs) => *slot = Duration::from_secs(secs),
            Err(_) => warn!(var = name, value = %raw, "unparseable duration, keeping default"),
        }
    }
}
