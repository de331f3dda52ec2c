//! Opaque session tokens backed by the key-value store.

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;

use crate::config::Config;
use crate::kv::{KeyValueStore, KvError};

/// Random bytes behind each token, before encoding.
const TOKEN_BYTES: usize = 24;

/// Error type for token operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is unknown or past its time to live.
    Expired,
    /// The token store failed.
    Store(KvError),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token expired"),
            TokenError::Store(err) => write!(f, "token store error: {}", err),
        }
    }
}

impl std::error::Error for TokenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TokenError::Expired => None,
            TokenError::Store(err) => Some(err),
        }
    }
}

impl From<KvError> for TokenError {
    fn from(err: KvError) -> Self {
        TokenError::Store(err)
    }
}

/// Issues and validates session tokens for verified accounts.
pub trait TokenIssuer: Send + Sync {
    /// Mint a token bound to `account_id`.
    fn issue(&self, account_id: &str) -> Result<String, TokenError>;

    /// Resolve a token back to its account id.
    fn validate(&self, token: &str) -> Result<String, TokenError>;
}

/// Token issuer that keeps each token as an expiring key-value entry.
/// Tokens are opaque random strings; the store is the single source of
/// truth, so deleting the key revokes the session.
#[derive(Clone)]
pub struct SessionTokens<S: KeyValueStore + Clone> {
    store: S,
    prefix: String,
    ttl: Duration,
}

impl<S: KeyValueStore + Clone> SessionTokens<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            prefix: config.key_prefix.clone(),
            ttl: config.token_ttl,
        }
    }

    fn token_key(&self, token: &str) -> String {
        format!("{}token:{}", self.prefix, token)
    }
}

impl<S: KeyValueStore + Clone> TokenIssuer for SessionTokens<S> {
    fn issue(&self, account_id: &str) -> Result<String, TokenError> {
        let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
        let token = URL_SAFE_NO_PAD.encode(bytes);
        self.store
            .set(&self.token_key(&token), account_id.as_bytes(), Some(self.ttl))?;
        Ok(token)
    }

    fn validate(&self, token: &str) -> Result<String, TokenError> {
        let bytes = self
            .store
            .get(&self.token_key(token))?
            .ok_or(TokenError::Expired)?;
        String::from_utf8(bytes).map_err(|_| TokenError::Expired)
    }
}
