//! In-memory passphrase store.
//!
//! The core only ever reads the passphrase, once per seal or open call. The
//! returned copy is zeroed when dropped.

use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;
use zeroize::Zeroizing;

/// A user passphrase held in memory.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<Vec<u8>>);

impl Passphrase {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Read access to the current passphrase.
pub trait PassphraseProvider: Send + Sync {
    /// The passphrase, or `None` once it expired or was never entered.
    fn get(&self) -> Option<Passphrase>;
}

struct CachedPassphrase {
    value: Passphrase,
    stored_at: Instant,
}

/// Passphrase cache that forgets its value after a time-to-live.
pub struct PassphraseMemoryCache {
    ttl: Option<Duration>,
    inner: RwLock<Option<CachedPassphrase>>,
}

impl PassphraseMemoryCache {
    /// Cache whose value never expires.
    pub fn new() -> Self {
        Self {
            ttl: None,
            inner: RwLock::new(None),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            inner: RwLock::new(None),
        }
    }

    /// Cache already holding `passphrase`.
    pub fn holding(passphrase: Passphrase) -> Self {
        let cache = Self::new();
        cache.set(passphrase);
        cache
    }

    pub fn set(&self, passphrase: Passphrase) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(CachedPassphrase {
            value: passphrase,
            stored_at: Instant::now(),
        });
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    fn expired(&self, cached: &CachedPassphrase) -> bool {
        self.ttl
            .map(|ttl| cached.stored_at.elapsed() >= ttl)
            .unwrap_or(false)
    }
}

impl Default for PassphraseMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseProvider for PassphraseMemoryCache {
    fn get(&self) -> Option<Passphrase> {
        {
            let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                None => return None,
                Some(cached) if !self.expired(cached) => return Some(cached.value.clone()),
                Some(_) => {}
            }
        }
        debug!("passphrase expired, clearing cache");
        self.clear();
        None
    }
}
