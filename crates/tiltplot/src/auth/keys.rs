//! Signing-key directory with a coalesced, read-through cache.
//!
//! The issuer publishes its whole key set at once as a JSON object mapping
//! key ids to PEM certificates. A miss fetches the entire set and installs
//! every entry with one shared expiry taken from the response's
//! `Cache-Control` header.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use reqwest::header::{HeaderName, AGE, CACHE_CONTROL};
use tracing::{debug, info, warn};
use x509_parser::pem::parse_x509_pem;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// One fetch of the issuer's key set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    /// Key id to PEM-encoded certificate or public key.
    pub keys: HashMap<String, String>,
    /// How long the set may be cached, if the issuer said.
    pub max_age: Option<Duration>,
    /// The issuer asked for the set not to be cached.
    pub no_store: bool,
}

/// Where signing keys come from.
#[async_trait]
pub trait KeySource: Send + Sync + fmt::Debug {
    /// Fetch the complete current key set.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` if the issuer cannot be reached or answers with
    /// something other than a key set.
    async fn fetch(&self) -> Result<KeySet>;
}

/// Fetches the key set over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    url: String,
    client: reqwest::Client,
}

impl HttpKeySource {
    /// Create a source for `url` whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::key_fetch(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<KeySet> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::key_fetch(format!("{}: {e}", self.url)))?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        let (max_age, no_store) =
            cache_lifetime(header(CACHE_CONTROL).as_deref(), header(AGE).as_deref());

        let keys: HashMap<String, String> = response
            .json()
            .await
            .map_err(|e| Error::key_fetch(format!("malformed key set from {}: {e}", self.url)))?;

        debug!(url = %self.url, keys = keys.len(), ?max_age, no_store, "Fetched signing keys");
        Ok(KeySet {
            keys,
            max_age,
            no_store,
        })
    }
}

/// Read the freshness lifetime from `Cache-Control` and `Age` header values.
///
/// Returns the remaining lifetime (if `max-age` was given) and whether caching
/// is forbidden.
pub fn cache_lifetime(cache_control: Option<&str>, age: Option<&str>) -> (Option<Duration>, bool) {
    let Some(cache_control) = cache_control else {
        return (None, false);
    };

    let mut max_age = None;
    let mut no_store = false;
    for directive in cache_control.split(',').map(str::trim) {
        let (name, value) = directive
            .split_once('=')
            .map_or((directive, None), |(name, value)| (name.trim(), Some(value.trim())));
        match name.to_ascii_lowercase().as_str() {
            "max-age" => max_age = value.and_then(|v| v.trim_matches('"').parse::<u64>().ok()),
            "no-store" | "no-cache" => no_store = true,
            _ => {}
        }
    }

    let age = age.and_then(|a| a.trim().parse::<u64>().ok()).unwrap_or(0);
    (
        max_age.map(|secs| Duration::from_secs(secs.saturating_sub(age))),
        no_store,
    )
}

/// Parse a PEM certificate, or failing that a PEM RSA public key.
///
/// # Errors
///
/// Returns `Unauthorized` if neither form parses.
pub fn parse_public_key(pem: &str) -> Result<DecodingKey> {
    if let Ok((_, block)) = parse_x509_pem(pem.as_bytes()) {
        if block.label == "CERTIFICATE" {
            let cert = block
                .parse_x509()
                .map_err(|e| Error::unauthorized(format!("invalid signing certificate: {e}")))?;
            let der: &[u8] = &cert.public_key().subject_public_key.data;
            return Ok(DecodingKey::from_rsa_der(der));
        }
    }

    DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| Error::unauthorized(format!("invalid signing key: {e}")))
}

/// The most recently fetched key set.
#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, Arc<DecodingKey>>,
    /// `None` until a cacheable set arrives, and after a `no-store` one.
    expires_at: Option<Instant>,
    /// Bumped by every completed fetch.
    generation: u64,
}

impl KeyCache {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at > now)
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("kids", &self.keys.keys().collect::<Vec<_>>())
            .field("expires_at", &self.expires_at)
            .field("generation", &self.generation)
            .finish()
    }
}

enum Lookup {
    Hit(Arc<DecodingKey>),
    /// The cached set is fresh and does not publish the id.
    Absent,
    /// The cached set has expired; carries the generation that was seen.
    Stale(u64),
}

/// Resolves token key ids to verification keys.
///
/// Readers only take the cache's read lock. Freshness belongs to the whole
/// set: while it is fresh an unknown id is rejected without touching the
/// network. Once it expires, a miss waits on the refresh gate and callers
/// queued behind a refresh take that refresh's answer, so concurrent misses
/// share one fetch. The cache itself is never locked while the fetch is in
/// flight.
#[derive(Debug)]
pub struct KeyDirectory {
    source: Arc<dyn KeySource>,
    cache: RwLock<KeyCache>,
    refresh: tokio::sync::Mutex<()>,
    default_ttl: Duration,
    fetch_timeout: Duration,
}

impl KeyDirectory {
    /// Create a directory over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>, config: &AuthConfig) -> Self {
        Self {
            source,
            cache: RwLock::new(KeyCache::default()),
            refresh: tokio::sync::Mutex::new(()),
            default_ttl: config.default_key_ttl(),
            fetch_timeout: config.key_fetch_timeout(),
        }
    }

    /// Create a directory fetching from the configured key URL.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` if the HTTP client cannot be built.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let source = HttpKeySource::new(&config.key_url, config.key_fetch_timeout())?;
        Ok(Self::new(Arc::new(source), config))
    }

    /// The verification key for `kid`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSigningKey` if the current key set does not publish
    /// `kid`, or `KeyFetch` if a needed refresh fails or times out.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<DecodingKey>> {
        let seen = match self.lookup(kid)? {
            Lookup::Hit(key) => return Ok(key),
            Lookup::Absent => return Err(unknown_key(kid)),
            Lookup::Stale(generation) => generation,
        };

        let _gate = self.refresh.lock().await;
        {
            let cache = self.read_cache()?;
            if cache.generation != seen {
                // Refreshed while we waited
                return cache.keys.get(kid).cloned().ok_or_else(|| unknown_key(kid));
            }
        }

        let set = tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .map_err(|_| {
                Error::key_fetch(format!(
                    "no response from key issuer within {:?}",
                    self.fetch_timeout
                ))
            })??;

        let parsed: HashMap<String, Arc<DecodingKey>> = set
            .keys
            .iter()
            .filter_map(|(id, pem)| match parse_public_key(pem) {
                Ok(key) => Some((id.clone(), Arc::new(key))),
                Err(e) => {
                    warn!(kid = %id, error = %e, "Skipping unparseable signing key");
                    None
                }
            })
            .collect();
        let found = parsed.get(kid).cloned();

        let expires_at = if set.no_store {
            debug!("Key set marked no-store; not caching");
            None
        } else {
            Some(Instant::now() + set.max_age.unwrap_or(self.default_ttl))
        };
        self.install(parsed, expires_at)?;

        found.ok_or_else(|| unknown_key(kid))
    }

    /// Number of keys in the current set, or 0 once it has expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn cached_len(&self) -> Result<usize> {
        let cache = self.read_cache()?;
        Ok(if cache.is_fresh(Instant::now()) {
            cache.keys.len()
        } else {
            0
        })
    }

    fn lookup(&self, kid: &str) -> Result<Lookup> {
        let cache = self.read_cache()?;
        if !cache.is_fresh(Instant::now()) {
            return Ok(Lookup::Stale(cache.generation));
        }
        Ok(cache
            .keys
            .get(kid)
            .map_or(Lookup::Absent, |key| Lookup::Hit(key.clone())))
    }

    fn install(
        &self,
        keys: HashMap<String, Arc<DecodingKey>>,
        expires_at: Option<Instant>,
    ) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| Error::internal("signing key cache lock poisoned"))?;
        // Keys missing from the new set have been rotated out
        cache.keys = keys;
        cache.expires_at = expires_at;
        cache.generation += 1;
        info!(
            keys = cache.keys.len(),
            generation = cache.generation,
            cached = expires_at.is_some(),
            "Installed signing keys"
        );
        Ok(())
    }

    fn read_cache(&self) -> Result<std::sync::RwLockReadGuard<'_, KeyCache>> {
        self.cache
            .read()
            .map_err(|_| Error::internal("signing key cache lock poisoned"))
    }
}

fn unknown_key(kid: &str) -> Error {
    Error::UnknownSigningKey {
        kid: kid.to_string(),
    }
}
