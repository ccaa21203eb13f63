//! Configuration management for tiltplot.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "tiltplot";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "tiltplot.db";

/// Public x509 certificates of the token issuer, keyed by key id.
const DEFAULT_KEY_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";

/// Largest number of decimals averages may be rounded to.
const MAX_DECIMAL_PLACES: u32 = 6;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TILTPLOT_`, sections split by `__`,
///    e.g. `TILTPLOT_AUTH__KEY_URL`)
/// 2. TOML config file at `~/.config/tiltplot/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Identity configuration.
    pub auth: AuthConfig,
    /// Query configuration.
    pub query: QueryConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/tiltplot/tiltplot.db`
    pub database_path: Option<PathBuf>,
}

/// Bearer-token and signing-key configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Expected `iss` claim. Empty disables the bearer scheme.
    pub issuer: String,
    /// Expected `aud` claim. Empty disables the bearer scheme.
    pub audience: String,
    /// URL serving the issuer's certificates as a `{kid: pem}` JSON map.
    pub key_url: String,
    /// Key lifetime when the issuer sends no cache directive.
    pub default_key_ttl_secs: u64,
    /// Upper bound on one key-set fetch.
    pub key_fetch_timeout_secs: u64,
}

/// Query-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Decimals bucket averages are rounded to.
    pub decimal_places: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: String::new(),
            key_url: DEFAULT_KEY_URL.to_string(),
            default_key_ttl_secs: 3600,
            key_fetch_timeout_secs: 10,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { decimal_places: 2 }
    }
}

impl AuthConfig {
    /// Whether the tenant identifiers needed for bearer tokens are set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.issuer.is_empty() && !self.audience.is_empty()
    }

    /// Get the default key lifetime as a Duration.
    #[must_use]
    pub fn default_key_ttl(&self) -> Duration {
        Duration::from_secs(self.default_key_ttl_secs)
    }

    /// Get the key fetch timeout as a Duration.
    #[must_use]
    pub fn key_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.key_fetch_timeout_secs)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("TILTPLOT_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.auth.key_fetch_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "key_fetch_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.auth.default_key_ttl_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "default_key_ttl_secs must be greater than 0".to_string(),
            });
        }

        if !(self.auth.key_url.starts_with("https://") || self.auth.key_url.starts_with("http://"))
        {
            return Err(Error::ConfigValidation {
                message: format!("key_url must be an http(s) URL: {}", self.auth.key_url),
            });
        }

        if self.query.decimal_places > MAX_DECIMAL_PLACES {
            return Err(Error::ConfigValidation {
                message: format!(
                    "decimal_places ({}) cannot be greater than {MAX_DECIMAL_PLACES}",
                    self.query.decimal_places
                ),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}
