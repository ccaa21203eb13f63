//! Error types for tiltplot.
//!
//! Every fallible operation in the crate returns [`Error`]. The boundary layer
//! (HTTP handlers, the CLI) classifies an error with [`Error::kind`] and maps
//! the resulting [`ErrorKind`] to a status code.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tiltplot operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Identity and access ===
    /// No credential was presented for the scheme the route requires.
    #[error("no {scheme} credential presented")]
    Unauthenticated {
        /// Name of the identity scheme.
        scheme: &'static str,
    },

    /// A credential was presented but could not be verified.
    #[error("invalid credential: {0}")]
    Unauthorized(String),

    /// The token names a signing key the issuer does not publish.
    #[error("unknown signing key id '{kid}'")]
    UnknownSigningKey {
        /// The key id taken from the token header.
        kid: String,
    },

    /// The identity is valid but may not touch the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    // === Lookup and validation ===
    /// The requested resource does not exist.
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of resource (plot, share link, ...).
        what: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Caller-supplied data is malformed or inconsistent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Key issuer ===
    /// Fetching the signing-key set from the issuer failed.
    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for tiltplot operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

/// Coarse classification of an [`Error`] for the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No credential presented.
    Unauthenticated,
    /// Credential present but invalid, expired, or for another tenant.
    Unauthorized,
    /// Valid identity without rights to the resource.
    Forbidden,
    /// Plot, share link, or latest sample absent.
    NotFound,
    /// Malformed id, inverted window, unknown resolution, bad batch.
    InvalidInput,
    /// Store or key issuer failed; the caller may retry.
    Unavailable,
    /// A bug or misconfiguration.
    Internal,
}

impl ErrorKind {
    /// HTTP status code the boundary layer should answer with.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Unauthenticated | Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::InvalidInput => 400,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl Error {
    /// Create a new unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create a new forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Create a new not-found error.
    #[must_use]
    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            what,
            id: id.to_string(),
        }
    }

    /// Create a new invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a new key-fetch error.
    #[must_use]
    pub fn key_fetch(message: impl Into<String>) -> Self {
        Self::KeyFetch(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::Unauthorized(_) | Self::UnknownSigningKey { .. } => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidInput(_) | Self::ConfigValidation { .. } => ErrorKind::InvalidInput,
            Self::DatabaseOpen { .. }
            | Self::Database(_)
            | Self::DatabaseMigration { .. }
            | Self::KeyFetch(_)
            | Self::Io(_)
            | Self::DirectoryCreate { .. } => ErrorKind::Unavailable,
            Self::ConfigLoad(_) | Self::Json(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error means the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is an identity or access failure.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Unauthenticated | ErrorKind::Unauthorized | ErrorKind::Forbidden
        )
    }
}
