//! Bearer token verification.

use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use tracing::debug;

use super::keys::KeyDirectory;
use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Claims read from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Subject; becomes the user id.
    pub sub: String,
    /// Email address, if the issuer included it.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name, if the issuer included it.
    #[serde(default)]
    pub name: Option<String>,
}

/// Verifies RS256 tokens against the issuer's published keys.
#[derive(Debug)]
pub struct TokenVerifier {
    keys: Arc<KeyDirectory>,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier accepting tokens for exactly `issuer` and `audience`.
    #[must_use]
    pub fn new(keys: Arc<KeyDirectory>, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        Self { keys, validation }
    }

    /// Create a verifier for the configured tenant.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if the issuer or audience is not configured.
    pub fn from_config(keys: Arc<KeyDirectory>, config: &AuthConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::ConfigValidation {
                message: "auth.issuer and auth.audience must be set to accept bearer tokens"
                    .to_string(),
            });
        }
        Ok(Self::new(keys, &config.issuer, &config.audience))
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for a malformed, expired, or foreign token or one
    /// signed with an unknown key, and `KeyFetch` if the keys are unavailable.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token)
            .map_err(|e| Error::unauthorized(format!("malformed token header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::unauthorized(format!(
                "unsupported token algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::unauthorized("token header has no key id"))?;

        let key = self.keys.resolve(&kid).await?;
        let data = decode::<Claims>(token, &key, &self.validation)
            .map_err(|e| Error::unauthorized(format!("token rejected: {e}")))?;

        if data.claims.sub.is_empty() {
            return Err(Error::unauthorized("token has an empty subject"));
        }
        debug!(user_id = %data.claims.sub, kid = %kid, "Verified bearer token");
        Ok(data.claims)
    }
}
