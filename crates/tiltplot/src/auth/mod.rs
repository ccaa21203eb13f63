//! Identity resolution and access checks.
//!
//! Three credential schemes map onto three identities:
//!
//! | Credential | Identity | Scope |
//! |---|---|---|
//! | device key | [`Identity::Device`] | ingest |
//! | bearer token | [`Identity::User`] | owner |
//! | share link | [`Identity::Public`] | public read |
//!
//! [`IdentityResolver::resolve`] turns credentials into an identity;
//! [`Identity::authorize`] decides what that identity may do with a plot.

pub mod keys;
pub mod token;

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Plot, PlotId};
use crate::storage::{PlotRepository, UserDirectory};

pub use keys::{HttpKeySource, KeyDirectory, KeySet, KeySource};
pub use token::{Claims, TokenVerifier};

/// Credentials presented with a request, one variant per scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Device key from the ingestion header.
    DeviceKey(Option<String>),
    /// Bearer token from the `Authorization` header.
    BearerToken(Option<String>),
    /// Share link uuid from the path.
    ShareLink(String),
}

impl Credentials {
    /// Bearer credentials from a raw `Authorization` header value.
    ///
    /// A missing `Bearer ` prefix counts as no token.
    #[must_use]
    pub fn from_authorization_header(value: Option<&str>) -> Self {
        let token = value
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Self::BearerToken(token)
    }
}

/// What an identity is allowed to do in general.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Append measurements.
    Ingest,
    /// Read and modify own plots.
    Owner,
    /// Read one shared plot.
    PublicRead,
}

/// Kind of plot access requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reading the plot or its series.
    Read,
    /// Changing the plot.
    Write,
}

/// A resolved caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A measurement device acting for its user.
    Device {
        /// The owning user.
        user_id: String,
    },
    /// A signed-in user.
    User {
        /// The user.
        user_id: String,
    },
    /// An anonymous reader holding a share link.
    Public {
        /// The one plot the link grants.
        plot_id: PlotId,
    },
}

impl Identity {
    /// The identity's scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        match self {
            Self::Device { .. } => Scope::Ingest,
            Self::User { .. } => Scope::Owner,
            Self::Public { .. } => Scope::PublicRead,
        }
    }

    /// The user behind the identity, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Device { user_id } | Self::User { user_id } => Some(user_id),
            Self::Public { .. } => None,
        }
    }

    /// Check `access` to `plot`.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` unless a user owns the plot, or a public reader
    /// reads the plot its link grants.
    pub fn authorize(&self, plot: &Plot, access: Access) -> Result<()> {
        match (self, access) {
            (Self::User { user_id }, _) if plot.is_owned_by(user_id) => Ok(()),
            (Self::User { user_id }, _) => Err(Error::forbidden(format!(
                "user {user_id} does not own plot {}",
                plot.id
            ))),
            (Self::Public { plot_id }, Access::Read) if *plot_id == plot.id => Ok(()),
            (Self::Public { .. }, _) => Err(Error::forbidden(format!(
                "share link does not grant {access:?} access to plot {}",
                plot.id
            ))),
            (Self::Device { .. }, _) => Err(Error::forbidden(
                "device keys may only ingest measurements",
            )),
        }
    }
}

/// Turns presented credentials into an [`Identity`].
#[derive(Debug)]
pub struct IdentityResolver<S> {
    store: Arc<S>,
    tokens: Option<TokenVerifier>,
}

impl<S> IdentityResolver<S>
where
    S: UserDirectory + PlotRepository,
{
    /// Create a resolver. Without a token verifier bearer credentials fail
    /// with a configuration error.
    pub fn new(store: Arc<S>, tokens: Option<TokenVerifier>) -> Self {
        Self { store, tokens }
    }

    /// Resolve `credentials`.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` if the scheme's credential is absent
    /// - `Forbidden` for a device key no user holds
    /// - `Unauthorized` for a token that fails verification
    /// - `InvalidInput` for a malformed share link, `NotFound` for an unknown one
    /// - `KeyFetch` if the issuer's keys cannot be fetched
    pub async fn resolve(&self, credentials: &Credentials) -> Result<Identity> {
        match credentials {
            Credentials::DeviceKey(key) => {
                let key = present(key.as_deref(), "device key")?;
                let user_id = self
                    .store
                    .user_for_device_key(key)?
                    .ok_or_else(|| Error::forbidden("unknown device key"))?;
                Ok(Identity::Device { user_id })
            }
            Credentials::BearerToken(token) => {
                let token = present(token.as_deref(), "bearer token")?;
                let verifier = self.tokens.as_ref().ok_or_else(|| Error::ConfigValidation {
                    message: "bearer tokens are not accepted until auth.issuer and auth.audience are set"
                        .to_string(),
                })?;
                let claims = verifier.verify(token).await?;
                let user =
                    self.store
                        .ensure_user(&claims.sub, claims.email.as_deref(), claims.name.as_deref())?;
                Ok(Identity::User { user_id: user.id })
            }
            Credentials::ShareLink(raw) => {
                let uuid = Uuid::parse_str(raw.trim())
                    .map_err(|e| Error::invalid_input(format!("malformed share link '{raw}': {e}")))?;
                let plot_id = self
                    .store
                    .resolve_share_link(&uuid)?
                    .ok_or_else(|| Error::not_found("share link", uuid))?;
                debug!(plot_id, "Resolved share link");
                Ok(Identity::Public { plot_id })
            }
        }
    }
}

fn present<'a>(value: Option<&'a str>, scheme: &'static str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(Error::Unauthenticated { scheme })
}

#[cfg(test)]
mod tests {
    use super::token::tests::{sign, test_auth_config, test_key_source, TestClaims};
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::NewPlot;
    use crate::storage::Storage;
    use chrono::{TimeZone, Utc};

    fn resolver() -> (Arc<Storage>, IdentityResolver<Storage>) {
        let store = Arc::new(Storage::open_in_memory().unwrap());
        let config = test_auth_config();
        let keys = Arc::new(KeyDirectory::new(test_key_source(), &config));
        let tokens = TokenVerifier::from_config(keys, &config).unwrap();
        (store.clone(), IdentityResolver::new(store, Some(tokens)))
    }

    fn plot(id: PlotId, owner: &str) -> Plot {
        Plot {
            id,
            name: "brew".to_string(),
            start_time: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            end_time: None,
            owner: owner.to_string(),
        }
    }

    #[test]
    fn test_authorize_user() {
        let alice = Identity::User {
            user_id: "alice".to_string(),
        };
        assert!(alice.authorize(&plot(1, "alice"), Access::Read).is_ok());
        assert!(alice.authorize(&plot(1, "alice"), Access::Write).is_ok());

        let err = alice.authorize(&plot(1, "bob"), Access::Write).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_authorize_public() {
        let public = Identity::Public { plot_id: 1 };
        assert!(public.authorize(&plot(1, "alice"), Access::Read).is_ok());
        assert!(public.authorize(&plot(1, "alice"), Access::Write).is_err());
        assert!(public.authorize(&plot(2, "alice"), Access::Read).is_err());
        assert_eq!(public.user_id(), None);
        assert_eq!(public.scope(), Scope::PublicRead);
    }

    #[test]
    fn test_authorize_device() {
        let device = Identity::Device {
            user_id: "alice".to_string(),
        };
        let err = device.authorize(&plot(1, "alice"), Access::Read).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(device.scope(), Scope::Ingest);
        assert_eq!(device.user_id(), Some("alice"));
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(
            Credentials::from_authorization_header(Some("Bearer abc.def.ghi")),
            Credentials::BearerToken(Some("abc.def.ghi".to_string()))
        );
        assert_eq!(
            Credentials::from_authorization_header(Some("Basic dXNlcg==")),
            Credentials::BearerToken(None)
        );
        assert_eq!(
            Credentials::from_authorization_header(None),
            Credentials::BearerToken(None)
        );
    }

    #[tokio::test]
    async fn test_device_key() {
        let (store, resolver) = resolver();
        let user = store.ensure_user("alice", None, None).unwrap();

        let identity = resolver
            .resolve(&Credentials::DeviceKey(Some(user.device_key)))
            .await
            .unwrap();
        assert_eq!(
            identity,
            Identity::Device {
                user_id: "alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_device_key_failures() {
        let (_, resolver) = resolver();

        let err = resolver
            .resolve(&Credentials::DeviceKey(None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);

        let err = resolver
            .resolve(&Credentials::DeviceKey(Some(String::new())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);

        let err = resolver
            .resolve(&Credentials::DeviceKey(Some("nobody".to_string())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_bearer_token_creates_user() {
        let (store, resolver) = resolver();
        let token = sign(&TestClaims::valid("alice"));

        let identity = resolver
            .resolve(&Credentials::BearerToken(Some(token.clone())))
            .await
            .unwrap();
        assert_eq!(identity.user_id(), Some("alice"));
        assert_eq!(identity.scope(), Scope::Owner);

        let user = store.get_user("alice").unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));

        // Second login reuses the row
        resolver
            .resolve(&Credentials::BearerToken(Some(token)))
            .await
            .unwrap();
        assert_eq!(store.stats().unwrap().users, 1);
    }

    #[tokio::test]
    async fn test_bearer_token_absent() {
        let (_, resolver) = resolver();
        let err = resolver
            .resolve(&Credentials::BearerToken(None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_bearer_token_without_verifier() {
        let store = Arc::new(Storage::open_in_memory().unwrap());
        let resolver = IdentityResolver::new(store, None);
        let token = sign(&TestClaims::valid("alice"));

        let err = resolver
            .resolve(&Credentials::BearerToken(Some(token)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[tokio::test]
    async fn test_share_link() {
        let (store, resolver) = resolver();
        store.ensure_user("alice", None, None).unwrap();
        let created = store
            .create_plot(
                &NewPlot {
                    name: "brew".to_string(),
                    start_time: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
                    end_time: None,
                    instruments: vec![],
                },
                "alice",
            )
            .unwrap();
        let link = store.issue_share_link(created.id).unwrap();

        let identity = resolver
            .resolve(&Credentials::ShareLink(link.uuid.to_string()))
            .await
            .unwrap();
        assert_eq!(identity, Identity::Public { plot_id: created.id });
    }

    #[tokio::test]
    async fn test_share_link_failures() {
        let (_, resolver) = resolver();

        let err = resolver
            .resolve(&Credentials::ShareLink("not-a-uuid".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = resolver
            .resolve(&Credentials::ShareLink(Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
