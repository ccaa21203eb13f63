//! Route-level operations.
//!
//! Each operation resolves the caller's credentials, checks access to the
//! plot it touches, and then calls into storage or the query engine. Nothing
//! is read before the access check passes.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use uuid::Uuid;

use crate::auth::{Access, Credentials, Identity, IdentityResolver, KeyDirectory, TokenVerifier};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    Instrument, Measurement, NewInstrument, NewPlot, Plot, PlotDetails, PlotId, PlotSummary,
    PlotUpdate, ShareLink, TimeWindow,
};
use crate::query::{Clock, QueryEngine, Resolution, Series, SeriesPoint};
use crate::storage::{MeasurementStore, PlotRepository, Storage, UserDirectory};

/// The operations a request boundary exposes.
#[derive(Debug)]
pub struct Service<S> {
    store: Arc<S>,
    identities: IdentityResolver<S>,
    engine: QueryEngine<S>,
}

impl Service<Storage> {
    /// Open the configured database and wire up identity resolution.
    ///
    /// The bearer scheme is only enabled when the tenant is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the key client
    /// cannot be built.
    pub fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(Storage::open(config.database_path())?);
        let tokens = if config.auth.is_configured() {
            let keys = Arc::new(KeyDirectory::from_config(&config.auth)?);
            Some(TokenVerifier::from_config(keys, &config.auth)?)
        } else {
            None
        };
        Ok(Self::new(store, tokens, config))
    }
}

impl<S> Service<S>
where
    S: UserDirectory + PlotRepository + MeasurementStore,
{
    /// Create a service over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, tokens: Option<TokenVerifier>, config: &Config) -> Self {
        Self {
            identities: IdentityResolver::new(store.clone(), tokens),
            engine: QueryEngine::new(store.clone(), &config.query),
            store,
        }
    }

    /// Replace the clock used by the query engine.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.engine = self.engine.with_clock(clock);
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Store a batch of measurements for the device's user.
    ///
    /// # Errors
    ///
    /// Fails if the credentials are not a valid device key or any sample is
    /// malformed; nothing is stored in that case.
    pub async fn add_measurements(
        &self,
        credentials: &Credentials,
        samples: &[Measurement],
    ) -> Result<usize> {
        let started = Instant::now();
        let user_id = match self.identities.resolve(credentials).await? {
            Identity::Device { user_id } => user_id,
            other => return Err(wrong_scheme(&other, "device key")),
        };

        let stored = self.store.append(samples, &user_id)?;
        info!(
            user_id = %user_id,
            count = stored,
            elapsed_ms = started.elapsed().as_millis(),
            "Added measurements"
        );
        Ok(stored)
    }

    /// The caller's plots, most recent first.
    ///
    /// # Errors
    ///
    /// Fails if the credentials are not a valid bearer token.
    pub async fn list_plots(&self, credentials: &Credentials) -> Result<Vec<PlotSummary>> {
        let user_id = self.user(credentials).await?;
        let plots = self.store.list_plots(&user_id)?;
        info!(user_id = %user_id, plots = plots.len(), "Listed plots");
        Ok(plots)
    }

    /// One of the caller's plots with its instruments.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` or `Forbidden` if the plot is absent or not the
    /// caller's.
    pub async fn get_plot(&self, credentials: &Credentials, id: PlotId) -> Result<PlotDetails> {
        let user_id = self.user(credentials).await?;
        let plot = self.owned_plot(&user_id, id, Access::Read)?;
        self.details(plot)
    }

    /// Create a plot owned by the caller.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput` for an invalid plot.
    pub async fn create_plot(&self, credentials: &Credentials, new_plot: &NewPlot) -> Result<Plot> {
        let user_id = self.user(credentials).await?;
        self.store.create_plot(new_plot, &user_id)
    }

    /// Rename or re-window one of the caller's plots.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound`, `Forbidden`, or `InvalidInput`.
    pub async fn update_plot(
        &self,
        credentials: &Credentials,
        id: PlotId,
        update: &PlotUpdate,
    ) -> Result<Plot> {
        let user_id = self.user(credentials).await?;
        let plot = self.store.update_plot(id, update, &user_id)?;
        info!(user_id = %user_id, plot_id = id, "Updated plot");
        Ok(plot)
    }

    /// Add instruments to one of the caller's plots.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound`, `Forbidden`, or `InvalidInput` for a repeated key.
    pub async fn add_instruments(
        &self,
        credentials: &Credentials,
        id: PlotId,
        instruments: &[NewInstrument],
    ) -> Result<Vec<Instrument>> {
        let user_id = self.user(credentials).await?;
        self.owned_plot(&user_id, id, Access::Write)?;
        self.store.append_instruments(id, instruments)
    }

    /// Series of one of the caller's plots.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` or `Forbidden` before any measurement is read.
    pub async fn plot_data(
        &self,
        credentials: &Credentials,
        id: PlotId,
        window: &TimeWindow,
        resolution: Resolution,
    ) -> Result<Series> {
        let user_id = self.user(credentials).await?;
        let plot = self.owned_plot(&user_id, id, Access::Read)?;
        self.series(&plot, window, resolution)
    }

    /// Latest values of one of the caller's plots.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the plot has no samples.
    pub async fn latest_data(&self, credentials: &Credentials, id: PlotId) -> Result<SeriesPoint> {
        let user_id = self.user(credentials).await?;
        let plot = self.owned_plot(&user_id, id, Access::Read)?;
        self.engine.latest(&plot)
    }

    /// The caller's device key.
    ///
    /// # Errors
    ///
    /// Fails if the credentials are not a valid bearer token.
    pub async fn device_key(&self, credentials: &Credentials) -> Result<String> {
        let user_id = self.user(credentials).await?;
        self.store
            .device_key(&user_id)?
            .ok_or_else(|| Error::not_found("user", &user_id))
    }

    /// Issue (or return) the share link of one of the caller's plots.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` or `Forbidden`.
    pub async fn share_plot(&self, credentials: &Credentials, id: PlotId) -> Result<ShareLink> {
        let user_id = self.user(credentials).await?;
        self.owned_plot(&user_id, id, Access::Write)?;
        self.store.issue_share_link(id)
    }

    /// Revoke the share link of one of the caller's plots.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` or `Forbidden`.
    pub async fn unshare_plot(&self, credentials: &Credentials, id: PlotId) -> Result<bool> {
        let user_id = self.user(credentials).await?;
        self.owned_plot(&user_id, id, Access::Write)?;
        self.store.revoke_share_link(id)
    }

    /// Public view of a shared plot.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput` or `NotFound` for a bad link.
    pub async fn shared_plot(&self, link: &str) -> Result<PlotDetails> {
        let plot = self.shared(link).await?;
        self.details(plot)
    }

    /// Series of a shared plot.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput` or `NotFound` for a bad link.
    pub async fn shared_data(
        &self,
        link: &str,
        window: &TimeWindow,
        resolution: Resolution,
    ) -> Result<Series> {
        let plot = self.shared(link).await?;
        self.series(&plot, window, resolution)
    }

    /// Latest values of a shared plot.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` for an unknown link or a plot without samples.
    pub async fn shared_latest(&self, link: &str) -> Result<SeriesPoint> {
        let plot = self.shared(link).await?;
        self.engine.latest(&plot)
    }

    async fn user(&self, credentials: &Credentials) -> Result<String> {
        match self.identities.resolve(credentials).await? {
            Identity::User { user_id } => Ok(user_id),
            other => Err(wrong_scheme(&other, "bearer token")),
        }
    }

    async fn shared(&self, link: &str) -> Result<Plot> {
        let identity = self
            .identities
            .resolve(&Credentials::ShareLink(link.to_string()))
            .await?;
        let Identity::Public { plot_id } = identity else {
            return Err(wrong_scheme(&identity, "share link"));
        };
        let plot = self
            .store
            .get_plot(plot_id)?
            .ok_or_else(|| Error::not_found("plot", plot_id))?;
        identity.authorize(&plot, Access::Read)?;
        Ok(plot)
    }

    fn owned_plot(&self, user_id: &str, id: PlotId, access: Access) -> Result<Plot> {
        let plot = self
            .store
            .get_plot(id)?
            .ok_or_else(|| Error::not_found("plot", id))?;
        Identity::User {
            user_id: user_id.to_string(),
        }
        .authorize(&plot, access)?;
        Ok(plot)
    }

    fn details(&self, plot: Plot) -> Result<PlotDetails> {
        let instruments = self.store.instruments(plot.id)?;
        let share_link: Option<Uuid> = self.store.share_link(plot.id)?;
        Ok(PlotDetails {
            active: plot.is_active(),
            plot,
            instruments,
            share_link,
        })
    }

    fn series(&self, plot: &Plot, window: &TimeWindow, resolution: Resolution) -> Result<Series> {
        let (series, timings) = self.engine.query_timed(plot, window, resolution)?;
        info!(
            plot_id = plot.id,
            %resolution,
            start = %window.start,
            end = %window.end,
            rows = series.len(),
            store_ms = timings.store.as_millis(),
            pivot_ms = timings.pivot.as_millis(),
            "Read plot data"
        );
        Ok(series)
    }
}

fn wrong_scheme(identity: &Identity, expected: &'static str) -> Error {
    Error::forbidden(format!(
        "{:?} credentials cannot be used where a {expected} is required",
        identity.scope()
    ))
}
