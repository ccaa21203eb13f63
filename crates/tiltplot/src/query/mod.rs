//! Time-series reads over a plot.
//!
//! A plot's series is computed on every read: the plot's instrument keys and
//! window select raw measurements of the plot owner, which are then either
//! returned as-is or averaged into epoch-aligned buckets and pivoted into one
//! row per timestamp.

pub mod bucket;
pub mod pivot;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::model::{Measurement, Plot, TimeWindow};
use crate::storage::{MeasurementStore, PlotRepository};

pub use bucket::{BucketGrid, Resolution};
pub use pivot::{pivot, Series, SeriesPoint};

/// Source of the current time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    /// The system clock.
    #[default]
    System,
    /// A frozen instant.
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// The current time according to this clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }
}

/// Time spent in each stage of a series read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryTimings {
    /// Reading raw samples or bucket averages from the store.
    pub store: Duration,
    /// Pivoting rows into one point per timestamp.
    pub pivot: Duration,
}

/// Answers series, raw-sample, and latest-value reads for plots.
#[derive(Debug)]
pub struct QueryEngine<S> {
    store: Arc<S>,
    decimals: u32,
    clock: Clock,
}

impl<S> QueryEngine<S>
where
    S: PlotRepository + MeasurementStore,
{
    /// Create an engine reading from `store`.
    pub fn new(store: Arc<S>, config: &QueryConfig) -> Self {
        Self {
            store,
            decimals: config.decimal_places,
            clock: Clock::System,
        }
    }

    /// Replace the clock used to cap windows at the present.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The part of `window` that lies inside the plot and not in the future.
    ///
    /// An active plot's window ends now.
    #[must_use]
    pub fn effective_window(&self, plot: &Plot, window: &TimeWindow) -> TimeWindow {
        let plot_window = TimeWindow {
            start: plot.start_time,
            end: plot.end_time.unwrap_or_else(|| self.clock.now()),
        };
        window.intersect(&plot_window)
    }

    /// The plot's series over `window` at `resolution`, ascending by date.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn query(
        &self,
        plot: &Plot,
        window: &TimeWindow,
        resolution: Resolution,
    ) -> Result<Series> {
        self.query_timed(plot, window, resolution)
            .map(|(series, _)| series)
    }

    /// Like [`query`](Self::query), also reporting where the time went.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn query_timed(
        &self,
        plot: &Plot,
        window: &TimeWindow,
        resolution: Resolution,
    ) -> Result<(Series, QueryTimings)> {
        let started = Instant::now();
        let rows = self.rows(plot, window, resolution)?;
        let store = started.elapsed();

        let started = Instant::now();
        let series = pivot(rows);
        let timings = QueryTimings {
            store,
            pivot: started.elapsed(),
        };
        Ok((series, timings))
    }

    fn rows(
        &self,
        plot: &Plot,
        window: &TimeWindow,
        resolution: Resolution,
    ) -> Result<Vec<Measurement>> {
        let Some(unit) = resolution.unit() else {
            return self.samples(plot, window);
        };
        let keys = self.channel_keys(plot)?;
        let effective = self.effective_window(plot, window);
        if keys.is_empty() || effective.is_empty() {
            return Ok(Vec::new());
        }

        let grid = BucketGrid::new(&effective, unit, self.clock.now())?;
        let averages = self.store.bucket_averages(
            &keys,
            &plot.owner,
            &effective,
            grid.origin(),
            unit.num_milliseconds(),
            self.decimals,
        )?;

        let rows: Vec<Measurement> = averages
            .into_iter()
            .filter_map(|avg| {
                grid.start_of(avg.bucket)
                    .map(|start| Measurement::new(avg.key, avg.value, start))
            })
            .collect();
        debug!(
            plot_id = plot.id,
            %resolution,
            buckets = rows.len(),
            "Averaged plot series"
        );
        Ok(rows)
    }

    /// Raw samples of the plot over `window`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn samples(&self, plot: &Plot, window: &TimeWindow) -> Result<Vec<Measurement>> {
        let keys = self.channel_keys(plot)?;
        let effective = self.effective_window(plot, window);
        if keys.is_empty() || effective.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.store.range_read(&keys, &plot.owner, &effective)?;
        debug!(plot_id = plot.id, rows = rows.len(), "Read plot samples");
        Ok(rows)
    }

    /// Every channel's value at the plot's most recent sample time.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the plot has no samples.
    pub fn latest(&self, plot: &Plot) -> Result<SeriesPoint> {
        let keys = self.channel_keys(plot)?;
        let window = plot.window();

        let latest = self
            .store
            .latest_timestamp(&keys, &plot.owner, &window)?
            .ok_or_else(|| Error::not_found("latest measurement for plot", plot.id))?;
        let rows = self.store.read_at(&keys, &plot.owner, latest)?;

        pivot(rows)
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("latest measurement for plot", plot.id))
    }

    fn channel_keys(&self, plot: &Plot) -> Result<Vec<String>> {
        Ok(self
            .store
            .instruments(plot.id)?
            .into_iter()
            .map(|instrument| instrument.key)
            .collect())
    }
}
