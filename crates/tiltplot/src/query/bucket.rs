//! Resolutions and the epoch-aligned bucket grid.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::TimeWindow;

/// Granularity of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Every raw sample.
    #[default]
    All,
    /// One averaged point per minute.
    Minute,
    /// One averaged point per hour.
    Hour,
    /// One averaged point per UTC day.
    Day,
}

impl Resolution {
    /// Bucket width, or `None` for raw samples.
    #[must_use]
    pub fn unit(self) -> Option<TimeDelta> {
        match self {
            Self::All => None,
            Self::Minute => Some(TimeDelta::minutes(1)),
            Self::Hour => Some(TimeDelta::hours(1)),
            Self::Day => Some(TimeDelta::days(1)),
        }
    }

    /// Lowercase name, as accepted by [`FromStr`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            other => Err(Error::invalid_input(format!(
                "unknown resolution '{other}' (expected all, minute, hour, or day)"
            ))),
        }
    }
}

/// The bucket starts covering a window.
///
/// Starts are epoch-aligned: the first is the window start truncated to the
/// unit, and each following one is exactly one unit later. A bucket covers
/// `[bucket_start, bucket_start + unit)`. Starts are computed by index, so an
/// arbitrarily long window never materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketGrid {
    origin: DateTime<Utc>,
    unit: TimeDelta,
    last: DateTime<Utc>,
}

impl BucketGrid {
    /// The grid for `window`, with no bucket starting after `limit`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a unit shorter than a millisecond or a start
    /// that cannot be aligned.
    pub fn new(window: &TimeWindow, unit: TimeDelta, limit: DateTime<Utc>) -> Result<Self> {
        if unit.num_milliseconds() <= 0 {
            return Err(Error::invalid_input(format!(
                "bucket unit must be positive, got {unit}"
            )));
        }
        let start_ms = window.start.timestamp_millis();
        let aligned = start_ms - start_ms.rem_euclid(unit.num_milliseconds());
        let origin = DateTime::from_timestamp_millis(aligned)
            .ok_or_else(|| Error::invalid_input(format!("cannot align {}", window.start)))?;

        Ok(Self {
            origin,
            unit,
            last: window.end.min(limit),
        })
    }

    /// Start of the first bucket.
    #[must_use]
    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    /// Bucket width.
    #[must_use]
    pub fn unit(&self) -> TimeDelta {
        self.unit
    }

    /// Start of the bucket `index` units after the origin, if it lies on the
    /// grid.
    #[must_use]
    pub fn start_of(&self, index: i64) -> Option<DateTime<Utc>> {
        if index < 0 {
            return None;
        }
        let ms = index
            .checked_mul(self.unit.num_milliseconds())?
            .checked_add(self.origin.timestamp_millis())?;
        let start = DateTime::from_timestamp_millis(ms)?;
        (start <= self.last).then_some(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, h, m, s).unwrap()
    }

    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow::new(start, end).unwrap()
    }

    #[test]
    fn test_resolution_from_str() {
        assert_eq!("all".parse::<Resolution>().unwrap(), Resolution::All);
        assert_eq!("Hour".parse::<Resolution>().unwrap(), Resolution::Hour);
        assert_eq!("DAY".parse::<Resolution>().unwrap(), Resolution::Day);

        let err = "week".parse::<Resolution>().unwrap_err();
        assert!(err.to_string().contains("week"));
    }

    #[test]
    fn test_resolution_display_roundtrip() {
        for resolution in [
            Resolution::All,
            Resolution::Minute,
            Resolution::Hour,
            Resolution::Day,
        ] {
            assert_eq!(resolution.to_string().parse::<Resolution>().unwrap(), resolution);
        }
        assert_eq!(Resolution::default(), Resolution::All);
    }

    #[test]
    fn test_resolution_units() {
        assert!(Resolution::All.unit().is_none());
        assert_eq!(Resolution::Minute.unit(), Some(TimeDelta::seconds(60)));
        assert_eq!(Resolution::Day.unit(), Some(TimeDelta::hours(24)));
    }

    fn grid(window: &TimeWindow, limit: DateTime<Utc>) -> BucketGrid {
        BucketGrid::new(window, TimeDelta::hours(1), limit).unwrap()
    }

    #[test]
    fn test_grid_is_epoch_aligned() {
        let grid = grid(&window(ts(0, 17, 42), ts(3, 0, 0)), ts(23, 0, 0));
        assert_eq!(grid.origin(), ts(0, 0, 0));
        assert_eq!(grid.unit(), TimeDelta::hours(1));

        let starts: Vec<_> = (0..).map_while(|i| grid.start_of(i)).collect();
        assert_eq!(starts, [ts(0, 0, 0), ts(1, 0, 0), ts(2, 0, 0), ts(3, 0, 0)]);
    }

    #[test]
    fn test_grid_stops_at_limit() {
        let grid = grid(&TimeWindow::since(ts(0, 0, 0)), ts(2, 30, 0));
        assert_eq!(grid.start_of(2), Some(ts(2, 0, 0)));
        assert_eq!(grid.start_of(3), None);
    }

    #[test]
    fn test_grid_over_unbounded_window() {
        let grid = BucketGrid::new(
            &TimeWindow::since(ts(0, 0, 0)),
            TimeDelta::minutes(1),
            DateTime::<Utc>::MAX_UTC,
        )
        .unwrap();
        assert_eq!(
            grid.start_of(1440),
            Some(Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(grid.start_of(i64::MAX), None);
    }

    #[test]
    fn test_grid_empty_when_limit_before_origin() {
        let grid = grid(&window(ts(5, 0, 0), ts(6, 0, 0)), ts(1, 0, 0));
        assert_eq!(grid.start_of(0), None);
    }

    #[test]
    fn test_negative_index_is_off_grid() {
        let grid = grid(&window(ts(0, 0, 0), ts(12, 0, 0)), ts(23, 0, 0));
        assert_eq!(grid.start_of(12), Some(ts(12, 0, 0)));
        assert_eq!(grid.start_of(13), None);
        assert_eq!(grid.start_of(-1), None);
    }

    #[test]
    fn test_rejects_zero_unit() {
        assert!(BucketGrid::new(
            &window(ts(0, 0, 0), ts(1, 0, 0)),
            TimeDelta::zero(),
            ts(1, 0, 0)
        )
        .is_err());
    }
}
