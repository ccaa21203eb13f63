//! Core data types for tiltplot.
//!
//! Plots, their instruments, raw measurements, and share links. A measurement
//! never names a plot: it belongs to a plot when its key matches one of the
//! plot's instruments and its timestamp lies inside the plot's window.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Database identifier of a plot.
pub type PlotId = i64;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque identity (the token subject).
    pub id: String,
    /// Display name from the first login.
    pub name: Option<String>,
    /// Email from the first login.
    pub email: Option<String>,
    /// Long-lived ingestion secret.
    #[serde(skip_serializing)]
    pub device_key: String,
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting an end before the start.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `end < start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(Error::invalid_input(format!(
                "start time ({start}) must not be after end time ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// A window with no upper bound.
    #[must_use]
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// The overlap of two windows. May be empty.
    #[must_use]
    pub fn intersect(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        }
    }

    /// Whether no instant lies inside the window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether `ts` lies inside the window.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// A recording session.
///
/// The owner is never serialized so that public views of a plot do not leak
/// who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plot {
    /// Identifier assigned by storage.
    pub id: PlotId,
    /// Display name.
    pub name: String,
    /// Start of the plot's window.
    pub start_time: DateTime<Utc>,
    /// End of the plot's window; `None` while the plot is active.
    pub end_time: Option<DateTime<Utc>>,
    /// Owning user id.
    #[serde(skip)]
    pub owner: String,
}

impl Plot {
    /// A plot without an end time is still recording.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// The window that decides which measurements belong to the plot.
    #[must_use]
    pub fn window(&self) -> TimeWindow {
        match self.end_time {
            Some(end) => TimeWindow {
                start: self.start_time,
                end,
            },
            None => TimeWindow::since(self.start_time),
        }
    }

    /// Whether `user_id` owns this plot.
    #[must_use]
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner == user_id
    }
}

/// Listing entry for a plot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotSummary {
    /// Plot id.
    pub id: PlotId,
    /// Display name.
    pub name: String,
    /// Start of the plot's window.
    pub start_time: DateTime<Utc>,
    /// End of the plot's window.
    pub end_time: Option<DateTime<Utc>>,
    /// Derived from `end_time` at read time.
    pub active: bool,
    /// Public share link, if one was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_link: Option<Uuid>,
}

impl PlotSummary {
    /// Build a summary from a plot row and its optional share link.
    #[must_use]
    pub fn new(plot: &Plot, share_link: Option<Uuid>) -> Self {
        Self {
            id: plot.id,
            name: plot.name.clone(),
            start_time: plot.start_time,
            end_time: plot.end_time,
            active: plot.is_active(),
            share_link,
        }
    }
}

/// A plot together with its channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotDetails {
    /// The plot row.
    #[serde(flatten)]
    pub plot: Plot,
    /// Derived from `end_time` at read time.
    pub active: bool,
    /// The plot's channels.
    pub instruments: Vec<Instrument>,
    /// Public share link, if one was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_link: Option<Uuid>,
}

/// Input for creating a plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlot {
    /// Display name.
    pub name: String,
    /// Start of the plot's window.
    pub start_time: DateTime<Utc>,
    /// Optional end of the plot's window.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Channels created together with the plot.
    #[serde(default)]
    pub instruments: Vec<NewInstrument>,
}

impl NewPlot {
    /// Check the window ordering and the instrument keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the end is not after the start, or if the
    /// instrument keys are empty or repeated.
    pub fn validate(&self) -> Result<()> {
        validate_window(self.start_time, self.end_time)?;
        validate_instruments(&self.instruments, &HashSet::new())
    }
}

/// Input for updating a plot's mutable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotUpdate {
    /// New display name.
    pub name: String,
    /// New window start.
    pub start_time: DateTime<Utc>,
    /// New window end; `None` reactivates the plot.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl PlotUpdate {
    /// Check the window ordering.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the end is not after the start.
    pub fn validate(&self) -> Result<()> {
        validate_window(self.start_time, self.end_time)
    }
}

fn validate_window(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<()> {
    match end {
        Some(end) if end <= start => Err(Error::invalid_input(format!(
            "plot end time ({end}) must be after its start time ({start})"
        ))),
        _ => Ok(()),
    }
}

/// Check a batch of new instruments against each other and against `existing`
/// keys of the same plot.
pub(crate) fn validate_instruments(
    instruments: &[NewInstrument],
    existing: &HashSet<String>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for instrument in instruments {
        if instrument.key.is_empty() {
            return Err(Error::invalid_input("instrument key must not be empty"));
        }
        if existing.contains(&instrument.key) || !seen.insert(instrument.key.as_str()) {
            return Err(Error::invalid_input(format!(
                "duplicate instrument key '{}'",
                instrument.key
            )));
        }
    }
    Ok(())
}

/// A named channel of a plot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    /// Identifier assigned by storage.
    pub id: i64,
    /// Join key against measurement keys, unique within the plot.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Free-form sensor type, e.g. `temperature_celsius`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Owning plot.
    pub plot_id: PlotId,
}

/// Input for creating an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstrument {
    /// Join key against measurement keys.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Free-form sensor type.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl NewInstrument {
    /// Create a new instrument.
    #[must_use]
    pub fn new(key: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// A single raw sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Channel key.
    pub key: String,
    /// Sampled value.
    pub value: f64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    /// Create a new measurement.
    #[must_use]
    pub fn new(key: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }

    /// Structural check; value ranges and key existence are not checked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty key or a non-finite value.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::invalid_input("measurement key must not be empty"));
        }
        if !self.value.is_finite() {
            return Err(Error::invalid_input(format!(
                "measurement '{}' at {} has non-finite value",
                self.key, self.timestamp
            )));
        }
        Ok(())
    }
}

/// Anonymous read capability for one plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    /// The shared plot.
    pub plot_id: PlotId,
    /// Public identifier of the link.
    pub uuid: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, h, m, s).unwrap()
    }

    fn plot(end: Option<DateTime<Utc>>) -> Plot {
        Plot {
            id: 1,
            name: "brew".to_string(),
            start_time: ts(0, 0, 0),
            end_time: end,
            owner: "alice".to_string(),
        }
    }

    #[test]
    fn test_time_window_rejects_inverted() {
        assert!(TimeWindow::new(ts(2, 0, 0), ts(1, 0, 0)).is_err());
        assert!(TimeWindow::new(ts(1, 0, 0), ts(1, 0, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_time_window_is_half_open() {
        let window = TimeWindow::new(ts(1, 0, 0), ts(2, 0, 0)).unwrap();
        assert!(window.contains(ts(1, 0, 0)));
        assert!(window.contains(ts(1, 59, 59)));
        assert!(!window.contains(ts(2, 0, 0)));
    }

    #[test]
    fn test_time_window_intersect() {
        let a = TimeWindow::new(ts(0, 0, 0), ts(3, 0, 0)).unwrap();
        let b = TimeWindow::new(ts(1, 0, 0), ts(5, 0, 0)).unwrap();
        let both = a.intersect(&b);
        assert_eq!(both.start, ts(1, 0, 0));
        assert_eq!(both.end, ts(3, 0, 0));

        let disjoint = TimeWindow::new(ts(4, 0, 0), ts(5, 0, 0)).unwrap();
        assert!(a.intersect(&disjoint).is_empty());
    }

    #[test]
    fn test_plot_active_and_window() {
        let active = plot(None);
        assert!(active.is_active());
        assert!(active.window().contains(Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()));

        let closed = plot(Some(ts(12, 0, 0)));
        assert!(!closed.is_active());
        assert!(!closed.window().contains(ts(12, 0, 0)));
    }

    #[test]
    fn test_plot_serialization_omits_owner() {
        let json = serde_json::to_string(&plot(None)).unwrap();
        assert!(!json.contains("alice"));
        assert!(json.contains("startTime"));
    }

    #[test]
    fn test_plot_summary_derives_active() {
        let summary = PlotSummary::new(&plot(Some(ts(5, 0, 0))), None);
        assert!(!summary.active);
        let summary = PlotSummary::new(&plot(None), Some(Uuid::new_v4()));
        assert!(summary.active);
        assert!(summary.share_link.is_some());
    }

    #[test]
    fn test_new_plot_validate_window() {
        let mut new_plot = NewPlot {
            name: "brew".to_string(),
            start_time: ts(1, 0, 0),
            end_time: Some(ts(1, 0, 0)),
            instruments: vec![],
        };
        assert!(new_plot.validate().is_err());

        new_plot.end_time = Some(ts(2, 0, 0));
        assert!(new_plot.validate().is_ok());

        new_plot.end_time = None;
        assert!(new_plot.validate().is_ok());
    }

    #[test]
    fn test_new_plot_rejects_duplicate_keys() {
        let new_plot = NewPlot {
            name: "brew".to_string(),
            start_time: ts(0, 0, 0),
            end_time: None,
            instruments: vec![
                NewInstrument::new("temp", "Temperature", "temperature_celsius"),
                NewInstrument::new("temp", "Again", "temperature_celsius"),
            ],
        };
        let err = new_plot.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate instrument key"));
    }

    #[test]
    fn test_validate_instruments_against_existing() {
        let existing: HashSet<String> = ["temp".to_string()].into_iter().collect();
        let batch = [NewInstrument::new("temp", "Temperature", "")];
        assert!(validate_instruments(&batch, &existing).is_err());

        let batch = [NewInstrument::new("gravity", "Gravity", "")];
        assert!(validate_instruments(&batch, &existing).is_ok());

        let batch = [NewInstrument::new("", "Nameless", "")];
        assert!(validate_instruments(&batch, &HashSet::new()).is_err());
    }

    #[test]
    fn test_plot_update_validate() {
        let update = PlotUpdate {
            name: "brew".to_string(),
            start_time: ts(3, 0, 0),
            end_time: Some(ts(2, 0, 0)),
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_measurement_validate() {
        assert!(Measurement::new("temp", 20.5, ts(0, 0, 0)).validate().is_ok());
        assert!(Measurement::new("", 20.5, ts(0, 0, 0)).validate().is_err());
        assert!(Measurement::new("temp", f64::NAN, ts(0, 0, 0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_instrument_type_field_name() {
        let json = r#"{"key": "temp", "name": "Temperature", "type": "temperature_celsius"}"#;
        let instrument: NewInstrument = serde_json::from_str(json).unwrap();
        assert_eq!(instrument.kind, "temperature_celsius");
    }

    #[test]
    fn test_new_plot_deserialize_defaults() {
        let json = r#"{"name": "brew", "startTime": "2023-01-01T00:00:00Z"}"#;
        let new_plot: NewPlot = serde_json::from_str(json).unwrap();
        assert!(new_plot.end_time.is_none());
        assert!(new_plot.instruments.is_empty());
    }
}
