//! Grouping flat rows into one row per timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::Measurement;

/// One row of a series: every channel's value at `date`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// Sample time, or bucket start for averaged series.
    pub date: DateTime<Utc>,
    /// Channel key to value. Channels without a value are absent.
    pub values: BTreeMap<String, f64>,
}

/// A pivoted series, ascending by date.
pub type Series = Vec<SeriesPoint>;

/// Group rows by timestamp. Output is ascending regardless of input order.
///
/// If a channel has two rows at the same instant the later row wins.
pub fn pivot<I>(rows: I) -> Series
where
    I: IntoIterator<Item = Measurement>,
{
    let mut grouped: BTreeMap<DateTime<Utc>, BTreeMap<String, f64>> = BTreeMap::new();
    for row in rows {
        grouped
            .entry(row.timestamp)
            .or_default()
            .insert(row.key, row.value);
    }

    grouped
        .into_iter()
        .map(|(date, values)| SeriesPoint { date, values })
        .collect()
}
