//! Raw measurement storage and the range and grouped-average reads.
//!
//! Every read takes the set of channel keys and the owning user explicitly;
//! which plot the caller is looking at is decided one layer up.

use chrono::{DateTime, Utc};
use rusqlite::ToSql;
use tracing::debug;

use super::{millis_column, placeholders, to_millis, Storage};
use crate::error::{Error, Result};
use crate::model::{Measurement, TimeWindow};

/// Average of one channel over one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAverage {
    /// Channel key.
    pub key: String,
    /// Bucket index counted in whole units from the origin.
    pub bucket: i64,
    /// Rounded mean of the bucket's values.
    pub value: f64,
}

/// Append-only store of raw samples.
pub trait MeasurementStore: Send + Sync {
    /// Store a batch of samples for `owner`. All or nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if any sample fails structural validation, in
    /// which case nothing is stored.
    fn append(&self, samples: &[Measurement], owner: &str) -> Result<usize>;

    /// Samples for `keys` inside `window`, most recent first, ties by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn range_read(
        &self,
        keys: &[String],
        owner: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Measurement>>;

    /// Per-key averages of samples inside `window`, grouped by
    /// `(ts - origin) / unit` and rounded to `decimals` places.
    ///
    /// `origin` must not lie after `window.start`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a non-positive unit or an origin after the
    /// window start.
    fn bucket_averages(
        &self,
        keys: &[String],
        owner: &str,
        window: &TimeWindow,
        origin: DateTime<Utc>,
        unit_ms: i64,
        decimals: u32,
    ) -> Result<Vec<BucketAverage>>;

    /// The most recent sample time for `keys` inside `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn latest_timestamp(
        &self,
        keys: &[String],
        owner: &str,
        window: &TimeWindow,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Every sample for `keys` taken exactly at `timestamp`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_at(
        &self,
        keys: &[String],
        owner: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Measurement>>;
}

impl MeasurementStore for Storage {
    fn append(&self, samples: &[Measurement], owner: &str) -> Result<usize> {
        for sample in samples {
            sample.validate()?;
        }
        if samples.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO measurements (owner, key, value, ts) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for sample in samples {
                stmt.execute((owner, &sample.key, sample.value, to_millis(sample.timestamp)))?;
            }
        }
        tx.commit()?;

        debug!(user_id = owner, count = samples.len(), "Stored measurements");
        Ok(samples.len())
    }

    fn range_read(
        &self,
        keys: &[String],
        owner: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Measurement>> {
        if keys.is_empty() || window.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r"
            SELECT key, value, ts FROM measurements
            WHERE owner = ?1 AND ts >= ?2 AND ts < ?3 AND key IN ({})
            ORDER BY ts DESC, key
            ",
            placeholders(4, keys.len())
        );
        let (start, end) = (to_millis(window.start), to_millis(window.end));
        let mut values: Vec<&dyn ToSql> = vec![&owner, &start, &end];
        values.extend(keys.iter().map(|k| k as &dyn ToSql));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(values.as_slice(), row_to_measurement)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn bucket_averages(
        &self,
        keys: &[String],
        owner: &str,
        window: &TimeWindow,
        origin: DateTime<Utc>,
        unit_ms: i64,
        decimals: u32,
    ) -> Result<Vec<BucketAverage>> {
        if unit_ms <= 0 {
            return Err(Error::invalid_input(format!(
                "bucket unit must be positive, got {unit_ms}ms"
            )));
        }
        if origin > window.start {
            return Err(Error::invalid_input(format!(
                "bucket origin ({origin}) is after the window start ({})",
                window.start
            )));
        }
        if keys.is_empty() || window.is_empty() {
            return Ok(Vec::new());
        }

        // ts >= origin inside the window, so integer division is a floor
        let sql = format!(
            r"
            SELECT key, (ts - ?4) / ?5 AS bucket, ROUND(AVG(value), ?6)
            FROM measurements
            WHERE owner = ?1 AND ts >= ?2 AND ts < ?3 AND key IN ({})
            GROUP BY key, bucket
            ORDER BY bucket, key
            ",
            placeholders(7, keys.len())
        );
        let (start, end) = (to_millis(window.start), to_millis(window.end));
        let origin_ms = to_millis(origin);
        let decimals = i64::from(decimals);
        let mut values: Vec<&dyn ToSql> =
            vec![&owner, &start, &end, &origin_ms, &unit_ms, &decimals];
        values.extend(keys.iter().map(|k| k as &dyn ToSql));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(values.as_slice(), |row| {
                Ok(BucketAverage {
                    key: row.get(0)?,
                    bucket: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn latest_timestamp(
        &self,
        keys: &[String],
        owner: &str,
        window: &TimeWindow,
    ) -> Result<Option<DateTime<Utc>>> {
        if keys.is_empty() || window.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT MAX(ts) FROM measurements WHERE owner = ?1 AND ts >= ?2 AND ts < ?3 AND key IN ({})",
            placeholders(4, keys.len())
        );
        let (start, end) = (to_millis(window.start), to_millis(window.end));
        let mut values: Vec<&dyn ToSql> = vec![&owner, &start, &end];
        values.extend(keys.iter().map(|k| k as &dyn ToSql));

        let conn = self.conn()?;
        let latest: Option<i64> = conn.query_row(&sql, values.as_slice(), |row| row.get(0))?;
        latest
            .map(|ms| {
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| Error::internal(format!("stored timestamp {ms} out of range")))
            })
            .transpose()
    }

    fn read_at(
        &self,
        keys: &[String],
        owner: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Measurement>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT key, value, ts FROM measurements WHERE owner = ?1 AND ts = ?2 AND key IN ({}) ORDER BY key",
            placeholders(3, keys.len())
        );
        let ts = to_millis(timestamp);
        let mut values: Vec<&dyn ToSql> = vec![&owner, &ts];
        values.extend(keys.iter().map(|k| k as &dyn ToSql));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(values.as_slice(), row_to_measurement)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Convert a `(key, value, ts)` row to a Measurement.
fn row_to_measurement(row: &rusqlite::Row<'_>) -> rusqlite::Result<Measurement> {
    Ok(Measurement {
        key: row.get(0)?,
        value: row.get(1)?,
        timestamp: millis_column(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::UserDirectory;
    use chrono::TimeZone;

    const HOUR_MS: i64 = 3_600_000;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, h, m, s).unwrap()
    }

    fn day() -> TimeWindow {
        TimeWindow::new(ts(0, 0, 0), Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()).unwrap()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn create_test_storage() -> Storage {
        let storage = Storage::open_in_memory().expect("failed to create test storage");
        storage.ensure_user("alice", None, None).unwrap();
        storage.ensure_user("bob", None, None).unwrap();
        storage
    }

    #[test]
    fn test_append_and_range_read_descending() {
        let storage = create_test_storage();
        let stored = storage
            .append(
                &[
                    Measurement::new("temp", 18.0, ts(0, 0, 30)),
                    Measurement::new("temp", 19.0, ts(1, 15, 0)),
                    Measurement::new("temp", 20.0, ts(2, 59, 59)),
                ],
                "alice",
            )
            .unwrap();
        assert_eq!(stored, 3);

        let rows = storage.range_read(&keys(&["temp"]), "alice", &day()).unwrap();
        let times: Vec<_> = rows.iter().map(|m| m.timestamp).collect();
        assert_eq!(times, [ts(2, 59, 59), ts(1, 15, 0), ts(0, 0, 30)]);
    }

    #[test]
    fn test_append_is_all_or_nothing() {
        let storage = create_test_storage();
        let err = storage
            .append(
                &[
                    Measurement::new("temp", 18.0, ts(0, 0, 0)),
                    Measurement::new("temp", f64::INFINITY, ts(0, 1, 0)),
                ],
                "alice",
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(storage.stats().unwrap().measurements, 0);
    }

    #[test]
    fn test_append_accepts_keys_without_instruments() {
        let storage = create_test_storage();
        let stored = storage
            .append(&[Measurement::new("orphan", -1e9, ts(0, 0, 0))], "alice")
            .unwrap();
        assert_eq!(stored, 1);
        assert_eq!(storage.append(&[], "alice").unwrap(), 0);
    }

    #[test]
    fn test_range_read_is_half_open_and_key_filtered() {
        let storage = create_test_storage();
        storage
            .append(
                &[
                    Measurement::new("temp", 1.0, ts(1, 0, 0)),
                    Measurement::new("temp", 2.0, ts(2, 0, 0)),
                    Measurement::new("gravity", 1.05, ts(1, 30, 0)),
                    Measurement::new("battery", 3.7, ts(1, 30, 0)),
                ],
                "alice",
            )
            .unwrap();

        let window = TimeWindow::new(ts(1, 0, 0), ts(2, 0, 0)).unwrap();
        let rows = storage
            .range_read(&keys(&["temp", "gravity"]), "alice", &window)
            .unwrap();
        let seen: Vec<(&str, DateTime<Utc>)> =
            rows.iter().map(|m| (m.key.as_str(), m.timestamp)).collect();
        assert_eq!(seen, [("gravity", ts(1, 30, 0)), ("temp", ts(1, 0, 0))]);
    }

    #[test]
    fn test_range_read_is_scoped_to_owner() {
        let storage = create_test_storage();
        storage
            .append(&[Measurement::new("temp", 1.0, ts(1, 0, 0))], "alice")
            .unwrap();
        storage
            .append(&[Measurement::new("temp", 99.0, ts(1, 0, 0))], "bob")
            .unwrap();

        let rows = storage.range_read(&keys(&["temp"]), "alice", &day()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 1.0);
    }

    #[test]
    fn test_range_read_empty_keys() {
        let storage = create_test_storage();
        storage
            .append(&[Measurement::new("temp", 1.0, ts(1, 0, 0))], "alice")
            .unwrap();
        assert!(storage.range_read(&[], "alice", &day()).unwrap().is_empty());
    }

    #[test]
    fn test_bucket_averages_hourly() {
        let storage = create_test_storage();
        storage
            .append(
                &[
                    Measurement::new("temp", 20.0, ts(1, 10, 0)),
                    Measurement::new("temp", 22.0, ts(1, 40, 0)),
                    Measurement::new("temp", 10.0, ts(3, 0, 0)),
                ],
                "alice",
            )
            .unwrap();

        let rows = storage
            .bucket_averages(&keys(&["temp"]), "alice", &day(), ts(0, 0, 0), HOUR_MS, 2)
            .unwrap();
        assert_eq!(
            rows,
            [
                BucketAverage {
                    key: "temp".to_string(),
                    bucket: 1,
                    value: 21.0
                },
                BucketAverage {
                    key: "temp".to_string(),
                    bucket: 3,
                    value: 10.0
                },
            ]
        );
    }

    #[test]
    fn test_bucket_averages_rounds() {
        let storage = create_test_storage();
        storage
            .append(
                &[
                    Measurement::new("gravity", 1.0, ts(0, 1, 0)),
                    Measurement::new("gravity", 1.0, ts(0, 2, 0)),
                    Measurement::new("gravity", 1.001, ts(0, 3, 0)),
                ],
                "alice",
            )
            .unwrap();

        let two = storage
            .bucket_averages(&keys(&["gravity"]), "alice", &day(), ts(0, 0, 0), HOUR_MS, 2)
            .unwrap();
        assert_eq!(two[0].value, 1.0);

        let four = storage
            .bucket_averages(&keys(&["gravity"]), "alice", &day(), ts(0, 0, 0), HOUR_MS, 4)
            .unwrap();
        assert_eq!(four[0].value, 1.0003);
    }

    #[test]
    fn test_bucket_boundary_sample_goes_to_later_bucket() {
        let storage = create_test_storage();
        storage
            .append(&[Measurement::new("temp", 5.0, ts(2, 0, 0))], "alice")
            .unwrap();

        let rows = storage
            .bucket_averages(&keys(&["temp"]), "alice", &day(), ts(0, 0, 0), HOUR_MS, 2)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket, 2);
    }

    #[test]
    fn test_bucket_averages_rejects_bad_parameters() {
        let storage = create_test_storage();
        let err = storage
            .bucket_averages(&keys(&["temp"]), "alice", &day(), ts(0, 0, 0), 0, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = storage
            .bucket_averages(&keys(&["temp"]), "alice", &day(), ts(5, 0, 0), HOUR_MS, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_latest_timestamp_and_read_at() {
        let storage = create_test_storage();
        storage
            .append(
                &[
                    Measurement::new("temp", 20.0, ts(1, 0, 0)),
                    Measurement::new("temp", 21.0, ts(2, 0, 0)),
                    Measurement::new("gravity", 1.04, ts(2, 0, 0)),
                    Measurement::new("battery", 3.9, ts(3, 0, 0)),
                ],
                "alice",
            )
            .unwrap();

        let channels = keys(&["temp", "gravity"]);
        let latest = storage
            .latest_timestamp(&channels, "alice", &day())
            .unwrap()
            .unwrap();
        assert_eq!(latest, ts(2, 0, 0));

        let rows = storage.read_at(&channels, "alice", latest).unwrap();
        let seen: Vec<(&str, f64)> = rows.iter().map(|m| (m.key.as_str(), m.value)).collect();
        assert_eq!(seen, [("gravity", 1.04), ("temp", 21.0)]);
    }

    #[test]
    fn test_latest_timestamp_none() {
        let storage = create_test_storage();
        assert!(storage
            .latest_timestamp(&keys(&["temp"]), "alice", &day())
            .unwrap()
            .is_none());
        assert!(storage
            .latest_timestamp(&[], "alice", &day())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unbounded_window() {
        let storage = create_test_storage();
        let far = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();
        storage
            .append(&[Measurement::new("temp", 1.0, far)], "alice")
            .unwrap();

        let window = TimeWindow::since(ts(0, 0, 0));
        let rows = storage.range_read(&keys(&["temp"]), "alice", &window).unwrap();
        assert_eq!(rows[0].timestamp, far);
    }
}
