//! Plot, instrument, and share-link persistence.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::{millis_column, optional_millis_column, to_millis, Storage};
use crate::error::{Error, Result};
use crate::model::{
    validate_instruments, Instrument, NewInstrument, NewPlot, Plot, PlotId, PlotSummary,
    PlotUpdate, ShareLink,
};

/// Plot and instrument lifecycle plus share-link issuance and lookup.
pub trait PlotRepository: Send + Sync {
    /// Create a plot and its instruments in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an invalid plot; nothing is persisted if any
    /// insert fails.
    fn create_plot(&self, new_plot: &NewPlot, owner: &str) -> Result<Plot>;

    /// Update a plot's name and window. Only the owner may do this.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden` for a non-owner, or `InvalidInput`
    /// for an inverted window.
    fn update_plot(&self, id: PlotId, update: &PlotUpdate, owner: &str) -> Result<Plot>;

    /// Get a plot by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_plot(&self, id: PlotId) -> Result<Option<Plot>>;

    /// List a user's plots, most recent start first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list_plots(&self, owner: &str) -> Result<Vec<PlotSummary>>;

    /// The instruments of a plot in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn instruments(&self, plot_id: PlotId) -> Result<Vec<Instrument>>;

    /// Add instruments to an existing plot. Existing instruments never change.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a key is empty or already used in the plot.
    fn append_instruments(
        &self,
        plot_id: PlotId,
        instruments: &[NewInstrument],
    ) -> Result<Vec<Instrument>>;

    /// Issue the plot's share link, or return the one already issued.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn issue_share_link(&self, plot_id: PlotId) -> Result<ShareLink>;

    /// The plot's share link, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn share_link(&self, plot_id: PlotId) -> Result<Option<Uuid>>;

    /// Find the plot a share link grants access to.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn resolve_share_link(&self, uuid: &Uuid) -> Result<Option<PlotId>>;

    /// Revoke the plot's share link. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn revoke_share_link(&self, plot_id: PlotId) -> Result<bool>;
}

impl PlotRepository for Storage {
    fn create_plot(&self, new_plot: &NewPlot, owner: &str) -> Result<Plot> {
        new_plot.validate()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO plots (name, start_time, end_time, owner) VALUES (?1, ?2, ?3, ?4)",
            params![
                new_plot.name,
                to_millis(new_plot.start_time),
                new_plot.end_time.map(to_millis),
                owner,
            ],
        )?;
        let id = tx.last_insert_rowid();
        insert_instruments(&tx, id, &new_plot.instruments)?;

        // Dropping an uncommitted transaction rolls the plot back
        tx.commit()?;

        info!(
            plot_id = id,
            user_id = owner,
            instruments = new_plot.instruments.len(),
            "Created plot"
        );
        Ok(Plot {
            id,
            name: new_plot.name.clone(),
            start_time: new_plot.start_time,
            end_time: new_plot.end_time,
            owner: owner.to_string(),
        })
    }

    fn update_plot(&self, id: PlotId, update: &PlotUpdate, owner: &str) -> Result<Plot> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let plot = select_plot(&tx, id)?.ok_or_else(|| Error::not_found("plot", id))?;
        if !plot.is_owned_by(owner) {
            return Err(Error::forbidden(format!("plot {id} is not owned by {owner}")));
        }
        update.validate()?;

        tx.execute(
            "UPDATE plots SET name = ?1, start_time = ?2, end_time = ?3 WHERE id = ?4",
            params![
                update.name,
                to_millis(update.start_time),
                update.end_time.map(to_millis),
                id,
            ],
        )?;
        tx.commit()?;

        debug!(plot_id = id, user_id = owner, "Updated plot");
        Ok(Plot {
            id,
            name: update.name.clone(),
            start_time: update.start_time,
            end_time: update.end_time,
            owner: plot.owner,
        })
    }

    fn get_plot(&self, id: PlotId) -> Result<Option<Plot>> {
        let conn = self.conn()?;
        select_plot(&conn, id)
    }

    fn list_plots(&self, owner: &str) -> Result<Vec<PlotSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r"
            SELECT p.id, p.name, p.start_time, p.end_time, p.owner, s.uuid
            FROM plots p LEFT JOIN share_links s ON s.plot_id = p.id
            WHERE p.owner = ?1
            ORDER BY p.start_time DESC, p.id DESC
            ",
        )?;

        let summaries = stmt
            .query_map([owner], |row| {
                let plot = row_to_plot(row)?;
                let share_link = optional_uuid_column(row, 5)?;
                Ok(PlotSummary::new(&plot, share_link))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(summaries)
    }

    fn instruments(&self, plot_id: PlotId) -> Result<Vec<Instrument>> {
        let conn = self.conn()?;
        select_instruments(&conn, plot_id)
    }

    fn append_instruments(
        &self,
        plot_id: PlotId,
        instruments: &[NewInstrument],
    ) -> Result<Vec<Instrument>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if select_plot(&tx, plot_id)?.is_none() {
            return Err(Error::not_found("plot", plot_id));
        }
        let existing: HashSet<String> = select_instruments(&tx, plot_id)?
            .into_iter()
            .map(|instrument| instrument.key)
            .collect();
        validate_instruments(instruments, &existing)?;

        let added = insert_instruments(&tx, plot_id, instruments)?;
        tx.commit()?;

        debug!(plot_id, added = added.len(), "Appended instruments");
        Ok(added)
    }

    fn issue_share_link(&self, plot_id: PlotId) -> Result<ShareLink> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO share_links (plot_id, uuid) VALUES (?1, ?2)",
            params![plot_id, Uuid::new_v4().to_string()],
        )?;
        let uuid = tx.query_row(
            "SELECT uuid FROM share_links WHERE plot_id = ?1",
            [plot_id],
            |row| uuid_column(row, 0),
        )?;
        tx.commit()?;

        if inserted == 1 {
            info!(plot_id, "Issued share link");
        }
        Ok(ShareLink { plot_id, uuid })
    }

    fn share_link(&self, plot_id: PlotId) -> Result<Option<Uuid>> {
        let conn = self.conn()?;
        let uuid = conn
            .query_row(
                "SELECT uuid FROM share_links WHERE plot_id = ?1",
                [plot_id],
                |row| uuid_column(row, 0),
            )
            .optional()?;
        Ok(uuid)
    }

    fn resolve_share_link(&self, uuid: &Uuid) -> Result<Option<PlotId>> {
        let conn = self.conn()?;
        let plot_id = conn
            .query_row(
                "SELECT plot_id FROM share_links WHERE uuid = ?1",
                [uuid.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(plot_id)
    }

    fn revoke_share_link(&self, plot_id: PlotId) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM share_links WHERE plot_id = ?1", [plot_id])?;
        if removed > 0 {
            info!(plot_id, "Revoked share link");
        }
        Ok(removed > 0)
    }
}

fn select_plot(conn: &Connection, id: PlotId) -> Result<Option<Plot>> {
    let plot = conn
        .query_row(
            "SELECT id, name, start_time, end_time, owner FROM plots WHERE id = ?1",
            [id],
            row_to_plot,
        )
        .optional()?;
    Ok(plot)
}

fn select_instruments(conn: &Connection, plot_id: PlotId) -> Result<Vec<Instrument>> {
    let mut stmt = conn.prepare(
        "SELECT id, key, name, kind, plot_id FROM instruments WHERE plot_id = ?1 ORDER BY id",
    )?;
    let instruments = stmt
        .query_map([plot_id], |row| {
            Ok(Instrument {
                id: row.get(0)?,
                key: row.get(1)?,
                name: row.get(2)?,
                kind: row.get(3)?,
                plot_id: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(instruments)
}

fn insert_instruments(
    conn: &Connection,
    plot_id: PlotId,
    instruments: &[NewInstrument],
) -> Result<Vec<Instrument>> {
    let mut stmt = conn
        .prepare_cached("INSERT INTO instruments (plot_id, key, name, kind) VALUES (?1, ?2, ?3, ?4)")?;

    let mut inserted = Vec::with_capacity(instruments.len());
    for instrument in instruments {
        stmt.execute(params![
            plot_id,
            instrument.key,
            instrument.name,
            instrument.kind
        ])?;
        inserted.push(Instrument {
            id: conn.last_insert_rowid(),
            key: instrument.key.clone(),
            name: instrument.name.clone(),
            kind: instrument.kind.clone(),
            plot_id,
        });
    }
    Ok(inserted)
}

/// Convert a `(id, name, start_time, end_time, owner)` row to a Plot.
fn row_to_plot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Plot> {
    Ok(Plot {
        id: row.get(0)?,
        name: row.get(1)?,
        start_time: millis_column(row, 2)?,
        end_time: optional_millis_column(row, 3)?,
        owner: row.get(4)?,
    })
}

fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn optional_uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        Uuid::parse_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}
