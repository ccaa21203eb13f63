//! Schema versioning.
//!
//! The applied version lives in `PRAGMA user_version`. Each [`Migration`]
//! runs in its own transaction together with the version bump, so a database
//! is always at exactly one listed version.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::schema;

/// One schema step.
#[derive(Debug)]
pub struct Migration {
    /// Version the database is at after this step.
    pub version: u32,
    /// Short human description, logged when applied.
    pub description: &'static str,
    /// Statements run in order inside the step's transaction.
    pub statements: &'static [&'static str],
}

/// Every migration, ascending by version.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "users, plots, instruments, measurements, share links",
    statements: schema::BASE_SCHEMA,
}];

/// The version a fully migrated database reports.
#[must_use]
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Bring the database up to [`latest_version`].
///
/// # Errors
///
/// Returns `DatabaseMigration` if the database was written by a newer
/// tiltplot, or the underlying error if a step fails (that step is rolled
/// back).
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {current} is newer than supported version {latest}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, migration)?;
    }
    debug!(version = latest, "Schema up to date");
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for statement in migration.statements {
        tx.execute_batch(statement)?;
    }
    tx.pragma_update(None, "user_version", migration.version)?;
    tx.commit()?;

    info!(
        version = migration.version,
        description = migration.description,
        "Applied schema migration"
    );
    Ok(())
}

/// The version recorded in the database; 0 for a fresh file.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|_| Error::DatabaseMigration {
        message: format!("invalid schema version: {version}"),
    })
}
