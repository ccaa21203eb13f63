//! `SQLite` schema definitions for tiltplot.
//!
//! Timestamps are stored as integer unix milliseconds so that range scans and
//! bucketing are plain integer arithmetic.

/// SQL statement to create the users table.
pub const CREATE_USERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT,
    email TEXT,
    device_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the plots table.
pub const CREATE_PLOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS plots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    owner TEXT NOT NULL REFERENCES users (id)
)
";

/// SQL statement to create an index for listing a user's plots.
pub const CREATE_PLOTS_OWNER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_plots_owner_start ON plots(owner, start_time DESC)
";

/// SQL statement to create the instruments table.
///
/// Keys are unique per plot, not globally.
pub const CREATE_INSTRUMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS instruments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plot_id INTEGER NOT NULL REFERENCES plots (id),
    key TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    UNIQUE (plot_id, key)
)
";

/// SQL statement to create the measurements table.
///
/// Measurements carry no plot id; plot membership is computed at read time.
pub const CREATE_MEASUREMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL REFERENCES users (id),
    key TEXT NOT NULL,
    value REAL NOT NULL,
    ts INTEGER NOT NULL
)
";

/// SQL statement to create the index used by every measurement read.
pub const CREATE_MEASUREMENTS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_measurements_owner_key_ts ON measurements(owner, key, ts)
";

/// SQL statement to create the share links table (at most one per plot).
pub const CREATE_SHARE_LINKS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS share_links (
    plot_id INTEGER PRIMARY KEY REFERENCES plots (id),
    uuid TEXT NOT NULL UNIQUE
)
";

/// Statements of the first schema version, in order.
pub const BASE_SCHEMA: &[&str] = &[
    CREATE_USERS_TABLE,
    CREATE_PLOTS_TABLE,
    CREATE_PLOTS_OWNER_INDEX,
    CREATE_INSTRUMENTS_TABLE,
    CREATE_MEASUREMENTS_TABLE,
    CREATE_MEASUREMENTS_INDEX,
    CREATE_SHARE_LINKS_TABLE,
];
