//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Perda-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Harvested regulation records, unique by detail URL across all sources
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    number TEXT,
    year INTEGER,
    region_name TEXT,
    region_type TEXT,
    status TEXT,
    detail_url TEXT NOT NULL UNIQUE,
    document_url TEXT,
    document_path TEXT,
    description TEXT,
    metadata TEXT,
    captured_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
CREATE INDEX IF NOT EXISTS idx_records_year ON records(year);
CREATE INDEX IF NOT EXISTS idx_records_region ON records(region_name);

-- Outcome of every page processed, used to rebuild checkpoints
CREATE TABLE IF NOT EXISTS page_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    page INTEGER NOT NULL,
    items_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error_message TEXT,
    logged_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_page_log_source_page ON page_log(source, page);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
