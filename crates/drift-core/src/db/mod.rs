//! SQLite persistence for the sandbox planning tree.
//!
//! A sandbox database is one file per planning workspace. Opening it applies
//! the connection pragmas and upgrades the schema in place; a file written
//! by a newer build is refused rather than downgraded. Pragmas: WAL so the
//! host app can read while a sync run writes, a 5s busy wait to ride out
//! short lock contention, foreign keys ON so parent links stay honest.

pub mod schema;
pub mod store;

pub use store::SqliteSandboxStore;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// How long a connection waits on a locked database before failing.
pub const BUSY_WAIT: Duration = Duration::from_secs(5);

/// Open (or create) the sandbox database at `path`, ready for use: pragmas
/// applied, schema current.
///
/// # Errors
///
/// Fails when the file cannot be opened or its schema cannot be brought up
/// to date, including when it was written by a newer build.
pub fn open_sandbox(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create sandbox directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open sandbox database {}", path.display()))?;
    apply_pragmas(&conn).context("apply sandbox connection pragmas")?;
    schema::upgrade_to_latest(&mut conn)
        .with_context(|| format!("prepare schema of {}", path.display()))?;

    Ok(conn)
}

pub(crate) fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_WAIT)?;
    // journal_mode is the one pragma that answers with a row.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
