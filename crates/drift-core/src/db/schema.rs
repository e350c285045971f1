//! Schema of the sandbox planning database, and the bookkeeping that brings
//! an opened file up to the version this build writes.
//!
//! One table holds the whole tree, stored flat: every row carries its
//! `parent_id` and siblings order by `sort_order`. Governance linkage is a
//! `(ref_kind, ref_id)` pair with CHECK constraints keeping it consistent
//! with the committed flag. The installed version is stamped into
//! `PRAGMA user_version` (and mirrored into `sandbox_meta` for inspection
//! without a pragma); upgrades run one transaction per step.

use anyhow::{Result, bail};
use rusqlite::Connection;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 2;

struct Upgrade {
    to: u32,
    ddl: &'static str,
}

const UPGRADES: [Upgrade; 2] = [
    Upgrade {
        to: 1,
        ddl: V1_PLANNING_TREE,
    },
    Upgrade {
        to: 2,
        ddl: V2_READ_INDEXES,
    },
];

/// v1: the planning tree plus the metadata row.
const V1_PLANNING_TREE: &str = r#"
CREATE TABLE IF NOT EXISTS plan_items (
    item_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    parent_id TEXT REFERENCES plan_items(item_id) ON DELETE SET NULL,
    kind TEXT NOT NULL CHECK (kind IN ('component', 'milestone', 'deliverable', 'task')),
    name TEXT NOT NULL DEFAULT '',
    description TEXT,
    start_date TEXT,
    end_date TEXT,
    duration_days INTEGER,
    status TEXT NOT NULL DEFAULT 'not_started'
        CHECK (status IN ('not_started', 'in_progress', 'completed', 'on_hold', 'cancelled')),
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    billable INTEGER NOT NULL DEFAULT 0 CHECK (billable IN (0, 1)),
    sort_order INTEGER NOT NULL DEFAULT 0,
    indent_level INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
    deleted_at_us INTEGER,
    is_committed INTEGER NOT NULL DEFAULT 0 CHECK (is_committed IN (0, 1)),
    committed_at_us INTEGER,
    ref_kind TEXT CHECK (ref_kind IS NULL OR ref_kind IN ('milestone', 'deliverable', 'task')),
    ref_id TEXT,
    last_synced_at_us INTEGER,
    CHECK ((ref_kind IS NULL) = (ref_id IS NULL)),
    CHECK ((is_committed = 0) = (ref_id IS NULL)),
    CHECK (ref_kind IS NULL OR ref_kind = kind)
);

CREATE TABLE IF NOT EXISTS sandbox_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO sandbox_meta (id, schema_version, created_at_us)
VALUES (1, 1, 0);
"#;

/// v2: read-path indexes.
const V2_READ_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_plan_items_project_deleted
    ON plan_items(project_id, is_deleted, sort_order);

CREATE INDEX IF NOT EXISTS idx_plan_items_project_kind
    ON plan_items(project_id, kind, is_deleted);

CREATE INDEX IF NOT EXISTS idx_plan_items_parent
    ON plan_items(parent_id);

CREATE INDEX IF NOT EXISTS idx_plan_items_ref
    ON plan_items(project_id, ref_kind, ref_id);
"#;

/// Indexes an up-to-date database must contain.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_plan_items_project_deleted",
    "idx_plan_items_project_kind",
    "idx_plan_items_parent",
    "idx_plan_items_ref",
];

/// Schema version stamped into the file. A fresh database reads 0.
///
/// # Errors
///
/// Fails when the pragma cannot be read.
pub fn installed_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    // A stamp outside u32 range was not written by us; saturate so the
    // newer-schema refusal catches it.
    Ok(u32::try_from(raw).unwrap_or(u32::MAX))
}

/// Bring the database up to [`SCHEMA_VERSION`]. Rerun-safe: steps at or
/// below the installed version are skipped, and the DDL itself uses
/// `IF NOT EXISTS`.
///
/// # Errors
///
/// Fails when the file is stamped with a version newer than this build
/// understands (a downgrade write would clobber what the newer build
/// stored), or when a DDL step fails.
pub fn upgrade_to_latest(conn: &mut Connection) -> Result<u32> {
    let installed = installed_version(conn)?;
    if installed > SCHEMA_VERSION {
        bail!(
            "sandbox database is schema v{installed}, but this build understands \
             up to v{SCHEMA_VERSION}; upgrade the application to open it"
        );
    }

    for upgrade in &UPGRADES {
        if upgrade.to <= installed {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(upgrade.ddl)?;
        tx.pragma_update(None, "user_version", i64::from(upgrade.to))?;
        tx.execute(
            "UPDATE sandbox_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(upgrade.to)],
        )?;
        tx.commit()?;
    }

    Ok(SCHEMA_VERSION)
}
