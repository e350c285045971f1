//! [`SandboxStore`] backed by the sandbox SQLite database.

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};

use crate::model::item::{AuthorityRef, ItemKind, PlanItem, SandboxStatus};
use crate::store::{SandboxStore, StoreError};

const COLUMNS: &str = "item_id, project_id, parent_id, kind, name, description, \
     start_date, end_date, duration_days, status, progress, billable, \
     sort_order, indent_level, is_deleted, deleted_at_us, \
     is_committed, committed_at_us, ref_kind, ref_id, last_synced_at_us";

/// Sandbox tree persisted in SQLite. One connection, blocking calls.
pub struct SqliteSandboxStore {
    conn: Connection,
}

impl SqliteSandboxStore {
    /// Open (or create) the database at `path`, migrated to the latest
    /// schema.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: super::open_sandbox(path)?,
        })
    }

    /// Fresh in-memory database, migrated. Test and scratch use.
    ///
    /// # Errors
    ///
    /// Fails when SQLite cannot set up the connection.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        super::apply_pragmas(&conn)?;
        super::schema::upgrade_to_latest(&mut conn)?;
        Ok(Self { conn })
    }
}

fn store_error(error: rusqlite::Error) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Rejected(
                message
                    .clone()
                    .unwrap_or_else(|| "constraint violation".to_string()),
            )
        }
        _ => StoreError::Backend(error.into()),
    }
}

fn parse_failure(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn read_date(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<NaiveDate>> {
    row.get::<_, Option<String>>(index)?
        .map(|raw| NaiveDate::from_str(&raw).map_err(|e| parse_failure(index, e)))
        .transpose()
}

fn read_item(row: &Row<'_>) -> rusqlite::Result<PlanItem> {
    let kind_raw: String = row.get(3)?;
    let kind = ItemKind::from_str(&kind_raw).map_err(|e| parse_failure(3, e))?;
    let status_raw: String = row.get(9)?;
    let status = SandboxStatus::from_str(&status_raw).map_err(|e| parse_failure(9, e))?;

    let ref_kind: Option<String> = row.get(18)?;
    let ref_id: Option<String> = row.get(19)?;
    let authority_ref = match (ref_kind.as_deref(), ref_id) {
        (Some("milestone"), Some(id)) => AuthorityRef::Milestone(id),
        (Some("deliverable"), Some(id)) => AuthorityRef::Deliverable(id),
        (Some("task"), Some(id)) => AuthorityRef::Task(id),
        (None, None) => AuthorityRef::None,
        (other, _) => {
            return Err(parse_failure(
                18,
                crate::model::item::ParseEnumError {
                    expected: "authority ref kind",
                    got: other.unwrap_or("<mismatched pair>").to_string(),
                },
            ));
        }
    };

    Ok(PlanItem {
        id: row.get(0)?,
        project_id: row.get(1)?,
        parent_id: row.get(2)?,
        kind,
        name: row.get(4)?,
        description: row.get(5)?,
        start_date: read_date(row, 6)?,
        end_date: read_date(row, 7)?,
        duration_days: row.get(8)?,
        status,
        progress: row.get(10)?,
        billable: row.get(11)?,
        sort_order: row.get(12)?,
        indent_level: row.get(13)?,
        is_deleted: row.get(14)?,
        deleted_at_us: row.get(15)?,
        is_committed: row.get(16)?,
        committed_at_us: row.get(17)?,
        authority_ref,
        last_synced_at_us: row.get(20)?,
    })
}

fn ref_columns(authority_ref: &AuthorityRef) -> (Option<&'static str>, Option<&str>) {
    match authority_ref {
        AuthorityRef::None => (None, None),
        AuthorityRef::Milestone(id) => (Some("milestone"), Some(id)),
        AuthorityRef::Deliverable(id) => (Some("deliverable"), Some(id)),
        AuthorityRef::Task(id) => (Some("task"), Some(id)),
    }
}

impl SqliteSandboxStore {
    fn write(&mut self, item: &PlanItem, sql: &str) -> Result<usize, StoreError> {
        let (ref_kind, ref_id) = ref_columns(&item.authority_ref);
        self.conn
            .execute(
                sql,
                params![
                    item.id,
                    item.project_id,
                    item.parent_id,
                    item.kind.to_string(),
                    item.name,
                    item.description,
                    item.start_date.map(|d| d.to_string()),
                    item.end_date.map(|d| d.to_string()),
                    item.duration_days,
                    item.status.to_string(),
                    item.progress,
                    item.billable,
                    item.sort_order,
                    item.indent_level,
                    item.is_deleted,
                    item.deleted_at_us,
                    item.is_committed,
                    item.committed_at_us,
                    ref_kind,
                    ref_id,
                    item.last_synced_at_us,
                ],
            )
            .map_err(store_error)
    }

    fn query_items(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PlanItem>, StoreError> {
        let mut statement = self.conn.prepare(sql).map_err(store_error)?;
        let rows = statement
            .query_map(params, |row| read_item(row))
            .map_err(store_error)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(store_error)?);
        }
        Ok(items)
    }
}

impl SandboxStore for SqliteSandboxStore {
    fn get(&self, id: &str) -> Result<Option<PlanItem>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM plan_items WHERE item_id = ?1"),
                params![id],
                |row| read_item(row),
            )
            .optional()
            .map_err(store_error)
    }

    fn list(&self, project_id: &str, include_deleted: bool) -> Result<Vec<PlanItem>, StoreError> {
        self.query_items(
            &format!(
                "SELECT {COLUMNS} FROM plan_items
                 WHERE project_id = ?1 AND (?2 OR is_deleted = 0)
                 ORDER BY sort_order, item_id"
            ),
            params![project_id, include_deleted],
        )
    }

    fn linked_items(&self, project_id: &str, kind: ItemKind) -> Result<Vec<PlanItem>, StoreError> {
        // Schema CHECKs guarantee ref_kind = kind whenever ref_id is set.
        self.query_items(
            &format!(
                "SELECT {COLUMNS} FROM plan_items
                 WHERE project_id = ?1 AND is_deleted = 0
                   AND kind = ?2 AND ref_id IS NOT NULL
                 ORDER BY sort_order, item_id"
            ),
            params![project_id, kind.to_string()],
        )
    }

    fn insert(&mut self, item: &PlanItem) -> Result<(), StoreError> {
        self.write(
            item,
            "INSERT INTO plan_items (item_id, project_id, parent_id, kind, name, \
             description, start_date, end_date, duration_days, status, progress, \
             billable, sort_order, indent_level, is_deleted, deleted_at_us, \
             is_committed, committed_at_us, ref_kind, ref_id, last_synced_at_us) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
             ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        )?;
        Ok(())
    }

    fn update(&mut self, item: &PlanItem) -> Result<(), StoreError> {
        let changed = self.write(
            item,
            "UPDATE plan_items SET project_id = ?2, parent_id = ?3, kind = ?4, \
             name = ?5, description = ?6, start_date = ?7, end_date = ?8, \
             duration_days = ?9, status = ?10, progress = ?11, billable = ?12, \
             sort_order = ?13, indent_level = ?14, is_deleted = ?15, \
             deleted_at_us = ?16, is_committed = ?17, committed_at_us = ?18, \
             ref_kind = ?19, ref_id = ?20, last_synced_at_us = ?21 \
             WHERE item_id = ?1",
        )?;
        if changed == 0 {
            return Err(StoreError::Rejected(format!(
                "update of unknown item '{}'",
                item.id
            )));
        }
        Ok(())
    }

    fn soft_delete(&mut self, id: &str, now_us: i64) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE plan_items SET is_deleted = 1, deleted_at_us = ?2
                 WHERE item_id = ?1 AND is_deleted = 0",
                params![id, now_us],
            )
            .map_err(store_error)?;
        Ok(changed > 0)
    }

    fn max_sort_order(&self, project_id: &str) -> Result<i64, StoreError> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order), 0) FROM plan_items WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .map_err(store_error)
    }
}
