//! Conflict/undo coordination around the importer.
//!
//! Reconciliation is authority-wins: local edits to mirrored fields are
//! overwritten without prompting. What the user gets instead of a merge
//! dialog is (a) a notice telling them it happened and (b) a one-step undo
//! back to the pre-sync state of the whole project tree. The coordinator
//! owns both: it captures a full snapshot before each sync and raises the
//! notice when enough items were touched. A project's first load is exempt
//! when configured silent: no snapshot, no notice.
//!
//! Snapshots are per project and bounded; the oldest falls off when the
//! stack is full. A failed snapshot aborts the refresh, because running an
//! overwriting sync without an escape hatch is worse than not running it.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::item::PlanItem;
use crate::store::{AuthorityStore, SandboxStore, StoreError};
use crate::sync::{SyncReport, sync_from_authority};

/// Result of one coordinated refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub report: SyncReport,
    /// User-facing overwrite notice, when one is warranted.
    pub notice: Option<String>,
    pub snapshot_taken: bool,
}

/// Per-project snapshot stack plus first-run tracking.
#[derive(Debug, Default)]
struct ProjectState {
    snapshots: Vec<Vec<PlanItem>>,
    has_synced: bool,
}

/// Drives sync runs and owns the undo history.
#[derive(Debug)]
pub struct Coordinator {
    config: EngineConfig,
    projects: HashMap<String, ProjectState>,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            projects: HashMap::new(),
        }
    }

    /// Snapshot, sync, and decide whether the user needs to hear about it.
    ///
    /// # Errors
    ///
    /// Fails when the pre-sync snapshot cannot be captured or when the sync
    /// itself hits a store fault. Either way the operation is re-run safe.
    pub fn refresh(
        &mut self,
        sandbox: &mut dyn SandboxStore,
        authority: &dyn AuthorityStore,
        project_id: &str,
        now_us: i64,
    ) -> Result<RefreshOutcome, StoreError> {
        let first_run = !self
            .projects
            .get(project_id)
            .is_some_and(|state| state.has_synced);
        let silent = first_run && self.config.sync.silent_first_run;

        // A silent first load populates an empty tree: nothing worth
        // rolling back to, nothing to announce. No snapshot, no notice.
        let snapshot_taken = if self.config.undo.snapshot_before_sync && !silent {
            let snapshot = sandbox.list(project_id, true)?;
            debug!(project_id, items = snapshot.len(), "pre-sync snapshot captured");
            self.push_snapshot(project_id, snapshot);
            true
        } else {
            false
        };

        // On a sync fault the snapshot stays: the run may have partially
        // written before the store went away, and undo must cover that.
        let report = sync_from_authority(sandbox, authority, project_id, now_us)?;

        self.projects
            .entry(project_id.to_string())
            .or_default()
            .has_synced = true;

        let overwritten = report.overwritten();
        let notice = if !silent && overwritten >= self.config.sync.notice_threshold {
            warn!(project_id, overwritten, "local items overwritten by sync");
            Some(overwrite_notice(overwritten, snapshot_taken))
        } else {
            None
        };

        info!(project_id, %report, first_run, "refresh finished");
        Ok(RefreshOutcome {
            report,
            notice,
            snapshot_taken,
        })
    }

    /// Whether an undo snapshot is available for the project.
    #[must_use]
    pub fn can_undo(&self, project_id: &str) -> bool {
        self.projects
            .get(project_id)
            .is_some_and(|state| !state.snapshots.is_empty())
    }

    /// Roll the project back to the most recent pre-sync snapshot.
    ///
    /// Items that appeared after the snapshot are soft-deleted; everything
    /// else is restored field-for-field, deletion flags included. Returns
    /// false when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Fails on a store fault mid-restore. The snapshot is consumed only
    /// after the restore completes, so a failed undo can be retried.
    pub fn undo_last_sync(
        &mut self,
        sandbox: &mut dyn SandboxStore,
        project_id: &str,
        now_us: i64,
    ) -> Result<bool, StoreError> {
        let Some(snapshot) = self
            .projects
            .get(project_id)
            .and_then(|state| state.snapshots.last())
            .cloned()
        else {
            return Ok(false);
        };

        let current = sandbox.list(project_id, true)?;
        for item in &snapshot {
            if sandbox.get(&item.id)?.is_some() {
                sandbox.update(item)?;
            } else {
                sandbox.insert(item)?;
            }
        }
        for item in &current {
            let arrived_after_snapshot = !snapshot.iter().any(|s| s.id == item.id);
            if arrived_after_snapshot {
                sandbox.soft_delete(&item.id, now_us)?;
            }
        }

        self.pop_snapshot(project_id);
        info!(project_id, restored = snapshot.len(), "sync undone");
        Ok(true)
    }

    fn push_snapshot(&mut self, project_id: &str, snapshot: Vec<PlanItem>) {
        let state = self.projects.entry(project_id.to_string()).or_default();
        state.snapshots.push(snapshot);
        let depth = self.config.undo.snapshot_depth.max(1);
        if state.snapshots.len() > depth {
            state.snapshots.remove(0);
        }
    }

    fn pop_snapshot(&mut self, project_id: &str) {
        if let Some(state) = self.projects.get_mut(project_id) {
            state.snapshots.pop();
        }
    }
}

fn overwrite_notice(count: u32, undo_available: bool) -> String {
    let mut notice = if count == 1 {
        "1 item updated from the source of truth".to_string()
    } else {
        format!("{count} items updated from the source of truth")
    };
    if undo_available {
        notice.push_str("; undo available");
    }
    notice
}
