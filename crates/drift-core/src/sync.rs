//! On-demand synchronization importer: governance store → sandbox tree.
//!
//! Pulls authoritative records into the sandbox level by level, strictly
//! milestones → deliverables → tasks, because each level's creations need the
//! sandbox parent ids produced by the previous level. Per level, authority
//! record ids are partitioned three ways against the existing sandbox links:
//!
//! - **new**: no sandbox item carries the link → create one, committed and
//!   freshly stamped, at the next free sort order
//! - **still-present**: refresh mapped fields; hierarchy and sort order are
//!   left alone
//! - **vanished**: the linked authority record is gone → soft-delete the
//!   sandbox item
//!
//! Refreshes only write (and only count) when a mapped field actually
//! changed, so a second run against an unchanged governance store reports all
//! zeros and leaves the tree byte-identical. Sort orders for new items are
//! allocated once per run from a single `max_sort_order` read, then
//! incremented locally, so creations within one run cannot collide.
//!
//! There are no cross-store transactions. A run that dies partway leaves the
//! sandbox partially synced; the next run's diff reconciles the gap, which is
//! the whole consistency story.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::mapping;
use crate::model::authority::{AuthorityDeliverable, AuthorityMilestone, AuthorityTask};
use crate::model::item::{AuthorityRef, ItemKind, PlanItem, mint_item_id};
use crate::store::{AuthorityStore, SandboxStore, StoreError};

/// Create/update/delete counts for one entity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelCounts {
    pub imported: u32,
    pub updated: u32,
    pub deleted: u32,
}

impl LevelCounts {
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.imported == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Outcome of one sync run, split by level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub milestones: LevelCounts,
    pub deliverables: LevelCounts,
    pub tasks: LevelCounts,
}

impl SyncReport {
    #[must_use]
    pub const fn imported(&self) -> u32 {
        self.milestones.imported + self.deliverables.imported + self.tasks.imported
    }

    #[must_use]
    pub const fn updated(&self) -> u32 {
        self.milestones.updated + self.deliverables.updated + self.tasks.updated
    }

    #[must_use]
    pub const fn deleted(&self) -> u32 {
        self.milestones.deleted + self.deliverables.deleted + self.tasks.deleted
    }

    /// True when the run changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.milestones.is_zero() && self.deliverables.is_zero() && self.tasks.is_zero()
    }

    /// Items overwritten or removed by the authority, i.e. the changes a user
    /// might want to undo.
    #[must_use]
    pub const fn overwritten(&self) -> u32 {
        self.updated() + self.deleted()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "imported={} updated={} deleted={}",
            self.imported(),
            self.updated(),
            self.deleted()
        )
    }
}

/// Pull authoritative records for `project_id` into the sandbox.
///
/// Idempotent: re-running with no authority-side change is a no-op and
/// reports all zeros.
///
/// # Errors
///
/// Any [`StoreError`] from a round trip aborts the run. The sandbox may be
/// left partially synced; retrying the whole run is safe.
pub fn sync_from_authority(
    sandbox: &mut dyn SandboxStore,
    authority: &dyn AuthorityStore,
    project_id: &str,
    now_us: i64,
) -> Result<SyncReport, StoreError> {
    // One read per run; creations allocate from this locally.
    let mut next_sort = sandbox.max_sort_order(project_id)? + 1;
    let mut report = SyncReport::default();

    let milestones = authority.milestones(project_id)?;
    report.milestones =
        sync_milestone_level(sandbox, project_id, &milestones, &mut next_sort, now_us)?;

    // Re-read links after each level so this run's creations are visible as
    // parents to the next level.
    let milestone_parents = link_index(sandbox, project_id, ItemKind::Milestone)?;
    let deliverables = authority.deliverables(project_id)?;
    report.deliverables = sync_deliverable_level(
        sandbox,
        project_id,
        &deliverables,
        &milestone_parents,
        &mut next_sort,
        now_us,
    )?;

    let deliverable_parents = link_index(sandbox, project_id, ItemKind::Deliverable)?;
    let tasks = authority.tasks(project_id)?;
    report.tasks = sync_task_level(
        sandbox,
        project_id,
        &tasks,
        &deliverable_parents,
        &mut next_sort,
        now_us,
    )?;

    debug!(project_id, %report, "sync run finished");
    Ok(report)
}

/// Map authority record id → linked sandbox item, for one kind.
fn link_index(
    sandbox: &dyn SandboxStore,
    project_id: &str,
    kind: ItemKind,
) -> Result<HashMap<String, PlanItem>, StoreError> {
    let items = sandbox.linked_items(project_id, kind)?;
    Ok(items
        .into_iter()
        .filter_map(|item| {
            item.authority_ref
                .record_id()
                .map(|id| (id.to_string(), item.clone()))
        })
        .collect())
}

fn sync_milestone_level(
    sandbox: &mut dyn SandboxStore,
    project_id: &str,
    records: &[AuthorityMilestone],
    next_sort: &mut i64,
    now_us: i64,
) -> Result<LevelCounts, StoreError> {
    let mut counts = LevelCounts::default();
    let mut linked = link_index(sandbox, project_id, ItemKind::Milestone)?;

    for record in records {
        if let Some(existing) = linked.remove(&record.id) {
            counts.updated +=
                refresh_item(sandbox, &existing, now_us, |item| {
                    apply_milestone_fields(item, record);
                })?;
        } else {
            let mut item = PlanItem::new(mint_item_id(), project_id, ItemKind::Milestone);
            apply_milestone_fields(&mut item, record);
            item.sort_order = take_sort(next_sort);
            item.is_committed = true;
            item.authority_ref = AuthorityRef::Milestone(record.id.clone());
            item.last_synced_at_us = Some(now_us);
            sandbox.insert(&item)?;
            counts.imported += 1;
        }
    }

    counts.deleted += delete_vanished(sandbox, linked, now_us)?;
    Ok(counts)
}

fn sync_deliverable_level(
    sandbox: &mut dyn SandboxStore,
    project_id: &str,
    records: &[AuthorityDeliverable],
    milestone_parents: &HashMap<String, PlanItem>,
    next_sort: &mut i64,
    now_us: i64,
) -> Result<LevelCounts, StoreError> {
    let mut counts = LevelCounts::default();
    let mut linked = link_index(sandbox, project_id, ItemKind::Deliverable)?;

    for record in records {
        if let Some(existing) = linked.remove(&record.id) {
            counts.updated +=
                refresh_item(sandbox, &existing, now_us, |item| {
                    apply_deliverable_fields(item, record);
                })?;
        } else {
            // Should not happen once the milestone level has run, but a
            // record pointing at a milestone we never saw must not abort the
            // run.
            let Some(parent) = milestone_parents.get(&record.milestone_id) else {
                warn!(
                    deliverable_id = %record.id,
                    milestone_id = %record.milestone_id,
                    "skipping deliverable import: no sandbox item for its milestone"
                );
                continue;
            };
            let mut item = PlanItem::new(mint_item_id(), project_id, ItemKind::Deliverable);
            apply_deliverable_fields(&mut item, record);
            item.parent_id = Some(parent.id.clone());
            item.indent_level = parent.indent_level + 1;
            item.sort_order = take_sort(next_sort);
            item.is_committed = true;
            item.authority_ref = AuthorityRef::Deliverable(record.id.clone());
            item.last_synced_at_us = Some(now_us);
            sandbox.insert(&item)?;
            counts.imported += 1;
        }
    }

    counts.deleted += delete_vanished(sandbox, linked, now_us)?;
    Ok(counts)
}

fn sync_task_level(
    sandbox: &mut dyn SandboxStore,
    project_id: &str,
    records: &[AuthorityTask],
    deliverable_parents: &HashMap<String, PlanItem>,
    next_sort: &mut i64,
    now_us: i64,
) -> Result<LevelCounts, StoreError> {
    let mut counts = LevelCounts::default();
    let mut linked = link_index(sandbox, project_id, ItemKind::Task)?;

    for record in records {
        if let Some(existing) = linked.remove(&record.id) {
            counts.updated +=
                refresh_item(sandbox, &existing, now_us, |item| {
                    apply_task_fields(item, record);
                })?;
        } else {
            let Some(parent) = deliverable_parents.get(&record.deliverable_id) else {
                warn!(
                    task_id = %record.id,
                    deliverable_id = %record.deliverable_id,
                    "skipping task import: no sandbox item for its deliverable"
                );
                continue;
            };
            let mut item = PlanItem::new(mint_item_id(), project_id, ItemKind::Task);
            apply_task_fields(&mut item, record);
            item.parent_id = Some(parent.id.clone());
            item.indent_level = parent.indent_level + 1;
            item.sort_order = take_sort(next_sort);
            item.is_committed = true;
            item.authority_ref = AuthorityRef::Task(record.id.clone());
            item.last_synced_at_us = Some(now_us);
            sandbox.insert(&item)?;
            counts.imported += 1;
        }
    }

    counts.deleted += delete_vanished(sandbox, linked, now_us)?;
    Ok(counts)
}

/// Refresh a still-present item. Writes and counts only when a mapped field
/// actually changed; the authority's values overwrite local edits
/// unconditionally (authority wins — the coordinator's snapshot is the undo
/// path).
fn refresh_item(
    sandbox: &mut dyn SandboxStore,
    existing: &PlanItem,
    now_us: i64,
    apply: impl FnOnce(&mut PlanItem),
) -> Result<u32, StoreError> {
    let mut refreshed = existing.clone();
    apply(&mut refreshed);
    if refreshed == *existing {
        return Ok(0);
    }
    refreshed.last_synced_at_us = Some(now_us);
    sandbox.update(&refreshed)?;
    Ok(1)
}

/// Soft-delete sandbox items whose authority record vanished from the fetch.
fn delete_vanished(
    sandbox: &mut dyn SandboxStore,
    vanished: HashMap<String, PlanItem>,
    now_us: i64,
) -> Result<u32, StoreError> {
    let mut deleted = 0;
    for (record_id, item) in vanished {
        if sandbox.soft_delete(&item.id, now_us)? {
            debug!(item_id = %item.id, %record_id, "soft-deleted: authority record vanished");
            deleted += 1;
        }
    }
    Ok(deleted)
}

fn take_sort(next_sort: &mut i64) -> i64 {
    let sort = *next_sort;
    *next_sort += 1;
    sort
}

fn apply_milestone_fields(item: &mut PlanItem, record: &AuthorityMilestone) {
    item.name.clone_from(&record.name);
    item.description.clone_from(&record.description);
    item.status = mapping::authority_to_sandbox(record.status);
    item.progress = record.progress.min(100);
    item.start_date = record.start_date;
    item.end_date = record.end_date;
}

fn apply_deliverable_fields(item: &mut PlanItem, record: &AuthorityDeliverable) {
    item.name.clone_from(&record.name);
    item.description.clone_from(&record.description);
    item.status = mapping::authority_to_sandbox(record.status);
    item.progress = record.progress.min(100);
    item.start_date = record.start_date;
    item.end_date = record.end_date;
}

fn apply_task_fields(item: &mut PlanItem, record: &AuthorityTask) {
    item.name.clone_from(&record.name);
    let (status, progress) = mapping::completion_to_sandbox(record.is_complete);
    item.status = status;
    item.progress = progress;
}

#[cfg(test)]
mod tests {
    use super::{SyncReport, sync_from_authority};
    use crate::model::authority::{
        AuthorityDeliverable, AuthorityMilestone, AuthorityStatus, AuthorityTask,
        DeliverableDraft, MilestoneDraft, TaskDraft,
    };
    use crate::model::item::{ItemKind, SandboxStatus};
    use crate::store::memory::{MemoryAuthority, MemorySandbox};
    use crate::store::{AuthorityStore, SandboxStore, StoreError};
    use std::collections::HashMap;

    const PROJECT: &str = "proj";
    const NOW: i64 = 1_700_000_000_000_000;

    fn milestone_draft(name: &str) -> MilestoneDraft {
        MilestoneDraft {
            project_id: PROJECT.to_string(),
            name: name.to_string(),
            description: None,
            status: AuthorityStatus::NotStarted,
            start_date: None,
            end_date: None,
            progress: 0,
        }
    }

    fn deliverable_draft(milestone_id: &str, name: &str) -> DeliverableDraft {
        DeliverableDraft {
            milestone_id: milestone_id.to_string(),
            name: name.to_string(),
            description: None,
            status: AuthorityStatus::InProgress,
            start_date: None,
            end_date: None,
            progress: 25,
        }
    }

    /// Authority double that returns exactly what a test scripts, consistent
    /// or not. Reads only; the importer never writes to the authority.
    #[derive(Default)]
    struct ScriptedAuthority {
        milestones: Vec<AuthorityMilestone>,
        deliverables: Vec<AuthorityDeliverable>,
        tasks: Vec<AuthorityTask>,
    }

    impl AuthorityStore for ScriptedAuthority {
        fn milestones(&self, _: &str) -> Result<Vec<AuthorityMilestone>, StoreError> {
            Ok(self.milestones.clone())
        }
        fn deliverables(&self, _: &str) -> Result<Vec<AuthorityDeliverable>, StoreError> {
            Ok(self.deliverables.clone())
        }
        fn tasks(&self, _: &str) -> Result<Vec<AuthorityTask>, StoreError> {
            Ok(self.tasks.clone())
        }
        fn create_milestone(
            &mut self,
            _: MilestoneDraft,
        ) -> Result<String, StoreError> {
            Err(StoreError::Rejected("read-only double".into()))
        }
        fn create_deliverable(
            &mut self,
            _: DeliverableDraft,
        ) -> Result<String, StoreError> {
            Err(StoreError::Rejected("read-only double".into()))
        }
        fn create_task(&mut self, _: TaskDraft) -> Result<String, StoreError> {
            Err(StoreError::Rejected("read-only double".into()))
        }
        fn max_task_sort_order(&self, _: &str) -> Result<i64, StoreError> {
            Ok(0)
        }
        fn baseline_flags(
            &self,
            _: &[String],
        ) -> Result<HashMap<String, bool>, StoreError> {
            Ok(HashMap::new())
        }
    }

    fn seeded_authority() -> (MemoryAuthority, String, String, String) {
        let mut authority = MemoryAuthority::new();
        let m = authority.add_milestone(milestone_draft("M1"));
        let d = authority.add_deliverable(deliverable_draft(&m, "D1"));
        let t = authority.add_task(TaskDraft {
            deliverable_id: d.clone(),
            name: "T1".into(),
            is_complete: false,
            sort_order: 1,
        });
        (authority, m, d, t)
    }

    #[test]
    fn first_sync_imports_milestone_into_empty_sandbox() {
        // Scenario A.
        let mut sandbox = MemorySandbox::new();
        let mut authority = MemoryAuthority::new();
        authority.add_milestone(milestone_draft("M1"));

        let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
        assert_eq!(report.milestones.imported, 1);
        assert_eq!(report.imported(), 1);

        let items = sandbox.list(PROJECT, false).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.kind, ItemKind::Milestone);
        assert!(item.is_committed);
        assert!(item.linkage_consistent());
        assert_eq!(item.last_synced_at_us, Some(NOW));
        assert_eq!(item.committed_at_us, None); // set by commit, not import

        let second = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();
        assert_eq!(second, SyncReport::default());
    }

    #[test]
    fn sync_builds_three_level_tree_with_parents() {
        let mut sandbox = MemorySandbox::new();
        let (authority, m, d, t) = seeded_authority();

        let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
        assert_eq!(report.imported(), 3);

        let items = sandbox.list(PROJECT, false).unwrap();
        let milestone = items.iter().find(|i| i.kind == ItemKind::Milestone).unwrap();
        let deliverable = items
            .iter()
            .find(|i| i.kind == ItemKind::Deliverable)
            .unwrap();
        let task = items.iter().find(|i| i.kind == ItemKind::Task).unwrap();

        assert_eq!(milestone.authority_ref.record_id(), Some(m.as_str()));
        assert_eq!(deliverable.authority_ref.record_id(), Some(d.as_str()));
        assert_eq!(task.authority_ref.record_id(), Some(t.as_str()));

        assert_eq!(deliverable.parent_id.as_deref(), Some(milestone.id.as_str()));
        assert_eq!(task.parent_id.as_deref(), Some(deliverable.id.as_str()));
        assert_eq!(milestone.indent_level, 0);
        assert_eq!(deliverable.indent_level, 1);
        assert_eq!(task.indent_level, 2);

        // Task completion expansion.
        assert_eq!(task.status, SandboxStatus::NotStarted);
        assert_eq!(task.progress, 0);
        // Deliverable status mapped through the inbound table.
        assert_eq!(deliverable.status, SandboxStatus::InProgress);
    }

    #[test]
    fn second_sync_with_no_change_is_byte_identical() {
        let mut sandbox = MemorySandbox::new();
        let (authority, ..) = seeded_authority();

        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
        let before = serde_json::to_string(&sandbox.list(PROJECT, true).unwrap()).unwrap();

        // Different timestamp: must still write nothing.
        let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 500).unwrap();
        let after = serde_json::to_string(&sandbox.list(PROJECT, true).unwrap()).unwrap();

        assert!(report.is_noop());
        assert_eq!(before, after);
    }

    #[test]
    fn authority_edit_overwrites_local_edit() {
        let mut sandbox = MemorySandbox::new();
        let (mut authority, m, ..) = seeded_authority();
        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();

        // Local rename in the sandbox...
        let mut local = sandbox
            .linked_items(PROJECT, ItemKind::Milestone)
            .unwrap()
            .remove(0);
        local.name = "my local rename".into();
        sandbox.update(&local).unwrap();

        // ...and a competing edit on the authority side.
        authority.rename_milestone(&m, "governance rename");
        authority.set_milestone_status(&m, AuthorityStatus::Delayed);

        let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();
        assert_eq!(report.milestones.updated, 1);

        let item = sandbox
            .linked_items(PROJECT, ItemKind::Milestone)
            .unwrap()
            .remove(0);
        assert_eq!(item.name, "governance rename");
        assert_eq!(item.status, SandboxStatus::OnHold); // Delayed collapses
        assert_eq!(item.last_synced_at_us, Some(NOW + 1));
    }

    #[test]
    fn refresh_leaves_hierarchy_and_sort_order_alone() {
        let mut sandbox = MemorySandbox::new();
        let (mut authority, m, ..) = seeded_authority();
        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();

        let before = sandbox
            .linked_items(PROJECT, ItemKind::Deliverable)
            .unwrap()
            .remove(0);
        authority.rename_milestone(&m, "new name");
        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();

        let after = sandbox
            .linked_items(PROJECT, ItemKind::Deliverable)
            .unwrap()
            .remove(0);
        assert_eq!(before.parent_id, after.parent_id);
        assert_eq!(before.sort_order, after.sort_order);
    }

    #[test]
    fn vanished_milestone_cascades_soft_delete_by_level() {
        let mut sandbox = MemorySandbox::new();
        let (mut authority, m, ..) = seeded_authority();
        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();

        authority.delete_milestone(&m);
        let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();

        assert_eq!(report.milestones.deleted, 1);
        assert_eq!(report.deliverables.deleted, 1);
        assert_eq!(report.tasks.deleted, 1);
        assert!(sandbox.list(PROJECT, false).unwrap().is_empty());

        let all = sandbox.list(PROJECT, true).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|i| i.is_deleted));
    }

    #[test]
    fn new_items_get_monotonic_sort_orders_within_one_run() {
        let mut sandbox = MemorySandbox::new();

        // Pre-existing local item occupies sort order 7.
        let mut local = crate::model::item::PlanItem::new("pi-local", PROJECT, ItemKind::Component);
        local.name = "grouping".into();
        local.sort_order = 7;
        sandbox.insert(&local).unwrap();

        let mut authority = MemoryAuthority::new();
        authority.add_milestone(milestone_draft("M1"));
        authority.add_milestone(milestone_draft("M2"));

        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();

        let mut sorts: Vec<i64> = sandbox
            .linked_items(PROJECT, ItemKind::Milestone)
            .unwrap()
            .iter()
            .map(|i| i.sort_order)
            .collect();
        sorts.sort_unstable();
        assert_eq!(sorts, vec![8, 9]);
    }

    #[test]
    fn orphan_deliverable_is_skipped_not_created() {
        let mut sandbox = MemorySandbox::new();
        let authority = ScriptedAuthority {
            deliverables: vec![AuthorityDeliverable {
                id: "gd-orphan".into(),
                milestone_id: "gm-never-seen".into(),
                name: "orphan".into(),
                description: None,
                status: AuthorityStatus::NotStarted,
                start_date: None,
                end_date: None,
                progress: 0,
            }],
            ..ScriptedAuthority::default()
        };

        let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
        assert_eq!(report.deliverables.imported, 0);
        assert!(sandbox.list(PROJECT, false).unwrap().is_empty());
    }

    #[test]
    fn completed_task_expands_to_status_and_progress() {
        let mut sandbox = MemorySandbox::new();
        let (mut authority, _, _, t) = seeded_authority();
        authority.set_task_complete(&t, true);

        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
        let task = sandbox
            .linked_items(PROJECT, ItemKind::Task)
            .unwrap()
            .remove(0);
        assert_eq!(task.status, SandboxStatus::Completed);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn soft_deleted_items_do_not_resurrect_links() {
        // A sandbox item deleted locally no longer counts as a link; the
        // still-present authority record is re-imported as a fresh item.
        let mut sandbox = MemorySandbox::new();
        let (authority, ..) = seeded_authority();
        sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();

        let milestone = sandbox
            .linked_items(PROJECT, ItemKind::Milestone)
            .unwrap()
            .remove(0);
        // Deleting the milestone locally orphans the deliverable link walk,
        // but each level reconciles independently.
        sandbox.soft_delete(&milestone.id, NOW + 1).unwrap();

        let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 2).unwrap();
        assert_eq!(report.milestones.imported, 1);

        let restored = sandbox.linked_items(PROJECT, ItemKind::Milestone).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(!restored[0].is_deleted);
    }
}
