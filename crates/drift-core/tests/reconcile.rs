//! End-to-end reconciliation flows across the importer, commit engine,
//! edit-state resolver, and coordinator, driven through the public API the
//! way an embedding application would call it.

use std::cell::Cell;
use std::collections::HashMap;

use drift_core::commit::commit_selected;
use drift_core::config::EngineConfig;
use drift_core::coordinator::Coordinator;
use drift_core::edit_state::{
    EditState, FieldEdit, apply_field_edit, get_all_with_edit_state,
};
use drift_core::model::authority::{
    AuthorityDeliverable, AuthorityMilestone, AuthorityStatus, AuthorityTask, DeliverableDraft,
    MilestoneDraft, TaskDraft,
};
use drift_core::model::item::{ItemKind, PlanItem, SandboxStatus};
use drift_core::store::memory::{MemoryAuthority, MemorySandbox};
use drift_core::store::{AuthorityStore, SandboxStore, StoreError};
use drift_core::sync::sync_from_authority;
use proptest::prelude::*;

const PROJECT: &str = "proj";
const NOW: i64 = 1_700_000_000_000_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

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
        status: AuthorityStatus::NotStarted,
        start_date: None,
        end_date: None,
        progress: 0,
    }
}

fn task_draft(deliverable_id: &str, name: &str, sort_order: i64) -> TaskDraft {
    TaskDraft {
        deliverable_id: deliverable_id.to_string(),
        name: name.to_string(),
        is_complete: false,
        sort_order,
    }
}

/// Three-level governance fixture: one milestone, one deliverable, two
/// checklist tasks.
fn seed_small_tree(authority: &mut MemoryAuthority) -> (String, String) {
    let gm = authority.add_milestone(milestone_draft("Enabling works"));
    let gd = authority.add_deliverable(deliverable_draft(&gm, "Site clearance"));
    authority.add_task(task_draft(&gd, "Fence line survey", 1));
    authority.add_task(task_draft(&gd, "Vegetation removal", 2));
    (gm, gd)
}

fn local_item(id: &str, kind: ItemKind, name: &str, parent: Option<&str>) -> PlanItem {
    let mut item = PlanItem::new(id, PROJECT, kind);
    item.name = name.to_string();
    item.parent_id = parent.map(str::to_string);
    item
}

/// Governance store that answers from an inner [`MemoryAuthority`] but fails
/// the task read a configured number of times. Models a connection dying
/// partway through a sync run.
struct FlakyAuthority {
    inner: MemoryAuthority,
    task_failures_left: Cell<u32>,
}

impl FlakyAuthority {
    fn new(inner: MemoryAuthority, task_failures: u32) -> Self {
        Self {
            inner,
            task_failures_left: Cell::new(task_failures),
        }
    }
}

impl AuthorityStore for FlakyAuthority {
    fn milestones(&self, project_id: &str) -> Result<Vec<AuthorityMilestone>, StoreError> {
        self.inner.milestones(project_id)
    }

    fn deliverables(&self, project_id: &str) -> Result<Vec<AuthorityDeliverable>, StoreError> {
        self.inner.deliverables(project_id)
    }

    fn tasks(&self, project_id: &str) -> Result<Vec<AuthorityTask>, StoreError> {
        let left = self.task_failures_left.get();
        if left > 0 {
            self.task_failures_left.set(left - 1);
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.tasks(project_id)
    }

    fn create_milestone(&mut self, draft: MilestoneDraft) -> Result<String, StoreError> {
        self.inner.create_milestone(draft)
    }

    fn create_deliverable(&mut self, draft: DeliverableDraft) -> Result<String, StoreError> {
        self.inner.create_deliverable(draft)
    }

    fn create_task(&mut self, draft: TaskDraft) -> Result<String, StoreError> {
        self.inner.create_task(draft)
    }

    fn max_task_sort_order(&self, deliverable_id: &str) -> Result<i64, StoreError> {
        self.inner.max_task_sort_order(deliverable_id)
    }

    fn baseline_flags(
        &self,
        milestone_ids: &[String],
    ) -> Result<HashMap<String, bool>, StoreError> {
        self.inner.baseline_flags(milestone_ids)
    }
}

// ---------------------------------------------------------------------------
// Inbound sync
// ---------------------------------------------------------------------------

/// Import a governance tree, then re-run against an unchanged store: the
/// second run reports all zeros and rewrites nothing.
#[test]
fn sync_twice_against_unchanged_store_is_a_noop() {
    let mut sandbox = MemorySandbox::new();
    let mut authority = MemoryAuthority::new();
    seed_small_tree(&mut authority);

    let first = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
    assert_eq!(first.imported(), 4);
    assert_eq!(first.updated(), 0);
    assert_eq!(first.deleted(), 0);

    let before = sandbox.list(PROJECT, true).unwrap();
    let second = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();
    assert!(second.is_noop());
    assert_eq!(sandbox.list(PROJECT, true).unwrap(), before);
}

/// A governance-side deletion cascades down and the mirrors disappear from
/// the sandbox as soft deletes, level by level.
#[test]
fn governance_deletion_propagates_as_soft_delete() {
    let mut sandbox = MemorySandbox::new();
    let mut authority = MemoryAuthority::new();
    let (gm, _) = seed_small_tree(&mut authority);

    sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
    authority.delete_milestone(&gm);

    let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();
    assert_eq!(report.deleted(), 4);
    assert!(sandbox.list(PROJECT, false).unwrap().is_empty());

    // Soft: rows survive with the deletion stamp.
    let all = sandbox.list(PROJECT, true).unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|i| i.deleted_at_us == Some(NOW + 1)));
}

// ---------------------------------------------------------------------------
// Outbound commit
// ---------------------------------------------------------------------------

/// Locally planned milestone + deliverable + nested tasks commit in one
/// batch, then the next sync recognizes every mirror and imports nothing.
#[test]
fn commit_then_sync_creates_no_duplicates() {
    let mut sandbox = MemorySandbox::new();
    let mut authority = MemoryAuthority::new();

    sandbox
        .insert(&local_item("pi-m", ItemKind::Milestone, "Foundations", None))
        .unwrap();
    sandbox
        .insert(&local_item(
            "pi-d",
            ItemKind::Deliverable,
            "Pile caps",
            Some("pi-m"),
        ))
        .unwrap();
    sandbox
        .insert(&local_item("pi-t1", ItemKind::Task, "Rebar", Some("pi-d")))
        .unwrap();
    sandbox
        .insert(&local_item("pi-t2", ItemKind::Task, "Pour", Some("pi-t1")))
        .unwrap();

    let ids: Vec<String> = ["pi-t2", "pi-t1", "pi-d", "pi-m"]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    let outcome = commit_selected(&mut sandbox, &mut authority, &ids, "alice", NOW).unwrap();
    assert_eq!(outcome.committed, 4);
    assert!(outcome.errors.is_empty());

    // Nested task flattened onto the deliverable's checklist.
    assert_eq!(authority.tasks(PROJECT).unwrap().len(), 2);

    let report = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();
    assert_eq!(report.imported(), 0);
    assert!(report.is_noop());
    assert_eq!(sandbox.list(PROJECT, false).unwrap().len(), 4);
}

/// A deliverable whose milestone is not committed is refused with an
/// actionable message; selecting the milestone alongside fixes it.
#[test]
fn commit_ordering_is_enforced_then_satisfied_in_batch() {
    let mut sandbox = MemorySandbox::new();
    let mut authority = MemoryAuthority::new();
    sandbox
        .insert(&local_item("pi-m", ItemKind::Milestone, "Fit-out", None))
        .unwrap();
    sandbox
        .insert(&local_item(
            "pi-d",
            ItemKind::Deliverable,
            "Joinery",
            Some("pi-m"),
        ))
        .unwrap();

    let alone = commit_selected(
        &mut sandbox,
        &mut authority,
        &["pi-d".to_string()],
        "alice",
        NOW,
    )
    .unwrap();
    assert_eq!(alone.committed, 0);
    assert_eq!(
        alone.errors[0].reason,
        "Parent 'Fit-out' must be committed first"
    );

    let both = commit_selected(
        &mut sandbox,
        &mut authority,
        &["pi-d".to_string(), "pi-m".to_string()],
        "alice",
        NOW + 1,
    )
    .unwrap();
    assert_eq!(both.committed, 2);
    assert!(both.errors.is_empty());
}

// ---------------------------------------------------------------------------
// Edit protection
// ---------------------------------------------------------------------------

/// After a round trip the mirrored items stay fully editable, and flipping
/// the baseline lock in governance protects schedule fields and freezes
/// structure underneath it.
#[test]
fn linked_items_stay_editable_until_the_lock_propagates() {
    let mut sandbox = MemorySandbox::new();
    let mut authority = MemoryAuthority::new();
    let (gm, _) = seed_small_tree(&mut authority);
    sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();

    let resolved = get_all_with_edit_state(&sandbox, &authority, PROJECT).unwrap();
    let (mut milestone, info) = resolved
        .iter()
        .find(|(item, _)| item.kind == ItemKind::Milestone)
        .cloned()
        .unwrap();
    assert_eq!(info.state, EditState::Linked);

    // Linked but not locked: schedule fields still go through.
    let date = chrono::NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
    apply_field_edit(&mut milestone, &info, FieldEdit::StartDate(Some(date))).unwrap();
    apply_field_edit(&mut milestone, &info, FieldEdit::Status(SandboxStatus::InProgress))
        .unwrap();
    assert_eq!(milestone.start_date, Some(date));

    authority.set_baseline_locked(&gm, true);
    let resolved = get_all_with_edit_state(&sandbox, &authority, PROJECT).unwrap();
    for (item, info) in &resolved {
        if item.is_committed {
            assert_eq!(info.state, EditState::Locked, "item {}", item.id);
            assert!(!info.can_delete);
        }
    }
    let locked_info = resolved
        .iter()
        .find(|(item, _)| item.kind == ItemKind::Milestone)
        .map(|(_, info)| *info)
        .unwrap();
    let refused = apply_field_edit(&mut milestone, &locked_info, FieldEdit::EndDate(Some(date)));
    assert!(refused.is_err());
}

// ---------------------------------------------------------------------------
// Failure and recovery
// ---------------------------------------------------------------------------

/// A run that dies partway through (task fetch fails after milestones and
/// deliverables were written) leaves a state a plain re-run completes, and
/// the end state matches a never-failed run.
#[test]
fn interrupted_sync_is_completed_by_a_rerun() {
    let mut sandbox = MemorySandbox::new();
    let mut healthy_sandbox = MemorySandbox::new();
    let mut authority = MemoryAuthority::new();
    seed_small_tree(&mut authority);

    sync_from_authority(&mut healthy_sandbox, &authority, PROJECT, NOW).unwrap();

    let flaky = FlakyAuthority::new(authority, 1);
    let fault = sync_from_authority(&mut sandbox, &flaky, PROJECT, NOW).unwrap_err();
    assert!(fault.is_retryable());

    // Milestone and deliverable levels landed before the fault.
    assert_eq!(sandbox.list(PROJECT, false).unwrap().len(), 2);

    let report = sync_from_authority(&mut sandbox, &flaky, PROJECT, NOW).unwrap();
    assert_eq!(report.imported(), 2); // just the tasks
    assert_eq!(report.updated(), 0);

    let state = |s: &MemorySandbox| {
        let mut items = s.list(PROJECT, true).unwrap();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
            .into_iter()
            .map(|i| (i.name, i.kind, i.authority_ref))
            .collect::<Vec<_>>()
    };
    assert_eq!(state(&sandbox), state(&healthy_sandbox));
}

/// The coordinator notices an overwrite and its undo restores the local
/// pre-sync value.
#[test]
fn coordinated_overwrite_is_noticed_and_undoable() {
    let mut coordinator = Coordinator::new(EngineConfig::default());
    let mut sandbox = MemorySandbox::new();
    let mut authority = MemoryAuthority::new();
    let gm = authority.add_milestone(milestone_draft("Enabling works"));

    coordinator
        .refresh(&mut sandbox, &authority, PROJECT, NOW)
        .unwrap();

    // Local rename of the mirror, then a governance rename of the record.
    let mut mirror = sandbox.list(PROJECT, false).unwrap().remove(0);
    mirror.name = "Enabling works (local wording)".into();
    sandbox.update(&mirror).unwrap();
    authority.rename_milestone(&gm, "Enabling works phase 1");

    let outcome = coordinator
        .refresh(&mut sandbox, &authority, PROJECT, NOW + 1)
        .unwrap();
    assert_eq!(
        sandbox.get(&mirror.id).unwrap().unwrap().name,
        "Enabling works phase 1"
    );
    assert_eq!(
        outcome.notice.as_deref(),
        Some("1 item updated from the source of truth; undo available")
    );

    assert!(coordinator
        .undo_last_sync(&mut sandbox, PROJECT, NOW + 2)
        .unwrap());
    assert_eq!(
        sandbox.get(&mirror.id).unwrap().unwrap().name,
        "Enabling works (local wording)"
    );
}

// ---------------------------------------------------------------------------
// Property: idempotence over arbitrary fixtures
// ---------------------------------------------------------------------------

fn authority_status_strategy() -> impl Strategy<Value = AuthorityStatus> {
    prop_oneof![
        Just(AuthorityStatus::NotStarted),
        Just(AuthorityStatus::InProgress),
        Just(AuthorityStatus::AtRisk),
        Just(AuthorityStatus::Delayed),
        Just(AuthorityStatus::Completed),
    ]
}

proptest! {
    /// For any governance tree, the second sync against an unchanged store
    /// reports zeros and leaves the sandbox byte-identical.
    #[test]
    fn second_sync_is_always_a_noop(
        milestones in prop::collection::vec(
            ("[A-Za-z ]{1,12}", 0u8..=100, authority_status_strategy(), 0usize..3),
            1..4,
        ),
        tasks_complete in prop::collection::vec(any::<bool>(), 0..6),
    ) {
        let mut sandbox = MemorySandbox::new();
        let mut authority = MemoryAuthority::new();

        let mut task_flags = tasks_complete.iter().copied().cycle();
        for (name, progress, status, deliverable_count) in &milestones {
            let mut draft = milestone_draft(name);
            draft.progress = *progress;
            draft.status = *status;
            let gm = authority.add_milestone(draft);
            for i in 0..*deliverable_count {
                let gd = authority.add_deliverable(deliverable_draft(&gm, &format!("{name} d{i}")));
                let mut task = task_draft(&gd, &format!("{name} t{i}"), (i as i64) + 1);
                task.is_complete = task_flags.next().unwrap_or(false);
                authority.add_task(task);
            }
        }

        let first = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW).unwrap();
        prop_assert!(first.imported() > 0);

        let before = serde_json::to_string(&sandbox.list(PROJECT, true).unwrap()).unwrap();
        let second = sync_from_authority(&mut sandbox, &authority, PROJECT, NOW + 1).unwrap();
        let after = serde_json::to_string(&sandbox.list(PROJECT, true).unwrap()).unwrap();

        prop_assert!(second.is_noop(), "second run not a noop: {second}");
        prop_assert_eq!(before, after);
    }
}
