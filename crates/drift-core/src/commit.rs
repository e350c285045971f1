//! Commit engine: one-way promotion of sandbox items into the governance
//! store.
//!
//! A commit batch is processed in hierarchy-rank order (milestone <
//! deliverable < task, same-rank items by tree depth) so parents land before
//! children even when the caller passes ids in any order, including a task
//! selected before the task it nests under. Non-milestones must have a
//! parent that either
//! needs no commit (a component) or is already committed — in storage or
//! earlier in the same batch. Items failing that check are reported
//! per-item and the batch continues.
//!
//! Sandbox task sub-trees flatten on commit: a task nested arbitrarily deep
//! resolves the nearest deliverable ancestor and lands as one flat checklist
//! entry under that deliverable's governance record.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::mapping;
use crate::model::authority::{DeliverableDraft, MilestoneDraft, TaskDraft};
use crate::model::item::{AuthorityRef, ItemKind, PlanItem};
use crate::store::{AuthorityStore, SandboxStore, StoreError};

/// Why a specific item could not be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitErrorKind {
    /// The selected id resolved to no live sandbox item.
    ItemNotFound,
    /// The item's parent is neither a component nor committed.
    ParentNotCommitted,
    /// A non-milestone item has no parent at all.
    ParentMissing,
    /// A task has no deliverable anywhere in its ancestor chain.
    MissingDeliverableAncestor,
    /// The governance store's own validation rejected the write.
    WriteRejected,
}

impl CommitErrorKind {
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        match self {
            Self::ItemNotFound => ErrorCode::ItemNotFound,
            Self::ParentNotCommitted | Self::ParentMissing => ErrorCode::ParentNotCommitted,
            Self::MissingDeliverableAncestor => ErrorCode::MissingDeliverableAncestor,
            Self::WriteRejected => ErrorCode::WriteRejected,
        }
    }
}

/// Per-item commit failure: which item, and a reason fit for direct display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitItemError {
    pub item_id: String,
    pub name: String,
    pub kind: CommitErrorKind,
    pub reason: String,
}

impl fmt::Display for CommitItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({}): {}", self.name, self.item_id, self.reason)
    }
}

/// Aggregated result of one commit batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitOutcome {
    pub committed: u32,
    /// Already committed, or a grouping node: nothing to do, not an error.
    pub skipped: u32,
    pub errors: Vec<CommitItemError>,
}

/// An uncommitted item annotated for display: can it commit right now, and
/// if not, why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedItem {
    pub item: PlanItem,
    pub can_commit: bool,
    pub blocked_reason: Option<String>,
}

/// Counts for the commit toolbar badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReadiness {
    pub uncommitted: u32,
    pub can_commit: u32,
    pub blocked: u32,
}

/// Commit the selected sandbox items into the governance store.
///
/// # Errors
///
/// A [`StoreError`] other than a per-item write rejection is fatal to the
/// batch and returned as-is; everything committed before the fault stays
/// committed (re-running the batch skips those items).
pub fn commit_selected(
    sandbox: &mut dyn SandboxStore,
    authority: &mut dyn AuthorityStore,
    item_ids: &[String],
    actor: &str,
    now_us: i64,
) -> Result<CommitOutcome, StoreError> {
    let mut outcome = CommitOutcome::default();
    let mut batch: Vec<PlanItem> = Vec::with_capacity(item_ids.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(item_ids.len());

    for id in item_ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        match sandbox.get(id)? {
            Some(item) if !item.is_deleted => batch.push(item),
            _ => outcome.errors.push(CommitItemError {
                item_id: id.clone(),
                // No live item to take a name from; the id is what the
                // caller can act on.
                name: id.clone(),
                kind: CommitErrorKind::ItemNotFound,
                reason: "Item not found or deleted".to_string(),
            }),
        }
    }

    // Parents before children, regardless of selection order: rank first
    // (milestone < deliverable < task, components last), then tree depth so
    // a task nested under another selected task lands after it.
    let mut keyed: Vec<(u8, u32, PlanItem)> = Vec::with_capacity(batch.len());
    for item in batch {
        let depth = ancestor_depth(sandbox, &item)?;
        let rank = item.kind.commit_rank().unwrap_or(u8::MAX);
        keyed.push((rank, depth, item));
    }
    keyed.sort_by_key(|&(rank, depth, _)| (rank, depth));

    let mut committed_this_batch: HashSet<String> = HashSet::new();

    for (_, _, item) in keyed {
        if item.is_committed {
            debug!(item_id = %item.id, "skipping: already committed");
            outcome.skipped += 1;
            continue;
        }
        if item.kind == ItemKind::Component {
            debug!(item_id = %item.id, "skipping: grouping node");
            outcome.skipped += 1;
            continue;
        }

        if let Err(error) = validate_parent(sandbox, &item, &committed_this_batch)? {
            warn!(item_id = %item.id, reason = %error.reason, "commit blocked");
            outcome.errors.push(error);
            continue;
        }

        match commit_one(sandbox, authority, &item, now_us)? {
            Ok(()) => {
                committed_this_batch.insert(item.id.clone());
                outcome.committed += 1;
            }
            Err(error) => {
                warn!(item_id = %item.id, reason = %error.reason, "commit failed");
                outcome.errors.push(error);
            }
        }
    }

    info!(
        actor,
        committed = outcome.committed,
        skipped = outcome.skipped,
        errors = outcome.errors.len(),
        "commit batch finished"
    );
    Ok(outcome)
}

/// Number of ancestors above an item in the sandbox tree.
fn ancestor_depth(sandbox: &dyn SandboxStore, item: &PlanItem) -> Result<u32, StoreError> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(item.id.clone());
    let mut depth = 0u32;
    let mut next = item.parent_id.clone();
    while let Some(id) = next {
        if !visited.insert(id.clone()) {
            break; // cycle guard
        }
        let Some(parent) = sandbox.get(&id)? else {
            break;
        };
        depth += 1;
        next = parent.parent_id;
    }
    Ok(depth)
}

/// Check the parent-before-child rule for one item.
///
/// Outer error: store fault, fatal. Inner error: per-item validation
/// failure, collected by the caller.
fn validate_parent(
    sandbox: &dyn SandboxStore,
    item: &PlanItem,
    committed_this_batch: &HashSet<String>,
) -> Result<Result<(), CommitItemError>, StoreError> {
    if item.kind == ItemKind::Milestone {
        return Ok(Ok(()));
    }

    let Some(parent_id) = item.parent_id.as_deref() else {
        return Ok(Err(item_error(
            item,
            CommitErrorKind::ParentMissing,
            format!("'{}' has no parent to commit under", item.name),
        )));
    };

    let Some(parent) = sandbox.get(parent_id)? else {
        return Ok(Err(item_error(
            item,
            CommitErrorKind::ParentMissing,
            format!("Parent of '{}' no longer exists", item.name),
        )));
    };

    let satisfied = parent.kind == ItemKind::Component
        || parent.is_committed
        || committed_this_batch.contains(&parent.id);
    if satisfied {
        Ok(Ok(()))
    } else {
        Ok(Err(item_error(
            item,
            CommitErrorKind::ParentNotCommitted,
            format!("Parent '{}' must be committed first", parent.name),
        )))
    }
}

fn commit_one(
    sandbox: &mut dyn SandboxStore,
    authority: &mut dyn AuthorityStore,
    item: &PlanItem,
    now_us: i64,
) -> Result<Result<(), CommitItemError>, StoreError> {
    let created = match item.kind {
        ItemKind::Milestone => create_milestone(authority, item).map(AuthorityRef::Milestone),
        ItemKind::Deliverable => match deliverable_target(sandbox, item)? {
            Ok(milestone_id) => create_deliverable(authority, item, &milestone_id)
                .map(AuthorityRef::Deliverable),
            Err(error) => return Ok(Err(error)),
        },
        ItemKind::Task => match flatten_target(sandbox, item)? {
            Ok(deliverable_id) => {
                create_task(authority, item, &deliverable_id).map(AuthorityRef::Task)
            }
            Err(error) => return Ok(Err(error)),
        },
        // Filtered out before we get here.
        ItemKind::Component => return Ok(Ok(())),
    };

    let authority_ref = match created {
        Ok(authority_ref) => authority_ref,
        // The store's own validation said no: per-item, batch continues.
        Err(StoreError::Rejected(message)) => {
            return Ok(Err(item_error(item, CommitErrorKind::WriteRejected, message)));
        }
        Err(fatal) => return Err(fatal),
    };

    let mut linked = item.clone();
    linked.mark_committed(authority_ref, now_us);
    sandbox.update(&linked)?;
    Ok(Ok(()))
}

fn create_milestone(
    authority: &mut dyn AuthorityStore,
    item: &PlanItem,
) -> Result<String, StoreError> {
    authority.create_milestone(MilestoneDraft {
        project_id: item.project_id.clone(),
        name: item.name.clone(),
        description: item.description.clone(),
        status: mapping::sandbox_to_authority(item.status),
        start_date: item.start_date,
        end_date: item.end_date,
        progress: item.progress,
    })
}

fn create_deliverable(
    authority: &mut dyn AuthorityStore,
    item: &PlanItem,
    milestone_id: &str,
) -> Result<String, StoreError> {
    authority.create_deliverable(DeliverableDraft {
        milestone_id: milestone_id.to_string(),
        name: item.name.clone(),
        description: item.description.clone(),
        status: mapping::sandbox_to_authority(item.status),
        start_date: item.start_date,
        end_date: item.end_date,
        progress: item.progress,
    })
}

fn create_task(
    authority: &mut dyn AuthorityStore,
    item: &PlanItem,
    deliverable_id: &str,
) -> Result<String, StoreError> {
    let sort_order = authority.max_task_sort_order(deliverable_id)? + 1;
    authority.create_task(TaskDraft {
        deliverable_id: deliverable_id.to_string(),
        name: item.name.clone(),
        is_complete: mapping::sandbox_to_completion(item.status),
        sort_order,
    })
}

/// Governance milestone id a deliverable commits under: its parent's link.
fn deliverable_target(
    sandbox: &dyn SandboxStore,
    item: &PlanItem,
) -> Result<Result<String, CommitItemError>, StoreError> {
    let parent = match parent_of(sandbox, item)? {
        Ok(parent) => parent,
        Err(error) => return Ok(Err(error)),
    };
    match parent.authority_ref.milestone_id() {
        Some(id) => Ok(Ok(id.to_string())),
        None => Ok(Err(item_error(
            item,
            CommitErrorKind::ParentNotCommitted,
            format!("Parent '{}' carries no milestone link", parent.name),
        ))),
    }
}

/// Governance deliverable id a task flattens into: the nearest deliverable
/// ancestor's link, walking up through any number of task ancestors.
fn flatten_target(
    sandbox: &dyn SandboxStore,
    item: &PlanItem,
) -> Result<Result<String, CommitItemError>, StoreError> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(item.id.clone());
    let mut current = match parent_of(sandbox, item)? {
        Ok(parent) => parent,
        Err(error) => return Ok(Err(error)),
    };

    loop {
        match current.kind {
            ItemKind::Deliverable => {
                return Ok(match current.authority_ref.deliverable_id() {
                    Some(id) => Ok(id.to_string()),
                    None => Err(item_error(
                        item,
                        CommitErrorKind::ParentNotCommitted,
                        format!("Deliverable '{}' carries no governance link", current.name),
                    )),
                });
            }
            ItemKind::Task => {
                if !visited.insert(current.id.clone()) {
                    break; // cycle guard
                }
                current = match parent_of(sandbox, &current)? {
                    Ok(parent) => parent,
                    Err(error) => return Ok(Err(error)),
                };
            }
            ItemKind::Milestone | ItemKind::Component => break,
        }
    }

    Ok(Err(item_error(
        item,
        CommitErrorKind::MissingDeliverableAncestor,
        format!("'{}' has no deliverable ancestor to flatten into", item.name),
    )))
}

fn parent_of(
    sandbox: &dyn SandboxStore,
    item: &PlanItem,
) -> Result<Result<PlanItem, CommitItemError>, StoreError> {
    let Some(parent_id) = item.parent_id.as_deref() else {
        return Ok(Err(item_error(
            item,
            CommitErrorKind::ParentMissing,
            format!("'{}' has no parent to commit under", item.name),
        )));
    };
    match sandbox.get(parent_id)? {
        Some(parent) => Ok(Ok(parent)),
        None => Ok(Err(item_error(
            item,
            CommitErrorKind::ParentMissing,
            format!("Parent of '{}' no longer exists", item.name),
        ))),
    }
}

fn item_error(item: &PlanItem, kind: CommitErrorKind, reason: String) -> CommitItemError {
    CommitItemError {
        item_id: item.id.clone(),
        name: item.name.clone(),
        kind,
        reason,
    }
}

/// All non-deleted, non-component, uncommitted items in a project, annotated
/// with whether they could commit right now.
///
/// # Errors
///
/// Fails only on a store fault.
pub fn get_uncommitted_items(
    sandbox: &dyn SandboxStore,
    project_id: &str,
) -> Result<Vec<UncommittedItem>, StoreError> {
    let items = sandbox.list(project_id, false)?;
    let mut annotated = Vec::new();

    for item in items {
        if item.is_committed || item.kind == ItemKind::Component {
            continue;
        }
        let (can_commit, blocked_reason) = readiness_of(sandbox, &item)?;
        annotated.push(UncommittedItem {
            item,
            can_commit,
            blocked_reason,
        });
    }
    Ok(annotated)
}

/// Summary counts for a commit toolbar badge.
///
/// # Errors
///
/// Fails only on a store fault.
pub fn get_commit_readiness(
    sandbox: &dyn SandboxStore,
    project_id: &str,
) -> Result<CommitReadiness, StoreError> {
    let mut readiness = CommitReadiness::default();
    for entry in get_uncommitted_items(sandbox, project_id)? {
        readiness.uncommitted += 1;
        if entry.can_commit {
            readiness.can_commit += 1;
        } else {
            readiness.blocked += 1;
        }
    }
    Ok(readiness)
}

fn readiness_of(
    sandbox: &dyn SandboxStore,
    item: &PlanItem,
) -> Result<(bool, Option<String>), StoreError> {
    if item.kind == ItemKind::Milestone {
        return Ok((true, None));
    }
    let Some(parent_id) = item.parent_id.as_deref() else {
        return Ok((
            false,
            Some(format!("'{}' has no parent to commit under", item.name)),
        ));
    };
    let Some(parent) = sandbox.get(parent_id)? else {
        return Ok((
            false,
            Some(format!("Parent of '{}' no longer exists", item.name)),
        ));
    };
    if parent.kind == ItemKind::Component || parent.is_committed {
        Ok((true, None))
    } else {
        Ok((
            false,
            Some(format!("Parent '{}' must be committed first", parent.name)),
        ))
    }
}
