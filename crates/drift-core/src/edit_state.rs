//! Edit-state resolution: what the user may do to each sandbox item.
//!
//! Uncommitted and plain linked items are fully mutable; linkage alone
//! changes nothing about editability. The restrictions arrive with the
//! baseline lock: once the governing milestone is locked, schedule-bearing
//! fields freeze and so does structure (no delete, no re-parent). The lock
//! lives on governance milestones and propagates down the sandbox tree: an
//! item is governed by the milestone on its ancestor chain (or itself, for
//! milestone items).

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::error::ErrorCode;
use crate::model::item::{ItemKind, PlanItem, SandboxStatus};
use crate::store::{AuthorityStore, SandboxStore, StoreError};

/// How editable an item currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    /// Not yet committed: everything goes.
    Unlinked,
    /// Committed, governing milestone not baseline-locked: still fully
    /// editable, deletable, movable.
    Linked,
    /// Committed under a baseline-locked milestone: schedule fields
    /// protected and structure frozen.
    Locked,
}

/// A field of [`PlanItem`] the edit layer can address individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    Name,
    Description,
    StartDate,
    EndDate,
    DurationDays,
    Status,
    Progress,
    Billable,
}

/// Schedule-bearing fields frozen under a baseline lock. These values are
/// part of the baselined commitment; changing them locally would silently
/// fork the agreed plan.
pub const PROTECTED_FIELDS: &[ItemField] = &[
    ItemField::StartDate,
    ItemField::EndDate,
    ItemField::DurationDays,
    ItemField::Billable,
];

/// Resolved permissions for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditStateInfo {
    pub state: EditState,
    pub protected_fields: &'static [ItemField],
    pub can_delete: bool,
}

impl EditStateInfo {
    #[must_use]
    pub fn is_protected(&self, field: ItemField) -> bool {
        self.protected_fields.contains(&field)
    }
}

/// Rejected edit.
#[derive(Debug, Error)]
pub enum EditError {
    #[error(
        "'{field_name}' is locked to the baseline; raise a variation in the \
         governance store to change it"
    )]
    FieldProtected { field_name: &'static str },

    #[error("'{item_name}' is under a baseline-locked milestone and cannot be {action}")]
    StructureLocked {
        item_name: String,
        action: &'static str,
    },
}

impl EditError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::FieldProtected { .. } => ErrorCode::FieldProtected,
            Self::StructureLocked { .. } => ErrorCode::StructureLocked,
        }
    }
}

/// Resolve the edit state of one item given the lock flag of its governing
/// milestone. Callers that have a store at hand should prefer
/// [`get_all_with_edit_state`], which looks the flag up itself.
#[must_use]
pub const fn resolve_edit_state(item: &PlanItem, milestone_locked: bool) -> EditStateInfo {
    if !item.is_committed {
        return EditStateInfo {
            state: EditState::Unlinked,
            protected_fields: &[],
            can_delete: true,
        };
    }
    if milestone_locked {
        EditStateInfo {
            state: EditState::Locked,
            protected_fields: PROTECTED_FIELDS,
            can_delete: false,
        }
    } else {
        // Linkage by itself restricts nothing; only the lock does.
        EditStateInfo {
            state: EditState::Linked,
            protected_fields: &[],
            can_delete: true,
        }
    }
}

/// One field write, carrying its new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    Name(String),
    Description(Option<String>),
    StartDate(Option<chrono::NaiveDate>),
    EndDate(Option<chrono::NaiveDate>),
    DurationDays(Option<i64>),
    Status(SandboxStatus),
    Progress(u8),
    Billable(bool),
}

impl FieldEdit {
    #[must_use]
    pub const fn field(&self) -> ItemField {
        match self {
            Self::Name(_) => ItemField::Name,
            Self::Description(_) => ItemField::Description,
            Self::StartDate(_) => ItemField::StartDate,
            Self::EndDate(_) => ItemField::EndDate,
            Self::DurationDays(_) => ItemField::DurationDays,
            Self::Status(_) => ItemField::Status,
            Self::Progress(_) => ItemField::Progress,
            Self::Billable(_) => ItemField::Billable,
        }
    }

    const fn field_name(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Description(_) => "description",
            Self::StartDate(_) => "start date",
            Self::EndDate(_) => "end date",
            Self::DurationDays(_) => "duration",
            Self::Status(_) => "status",
            Self::Progress(_) => "progress",
            Self::Billable(_) => "billable",
        }
    }
}

/// Apply one field edit in place, honoring the item's edit state.
///
/// # Errors
///
/// [`EditError::FieldProtected`] when the target field is frozen for this
/// item.
pub fn apply_field_edit(
    item: &mut PlanItem,
    info: &EditStateInfo,
    edit: FieldEdit,
) -> Result<(), EditError> {
    if info.is_protected(edit.field()) {
        debug!(item_id = %item.id, field = edit.field_name(), "edit rejected: protected");
        return Err(EditError::FieldProtected {
            field_name: edit.field_name(),
        });
    }
    match edit {
        FieldEdit::Name(value) => item.name = value,
        FieldEdit::Description(value) => item.description = value,
        FieldEdit::StartDate(value) => item.start_date = value,
        FieldEdit::EndDate(value) => item.end_date = value,
        FieldEdit::DurationDays(value) => item.duration_days = value,
        FieldEdit::Status(value) => item.status = value,
        FieldEdit::Progress(value) => item.progress = value.min(100),
        FieldEdit::Billable(value) => item.billable = value,
    }
    Ok(())
}

/// Check that deleting this item is allowed.
///
/// # Errors
///
/// [`EditError::StructureLocked`] when the governing milestone is
/// baseline-locked.
pub fn ensure_can_delete(item: &PlanItem, info: &EditStateInfo) -> Result<(), EditError> {
    if info.can_delete {
        Ok(())
    } else {
        Err(EditError::StructureLocked {
            item_name: item.name.clone(),
            action: "deleted",
        })
    }
}

/// Check that re-parenting or re-ordering this item is allowed.
///
/// # Errors
///
/// [`EditError::StructureLocked`] when the governing milestone is
/// baseline-locked.
pub fn ensure_can_restructure(item: &PlanItem, info: &EditStateInfo) -> Result<(), EditError> {
    if info.state == EditState::Locked {
        Err(EditError::StructureLocked {
            item_name: item.name.clone(),
            action: "moved",
        })
    } else {
        Ok(())
    }
}

/// Every non-deleted item in the project paired with its resolved edit
/// state, using one batched baseline-flag fetch.
///
/// # Errors
///
/// Fails on a store fault from either side.
pub fn get_all_with_edit_state(
    sandbox: &dyn SandboxStore,
    authority: &dyn AuthorityStore,
    project_id: &str,
) -> Result<Vec<(PlanItem, EditStateInfo)>, StoreError> {
    let items = sandbox.list(project_id, false)?;
    let by_id: HashMap<&str, &PlanItem> =
        items.iter().map(|item| (item.id.as_str(), item)).collect();

    // Governing milestone per item, memoized across shared ancestor chains.
    let mut governing: HashMap<String, Option<String>> = HashMap::new();
    let mut milestone_ids: Vec<String> = Vec::new();
    for item in &items {
        if let Some(id) = governing_milestone(item, &by_id, &mut governing)
            && !milestone_ids.contains(&id)
        {
            milestone_ids.push(id);
        }
    }

    let flags = if milestone_ids.is_empty() {
        HashMap::new()
    } else {
        authority.baseline_flags(&milestone_ids)?
    };

    let resolved = items
        .iter()
        .map(|item| {
            let locked = governing
                .get(&item.id)
                .and_then(Clone::clone)
                .and_then(|id| flags.get(&id).copied())
                .unwrap_or(false);
            (item.clone(), resolve_edit_state(item, locked))
        })
        .collect();
    Ok(resolved)
}

/// Governance milestone id that governs `item`: its own link for milestone
/// items, otherwise the link of the nearest milestone ancestor.
fn governing_milestone(
    item: &PlanItem,
    by_id: &HashMap<&str, &PlanItem>,
    memo: &mut HashMap<String, Option<String>>,
) -> Option<String> {
    if let Some(cached) = memo.get(&item.id) {
        return cached.clone();
    }

    let result = if item.kind == ItemKind::Milestone {
        item.authority_ref.milestone_id().map(str::to_string)
    } else {
        let mut current = item;
        let mut hops = 0usize;
        loop {
            let Some(parent_id) = current.parent_id.as_deref() else {
                break None;
            };
            let Some(parent) = by_id.get(parent_id) else {
                break None;
            };
            if parent.kind == ItemKind::Milestone {
                break parent.authority_ref.milestone_id().map(str::to_string);
            }
            hops += 1;
            if hops > by_id.len() {
                break None; // cycle guard
            }
            current = parent;
        }
    };

    memo.insert(item.id.clone(), result.clone());
    result
}
