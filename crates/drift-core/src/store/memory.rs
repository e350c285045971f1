//! In-memory store implementations.
//!
//! `MemorySandbox` backs unit tests that do not need SQLite. `MemoryAuthority`
//! doubles as the governance store in tests and carries the mutation helpers
//! the governance UI would normally provide (status edits, baseline locking,
//! soft deletion with cascade).

use std::collections::{BTreeMap, HashMap};

use super::{AuthorityStore, SandboxStore, StoreError};
use crate::model::authority::{
    AuthorityDeliverable, AuthorityMilestone, AuthorityStatus, AuthorityTask, DeliverableDraft,
    MilestoneDraft, TaskDraft,
};
use crate::model::item::{ItemKind, PlanItem};

/// Sandbox tree held in a `BTreeMap` for deterministic iteration.
#[derive(Debug, Default)]
pub struct MemorySandbox {
    items: BTreeMap<String, PlanItem>,
}

impl MemorySandbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items, deleted included. Test convenience.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl SandboxStore for MemorySandbox {
    fn get(&self, id: &str) -> Result<Option<PlanItem>, StoreError> {
        Ok(self.items.get(id).cloned())
    }

    fn list(&self, project_id: &str, include_deleted: bool) -> Result<Vec<PlanItem>, StoreError> {
        let mut items: Vec<PlanItem> = self
            .items
            .values()
            .filter(|i| i.project_id == project_id && (include_deleted || !i.is_deleted))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    fn linked_items(&self, project_id: &str, kind: ItemKind) -> Result<Vec<PlanItem>, StoreError> {
        let mut items: Vec<PlanItem> = self
            .items
            .values()
            .filter(|i| {
                i.project_id == project_id
                    && !i.is_deleted
                    && i.kind == kind
                    && !i.authority_ref.is_none()
                    && i.authority_ref.matches_kind(kind)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    fn insert(&mut self, item: &PlanItem) -> Result<(), StoreError> {
        if self.items.contains_key(&item.id) {
            return Err(StoreError::Rejected(format!(
                "duplicate item id '{}'",
                item.id
            )));
        }
        self.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn update(&mut self, item: &PlanItem) -> Result<(), StoreError> {
        if !self.items.contains_key(&item.id) {
            return Err(StoreError::Rejected(format!(
                "update of unknown item '{}'",
                item.id
            )));
        }
        self.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn soft_delete(&mut self, id: &str, now_us: i64) -> Result<bool, StoreError> {
        match self.items.get_mut(id) {
            Some(item) if !item.is_deleted => {
                item.is_deleted = true;
                item.deleted_at_us = Some(now_us);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn max_sort_order(&self, project_id: &str) -> Result<i64, StoreError> {
        Ok(self
            .items
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| i.sort_order)
            .max()
            .unwrap_or(0))
    }
}

/// Governance store held in memory, with the external UI's mutations exposed
/// as plain methods for tests.
#[derive(Debug, Default)]
pub struct MemoryAuthority {
    milestones: BTreeMap<String, AuthorityMilestone>,
    deliverables: BTreeMap<String, AuthorityDeliverable>,
    tasks: BTreeMap<String, AuthorityTask>,
    deleted: std::collections::HashSet<String>,
    next_id: u64,
}

impl MemoryAuthority {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn is_active(&self, id: &str) -> bool {
        !self.deleted.contains(id)
    }

    // -- governance-UI-side mutations (out of engine scope, test harness) ---

    /// Seed a milestone as the governance UI would create one.
    pub fn add_milestone(&mut self, draft: MilestoneDraft) -> String {
        let id = self.mint("gm");
        self.milestones.insert(
            id.clone(),
            AuthorityMilestone {
                id: id.clone(),
                project_id: draft.project_id,
                name: draft.name,
                description: draft.description,
                status: draft.status,
                start_date: draft.start_date,
                end_date: draft.end_date,
                progress: draft.progress,
                baseline_locked: false,
            },
        );
        id
    }

    pub fn add_deliverable(&mut self, draft: DeliverableDraft) -> String {
        let id = self.mint("gd");
        self.deliverables.insert(
            id.clone(),
            AuthorityDeliverable {
                id: id.clone(),
                milestone_id: draft.milestone_id,
                name: draft.name,
                description: draft.description,
                status: draft.status,
                start_date: draft.start_date,
                end_date: draft.end_date,
                progress: draft.progress,
            },
        );
        id
    }

    pub fn add_task(&mut self, draft: TaskDraft) -> String {
        let id = self.mint("gt");
        self.tasks.insert(
            id.clone(),
            AuthorityTask {
                id: id.clone(),
                deliverable_id: draft.deliverable_id,
                name: draft.name,
                is_complete: draft.is_complete,
                sort_order: draft.sort_order,
            },
        );
        id
    }

    /// Field edit as pushed by the governance UI's own write path.
    pub fn set_milestone_status(&mut self, id: &str, status: AuthorityStatus) {
        if let Some(m) = self.milestones.get_mut(id) {
            m.status = status;
        }
    }

    pub fn rename_milestone(&mut self, id: &str, name: &str) {
        if let Some(m) = self.milestones.get_mut(id) {
            m.name = name.to_string();
        }
    }

    pub fn set_task_complete(&mut self, id: &str, is_complete: bool) {
        if let Some(t) = self.tasks.get_mut(id) {
            t.is_complete = is_complete;
        }
    }

    /// Flip the baseline lock on a milestone.
    pub fn set_baseline_locked(&mut self, id: &str, locked: bool) {
        if let Some(m) = self.milestones.get_mut(id) {
            m.baseline_locked = locked;
        }
    }

    /// Soft-delete a milestone and cascade to its deliverables and their
    /// tasks, as the governance store does.
    pub fn delete_milestone(&mut self, id: &str) {
        self.deleted.insert(id.to_string());
        let child_deliverables: Vec<String> = self
            .deliverables
            .values()
            .filter(|d| d.milestone_id == id)
            .map(|d| d.id.clone())
            .collect();
        for deliverable_id in child_deliverables {
            self.delete_deliverable(&deliverable_id);
        }
    }

    pub fn delete_deliverable(&mut self, id: &str) {
        self.deleted.insert(id.to_string());
        let child_tasks: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.deliverable_id == id)
            .map(|t| t.id.clone())
            .collect();
        for task_id in child_tasks {
            self.deleted.insert(task_id);
        }
    }

    pub fn delete_task(&mut self, id: &str) {
        self.deleted.insert(id.to_string());
    }

    /// Direct record access for assertions.
    #[must_use]
    pub fn milestone(&self, id: &str) -> Option<&AuthorityMilestone> {
        self.milestones.get(id)
    }

    #[must_use]
    pub fn deliverable(&self, id: &str) -> Option<&AuthorityDeliverable> {
        self.deliverables.get(id)
    }

    #[must_use]
    pub fn task(&self, id: &str) -> Option<&AuthorityTask> {
        self.tasks.get(id)
    }
}

impl AuthorityStore for MemoryAuthority {
    fn milestones(&self, project_id: &str) -> Result<Vec<AuthorityMilestone>, StoreError> {
        Ok(self
            .milestones
            .values()
            .filter(|m| m.project_id == project_id && self.is_active(&m.id))
            .cloned()
            .collect())
    }

    fn deliverables(&self, project_id: &str) -> Result<Vec<AuthorityDeliverable>, StoreError> {
        Ok(self
            .deliverables
            .values()
            .filter(|d| {
                self.is_active(&d.id)
                    && self
                        .milestones
                        .get(&d.milestone_id)
                        .is_some_and(|m| m.project_id == project_id)
            })
            .cloned()
            .collect())
    }

    fn tasks(&self, project_id: &str) -> Result<Vec<AuthorityTask>, StoreError> {
        Ok(self
            .tasks
            .values()
            .filter(|t| {
                self.is_active(&t.id)
                    && self
                        .deliverables
                        .get(&t.deliverable_id)
                        .and_then(|d| self.milestones.get(&d.milestone_id))
                        .is_some_and(|m| m.project_id == project_id)
            })
            .cloned()
            .collect())
    }

    fn create_milestone(&mut self, draft: MilestoneDraft) -> Result<String, StoreError> {
        if draft.name.trim().is_empty() {
            return Err(StoreError::Rejected("milestone name is empty".into()));
        }
        Ok(self.add_milestone(draft))
    }

    fn create_deliverable(&mut self, draft: DeliverableDraft) -> Result<String, StoreError> {
        if !self.milestones.contains_key(&draft.milestone_id) {
            return Err(StoreError::Rejected(format!(
                "unknown milestone '{}'",
                draft.milestone_id
            )));
        }
        Ok(self.add_deliverable(draft))
    }

    fn create_task(&mut self, draft: TaskDraft) -> Result<String, StoreError> {
        if !self.deliverables.contains_key(&draft.deliverable_id) {
            return Err(StoreError::Rejected(format!(
                "unknown deliverable '{}'",
                draft.deliverable_id
            )));
        }
        Ok(self.add_task(draft))
    }

    fn max_task_sort_order(&self, deliverable_id: &str) -> Result<i64, StoreError> {
        Ok(self
            .tasks
            .values()
            .filter(|t| t.deliverable_id == deliverable_id && self.is_active(&t.id))
            .map(|t| t.sort_order)
            .max()
            .unwrap_or(0))
    }

    fn baseline_flags(
        &self,
        milestone_ids: &[String],
    ) -> Result<HashMap<String, bool>, StoreError> {
        Ok(milestone_ids
            .iter()
            .filter_map(|id| self.milestones.get(id).map(|m| (id.clone(), m.baseline_locked)))
            .collect())
    }
}
