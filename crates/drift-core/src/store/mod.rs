//! Access traits for the two stores.
//!
//! The engine is written against these traits, not concrete backends. The
//! sandbox side ships with a SQLite implementation ([`crate::db`]); the
//! governance side is an external collaborator reached over whatever
//! transport the caller owns, so only the trait lives here. In-memory
//! implementations of both ([`memory`]) back the test suite.
//!
//! Every method is one blocking round trip. A failed round trip is fatal to
//! the run in progress; idempotent reconciliation makes a whole-operation
//! retry safe, so no method retries internally.

pub mod memory;

use std::collections::HashMap;
use thiserror::Error;

use crate::error::ErrorCode;
use crate::model::authority::{
    AuthorityDeliverable, AuthorityMilestone, AuthorityTask, DeliverableDraft, MilestoneDraft,
    TaskDraft,
};
use crate::model::item::{ItemKind, PlanItem};

/// Failure of a store round trip.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the round trip did not complete.
    /// Fatal to the current run; the whole operation may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store's own validation rejected a write. Non-fatal per item when
    /// it happens inside a commit batch.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Anything else from the backing implementation.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) => ErrorCode::StoreUnavailable,
            Self::Rejected(_) => ErrorCode::WriteRejected,
            Self::Backend(_) => ErrorCode::InternalUnexpected,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// CRUD over the sandbox planning tree, scoped by project.
pub trait SandboxStore {
    /// Fetch one item by id, deleted or not.
    fn get(&self, id: &str) -> Result<Option<PlanItem>, StoreError>;

    /// All items in a project, ordered by `sort_order` then id.
    fn list(&self, project_id: &str, include_deleted: bool) -> Result<Vec<PlanItem>, StoreError>;

    /// Non-deleted items of `kind` that carry a matching authority link.
    fn linked_items(&self, project_id: &str, kind: ItemKind) -> Result<Vec<PlanItem>, StoreError>;

    fn insert(&mut self, item: &PlanItem) -> Result<(), StoreError>;

    fn update(&mut self, item: &PlanItem) -> Result<(), StoreError>;

    /// Soft-delete by id. Returns false if the item was absent or already
    /// deleted.
    fn soft_delete(&mut self, id: &str, now_us: i64) -> Result<bool, StoreError>;

    /// Current maximum sibling sort order in the project (0 when empty).
    /// Used for stable insertion ordering.
    fn max_sort_order(&self, project_id: &str) -> Result<i64, StoreError>;
}

/// Read/create access to the governance store.
///
/// Reads return **active** (non-soft-deleted) records only. The engine never
/// mutates fields on existing governance records.
pub trait AuthorityStore {
    fn milestones(&self, project_id: &str) -> Result<Vec<AuthorityMilestone>, StoreError>;

    fn deliverables(&self, project_id: &str) -> Result<Vec<AuthorityDeliverable>, StoreError>;

    fn tasks(&self, project_id: &str) -> Result<Vec<AuthorityTask>, StoreError>;

    /// Create a milestone; the store assigns and returns the record id.
    fn create_milestone(&mut self, draft: MilestoneDraft) -> Result<String, StoreError>;

    fn create_deliverable(&mut self, draft: DeliverableDraft) -> Result<String, StoreError>;

    fn create_task(&mut self, draft: TaskDraft) -> Result<String, StoreError>;

    /// Current maximum checklist sort order under a deliverable (0 when the
    /// checklist is empty).
    fn max_task_sort_order(&self, deliverable_id: &str) -> Result<i64, StoreError>;

    /// Baseline-lock flags for exactly the given milestones, in one round
    /// trip. Unknown ids are absent from the result.
    fn baseline_flags(
        &self,
        milestone_ids: &[String],
    ) -> Result<HashMap<String, bool>, StoreError>;
}
