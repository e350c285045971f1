//! Reconciliation engine between a mutable planning sandbox and an
//! authoritative governance store.
//!
//! The sandbox is a free-form work-item tree the user edits at will. The
//! governance store holds the milestones, deliverables, and checklist tasks
//! that contractually matter, and it always wins. This crate keeps the two
//! coherent:
//!
//! - [`sync`] mirrors governance records into the sandbox on demand,
//!   idempotently, overwriting local edits to mirrored fields
//! - [`commit`] promotes selected sandbox items outward, parents first,
//!   flattening nested task sub-trees into flat checklists
//! - [`edit_state`] decides what the user may still touch once an item is
//!   linked, including baseline-lock propagation
//! - [`coordinator`] wraps sync with a pre-run snapshot, an overwrite
//!   notice, and one-step undo
//!
//! Storage is behind the [`store`] traits; [`db`] ships the SQLite sandbox
//! backend and the governance side is whatever the caller connects.

pub mod commit;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod edit_state;
pub mod error;
pub mod mapping;
pub mod model;
pub mod store;
pub mod sync;

pub use commit::{CommitOutcome, commit_selected, get_commit_readiness, get_uncommitted_items};
pub use config::{EngineConfig, load_engine_config};
pub use coordinator::{Coordinator, RefreshOutcome};
pub use db::SqliteSandboxStore;
pub use edit_state::{EditState, EditStateInfo, resolve_edit_state};
pub use error::ErrorCode;
pub use model::item::{AuthorityRef, ItemKind, PlanItem, SandboxStatus, mint_item_id};
pub use store::{AuthorityStore, SandboxStore, StoreError};
pub use sync::{SyncReport, sync_from_authority};
