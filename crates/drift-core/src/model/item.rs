use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The four kinds of sandbox node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Component,
    Milestone,
    Deliverable,
    Task,
}

impl ItemKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Milestone => "milestone",
            Self::Deliverable => "deliverable",
            Self::Task => "task",
        }
    }

    /// Processing rank for commit batches: parents before children.
    ///
    /// Components are never pushed to the governance store, so they have no
    /// rank.
    #[must_use]
    pub const fn commit_rank(self) -> Option<u8> {
        match self {
            Self::Component => None,
            Self::Milestone => Some(0),
            Self::Deliverable => Some(1),
            Self::Task => Some(2),
        }
    }

    /// Hierarchy typing rules:
    /// - a component may contain milestones or further components
    /// - a milestone contains deliverables
    /// - a deliverable contains tasks
    /// - a task contains tasks only
    #[must_use]
    pub const fn may_parent(self, child: Self) -> bool {
        matches!(
            (self, child),
            (Self::Component, Self::Milestone | Self::Component)
                | (Self::Milestone, Self::Deliverable)
                | (Self::Deliverable | Self::Task, Self::Task)
        )
    }
}

/// Sandbox status vocabulary.
///
/// This is deliberately not the same vocabulary the governance store uses;
/// [`crate::mapping`] owns the (lossy) translation between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    NotStarted,
    InProgress,
    Completed,
    OnHold,
    Cancelled,
}

impl SandboxStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::OnHold => "on_hold",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Link from a sandbox item to its governance record, tagged by record type.
///
/// An item carries at most one link, and the link type must match the item's
/// [`ItemKind`]. Components never carry a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum AuthorityRef {
    None,
    Milestone(String),
    Deliverable(String),
    Task(String),
}

impl AuthorityRef {
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The linked governance record id, regardless of record type.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Milestone(id) | Self::Deliverable(id) | Self::Task(id) => Some(id),
        }
    }

    #[must_use]
    pub fn milestone_id(&self) -> Option<&str> {
        match self {
            Self::Milestone(id) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub fn deliverable_id(&self) -> Option<&str> {
        match self {
            Self::Deliverable(id) => Some(id),
            _ => None,
        }
    }

    /// Whether the link type agrees with the item kind it is attached to.
    #[must_use]
    pub const fn matches_kind(&self, kind: ItemKind) -> bool {
        matches!(
            (self, kind),
            (Self::None, _)
                | (Self::Milestone(_), ItemKind::Milestone)
                | (Self::Deliverable(_), ItemKind::Deliverable)
                | (Self::Task(_), ItemKind::Task)
        )
    }
}

/// A node in the sandbox planning tree.
///
/// The tree is stored flat: every item carries its `parent_id` and siblings
/// are ordered by `sort_order`. Ancestor walks are index lookups, never
/// traversals of live references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub project_id: String,
    pub parent_id: Option<String>,
    pub kind: ItemKind,
    pub name: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_days: Option<i64>,
    pub status: SandboxStatus,
    /// Percent complete, clamped to `0..=100`.
    pub progress: u8,
    pub billable: bool,
    pub sort_order: i64,
    pub indent_level: u32,
    pub is_deleted: bool,
    pub deleted_at_us: Option<i64>,
    /// True once the item is linked to a governance record, either because the
    /// importer mirrored one in or because the commit engine promoted it.
    pub is_committed: bool,
    pub committed_at_us: Option<i64>,
    pub authority_ref: AuthorityRef,
    /// Set whenever the importer last wrote authoritative values into this
    /// item.
    pub last_synced_at_us: Option<i64>,
}

impl PlanItem {
    /// A fresh, uncommitted item with zeroed bookkeeping fields.
    #[must_use]
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            parent_id: None,
            kind,
            name: String::new(),
            description: None,
            start_date: None,
            end_date: None,
            duration_days: None,
            status: SandboxStatus::NotStarted,
            progress: 0,
            billable: false,
            sort_order: 0,
            indent_level: 0,
            is_deleted: false,
            deleted_at_us: None,
            is_committed: false,
            committed_at_us: None,
            authority_ref: AuthorityRef::None,
            last_synced_at_us: None,
        }
    }

    /// Authority-linkage invariant: committed iff linked, and the link type
    /// matches the item kind.
    #[must_use]
    pub fn linkage_consistent(&self) -> bool {
        self.is_committed != self.authority_ref.is_none()
            && self.authority_ref.matches_kind(self.kind)
    }

    /// Mark the item as committed under the given governance link.
    pub fn mark_committed(&mut self, authority_ref: AuthorityRef, now_us: i64) {
        self.authority_ref = authority_ref;
        self.is_committed = true;
        self.committed_at_us = Some(now_us);
    }
}

/// Mint a sandbox item id.
///
/// Ids are opaque; the `pi-` prefix exists so logs and SQL are greppable.
#[must_use]
pub fn mint_item_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("pi-{}", &raw[..12])
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

impl FromStr for ItemKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "component" => Ok(Self::Component),
            "milestone" => Ok(Self::Milestone),
            "deliverable" => Ok(Self::Deliverable),
            "task" => Ok(Self::Task),
            _ => Err(ParseEnumError {
                expected: "item kind",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for SandboxStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "on_hold" => Ok(Self::OnHold),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseEnumError {
                expected: "sandbox status",
                got: s.to_string(),
            }),
        }
    }
}
