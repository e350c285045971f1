//! Records held by the governance store.
//!
//! The governance store is the system of record for milestones, deliverables,
//! and checklist tasks. This engine reads these records on sync, creates new
//! ones on commit, and never edits fields on existing ones; field-level edits
//! arrive through the governance store's own write path and are observed on
//! the next sync.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::item::ParseEnumError;

/// Governance status vocabulary.
///
/// Richer than the sandbox vocabulary: `AtRisk` and `Delayed` both collapse
/// to the sandbox's `on_hold` on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorityStatus {
    NotStarted,
    InProgress,
    AtRisk,
    Delayed,
    Completed,
}

impl AuthorityStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::InProgress => "InProgress",
            Self::AtRisk => "AtRisk",
            Self::Delayed => "Delayed",
            Self::Completed => "Completed",
        }
    }

    /// Parse a wire value, falling back to `NotStarted` for anything
    /// unrecognized. The governance store's vocabulary can grow ahead of
    /// ours; an unknown status must not abort a sync run.
    #[must_use]
    pub fn parse_lossy(s: &str) -> Self {
        Self::from_str(s).unwrap_or(Self::NotStarted)
    }
}

impl fmt::Display for AuthorityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorityStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NotStarted" => Ok(Self::NotStarted),
            "InProgress" => Ok(Self::InProgress),
            "AtRisk" => Ok(Self::AtRisk),
            "Delayed" => Ok(Self::Delayed),
            "Completed" => Ok(Self::Completed),
            _ => Err(ParseEnumError {
                expected: "authority status",
                got: s.to_string(),
            }),
        }
    }
}

/// A governance milestone. Carries the baseline lock that freezes
/// scheduling-relevant fields across the milestone and its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityMilestone {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: AuthorityStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub progress: u8,
    pub baseline_locked: bool,
}

/// A governance deliverable, always under a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityDeliverable {
    pub id: String,
    pub milestone_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: AuthorityStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub progress: u8,
}

/// A governance checklist task.
///
/// Tasks are flat: they hang directly off a deliverable and never nest,
/// which is why the commit engine flattens sandbox task sub-trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityTask {
    pub id: String,
    pub deliverable_id: String,
    pub name: String,
    pub is_complete: bool,
    pub sort_order: i64,
}

/// Payload for creating a milestone on commit. The governance store assigns
/// the id; new milestones are never baseline-locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneDraft {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: AuthorityStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub progress: u8,
}

/// Payload for creating a deliverable on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverableDraft {
    pub milestone_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: AuthorityStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub progress: u8,
}

/// Payload for creating a checklist task on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub deliverable_id: String,
    pub name: String,
    pub is_complete: bool,
    pub sort_order: i64,
}
