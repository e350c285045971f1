//! Status and field translation between the two vocabularies.
//!
//! Both directions are fixed, explicit tables — neither is derived from the
//! other, because neither is a true inverse:
//!
//! - authority → sandbox is **lossy**: `AtRisk` and `Delayed` both collapse
//!   to `on_hold`, so a later reverse translation cannot recover which one
//!   the record held.
//! - sandbox → authority has no image for `cancelled` (the governance store
//!   has no such status), which maps to `NotStarted`.
//!
//! Task completion is represented asymmetrically: the governance store keeps
//! a boolean `is_complete`, the sandbox keeps `status` + `progress`.

use crate::model::authority::AuthorityStatus;
use crate::model::item::SandboxStatus;

/// Translate a governance status into the sandbox vocabulary.
#[must_use]
pub const fn authority_to_sandbox(status: AuthorityStatus) -> SandboxStatus {
    match status {
        AuthorityStatus::NotStarted => SandboxStatus::NotStarted,
        AuthorityStatus::InProgress => SandboxStatus::InProgress,
        AuthorityStatus::AtRisk | AuthorityStatus::Delayed => SandboxStatus::OnHold,
        AuthorityStatus::Completed => SandboxStatus::Completed,
    }
}

/// Translate a sandbox status into the governance vocabulary.
#[must_use]
pub const fn sandbox_to_authority(status: SandboxStatus) -> AuthorityStatus {
    match status {
        SandboxStatus::NotStarted | SandboxStatus::Cancelled => AuthorityStatus::NotStarted,
        SandboxStatus::InProgress => AuthorityStatus::InProgress,
        SandboxStatus::Completed => AuthorityStatus::Completed,
        SandboxStatus::OnHold => AuthorityStatus::AtRisk,
    }
}

/// Expand a checklist task's completion flag into sandbox status + progress.
#[must_use]
pub const fn completion_to_sandbox(is_complete: bool) -> (SandboxStatus, u8) {
    if is_complete {
        (SandboxStatus::Completed, 100)
    } else {
        (SandboxStatus::NotStarted, 0)
    }
}

/// Collapse a sandbox status into a checklist completion flag.
#[must_use]
pub const fn sandbox_to_completion(status: SandboxStatus) -> bool {
    matches!(status, SandboxStatus::Completed)
}
