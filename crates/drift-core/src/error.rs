use std::fmt;

/// Machine-readable error codes for callers that branch on failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ItemNotFound,
    ParentNotCommitted,
    MissingDeliverableAncestor,
    FieldProtected,
    StructureLocked,
    SchemaMismatch,
    StoreUnavailable,
    WriteRejected,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::ItemNotFound => "E2001",
            Self::ParentNotCommitted => "E2002",
            Self::MissingDeliverableAncestor => "E2003",
            Self::FieldProtected => "E2004",
            Self::StructureLocked => "E2005",
            Self::SchemaMismatch => "E3001",
            Self::StoreUnavailable => "E5001",
            Self::WriteRejected => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::ItemNotFound => "Item not found",
            Self::ParentNotCommitted => "Parent not committed",
            Self::MissingDeliverableAncestor => "No deliverable ancestor",
            Self::FieldProtected => "Field is baseline-locked",
            Self::StructureLocked => "Structure is baseline-locked",
            Self::SchemaMismatch => "Sandbox database schema mismatch",
            Self::StoreUnavailable => "Store unavailable",
            Self::WriteRejected => "Write rejected by store validation",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in drift.toml and retry."),
            Self::ItemNotFound => None,
            Self::ParentNotCommitted => Some("Commit the parent first, or select it in the same batch."),
            Self::MissingDeliverableAncestor => {
                Some("Place the task under a committed deliverable before committing it.")
            }
            Self::FieldProtected | Self::StructureLocked => {
                Some("Raise a variation in the governance store to change baselined scope.")
            }
            Self::SchemaMismatch => Some("Delete the sandbox database and re-sync to rebuild it."),
            Self::StoreUnavailable => Some("Retry the whole operation; sync and commit are re-run safe."),
            Self::WriteRejected => Some("Check the governance store's validation message for the item."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }

    /// Whether retrying the whole operation without changes can succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::InternalUnexpected)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
