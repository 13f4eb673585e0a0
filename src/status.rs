//! Status sets and severity ranking for the run/executor/target hierarchy.

use serde::{Deserialize, Serialize};

/// Status of a row at any tier of the hierarchy.
///
/// The enum is shared across tiers; the per-tier shape lives in the
/// non-terminal sets below (targets never hold `Acked`, and the store's
/// CHECK constraints enforce that).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Acked,
    Running,
    Success,
    Failure,
    Canceled,
}

/// Severity rank per terminal status, worst first when sorted descending.
///
/// Kept as a data table so "worst outcome wins" stays a one-line fold and a
/// future terminal status is a one-entry change.
const SEVERITY: [(Status, u8); 3] = [
    (Status::Failure, 2),
    (Status::Canceled, 1),
    (Status::Success, 0),
];

impl Status {
    /// Terminal statuses, identical at every tier. Terminal is absorbing.
    pub const TERMINAL: [Status; 3] = [Status::Success, Status::Failure, Status::Canceled];

    /// Non-terminal statuses a target can hold.
    pub const TARGET_ACTIVE: [Status; 2] = [Status::Pending, Status::Running];

    /// Non-terminal statuses an executor can hold.
    pub const EXECUTOR_ACTIVE: [Status; 3] = [Status::Pending, Status::Acked, Status::Running];

    /// Non-terminal statuses a run can hold.
    pub const RUN_ACTIVE: [Status; 3] = [Status::Pending, Status::Acked, Status::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acked => "acked",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "acked" => Some(Self::Acked),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Severity rank of a terminal status; `None` for non-terminal statuses,
    /// which have no place in an aggregation.
    pub fn severity(&self) -> Option<u8> {
        SEVERITY
            .iter()
            .find(|(status, _)| status == self)
            .map(|(_, rank)| *rank)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fold a multiset of child statuses down to the parent's terminal status:
/// the child with the maximum severity rank wins.
///
/// Returns `None` for an empty set or when any child is still non-terminal;
/// both make the aggregate undefined.
pub fn aggregate<I>(children: I) -> Option<Status>
where
    I: IntoIterator<Item = Status>,
{
    let mut worst: Option<(Status, u8)> = None;
    for child in children {
        let rank = child.severity()?;
        worst = match worst {
            Some((_, best)) if best >= rank => worst,
            _ => Some((child, rank)),
        };
    }
    worst.map(|(status, _)| status)
}
