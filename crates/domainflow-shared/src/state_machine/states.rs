//! Phase status values shared by campaign rows and phase execution rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a phase execution (and, mirrored, of its owning campaign)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    Queued,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Archived,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
        }
    }

    /// Terminal statuses reject all further transitions (Archive excepted,
    /// which is legal from Completed, Failed, and Cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Archived
        )
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown phase status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_set() {
        assert!(PhaseStatus::Completed.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
        assert!(PhaseStatus::Cancelled.is_terminal());
        assert!(PhaseStatus::Archived.is_terminal());

        assert!(!PhaseStatus::NotStarted.is_terminal());
        assert!(!PhaseStatus::Queued.is_terminal());
        assert!(!PhaseStatus::InProgress.is_terminal());
        assert!(!PhaseStatus::Paused.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            PhaseStatus::NotStarted,
            PhaseStatus::Queued,
            PhaseStatus::InProgress,
            PhaseStatus::Paused,
            PhaseStatus::Completed,
            PhaseStatus::Failed,
            PhaseStatus::Cancelled,
            PhaseStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<PhaseStatus>().unwrap(), status);
        }
    }
}
