//! Events that drive phase status transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transition-driving event for a phase execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEvent {
    /// Configuration accepted; the phase may now be enqueued
    Configure,
    /// Execution requested
    Start,
    /// Pause acknowledged by the worker
    Pause,
    /// Resume acknowledged by the worker
    Resume,
    /// Worker reported successful completion
    Complete,
    /// Worker reported failure (or was observed dead)
    Fail(String),
    /// Stop acknowledged by the worker
    Cancel,
    /// Operator archived a finished campaign
    Archive,
}

impl PhaseEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
