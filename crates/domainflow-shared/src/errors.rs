//! # Orchestration Error Taxonomy
//!
//! Typed errors for every orchestrator-facing operation. Each variant carries
//! a stable symbolic code so transport adapters can map failures without
//! string matching. The orchestrator wraps errors with additional context but
//! never translates one kind into another.

use thiserror::Error;
use uuid::Uuid;

use crate::state_machine::PhaseStatus;
use crate::types::PhaseKind;

/// Result alias used across the orchestration core
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Errors surfaced by the campaign orchestrator and its collaborators
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Campaign (or campaign-scoped row) does not exist, or the owner filter
    /// rejected it. Deliberately indistinguishable from a true miss.
    #[error("campaign resource not found")]
    NotFound,

    /// The requested status transition is not in the legal transition table
    #[error("illegal phase transition from {from} to {to}")]
    IllegalTransition { from: PhaseStatus, to: PhaseStatus },

    /// Broadcast reached a bus with no active subscriber. Transient: the
    /// worker may not have re-subscribed yet after a restart.
    #[error("control channel missing for campaign {campaign_uuid} phase {phase}")]
    ControlChannelMissing {
        campaign_uuid: Uuid,
        phase: PhaseKind,
    },

    /// A second subscriber attempted to attach to an already-subscribed bus
    #[error("control channel busy for campaign {campaign_uuid} phase {phase}")]
    ChannelBusy {
        campaign_uuid: Uuid,
        phase: PhaseKind,
    },

    /// The worker did not acknowledge a control command within the deadline
    #[error("control acknowledgement timed out after {waited_ms}ms")]
    AckTimeout { waited_ms: u64 },

    /// The caller-supplied context was cancelled while waiting
    #[error("operation cancelled by caller context")]
    ContextCancelled,

    /// A control operation targeted a phase with no live execution
    #[error("phase {phase} is not running for campaign {campaign_uuid}")]
    PhaseNotRunning {
        campaign_uuid: Uuid,
        phase: PhaseKind,
    },

    /// Phase configuration failed validation, is absent, or is locked by a
    /// non-terminal execution
    #[error("phase configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    /// Store-level failure, annotated with the failing operation
    #[error("store operation '{operation}' failed: {reason}")]
    StoreError { operation: String, reason: String },
}

impl OrchestrationError {
    /// Stable symbolic code for transport adapters
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "DF1404",
            Self::IllegalTransition { .. } => "DF1409",
            Self::ControlChannelMissing { .. } => "DF2001",
            Self::ChannelBusy { .. } => "DF2002",
            Self::AckTimeout { .. } => "DF2003",
            Self::ContextCancelled => "DF2004",
            Self::PhaseNotRunning { .. } => "DF2005",
            Self::ConfigurationInvalid { .. } => "DF3001",
            Self::StoreError { .. } => "DF5001",
        }
    }

    /// Whether the orchestrator may transparently retry the failed operation.
    ///
    /// Only `ControlChannelMissing` qualifies; everything else propagates to
    /// the operator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ControlChannelMissing { .. })
    }

    /// Convenience constructor for store failures
    pub fn store(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::StoreError {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for OrchestrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            other => Self::store("query", other),
        }
    }
}
