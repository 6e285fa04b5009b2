//! # Phase Service Capability Set
//!
//! The polymorphic contract every validator implements. The orchestrator
//! never reaches inside a service; everything flows through this trait, the
//! control channel it attaches, and the progress stream `execute` yields.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use domainflow_shared::state_machine::PhaseStatus;
use domainflow_shared::types::PhaseKind;
use domainflow_shared::{OrchestrationResult, ProgressEvent};

use crate::control::ControlReceiver;

/// Lazy, finite progress sequence. Channel closure signals end of execution;
/// the last event's status carries the outcome. Not restartable — a new
/// execution requires a fresh `execute` call.
pub type ProgressReceiver = mpsc::Receiver<ProgressEvent>;

/// Capability set implemented by each phase validator plug-in.
///
/// Contract highlights:
/// - at most one concurrent execution per (campaign, phase)
/// - no progress events while the worker is `Paused`
/// - every consumed control command is acknowledged before the next one is
///   consumed
/// - cancellation of the `execute` context is observed within one tick of
///   the worker's progress loop
#[async_trait]
pub trait PhaseService: Send + Sync {
    /// The pipeline stage this service implements
    fn phase_kind(&self) -> PhaseKind;

    /// Validate and accept a configuration blob. Idempotent; fails while the
    /// phase is running.
    async fn configure(
        &self,
        campaign_uuid: Uuid,
        config: &serde_json::Value,
    ) -> OrchestrationResult<()>;

    /// Pure shape validation, no side effects
    fn validate(&self, config: &serde_json::Value) -> OrchestrationResult<()>;

    /// Start the worker and return its progress stream
    async fn execute(
        &self,
        cancel: CancellationToken,
        campaign_uuid: Uuid,
    ) -> OrchestrationResult<ProgressReceiver>;

    /// Non-blocking status snapshot; `NotStarted` when no execution exists
    async fn status(&self, campaign_uuid: Uuid) -> PhaseStatus;

    /// Idempotent cancellation: sets the terminating flag (later Pause
    /// commands are consumed but not honoured) and propagates context
    /// cancellation without waiting for the worker.
    async fn cancel(&self, campaign_uuid: Uuid) -> OrchestrationResult<()>;

    /// Subscribe the worker to its control bus. The worker consumes commands
    /// until the channel closes.
    async fn attach_control_channel(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        commands: ControlReceiver,
    );
}
