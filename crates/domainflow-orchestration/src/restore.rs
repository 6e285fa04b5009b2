//! # Restore Engine
//!
//! Startup reconstruction of in-flight phase state from durable storage.
//! Runs once before the transport layer admits operator traffic, and is
//! idempotent: executions already live in the orchestrator are skipped, so a
//! second invocation with the same store contents produces no additional
//! executions, attaches, or pause reapplies.
//!
//! Per non-terminal execution row:
//! - re-push the stored configuration to the phase service
//! - recreate the control channel (first subscribe after restart) and attach
//! - persisted `Paused`: enqueue exactly one Pause (ack-awaited) before the
//!   worker's first tick, so no progress is emitted in between
//! - persisted `InProgress`: resume emission normally
//! - persisted `Queued`: start as a fresh execution
//!
//! A service that rejects restore marks that one execution `Failed` with a
//! structured error; the rest of the restore proceeds.

use std::sync::Arc;
use tracing::{error, info, warn};

use domainflow_shared::state_machine::{PhaseEvent, PhaseStatus};
use domainflow_shared::{OrchestrationError, OrchestrationResult, PhaseExecution};

use crate::orchestrator::core::{CampaignOrchestrator, StartMode};

/// Outcome counts for one restore pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Executions brought back up in this pass
    pub restored: usize,
    /// Subset of `restored` that had a Pause reapplied
    pub reapplied_pauses: usize,
    /// Rows skipped because the execution was already live
    pub skipped_live: usize,
    /// Rows marked `Failed` because the service rejected restore
    pub failed: usize,
}

impl CampaignOrchestrator {
    /// Rebuild control channels, per-phase status, and executions for every
    /// non-terminal phase execution in the store.
    pub async fn restore_in_flight_phases(
        self: &Arc<Self>,
    ) -> OrchestrationResult<RestoreSummary> {
        let inflight = self.store().list_inflight_executions().await?;
        let mut summary = RestoreSummary::default();

        info!(inflight = inflight.len(), "Restoring in-flight phase executions");
        for execution in inflight {
            let key = (execution.campaign_uuid, execution.phase);
            if self.lock_executions().contains_key(&key) {
                summary.skipped_live += 1;
                continue;
            }

            let mode = match execution.status {
                PhaseStatus::Queued => StartMode::RestoreQueued,
                PhaseStatus::InProgress => StartMode::RestoreRunning,
                PhaseStatus::Paused => StartMode::RestorePaused,
                other => {
                    warn!(
                        campaign_uuid = %execution.campaign_uuid,
                        phase = %execution.phase,
                        status = %other,
                        "Skipping execution in unexpected restore status"
                    );
                    continue;
                }
            };

            match self.restore_one(&execution, mode).await {
                Ok(()) => {
                    summary.restored += 1;
                    if mode == StartMode::RestorePaused {
                        summary.reapplied_pauses += 1;
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        campaign_uuid = %execution.campaign_uuid,
                        phase = %execution.phase,
                        error = %err,
                        "Phase service rejected restore, marking execution failed"
                    );
                    self.mark_restore_failure(&execution, &err).await;
                }
            }
        }

        info!(
            restored = summary.restored,
            reapplied_pauses = summary.reapplied_pauses,
            skipped_live = summary.skipped_live,
            failed = summary.failed,
            "Restore pass finished"
        );
        Ok(summary)
    }

    async fn restore_one(
        self: &Arc<Self>,
        execution: &PhaseExecution,
        mode: StartMode,
    ) -> OrchestrationResult<()> {
        let service = self.registry().get(execution.phase)?;

        // The service lost its in-memory configuration with the old process
        let configuration = self
            .store()
            .get_phase_configuration(execution.campaign_uuid, execution.phase)
            .await?
            .ok_or_else(|| OrchestrationError::ConfigurationInvalid {
                reason: format!(
                    "stored configuration missing for phase {}",
                    execution.phase
                ),
            })?;
        service
            .configure(execution.campaign_uuid, &configuration.config)
            .await?;

        self.start_execution(execution.campaign_uuid, execution.phase, mode)
            .await
    }

    async fn mark_restore_failure(
        self: &Arc<Self>,
        execution: &PhaseExecution,
        err: &OrchestrationError,
    ) {
        // If the execution came up despite the late error (e.g. the pause
        // reapply timed out after the worker started), leave the live worker
        // alone rather than fail a running phase.
        if self
            .lock_executions()
            .contains_key(&(execution.campaign_uuid, execution.phase))
        {
            return;
        }

        let reason = format!("restore rejected [{}]: {err}", err.error_code());
        if let Err(mark_err) = self
            .store()
            .transition_phase(
                execution.campaign_uuid,
                execution.phase,
                &PhaseEvent::Fail(reason),
            )
            .await
        {
            warn!(
                campaign_uuid = %execution.campaign_uuid,
                phase = %execution.phase,
                error = %mark_err,
                "Failed to mark rejected restore as failed"
            );
        }
    }
}
