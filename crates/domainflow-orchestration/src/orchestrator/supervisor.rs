//! Per-execution supervision: drain the progress stream, drive the terminal
//! transition, auto-advance, and clean up the control channel.
//!
//! One supervisor task exists per live execution. The worker ending its
//! stream — success, failure, cancellation, or death — funnels through
//! `supervise`, so every path releases the control channel and the execution
//! handle.

use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use domainflow_shared::events::CampaignEvent;
use domainflow_shared::state_machine::{PhaseEvent, PhaseStatus};
use domainflow_shared::store::ProgressCounters;
use domainflow_shared::types::PhaseKind;
use domainflow_shared::{Campaign, CounterSummary, ProgressEvent};

use super::core::{CampaignOrchestrator, StartMode};
use crate::phase::ProgressReceiver;

impl CampaignOrchestrator {
    pub(crate) async fn supervise(
        self: Arc<Self>,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        progress_rx: ProgressReceiver,
        initially_suppressed: bool,
    ) {
        let last = self
            .aggregator()
            .drain(campaign_uuid, phase, progress_rx, initially_suppressed)
            .await;

        // The worker is gone; drop the handle before touching the store so a
        // concurrent restore sees an accurate live set
        self.lock_executions().remove(&(campaign_uuid, phase));

        match last.as_ref().map(|event| event.status) {
            Some(PhaseStatus::Completed) => {
                self.handle_completed(campaign_uuid, phase, last.as_ref().unwrap())
                    .await;
            }
            Some(PhaseStatus::Failed) => {
                let reason = last
                    .as_ref()
                    .and_then(|event| event.error_message.clone())
                    .unwrap_or_else(|| "phase reported failure".to_string());
                self.handle_failed(campaign_uuid, phase, last.as_ref(), reason)
                    .await;
            }
            Some(PhaseStatus::Cancelled) => {
                // The cancel path usually reconciled already; only finish the
                // job if the store still shows a live status
                self.reconcile_if_live(campaign_uuid, phase, &PhaseEvent::Cancel)
                    .await;
            }
            _ => {
                // Stream closed without a terminal event: worker panicked or
                // was torn down. A cancelled or shutting-down execution
                // legitimately ends this way; anything else is a failure.
                if !self.is_shutting_down() {
                    self.handle_silent_exit(campaign_uuid, phase).await;
                }
            }
        }

        self.control().close(campaign_uuid, phase);
    }

    async fn handle_completed(
        self: &Arc<Self>,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        final_event: &ProgressEvent,
    ) {
        let counters = ProgressCounters::from(final_event);
        let campaign = match self
            .aggregator()
            .reconcile(campaign_uuid, phase, &PhaseEvent::Complete, Some(counters))
            .await
        {
            Ok(campaign) => campaign,
            Err(err) => {
                error!(
                    campaign_uuid = %campaign_uuid,
                    phase = %phase,
                    error = %err,
                    "Terminal reconciliation failed on completion"
                );
                return;
            }
        };

        self.publisher().publish(CampaignEvent::PhaseCompleted {
            campaign_uuid,
            phase,
            result: CounterSummary {
                processed_items: campaign.processed_items,
                total_items: campaign.total_items,
                successful_items: campaign.successful_items,
                failed_items: campaign.failed_items,
            },
            timestamp: chrono::Utc::now(),
        });
        info!(
            campaign_uuid = %campaign_uuid,
            phase = %phase,
            processed_items = campaign.processed_items,
            "Phase completed"
        );

        self.after_phase_completed(campaign, phase).await;
    }

    async fn handle_failed(
        self: &Arc<Self>,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        final_event: Option<&ProgressEvent>,
        reason: String,
    ) {
        let counters = final_event.map(ProgressCounters::from);
        if let Err(err) = self
            .aggregator()
            .reconcile(
                campaign_uuid,
                phase,
                &PhaseEvent::Fail(reason.clone()),
                counters,
            )
            .await
        {
            error!(
                campaign_uuid = %campaign_uuid,
                phase = %phase,
                error = %err,
                "Terminal reconciliation failed on phase failure"
            );
            return;
        }

        self.publisher().publish(CampaignEvent::PhaseFailed {
            campaign_uuid,
            phase,
            error: reason.clone(),
            timestamp: chrono::Utc::now(),
        });
        // A failed phase blocks auto-advance
        warn!(
            campaign_uuid = %campaign_uuid,
            phase = %phase,
            error = %reason,
            "Phase failed"
        );
    }

    async fn reconcile_if_live(&self, campaign_uuid: Uuid, phase: PhaseKind, event: &PhaseEvent) {
        match self.store().get_campaign(campaign_uuid).await {
            Ok(campaign) if !campaign.status.is_terminal() => {
                if let Err(err) = self
                    .aggregator()
                    .reconcile(campaign_uuid, phase, event, None)
                    .await
                {
                    error!(
                        campaign_uuid = %campaign_uuid,
                        phase = %phase,
                        error = %err,
                        "Late terminal reconciliation failed"
                    );
                }
            }
            Ok(_) => {}
            Err(err) => warn!(
                campaign_uuid = %campaign_uuid,
                phase = %phase,
                error = %err,
                "Campaign lookup failed during supervisor teardown"
            ),
        }
    }

    async fn handle_silent_exit(self: &Arc<Self>, campaign_uuid: Uuid, phase: PhaseKind) {
        match self.store().get_campaign(campaign_uuid).await {
            Ok(campaign) if campaign.status.is_terminal() => {}
            Ok(_) => {
                let reason = "phase worker terminated without reporting a terminal status";
                self.handle_failed(campaign_uuid, phase, None, reason.to_string())
                    .await;
            }
            Err(err) => warn!(
                campaign_uuid = %campaign_uuid,
                phase = %phase,
                error = %err,
                "Campaign lookup failed after silent worker exit"
            ),
        }
    }

    /// Post-completion rules: advance the campaign pointer to the next phase
    /// in the campaign-type order, start it when auto-advance is enabled and
    /// configuration exists, or finish the campaign and run hooks when the
    /// completed phase was the last one.
    async fn after_phase_completed(self: &Arc<Self>, campaign: Campaign, phase: PhaseKind) {
        let campaign_uuid = campaign.campaign_uuid;
        let Some(next_phase) = campaign.campaign_type.next_phase(phase) else {
            // Final phase: the reconciliation above set the campaign to
            // Completed; hooks observe that state
            info!(campaign_uuid = %campaign_uuid, "Campaign completed");
            self.hooks().run_completion_hooks(campaign_uuid).await;
            return;
        };

        if let Err(err) = self
            .store()
            .advance_campaign_phase(campaign_uuid, next_phase)
            .await
        {
            error!(
                campaign_uuid = %campaign_uuid,
                next_phase = %next_phase,
                error = %err,
                "Failed to advance campaign phase pointer"
            );
            return;
        }

        if !campaign.auto_advance {
            info!(
                campaign_uuid = %campaign_uuid,
                next_phase = %next_phase,
                "Auto-advance disabled, awaiting operator start"
            );
            return;
        }

        if let Err(err) = self.auto_start_next(campaign_uuid, phase, next_phase).await {
            warn!(
                campaign_uuid = %campaign_uuid,
                next_phase = %next_phase,
                error = %err,
                "Auto-advance halted, phase left not started"
            );
        }
    }

    async fn auto_start_next(
        self: &Arc<Self>,
        campaign_uuid: Uuid,
        previous_phase: PhaseKind,
        next_phase: PhaseKind,
    ) -> domainflow_shared::OrchestrationResult<()> {
        let configuration = self
            .store()
            .get_phase_configuration(campaign_uuid, next_phase)
            .await?
            .ok_or_else(|| domainflow_shared::OrchestrationError::ConfigurationInvalid {
                reason: format!("phase {next_phase} has no stored configuration"),
            })?;

        let service = self.registry().get(next_phase)?;
        service
            .configure(campaign_uuid, &configuration.config)
            .await?;
        self.store()
            .create_phase_execution(campaign_uuid, next_phase)
            .await?;
        self.start_execution(campaign_uuid, next_phase, StartMode::Fresh)
            .await?;

        // Emitted only after the new phase reached InProgress
        self.publisher().publish(CampaignEvent::PhaseTransition {
            campaign_uuid,
            previous_phase,
            new_phase: next_phase,
            timestamp: chrono::Utc::now(),
        });
        info!(
            campaign_uuid = %campaign_uuid,
            previous_phase = %previous_phase,
            new_phase = %next_phase,
            "Auto-advanced to next phase"
        );
        Ok(())
    }
}
