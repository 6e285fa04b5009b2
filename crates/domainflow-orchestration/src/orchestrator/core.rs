//! # Campaign Orchestrator
//!
//! Top-level façade for operator commands. Resolves the campaign through the
//! user-filtered store variants, routes control signals through the channel
//! manager (with bounded retry for `ControlChannelMissing`), creates
//! executions on the phase services, and supervises each execution to its
//! terminal transition.
//!
//! Locking rules: the execution map mutex and the control-map mutex are
//! never held across a store call or an ack wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use domainflow_shared::config::DomainFlowConfig;
use domainflow_shared::events::CampaignEvent;
use domainflow_shared::state_machine::{PhaseEvent, PhaseStatus};
use domainflow_shared::store::CampaignStore;
use domainflow_shared::types::{AuthContext, CampaignType, PhaseKind};
use domainflow_shared::{
    Campaign, EventPublisher, NewCampaign, OrchestrationError, OrchestrationResult,
    PhaseConfiguration,
};

use crate::control::{ControlChannelManager, ControlChannels, ControlCommand, ControlSignal};
use crate::orchestrator::hooks::{CompletionHook, HookRegistry};
use crate::phase::PhaseServiceRegistry;
use crate::progress::ProgressAggregator;

/// How an execution is being brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartMode {
    /// Operator start: transition Queued → InProgress and emit phase_started
    Fresh,
    /// Restore of a row persisted as Queued: same transitions as Fresh
    RestoreQueued,
    /// Restore of a row persisted as InProgress: resume emission, no transition
    RestoreRunning,
    /// Restore of a row persisted as Paused: reapply Pause before the worker
    /// ticks, no transition
    RestorePaused,
}

impl StartMode {
    fn transitions_to_in_progress(&self) -> bool {
        matches!(self, Self::Fresh | Self::RestoreQueued)
    }

    fn reapplies_pause(&self) -> bool {
        matches!(self, Self::RestorePaused)
    }
}

pub(crate) struct ExecutionHandle {
    pub(crate) cancel: CancellationToken,
}

pub struct CampaignOrchestrator {
    store: Arc<CampaignStore>,
    registry: PhaseServiceRegistry,
    control: RwLock<Arc<dyn ControlChannels>>,
    aggregator: ProgressAggregator,
    publisher: EventPublisher,
    hooks: HookRegistry,
    config: DomainFlowConfig,
    pub(crate) executions: Mutex<HashMap<(Uuid, PhaseKind), ExecutionHandle>>,
    shutting_down: AtomicBool,
}

impl CampaignOrchestrator {
    /// Build the orchestrator and the event stream handed to transport
    /// adapters. Call `restore_in_flight_phases` before admitting operator
    /// traffic.
    pub fn new(
        store: CampaignStore,
        registry: PhaseServiceRegistry,
        config: DomainFlowConfig,
    ) -> (Arc<Self>, mpsc::Receiver<CampaignEvent>) {
        let store = Arc::new(store);
        let (publisher, events) = EventPublisher::channel(config.progress.event_buffer_capacity);
        let aggregator = ProgressAggregator::new(store.clone(), publisher.clone());
        let control: Arc<dyn ControlChannels> =
            Arc::new(ControlChannelManager::new(config.control.channel_capacity));

        let orchestrator = Arc::new(Self {
            store,
            registry,
            control: RwLock::new(control),
            aggregator,
            publisher,
            hooks: HookRegistry::new(),
            config,
            executions: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        });
        (orchestrator, events)
    }

    pub fn store(&self) -> &Arc<CampaignStore> {
        &self.store
    }

    pub fn config(&self) -> &DomainFlowConfig {
        &self.config
    }

    pub(crate) fn aggregator(&self) -> &ProgressAggregator {
        &self.aggregator
    }

    pub(crate) fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub(crate) fn registry(&self) -> &PhaseServiceRegistry {
        &self.registry
    }

    pub(crate) fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Register a post-completion hook. Hooks run sequentially in
    /// registration order.
    pub fn register_completion_hook(&self, hook: Arc<dyn CompletionHook>) {
        self.hooks.register(hook);
    }

    pub fn control(&self) -> Arc<dyn ControlChannels> {
        self.control
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the control channel manager. Fault-injection seam for tests.
    #[cfg(feature = "test-utils")]
    pub fn set_control_manager(&self, control: Arc<dyn ControlChannels>) {
        *self
            .control
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = control;
    }

    /// Number of live (supervised) executions
    pub fn live_execution_count(&self) -> usize {
        self.lock_executions().len()
    }

    pub(crate) fn lock_executions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(Uuid, PhaseKind), ExecutionHandle>> {
        self.executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Campaign CRUD
    // =========================================================================

    pub async fn create_campaign(
        &self,
        auth: &AuthContext,
        display_name: impl Into<String>,
        campaign_type: CampaignType,
        auto_advance: bool,
    ) -> OrchestrationResult<Campaign> {
        let campaign = self
            .store
            .create_campaign(NewCampaign {
                owner_uuid: auth.user_uuid,
                display_name: display_name.into(),
                campaign_type,
                auto_advance,
            })
            .await?;
        info!(
            campaign_uuid = %campaign.campaign_uuid,
            campaign_type = %campaign_type,
            "Campaign created"
        );
        Ok(campaign)
    }

    pub async fn get_campaign(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
    ) -> OrchestrationResult<Campaign> {
        self.store.get_campaign_for_user(campaign_uuid, auth).await
    }

    pub async fn list_campaigns(&self, auth: &AuthContext) -> OrchestrationResult<Vec<Campaign>> {
        self.store.list_campaigns_for_user(auth).await
    }

    pub async fn delete_campaign(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
    ) -> OrchestrationResult<()> {
        self.store.delete_campaign_for_user(campaign_uuid, auth).await
    }

    pub async fn archive_campaign(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
    ) -> OrchestrationResult<Campaign> {
        self.store
            .archive_campaign_for_user(campaign_uuid, auth)
            .await
    }

    /// Validate a configuration blob against the phase service, then persist
    /// it. Rejected while the phase has a live execution.
    pub async fn configure_phase(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        config: serde_json::Value,
    ) -> OrchestrationResult<PhaseConfiguration> {
        let service = self.registry.get(phase)?;
        service.validate(&config)?;
        self.store
            .upsert_phase_configuration_for_user(campaign_uuid, phase, config, auth)
            .await
    }

    /// Non-blocking status snapshot from the phase service
    pub async fn get_phase_status(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<PhaseStatus> {
        self.store.get_campaign_for_user(campaign_uuid, auth).await?;
        let service = self.registry.get(phase)?;
        Ok(service.status(campaign_uuid).await)
    }

    // =========================================================================
    // Phase control surface
    // =========================================================================

    /// Start a configured phase: create the execution row, subscribe and
    /// attach the control channel, invoke `Execute`, and register the
    /// progress consumer.
    pub async fn start_phase(
        self: &Arc<Self>,
        auth: &AuthContext,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<()> {
        let _campaign = self.store.get_campaign_for_user(campaign_uuid, auth).await?;
        let service = self.registry.get(phase)?;

        let configuration = self
            .store
            .get_phase_configuration(campaign_uuid, phase)
            .await?
            .ok_or_else(|| OrchestrationError::ConfigurationInvalid {
                reason: format!("phase {phase} has no stored configuration"),
            })?;
        service.configure(campaign_uuid, &configuration.config).await?;

        self.store
            .create_phase_execution(campaign_uuid, phase)
            .await?;
        self.start_execution(campaign_uuid, phase, StartMode::Fresh)
            .await
    }

    /// Pause a running phase: broadcast with ack, then persist `Paused`
    pub async fn pause_phase(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<()> {
        let campaign = self.store.get_campaign_for_user(campaign_uuid, auth).await?;
        self.ensure_current_phase(&campaign, phase)?;
        if campaign.status != PhaseStatus::InProgress {
            return Err(OrchestrationError::IllegalTransition {
                from: campaign.status,
                to: PhaseStatus::Paused,
            });
        }

        self.broadcast_signal(campaign_uuid, phase, ControlSignal::Pause)
            .await?;
        self.store
            .transition_phase(campaign_uuid, phase, &PhaseEvent::Pause)
            .await?;
        info!(campaign_uuid = %campaign_uuid, phase = %phase, "Phase paused");
        Ok(())
    }

    /// Resume a paused phase: broadcast with ack, then persist `InProgress`
    pub async fn resume_phase(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<()> {
        let campaign = self.store.get_campaign_for_user(campaign_uuid, auth).await?;
        self.ensure_current_phase(&campaign, phase)?;
        if campaign.status != PhaseStatus::Paused {
            return Err(OrchestrationError::IllegalTransition {
                from: campaign.status,
                to: PhaseStatus::InProgress,
            });
        }

        self.broadcast_signal(campaign_uuid, phase, ControlSignal::Resume)
            .await?;
        self.store
            .transition_phase(campaign_uuid, phase, &PhaseEvent::Resume)
            .await?;
        info!(campaign_uuid = %campaign_uuid, phase = %phase, "Phase resumed");
        Ok(())
    }

    /// Cancel a non-terminal phase: broadcast Stop with ack, write
    /// `Cancelled`, close the control channel, and trigger cleanup.
    pub async fn cancel_phase(
        &self,
        auth: &AuthContext,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<()> {
        let campaign = self.store.get_campaign_for_user(campaign_uuid, auth).await?;
        self.ensure_current_phase(&campaign, phase)?;
        if campaign.status.is_terminal() {
            return Err(OrchestrationError::IllegalTransition {
                from: campaign.status,
                to: PhaseStatus::Cancelled,
            });
        }
        if campaign.status == PhaseStatus::NotStarted {
            return Err(OrchestrationError::PhaseNotRunning {
                campaign_uuid,
                phase,
            });
        }

        // Stop is delivered FIFO behind any queued Pause, so a concurrent
        // pause still ends in Cancelled
        self.broadcast_signal(campaign_uuid, phase, ControlSignal::Stop)
            .await?;

        let service = self.registry.get(phase)?;
        service.cancel(campaign_uuid).await?;

        if let Some(handle) = self.lock_executions().remove(&(campaign_uuid, phase)) {
            handle.cancel.cancel();
        }

        self.aggregator
            .reconcile(campaign_uuid, phase, &PhaseEvent::Cancel, None)
            .await?;
        self.control().close(campaign_uuid, phase);
        info!(campaign_uuid = %campaign_uuid, phase = %phase, "Phase cancelled");
        Ok(())
    }

    /// Cancel every live worker and close its control channel. Called at
    /// process teardown after the transport layer has stopped accepting
    /// traffic. Persisted execution rows keep their status so the next boot
    /// restores them.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<((Uuid, PhaseKind), ExecutionHandle)> =
            self.lock_executions().drain().collect();
        let control = self.control();
        for ((campaign_uuid, phase), handle) in handles {
            handle.cancel.cancel();
            control.close(campaign_uuid, phase);
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_current_phase(
        &self,
        campaign: &Campaign,
        phase: PhaseKind,
    ) -> OrchestrationResult<()> {
        if campaign.current_phase != phase {
            return Err(OrchestrationError::PhaseNotRunning {
                campaign_uuid: campaign.campaign_uuid,
                phase,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Internal execution bring-up
    // =========================================================================

    pub(crate) fn start_execution<'a>(
        self: &'a Arc<Self>,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        mode: StartMode,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = OrchestrationResult<()>> + Send + 'a>>
    {
        Box::pin(self.start_execution_inner(campaign_uuid, phase, mode))
    }

    async fn start_execution_inner(
        self: &Arc<Self>,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        mode: StartMode,
    ) -> OrchestrationResult<()> {
        let service = self.registry.get(phase)?;

        {
            let executions = self.lock_executions();
            if executions.contains_key(&(campaign_uuid, phase)) {
                return Err(OrchestrationError::IllegalTransition {
                    from: PhaseStatus::InProgress,
                    to: PhaseStatus::Queued,
                });
            }
        }

        let control = self.control();
        let control_rx = control.subscribe(campaign_uuid, phase).await?;
        service
            .attach_control_channel(campaign_uuid, phase, control_rx)
            .await;

        // For a paused restore, the Pause command is queued before the worker
        // starts; the worker consumes it ahead of its first tick and emits no
        // progress in between.
        let pause_ack = if mode.reapplies_pause() {
            let (command, ack_rx) = ControlCommand::acknowledged(ControlSignal::Pause);
            control.broadcast(campaign_uuid, phase, command).await?;
            Some(ack_rx)
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let progress_rx = match service.execute(cancel.clone(), campaign_uuid).await {
            Ok(rx) => rx,
            Err(err) => {
                control.close(campaign_uuid, phase);
                let reason = format!("phase service rejected execution: {err}");
                if let Err(mark_err) = self
                    .store
                    .transition_phase(campaign_uuid, phase, &PhaseEvent::Fail(reason))
                    .await
                {
                    warn!(
                        campaign_uuid = %campaign_uuid,
                        phase = %phase,
                        error = %mark_err,
                        "Failed to mark rejected execution as failed"
                    );
                }
                return Err(err);
            }
        };

        if mode.transitions_to_in_progress() {
            if let Err(err) = self
                .store
                .transition_phase(campaign_uuid, phase, &PhaseEvent::Start)
                .await
            {
                cancel.cancel();
                control.close(campaign_uuid, phase);
                return Err(err);
            }
            self.publisher.publish(CampaignEvent::PhaseStarted {
                campaign_uuid,
                phase,
                timestamp: chrono::Utc::now(),
            });
        }

        self.lock_executions().insert(
            (campaign_uuid, phase),
            ExecutionHandle {
                cancel: cancel.clone(),
            },
        );

        let orchestrator = Arc::clone(self);
        let initially_suppressed = mode.reapplies_pause();
        tokio::spawn(async move {
            orchestrator
                .supervise(campaign_uuid, phase, progress_rx, initially_suppressed)
                .await;
        });

        if let Some(ack_rx) = pause_ack {
            self.await_ack(ack_rx).await?;
            debug!(
                campaign_uuid = %campaign_uuid,
                phase = %phase,
                "Pause reapplied to restored worker"
            );
        }

        debug!(campaign_uuid = %campaign_uuid, phase = %phase, mode = ?mode, "Execution started");
        Ok(())
    }

    /// Broadcast with ack, retrying `ControlChannelMissing` with exponential
    /// backoff. The command is enqueued at most once: only a failed enqueue
    /// is retried, so a successful pause lands exactly one pause on the
    /// worker regardless of how many retries the enqueue needed.
    pub(crate) async fn broadcast_signal(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        signal: ControlSignal,
    ) -> OrchestrationResult<()> {
        let control_config = &self.config.control;
        let mut attempt: u32 = 0;

        let ack_rx = loop {
            let (command, ack_rx) = ControlCommand::acknowledged(signal);
            match self.control().broadcast(campaign_uuid, phase, command).await {
                Ok(()) => break ack_rx,
                Err(err)
                    if err.is_retryable() && attempt + 1 < control_config.broadcast_attempts =>
                {
                    let delay = control_config.backoff_delay(attempt);
                    let jitter =
                        Duration::from_millis(fastrand::u64(0..=delay.as_millis() as u64 / 4 + 1));
                    warn!(
                        campaign_uuid = %campaign_uuid,
                        phase = %phase,
                        signal = %signal,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Control channel missing, retrying broadcast"
                    );
                    tokio::time::sleep(delay + jitter).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        self.await_ack(ack_rx).await
    }

    pub(crate) async fn await_ack(
        &self,
        ack_rx: crate::control::ControlAckReceiver,
    ) -> OrchestrationResult<()> {
        let deadline = self.config.control.ack_timeout();
        match tokio::time::timeout(deadline, ack_rx).await {
            Ok(Ok(result)) => result,
            // A dropped sink means the worker died without acknowledging
            Ok(Err(_)) | Err(_) => Err(OrchestrationError::AckTimeout {
                waited_ms: deadline.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for CampaignOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignOrchestrator")
            .field("store", &self.store.backend_name())
            .field("registry", &self.registry)
            .field("live_executions", &self.live_execution_count())
            .finish()
    }
}
