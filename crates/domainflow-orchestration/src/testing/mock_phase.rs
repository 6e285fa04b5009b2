//! Control-aware mock phase service.
//!
//! Ticks on a short period (5 ms by default), emitting one progress event
//! per tick, consuming control commands with priority over work, and
//! acknowledging every command before the next. Counters are atomics so
//! tests can observe executions, attaches, pauses, and progress without
//! synchronising on the worker.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use domainflow_shared::state_machine::PhaseStatus;
use domainflow_shared::types::PhaseKind;
use domainflow_shared::{
    Campaign, OrchestrationError, OrchestrationResult, ProgressEvent,
};

use crate::control::{ControlCommand, ControlReceiver, ControlSignal};
use crate::phase::{PhaseService, ProgressReceiver};

/// Observable side effects of the mock worker
#[derive(Debug, Default)]
pub struct MockCounters {
    executions: AtomicUsize,
    attach_events: AtomicUsize,
    pause_events: AtomicUsize,
    resume_events: AtomicUsize,
    stop_events: AtomicUsize,
    progress_events: AtomicUsize,
    configure_calls: AtomicUsize,
    is_paused: AtomicBool,
    is_terminated: AtomicBool,
}

impl MockCounters {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn attach_events(&self) -> usize {
        self.attach_events.load(Ordering::SeqCst)
    }

    pub fn pause_events(&self) -> usize {
        self.pause_events.load(Ordering::SeqCst)
    }

    pub fn resume_events(&self) -> usize {
        self.resume_events.load(Ordering::SeqCst)
    }

    pub fn stop_events(&self) -> usize {
        self.stop_events.load(Ordering::SeqCst)
    }

    pub fn progress_events(&self) -> usize {
        self.progress_events.load(Ordering::SeqCst)
    }

    pub fn configure_calls(&self) -> usize {
        self.configure_calls.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.is_terminated.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct CampaignState {
    config: Option<serde_json::Value>,
    control_rx: Option<ControlReceiver>,
    running: bool,
    status: Option<PhaseStatus>,
    terminating: bool,
}

type SharedState = Arc<Mutex<HashMap<Uuid, CampaignState>>>;

/// Mock validator implementing the full phase capability set
pub struct ControlAwarePhaseService {
    phase: PhaseKind,
    tick: Duration,
    total_items: i64,
    fail_after: Option<i64>,
    counters: Arc<MockCounters>,
    state: SharedState,
}

impl ControlAwarePhaseService {
    pub fn new(phase: PhaseKind) -> Self {
        Self {
            phase,
            tick: Duration::from_millis(5),
            total_items: 100,
            fail_after: None,
            counters: Arc::new(MockCounters::default()),
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_total_items(mut self, total_items: i64) -> Self {
        self.total_items = total_items;
        self
    }

    /// Worker fails with an error once it has processed `n` items
    pub fn failing_after(mut self, n: i64) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Share a counter block across orchestrator restarts
    pub fn with_counters(mut self, counters: Arc<MockCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        self.counters.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CampaignState>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn next_command(rx: &mut Option<ControlReceiver>) -> Option<ControlCommand> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn set_status(state: &SharedState, campaign_uuid: Uuid, status: PhaseStatus) {
    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(entry) = state.get_mut(&campaign_uuid) {
        entry.status = Some(status);
    }
}

fn is_terminating(state: &SharedState, campaign_uuid: Uuid) -> bool {
    let state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    state
        .get(&campaign_uuid)
        .map(|entry| entry.terminating)
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    campaign_uuid: Uuid,
    phase: PhaseKind,
    tick: Duration,
    total_items: i64,
    fail_after: Option<i64>,
    cancel: CancellationToken,
    mut control_rx: Option<ControlReceiver>,
    progress_tx: mpsc::Sender<ProgressEvent>,
    counters: Arc<MockCounters>,
    state: SharedState,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut paused = false;
    let mut processed: i64 = 0;
    let mut final_status = PhaseStatus::Cancelled;

    let emit = |processed: i64, status: PhaseStatus, error_message: Option<String>| ProgressEvent {
        campaign_uuid,
        phase,
        processed_items: processed,
        total_items,
        successful_items: processed,
        failed_items: 0,
        progress_percentage: Campaign::derive_percentage(processed, total_items),
        status,
        error_message,
        timestamp: chrono::Utc::now(),
    };

    loop {
        tokio::select! {
            biased;
            command = next_command(&mut control_rx) => {
                match command {
                    Some(mut command) => match command.signal {
                        ControlSignal::Pause => {
                            // Acked but not honoured once the terminating
                            // flag is set
                            if !is_terminating(&state, campaign_uuid) {
                                paused = true;
                                counters.pause_events.fetch_add(1, Ordering::SeqCst);
                                counters.is_paused.store(true, Ordering::SeqCst);
                                set_status(&state, campaign_uuid, PhaseStatus::Paused);
                            }
                            command.acknowledge(Ok(()));
                        }
                        ControlSignal::Resume => {
                            paused = false;
                            counters.resume_events.fetch_add(1, Ordering::SeqCst);
                            counters.is_paused.store(false, Ordering::SeqCst);
                            set_status(&state, campaign_uuid, PhaseStatus::InProgress);
                            command.acknowledge(Ok(()));
                        }
                        ControlSignal::Stop => {
                            counters.stop_events.fetch_add(1, Ordering::SeqCst);
                            counters.is_terminated.store(true, Ordering::SeqCst);
                            final_status = PhaseStatus::Cancelled;
                            command.acknowledge(Ok(()));
                            let _ = progress_tx
                                .send(emit(processed, PhaseStatus::Cancelled, None))
                                .await;
                            break;
                        }
                    },
                    // Channel closed: the orchestrator tore the bus down
                    None => break,
                }
            }
            _ = cancel.cancelled() => {
                counters.is_terminated.store(true, Ordering::SeqCst);
                final_status = PhaseStatus::Cancelled;
                break;
            }
            _ = interval.tick() => {
                if paused {
                    continue;
                }
                processed += 1;

                if let Some(n) = fail_after {
                    if processed >= n {
                        final_status = PhaseStatus::Failed;
                        let _ = progress_tx
                            .send(emit(
                                processed,
                                PhaseStatus::Failed,
                                Some("synthetic validator failure".to_string()),
                            ))
                            .await;
                        break;
                    }
                }

                let status = if processed >= total_items {
                    PhaseStatus::Completed
                } else {
                    PhaseStatus::InProgress
                };
                counters.progress_events.fetch_add(1, Ordering::SeqCst);
                if progress_tx.send(emit(processed, status, None)).await.is_err() {
                    break;
                }
                if status == PhaseStatus::Completed {
                    final_status = PhaseStatus::Completed;
                    break;
                }
            }
        }
    }

    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(entry) = state.get_mut(&campaign_uuid) {
        entry.running = false;
        entry.status = Some(final_status);
    }
}

#[async_trait]
impl PhaseService for ControlAwarePhaseService {
    fn phase_kind(&self) -> PhaseKind {
        self.phase
    }

    async fn configure(
        &self,
        campaign_uuid: Uuid,
        config: &serde_json::Value,
    ) -> OrchestrationResult<()> {
        self.validate(config)?;
        let mut state = self.lock_state();
        let entry = state.entry(campaign_uuid).or_default();
        if entry.running {
            return Err(OrchestrationError::ConfigurationInvalid {
                reason: "phase is running".to_string(),
            });
        }
        entry.config = Some(config.clone());
        self.counters.configure_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn validate(&self, config: &serde_json::Value) -> OrchestrationResult<()> {
        if config.is_object() {
            Ok(())
        } else {
            Err(OrchestrationError::ConfigurationInvalid {
                reason: "configuration blob must be a JSON object".to_string(),
            })
        }
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        campaign_uuid: Uuid,
    ) -> OrchestrationResult<ProgressReceiver> {
        let control_rx = {
            let mut state = self.lock_state();
            let entry = state.entry(campaign_uuid).or_default();
            if entry.running {
                return Err(OrchestrationError::store(
                    "execute",
                    "an execution is already running for this campaign",
                ));
            }
            if entry.config.is_none() {
                return Err(OrchestrationError::ConfigurationInvalid {
                    reason: "execute before configure".to_string(),
                });
            }
            entry.running = true;
            entry.terminating = false;
            entry.status = Some(PhaseStatus::InProgress);
            entry.control_rx.take()
        };

        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        self.counters.is_terminated.store(false, Ordering::SeqCst);

        let (progress_tx, progress_rx) = mpsc::channel(64);
        tokio::spawn(worker_loop(
            campaign_uuid,
            self.phase,
            self.tick,
            self.total_items,
            self.fail_after,
            cancel,
            control_rx,
            progress_tx,
            self.counters.clone(),
            self.state.clone(),
        ));
        Ok(progress_rx)
    }

    async fn status(&self, campaign_uuid: Uuid) -> PhaseStatus {
        self.lock_state()
            .get(&campaign_uuid)
            .and_then(|entry| entry.status)
            .unwrap_or(PhaseStatus::NotStarted)
    }

    async fn cancel(&self, campaign_uuid: Uuid) -> OrchestrationResult<()> {
        let mut state = self.lock_state();
        let entry = state.entry(campaign_uuid).or_default();
        entry.terminating = true;
        self.counters.is_terminated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn attach_control_channel(
        &self,
        campaign_uuid: Uuid,
        _phase: PhaseKind,
        commands: ControlReceiver,
    ) {
        let mut state = self.lock_state();
        let entry = state.entry(campaign_uuid).or_default();
        entry.control_rx = Some(commands);
        self.counters.attach_events.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ControlAwarePhaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlAwarePhaseService")
            .field("phase", &self.phase)
            .field("tick", &self.tick)
            .field("total_items", &self.total_items)
            .finish()
    }
}
