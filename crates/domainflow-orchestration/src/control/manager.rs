//! # Control Channel Manager
//!
//! Per-(campaign, phase) control bus: a bounded FIFO of commands with at most
//! one active subscriber. The map mutex is held only for map mutations and
//! sender clones; the actual send happens outside the lock, so a slow worker
//! can never block subscribe/close on other buses.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use domainflow_shared::types::PhaseKind;
use domainflow_shared::{OrchestrationError, OrchestrationResult};

use super::command::ControlCommand;

/// Receive side of one control bus, handed to the phase worker
pub type ControlReceiver = mpsc::Receiver<ControlCommand>;

/// Abstract control bus surface.
///
/// Object-safe so the orchestrator can swap in a fault-injecting wrapper for
/// tests without touching production wiring.
#[async_trait]
pub trait ControlChannels: Send + Sync + std::fmt::Debug {
    /// Create the bus lazily and hand out its receiver. A second subscribe
    /// while the first receiver is live fails with `ChannelBusy`.
    async fn subscribe(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<ControlReceiver>;

    /// Enqueue a command FIFO behind earlier commands. Fails with
    /// `ControlChannelMissing` when no subscriber is active. Signals do not
    /// pre-empt one another.
    async fn broadcast(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        command: ControlCommand,
    ) -> OrchestrationResult<()>;

    /// Close the bus (the subscriber observes end-of-channel and exits) and
    /// drop the mapping. Idempotent.
    fn close(&self, campaign_uuid: Uuid, phase: PhaseKind);
}

#[derive(Debug)]
struct ChannelEntry {
    tx: mpsc::Sender<ControlCommand>,
    /// Present until a subscriber takes it; `None` means the bus is live
    rx: Option<ControlReceiver>,
}

/// Production control bus map
#[derive(Debug)]
pub struct ControlChannelManager {
    capacity: usize,
    channels: Mutex<HashMap<(Uuid, PhaseKind), ChannelEntry>>,
}

impl ControlChannelManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(Uuid, PhaseKind), ChannelEntry>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of mapped buses, for teardown assertions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ControlChannelManager {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl ControlChannels for ControlChannelManager {
    async fn subscribe(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<ControlReceiver> {
        let mut channels = self.lock();
        let entry = channels.entry((campaign_uuid, phase)).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.capacity);
            ChannelEntry { tx, rx: Some(rx) }
        });
        match entry.rx.take() {
            Some(rx) => {
                debug!(campaign_uuid = %campaign_uuid, phase = %phase, "Control channel subscribed");
                Ok(rx)
            }
            None => Err(OrchestrationError::ChannelBusy {
                campaign_uuid,
                phase,
            }),
        }
    }

    async fn broadcast(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        command: ControlCommand,
    ) -> OrchestrationResult<()> {
        // Clone the sender under the lock, send outside it
        let tx = {
            let channels = self.lock();
            match channels.get(&(campaign_uuid, phase)) {
                Some(entry) if entry.rx.is_none() => entry.tx.clone(),
                _ => {
                    return Err(OrchestrationError::ControlChannelMissing {
                        campaign_uuid,
                        phase,
                    })
                }
            }
        };

        trace!(
            campaign_uuid = %campaign_uuid,
            phase = %phase,
            signal = %command.signal,
            "Broadcasting control command"
        );
        tx.send(command)
            .await
            .map_err(|_| OrchestrationError::ControlChannelMissing {
                campaign_uuid,
                phase,
            })
    }

    fn close(&self, campaign_uuid: Uuid, phase: PhaseKind) {
        if self.lock().remove(&(campaign_uuid, phase)).is_some() {
            debug!(campaign_uuid = %campaign_uuid, phase = %phase, "Control channel closed");
        }
    }
}
