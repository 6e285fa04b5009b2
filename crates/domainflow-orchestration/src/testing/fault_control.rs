//! Fault-injecting control channel wrapper.
//!
//! Wraps a real control manager and fails the next N broadcasts with
//! `ControlChannelMissing`, reproducing the race where a restarted worker has
//! not yet re-subscribed. Injected via the orchestrator's
//! `set_control_manager` seam.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use domainflow_shared::types::PhaseKind;
use domainflow_shared::{OrchestrationError, OrchestrationResult};

use crate::control::{ControlChannels, ControlCommand, ControlReceiver};

#[derive(Debug)]
pub struct FaultInjectingControlManager {
    inner: Arc<dyn ControlChannels>,
    fail_next: AtomicUsize,
    injected_failures: AtomicUsize,
}

impl FaultInjectingControlManager {
    pub fn new(inner: Arc<dyn ControlChannels>) -> Self {
        Self {
            inner,
            fail_next: AtomicUsize::new(0),
            injected_failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` broadcasts with `ControlChannelMissing`
    pub fn fail_next_broadcasts(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of failures injected so far
    pub fn injected_failures(&self) -> usize {
        self.injected_failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlChannels for FaultInjectingControlManager {
    async fn subscribe(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<ControlReceiver> {
        self.inner.subscribe(campaign_uuid, phase).await
    }

    async fn broadcast(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        command: ControlCommand,
    ) -> OrchestrationResult<()> {
        let armed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            self.injected_failures.fetch_add(1, Ordering::SeqCst);
            return Err(OrchestrationError::ControlChannelMissing {
                campaign_uuid,
                phase,
            });
        }
        self.inner.broadcast(campaign_uuid, phase, command).await
    }

    fn close(&self, campaign_uuid: Uuid, phase: PhaseKind) {
        self.inner.close(campaign_uuid, phase);
    }
}
