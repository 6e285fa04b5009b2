//! # Campaign Event Surface
//!
//! Typed events the core publishes to transport adapters, plus the bounded
//! publisher with per-(campaign, phase, kind) coalescing. 64-bit counters are
//! serialised as decimal strings so JavaScript-range consumers survive them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::state_machine::PhaseStatus;
use crate::types::PhaseKind;

/// Serialise `i64` as a decimal string on the wire
pub mod string_i64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Progress sample emitted by a phase service on its bounded channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub campaign_uuid: Uuid,
    pub phase: PhaseKind,
    pub processed_items: i64,
    pub total_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
    pub progress_percentage: f64,
    pub status: PhaseStatus,
    /// Failure detail when `status` is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Final counter set carried by completion and reconciliation events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSummary {
    #[serde(with = "string_i64")]
    pub processed_items: i64,
    #[serde(with = "string_i64")]
    pub total_items: i64,
    #[serde(with = "string_i64")]
    pub successful_items: i64,
    #[serde(with = "string_i64")]
    pub failed_items: i64,
}

/// Append-only, per-campaign event stream consumed by transport adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CampaignEvent {
    Progress {
        campaign_uuid: Uuid,
        phase: PhaseKind,
        #[serde(with = "string_i64")]
        processed_items: i64,
        #[serde(with = "string_i64")]
        total_items: i64,
        progress_percentage: f64,
        status: PhaseStatus,
        timestamp: DateTime<Utc>,
    },
    PhaseStarted {
        campaign_uuid: Uuid,
        phase: PhaseKind,
        timestamp: DateTime<Utc>,
    },
    PhaseCompleted {
        campaign_uuid: Uuid,
        phase: PhaseKind,
        result: CounterSummary,
        timestamp: DateTime<Utc>,
    },
    PhaseFailed {
        campaign_uuid: Uuid,
        phase: PhaseKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    PhaseTransition {
        campaign_uuid: Uuid,
        previous_phase: PhaseKind,
        new_phase: PhaseKind,
        timestamp: DateTime<Utc>,
    },
    CountersReconciled {
        campaign_uuid: Uuid,
        phase: PhaseKind,
        counters: CounterSummary,
        timestamp: DateTime<Utc>,
    },
}

impl CampaignEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::PhaseStarted { .. } => "phase_started",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::PhaseFailed { .. } => "phase_failed",
            Self::PhaseTransition { .. } => "phase_transition",
            Self::CountersReconciled { .. } => "counters_reconciled",
        }
    }

    pub fn campaign_uuid(&self) -> Uuid {
        match self {
            Self::Progress { campaign_uuid, .. }
            | Self::PhaseStarted { campaign_uuid, .. }
            | Self::PhaseCompleted { campaign_uuid, .. }
            | Self::PhaseFailed { campaign_uuid, .. }
            | Self::PhaseTransition { campaign_uuid, .. }
            | Self::CountersReconciled { campaign_uuid, .. } => *campaign_uuid,
        }
    }

    fn coalesce_key(&self) -> (Uuid, Option<PhaseKind>, &'static str) {
        let phase = match self {
            Self::Progress { phase, .. }
            | Self::PhaseStarted { phase, .. }
            | Self::PhaseCompleted { phase, .. }
            | Self::PhaseFailed { phase, .. }
            | Self::CountersReconciled { phase, .. } => Some(*phase),
            Self::PhaseTransition { .. } => None,
        };
        (self.campaign_uuid(), phase, self.kind())
    }
}

type CoalesceKey = (Uuid, Option<PhaseKind>, &'static str);

/// Bounded, non-blocking publisher toward transport adapters.
///
/// When the downstream buffer is full, events are coalesced: only the most
/// recent event per (campaign, phase, kind) is retained and re-delivered as
/// capacity frees up. Publishing never blocks the caller, so a slow or
/// absent adapter cannot stall the aggregator or the orchestrator.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<CampaignEvent>,
    pending: Arc<Mutex<HashMap<CoalesceKey, CampaignEvent>>>,
}

impl EventPublisher {
    /// Create a publisher and the receiver handed to transport adapters
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CampaignEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                pending: Arc::new(Mutex::new(HashMap::new())),
            },
            rx,
        )
    }

    /// Publish an event, coalescing on a full downstream buffer
    pub fn publish(&self, event: CampaignEvent) {
        self.flush_pending();
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                trace!(
                    campaign_uuid = %event.campaign_uuid(),
                    kind = event.kind(),
                    "Transport buffer full, coalescing event"
                );
                self.pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(event.coalesce_key(), event);
            }
            // No adapter attached; events are observable but not mandatory
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Re-deliver coalesced events while the buffer has room
    fn flush_pending(&self) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let keys: Vec<CoalesceKey> = pending.keys().copied().collect();
        for key in keys {
            if let Some(event) = pending.remove(&key) {
                match self.tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(event)) => {
                        pending.insert(key, event);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        pending.clear();
                        break;
                    }
                }
            }
        }
    }

    /// Number of coalesced events awaiting re-delivery
    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
