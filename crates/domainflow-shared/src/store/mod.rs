//! # Campaign Store
//!
//! Storage façade for campaigns, phase executions, and phase configurations.
//! `CampaignStore` is an enum over concrete backends — enum dispatch, no
//! trait objects. Operator-initiated paths use the `…_for_user` variants,
//! whose owner predicate is evaluated inside the backend query; a rejected
//! row is reported as `NotFound`, indistinguishable from a true miss. The
//! trusted variants are reserved for the restore engine and verified-admin
//! internals.
//!
//! Both backends share the same transition legality table
//! (`state_machine::next_status`) and the same counter rules:
//! - processed counters are monotonic within one phase execution; a write
//!   that would decrease `processed_items` is discarded
//! - status transitions persist the execution row and the campaign aggregate
//!   row atomically
//! - terminal reconciliation clamps `processed_items` to `total_items` and
//!   sets the terminal status in the same write

pub mod postgres;

#[cfg(feature = "test-utils")]
pub mod memory;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrchestrationResult;
use crate::models::{Campaign, NewCampaign, PhaseConfiguration, PhaseExecution};
use crate::state_machine::PhaseEvent;
use crate::types::{AuthContext, PhaseKind};

pub use postgres::PgCampaignStore;

#[cfg(feature = "test-utils")]
pub use memory::MemoryCampaignStore;

/// Counter snapshot carried by progress updates and terminal reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub processed_items: i64,
    pub total_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
}

impl From<&crate::events::ProgressEvent> for ProgressCounters {
    fn from(event: &crate::events::ProgressEvent) -> Self {
        Self {
            processed_items: event.processed_items,
            total_items: event.total_items,
            successful_items: event.successful_items,
            failed_items: event.failed_items,
        }
    }
}

/// Storage backend for the orchestration core
#[derive(Debug, Clone)]
pub enum CampaignStore {
    Postgres(PgCampaignStore),
    #[cfg(feature = "test-utils")]
    Memory(MemoryCampaignStore),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            CampaignStore::Postgres($inner) => $body,
            #[cfg(feature = "test-utils")]
            CampaignStore::Memory($inner) => $body,
        }
    };
}

impl CampaignStore {
    /// Backend name for logging
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            #[cfg(feature = "test-utils")]
            Self::Memory(_) => "memory",
        }
    }

    // =========================================================================
    // Campaign CRUD
    // =========================================================================

    pub async fn create_campaign(&self, new: NewCampaign) -> OrchestrationResult<Campaign> {
        dispatch!(self, inner => inner.create_campaign(new).await)
    }

    /// Trusted fetch, restore engine and verified admins only
    pub async fn get_campaign(&self, campaign_uuid: Uuid) -> OrchestrationResult<Campaign> {
        dispatch!(self, inner => inner.get_campaign(campaign_uuid).await)
    }

    /// Owner-filtered fetch for operator paths
    pub async fn get_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<Campaign> {
        dispatch!(self, inner => inner.get_campaign_for_user(campaign_uuid, auth).await)
    }

    pub async fn list_campaigns_for_user(
        &self,
        auth: &AuthContext,
    ) -> OrchestrationResult<Vec<Campaign>> {
        dispatch!(self, inner => inner.list_campaigns_for_user(auth).await)
    }

    /// Delete a terminal campaign; cascades to executions and configurations
    pub async fn delete_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<()> {
        dispatch!(self, inner => inner.delete_campaign_for_user(campaign_uuid, auth).await)
    }

    /// Operator-only archive of a finished campaign
    pub async fn archive_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<Campaign> {
        dispatch!(self, inner => inner.archive_campaign_for_user(campaign_uuid, auth).await)
    }

    // =========================================================================
    // Phase configuration
    // =========================================================================

    /// Store a configuration blob. Rejected while the phase has a
    /// non-terminal execution.
    pub async fn upsert_phase_configuration_for_user(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        config: serde_json::Value,
        auth: &AuthContext,
    ) -> OrchestrationResult<PhaseConfiguration> {
        dispatch!(self, inner => {
            inner
                .upsert_phase_configuration_for_user(campaign_uuid, phase, config, auth)
                .await
        })
    }

    pub async fn get_phase_configuration(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<Option<PhaseConfiguration>> {
        dispatch!(self, inner => inner.get_phase_configuration(campaign_uuid, phase).await)
    }

    // =========================================================================
    // Phase executions and transitions
    // =========================================================================

    /// Create the next execution (sequence = previous + 1) in `Queued`
    /// status, pointing the campaign at this phase and resetting its
    /// counters. Fails if a non-terminal execution already exists.
    pub async fn create_phase_execution(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<PhaseExecution> {
        dispatch!(self, inner => inner.create_phase_execution(campaign_uuid, phase).await)
    }

    /// Apply `event` to the live execution of (campaign, phase), persisting
    /// the execution row and the campaign status in one transaction.
    /// Returns the new status.
    pub async fn transition_phase(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        event: &PhaseEvent,
    ) -> OrchestrationResult<crate::state_machine::PhaseStatus> {
        dispatch!(self, inner => inner.transition_phase(campaign_uuid, phase, event).await)
    }

    /// Monotonic counter write plus execution heartbeat. Returns `false`
    /// when the update was discarded (it would have decreased
    /// `processed_items`).
    pub async fn update_progress(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        counters: ProgressCounters,
    ) -> OrchestrationResult<bool> {
        dispatch!(self, inner => inner.update_progress(campaign_uuid, phase, counters).await)
    }

    /// Terminal reconciliation: read-modify-write inside one transaction,
    /// clamping `processed_items` to `total_items` and applying the terminal
    /// transition atomically. Idempotent when the execution already carries
    /// the target status.
    pub async fn reconcile_phase_terminal(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        event: &PhaseEvent,
        final_counters: Option<ProgressCounters>,
    ) -> OrchestrationResult<Campaign> {
        dispatch!(self, inner => {
            inner
                .reconcile_phase_terminal(campaign_uuid, phase, event, final_counters)
                .await
        })
    }

    /// All executions in a non-terminal status, for startup restoration.
    /// Trusted: no user filter.
    pub async fn list_inflight_executions(&self) -> OrchestrationResult<Vec<PhaseExecution>> {
        dispatch!(self, inner => inner.list_inflight_executions().await)
    }

    /// Move the campaign pointer to `next_phase` with status `NotStarted`,
    /// resetting the phase-scoped counters. Used by auto-advance.
    pub async fn advance_campaign_phase(
        &self,
        campaign_uuid: Uuid,
        next_phase: PhaseKind,
    ) -> OrchestrationResult<Campaign> {
        dispatch!(self, inner => inner.advance_campaign_phase(campaign_uuid, next_phase).await)
    }
}
