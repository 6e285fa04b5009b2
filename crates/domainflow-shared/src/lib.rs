//! # domainflow-shared
//!
//! Shared foundation for the DomainFlow campaign orchestrator: the campaign
//! data model, the phase state machine, the campaign store (Postgres and
//! in-memory backends behind one enum), the typed error taxonomy, the wire
//! event surface, and configuration/logging bootstrap.
//!
//! The orchestration crate (`domainflow-orchestration`) builds the control
//! plane on top of these types; transport adapters consume the envelopes and
//! events defined here.

pub mod config;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod responses;
pub mod state_machine;
pub mod store;
pub mod types;

pub use config::DomainFlowConfig;
pub use errors::{OrchestrationError, OrchestrationResult};
pub use events::{CampaignEvent, CounterSummary, EventPublisher, ProgressEvent};
pub use models::{Campaign, NewCampaign, PhaseConfiguration, PhaseExecution};
pub use state_machine::{next_status, PhaseEvent, PhaseStatus};
pub use store::{CampaignStore, PgCampaignStore, ProgressCounters};
pub use types::{AuthContext, CampaignType, PhaseKind};

#[cfg(feature = "test-utils")]
pub use store::MemoryCampaignStore;
