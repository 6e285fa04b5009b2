//! # domainflow-orchestration
//!
//! Campaign orchestration core for DomainFlow: the phase service contract,
//! the per-(campaign, phase) control bus, progress aggregation with terminal
//! reconciliation, the operator-facing orchestrator façade, and startup
//! restoration of in-flight executions.
//!
//! The orchestrator, store, control manager, and hook registry are built once
//! before the transport layer accepts traffic and torn down with `shutdown`
//! after all workers have observed cancellation.

pub mod control;
pub mod orchestrator;
pub mod phase;
pub mod progress;
pub mod restore;

#[cfg(feature = "test-utils")]
pub mod testing;

pub use control::{
    ControlChannelManager, ControlChannels, ControlCommand, ControlReceiver, ControlSignal,
};
pub use orchestrator::{CampaignOrchestrator, CompletionHook, HookRegistry};
pub use phase::{PhaseService, PhaseServiceRegistry, ProgressReceiver};
pub use progress::ProgressAggregator;
pub use restore::RestoreSummary;
