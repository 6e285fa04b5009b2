//! Phase service contract and plug-in registry.

pub mod registry;
pub mod service;

pub use registry::PhaseServiceRegistry;
pub use service::{PhaseService, ProgressReceiver};
