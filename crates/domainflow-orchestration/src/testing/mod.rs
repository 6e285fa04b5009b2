//! Test utilities: a control-aware mock phase service and a fault-injecting
//! control manager. Available behind the default-on `test-utils` feature.

pub mod fault_control;
pub mod mock_phase;

pub use fault_control::FaultInjectingControlManager;
pub use mock_phase::{ControlAwarePhaseService, MockCounters};
