//! Phase service plug-in registry.

use std::collections::HashMap;
use std::sync::Arc;

use domainflow_shared::types::PhaseKind;
use domainflow_shared::{OrchestrationError, OrchestrationResult};

use super::service::PhaseService;

/// Maps each pipeline stage to the service that implements it. Populated at
/// startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct PhaseServiceRegistry {
    services: HashMap<PhaseKind, Arc<dyn PhaseService>>,
}

impl PhaseServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn PhaseService>) {
        self.services.insert(service.phase_kind(), service);
    }

    pub fn get(&self, phase: PhaseKind) -> OrchestrationResult<Arc<dyn PhaseService>> {
        self.services
            .get(&phase)
            .cloned()
            .ok_or_else(|| OrchestrationError::ConfigurationInvalid {
                reason: format!("no phase service registered for {phase}"),
            })
    }

    pub fn registered_phases(&self) -> Vec<PhaseKind> {
        self.services.keys().copied().collect()
    }
}

impl std::fmt::Debug for PhaseServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseServiceRegistry")
            .field("phases", &self.registered_phases())
            .finish()
    }
}
