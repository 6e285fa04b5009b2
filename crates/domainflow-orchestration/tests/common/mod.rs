//! Shared harness for orchestration integration tests.
//!
//! Builds orchestrators over a shared in-memory store with control-aware
//! mock phase services, so "restart" is a fresh orchestrator (fresh channels,
//! fresh services, fresh counters) against the same durable state.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use domainflow_orchestration::testing::{ControlAwarePhaseService, MockCounters};
use domainflow_orchestration::{CampaignOrchestrator, PhaseService, PhaseServiceRegistry};
use domainflow_shared::config::DomainFlowConfig;
use domainflow_shared::events::CampaignEvent;
use domainflow_shared::state_machine::PhaseStatus;
use domainflow_shared::store::{CampaignStore, MemoryCampaignStore};
use domainflow_shared::types::{AuthContext, CampaignType, PhaseKind};
use domainflow_shared::Campaign;

pub struct Harness {
    pub orchestrator: Arc<CampaignOrchestrator>,
    pub events: mpsc::Receiver<CampaignEvent>,
    pub counters: Vec<(PhaseKind, Arc<MockCounters>)>,
}

impl Harness {
    pub fn counters_for(&self, phase: PhaseKind) -> Arc<MockCounters> {
        self.counters
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, c)| c.clone())
            .expect("no mock registered for phase")
    }
}

/// Build an orchestrator over `memory` with one mock service per entry.
/// Re-invoking with the same store models a process restart.
pub fn build_harness(
    memory: &MemoryCampaignStore,
    services: Vec<ControlAwarePhaseService>,
    config: DomainFlowConfig,
) -> Harness {
    let mut registry = PhaseServiceRegistry::new();
    let mut counters = Vec::new();
    for service in services {
        counters.push((service.phase_kind(), service.counters()));
        registry.register(Arc::new(service));
    }
    let (orchestrator, events) =
        CampaignOrchestrator::new(CampaignStore::Memory(memory.clone()), registry, config);
    Harness {
        orchestrator,
        events,
        counters,
    }
}

/// Config with short timeouts so failure paths stay fast in tests
pub fn fast_config() -> DomainFlowConfig {
    let mut config = DomainFlowConfig::default();
    config.control.ack_timeout_ms = 500;
    config.control.broadcast_initial_backoff_ms = 10;
    config
}

pub fn operator() -> AuthContext {
    AuthContext::new(Uuid::new_v4())
}

/// Create a dns_validation campaign with its first phase configured
pub async fn seeded_dns_campaign(
    harness: &Harness,
    auth: &AuthContext,
    auto_advance: bool,
) -> Campaign {
    let campaign = harness
        .orchestrator
        .create_campaign(auth, "spring-sweep", CampaignType::DnsValidation, auto_advance)
        .await
        .expect("create campaign");
    harness
        .orchestrator
        .configure_phase(
            auth,
            campaign.campaign_uuid,
            PhaseKind::Dns,
            serde_json::json!({"resolver": "203.0.113.53"}),
        )
        .await
        .expect("configure dns phase");
    campaign
}

/// Poll `cond` until it holds or `deadline` elapses
pub async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Collect published events until `done` holds over the collected slice or
/// the deadline elapses
pub async fn drain_events(
    rx: &mut mpsc::Receiver<CampaignEvent>,
    deadline: Duration,
    mut done: impl FnMut(&[CampaignEvent]) -> bool,
) -> Vec<CampaignEvent> {
    let mut collected = Vec::new();
    let start = Instant::now();
    while !done(&collected) && start.elapsed() < deadline {
        match tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
            Ok(Some(event)) => collected.push(event),
            Ok(None) => break,
            Err(_) => {}
        }
    }
    collected
}

/// Poll the store until `pred` holds for the campaign snapshot.
///
/// Campaign status alone can be ambiguous mid-pipeline (each completed phase
/// passes through `Completed` before auto-advance repoints the campaign), so
/// callers waiting on a pipeline milestone should also pin `current_phase`.
pub async fn wait_for_campaign(
    store: &CampaignStore,
    campaign_uuid: Uuid,
    deadline: Duration,
    mut pred: impl FnMut(&Campaign) -> bool,
) -> bool {
    let start = Instant::now();
    loop {
        if let Ok(campaign) = store.get_campaign(campaign_uuid).await {
            if pred(&campaign) {
                return true;
            }
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Poll the store until the campaign reaches `status`
pub async fn wait_for_campaign_status(
    store: &CampaignStore,
    campaign_uuid: Uuid,
    status: PhaseStatus,
    deadline: Duration,
) -> bool {
    wait_for_campaign(store, campaign_uuid, deadline, |campaign| {
        campaign.status == status
    })
    .await
}
