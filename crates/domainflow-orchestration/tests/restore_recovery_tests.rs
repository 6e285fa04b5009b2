//! Crash-restart recovery: pause reapply, post-restore control, idempotence,
//! and the paused-restore progress blackout.
//!
//! A "restart" is a fresh orchestrator (fresh control channels, fresh mock
//! services, fresh counters) over the same in-memory store.

mod common;

use std::time::Duration;

use common::*;
use domainflow_orchestration::testing::ControlAwarePhaseService;
use domainflow_shared::state_machine::PhaseStatus;
use domainflow_shared::store::MemoryCampaignStore;
use domainflow_shared::types::{CampaignType, PhaseKind};

fn dns_service() -> ControlAwarePhaseService {
    ControlAwarePhaseService::new(PhaseKind::Dns)
}

#[tokio::test]
async fn test_pause_reapplied_exactly_once_after_restart() {
    let memory = MemoryCampaignStore::new();
    let harness = build_harness(&memory, vec![dns_service()], fast_config());
    let auth = operator();
    let campaign = seeded_dns_campaign(&harness, &auth, false).await;
    let campaign_uuid = campaign.campaign_uuid;

    harness
        .orchestrator
        .start_phase(&auth, campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();
    let counters = harness.counters_for(PhaseKind::Dns);
    assert_eq!(counters.executions(), 1);

    harness
        .orchestrator
        .pause_phase(&auth, campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();
    assert!(counters.is_paused());
    assert_eq!(counters.pause_events(), 1);

    // Crash: fresh orchestrator over the same store
    harness.orchestrator.shutdown().await;
    let restarted = build_harness(&memory, vec![dns_service()], fast_config());
    let summary = restarted
        .orchestrator
        .restore_in_flight_phases()
        .await
        .unwrap();

    assert_eq!(summary.restored, 1);
    assert_eq!(summary.reapplied_pauses, 1);
    assert_eq!(summary.failed, 0);

    let counters = restarted.counters_for(PhaseKind::Dns);
    assert_eq!(counters.executions(), 1);
    assert!(counters.is_paused());
    assert_eq!(counters.pause_events(), 1);
    assert!(counters.attach_events() >= 1);

    let stored = restarted
        .orchestrator
        .store()
        .get_campaign(campaign_uuid)
        .await
        .unwrap();
    assert_eq!(stored.status, PhaseStatus::Paused);
}

#[tokio::test]
async fn test_stop_after_restore_cancels_cleanly() {
    let memory = MemoryCampaignStore::new();
    let harness = build_harness(&memory, vec![dns_service()], fast_config());
    let auth = operator();
    let campaign = seeded_dns_campaign(&harness, &auth, false).await;
    let campaign_uuid = campaign.campaign_uuid;

    harness
        .orchestrator
        .start_phase(&auth, campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();
    harness.orchestrator.shutdown().await;

    let restarted = build_harness(&memory, vec![dns_service()], fast_config());
    let summary = restarted
        .orchestrator
        .restore_in_flight_phases()
        .await
        .unwrap();
    assert_eq!(summary.restored, 1);
    assert_eq!(summary.reapplied_pauses, 0);

    restarted
        .orchestrator
        .cancel_phase(&auth, campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();

    let counters = restarted.counters_for(PhaseKind::Dns);
    assert!(counters.is_terminated());
    assert_eq!(counters.stop_events(), 1);

    let stored = restarted
        .orchestrator
        .store()
        .get_campaign(campaign_uuid)
        .await
        .unwrap();
    assert_eq!(stored.status, PhaseStatus::Cancelled);
    assert_eq!(restarted.orchestrator.live_execution_count(), 0);
}

#[tokio::test]
async fn test_restore_is_idempotent() {
    let memory = MemoryCampaignStore::new();
    let harness = build_harness(&memory, vec![dns_service()], fast_config());
    let auth = operator();
    let campaign = seeded_dns_campaign(&harness, &auth, false).await;
    let campaign_uuid = campaign.campaign_uuid;

    harness
        .orchestrator
        .start_phase(&auth, campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();
    harness.orchestrator.shutdown().await;

    let restarted = build_harness(&memory, vec![dns_service()], fast_config());
    let first = restarted
        .orchestrator
        .restore_in_flight_phases()
        .await
        .unwrap();
    let second = restarted
        .orchestrator
        .restore_in_flight_phases()
        .await
        .unwrap();

    assert_eq!(first.restored, 1);
    assert_eq!(second.restored, 0);
    assert_eq!(second.skipped_live, 1);

    // Call counts of downstream effects preserved: one execution, one attach
    let counters = restarted.counters_for(PhaseKind::Dns);
    assert_eq!(counters.executions(), 1);
    assert_eq!(counters.attach_events(), 1);
    assert_eq!(restarted.orchestrator.live_execution_count(), 1);
}

#[tokio::test]
async fn test_paused_restore_emits_no_progress() {
    let memory = MemoryCampaignStore::new();
    let harness = build_harness(&memory, vec![dns_service()], fast_config());
    let auth = operator();
    let campaign = seeded_dns_campaign(&harness, &auth, false).await;
    let campaign_uuid = campaign.campaign_uuid;

    harness
        .orchestrator
        .start_phase(&auth, campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();
    let counters = harness.counters_for(PhaseKind::Dns);
    assert!(
        wait_until(Duration::from_secs(1), || counters.progress_events() > 5).await,
        "worker should tick progress before the pause"
    );
    harness
        .orchestrator
        .pause_phase(&auth, campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();

    harness.orchestrator.shutdown().await;
    let restarted = build_harness(&memory, vec![dns_service()], fast_config());
    restarted
        .orchestrator
        .restore_in_flight_phases()
        .await
        .unwrap();

    let counters = restarted.counters_for(PhaseKind::Dns);
    let after_reapply = counters.progress_events();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        counters.progress_events(),
        after_reapply,
        "a restored paused worker must not emit progress"
    );
    assert!(counters.is_paused());

    // The stored counters did not move either
    let before = restarted
        .orchestrator
        .store()
        .get_campaign(campaign_uuid)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = restarted
        .orchestrator
        .store()
        .get_campaign(campaign_uuid)
        .await
        .unwrap();
    assert_eq!(before.processed_items, after.processed_items);
}

#[tokio::test]
async fn test_rejected_restore_fails_one_execution_and_proceeds() {
    let memory = MemoryCampaignStore::new();
    let dns_harness = build_harness(&memory, vec![dns_service()], fast_config());
    let auth = operator();

    // Campaign one: dns phase
    let dns_campaign = seeded_dns_campaign(&dns_harness, &auth, false).await;
    dns_harness
        .orchestrator
        .start_phase(&auth, dns_campaign.campaign_uuid, PhaseKind::Dns)
        .await
        .unwrap();

    // Campaign two: http phase, driven by a second service
    let http_harness = build_harness(
        &memory,
        vec![ControlAwarePhaseService::new(PhaseKind::Http)],
        fast_config(),
    );
    let http_campaign = http_harness
        .orchestrator
        .create_campaign(
            &auth,
            "keyword-sweep",
            CampaignType::HttpKeywordValidation,
            false,
        )
        .await
        .unwrap();
    http_harness
        .orchestrator
        .configure_phase(
            &auth,
            http_campaign.campaign_uuid,
            PhaseKind::Http,
            serde_json::json!({"timeout_ms": 1500}),
        )
        .await
        .unwrap();
    http_harness
        .orchestrator
        .start_phase(&auth, http_campaign.campaign_uuid, PhaseKind::Http)
        .await
        .unwrap();

    dns_harness.orchestrator.shutdown().await;
    http_harness.orchestrator.shutdown().await;

    // The restarted deployment only carries the http service; the dns row is
    // rejected, marked failed, and the rest of the restore proceeds
    let restarted = build_harness(
        &memory,
        vec![ControlAwarePhaseService::new(PhaseKind::Http)],
        fast_config(),
    );
    let summary = restarted
        .orchestrator
        .restore_in_flight_phases()
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.restored, 1);

    let dns_stored = restarted
        .orchestrator
        .store()
        .get_campaign(dns_campaign.campaign_uuid)
        .await
        .unwrap();
    assert_eq!(dns_stored.status, PhaseStatus::Failed);
    assert!(dns_stored.error_message.is_some());

    let http_stored = restarted
        .orchestrator
        .store()
        .get_campaign(http_campaign.campaign_uuid)
        .await
        .unwrap();
    assert_eq!(http_stored.status, PhaseStatus::InProgress);
}
