//! # Progress Aggregator
//!
//! Fan-in for per-phase progress streams. Each execution gets a drain loop
//! that writes monotonic counters to the store, publishes coalesced events
//! downstream, suppresses everything while the phase is paused, and hands
//! the final event back to the supervisor for terminal reconciliation.
//!
//! The aggregator drains continuously; it never blocks the phase worker. A
//! full transport buffer coalesces events (see `EventPublisher`); a slow
//! store write only ever delays this drain loop, not the worker's bounded
//! channel beyond its capacity.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use domainflow_shared::events::{CampaignEvent, CounterSummary};
use domainflow_shared::state_machine::{PhaseEvent, PhaseStatus};
use domainflow_shared::store::{CampaignStore, ProgressCounters};
use domainflow_shared::types::PhaseKind;
use domainflow_shared::{
    Campaign, EventPublisher, OrchestrationResult, ProgressEvent,
};

use crate::phase::ProgressReceiver;

#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    store: Arc<CampaignStore>,
    publisher: EventPublisher,
}

impl ProgressAggregator {
    pub fn new(store: Arc<CampaignStore>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Drain one execution's progress stream to completion.
    ///
    /// `initially_suppressed` is set when restoring a paused phase: anything
    /// the worker emits before it consumes the reapplied Pause is dropped,
    /// so a paused restore emits no observable progress.
    ///
    /// Returns the last event observed (its status carries the outcome), or
    /// `None` when the stream closed without a single event.
    pub async fn drain(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        mut events: ProgressReceiver,
        initially_suppressed: bool,
    ) -> Option<ProgressEvent> {
        debug!(
            campaign_uuid = %campaign_uuid,
            phase = %phase,
            initially_suppressed,
            "Progress drain started"
        );
        let mut suppressed = initially_suppressed;
        let mut high_water: i64 = -1;
        let mut last = None;

        while let Some(event) = events.recv().await {
            self.observe(&event, &mut suppressed, &mut high_water).await;
            last = Some(event);
        }
        last
    }

    async fn observe(&self, event: &ProgressEvent, suppressed: &mut bool, high_water: &mut i64) {
        if event.status == PhaseStatus::Paused {
            // Paused phases emit no progress; suppress until the pause lifts
            *suppressed = true;
            return;
        }
        if *suppressed && !event.status.is_terminal() {
            // The pause lifts when the store no longer says Paused (the
            // resume path persists InProgress before the worker re-emits).
            // Anything emitted while the store still says Paused is phantom
            // progress from a worker racing its own pause command.
            let still_paused = matches!(
                self.store.get_campaign(event.campaign_uuid).await,
                Ok(campaign) if campaign.status == PhaseStatus::Paused
            );
            if still_paused {
                debug!(
                    campaign_uuid = %event.campaign_uuid,
                    phase = %event.phase,
                    "Suppressing progress from paused phase"
                );
                return;
            }
        }
        *suppressed = false;

        // Terminal events are handled by reconciliation, not incremental writes
        if event.status.is_terminal() {
            return;
        }

        // In-memory monotonic guard ahead of the store-level one
        if event.processed_items < *high_water {
            debug!(
                campaign_uuid = %event.campaign_uuid,
                phase = %event.phase,
                processed_items = event.processed_items,
                high_water = *high_water,
                "Discarding non-monotonic progress update"
            );
            return;
        }
        *high_water = event.processed_items;

        match self
            .store
            .update_progress(event.campaign_uuid, event.phase, event.into())
            .await
        {
            Ok(true) => {
                self.publisher.publish(CampaignEvent::Progress {
                    campaign_uuid: event.campaign_uuid,
                    phase: event.phase,
                    processed_items: event.processed_items,
                    total_items: event.total_items,
                    progress_percentage: event.progress_percentage,
                    status: event.status,
                    timestamp: event.timestamp,
                });
            }
            Ok(false) => {
                // Store had a higher processed count (restored execution); keep
                // the high-water mark aligned with what the worker reports
            }
            Err(err) => {
                warn!(
                    campaign_uuid = %event.campaign_uuid,
                    phase = %event.phase,
                    error = %err,
                    "Failed to persist progress update"
                );
            }
        }
    }

    /// Terminal reconciliation: clamp counters to the total and set the
    /// terminal status atomically, then publish `counters_reconciled`.
    pub async fn reconcile(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        event: &PhaseEvent,
        final_counters: Option<ProgressCounters>,
    ) -> OrchestrationResult<Campaign> {
        let campaign = self
            .store
            .reconcile_phase_terminal(campaign_uuid, phase, event, final_counters)
            .await?;

        self.publisher.publish(CampaignEvent::CountersReconciled {
            campaign_uuid,
            phase,
            counters: CounterSummary {
                processed_items: campaign.processed_items,
                total_items: campaign.total_items,
                successful_items: campaign.successful_items,
                failed_items: campaign.failed_items,
            },
            timestamp: chrono::Utc::now(),
        });
        Ok(campaign)
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domainflow_shared::store::MemoryCampaignStore;
    use domainflow_shared::types::{AuthContext, CampaignType};
    use domainflow_shared::NewCampaign;
    use tokio::sync::mpsc;

    async fn harness() -> (
        ProgressAggregator,
        Arc<CampaignStore>,
        tokio::sync::mpsc::Receiver<CampaignEvent>,
        Uuid,
    ) {
        let store = Arc::new(CampaignStore::Memory(MemoryCampaignStore::new()));
        let auth = AuthContext::new(Uuid::new_v4());
        let campaign = store
            .create_campaign(NewCampaign {
                owner_uuid: auth.user_uuid,
                display_name: "aggregator-test".into(),
                campaign_type: CampaignType::DnsValidation,
                auto_advance: true,
            })
            .await
            .unwrap();
        store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap();
        store
            .transition_phase(campaign.campaign_uuid, PhaseKind::Dns, &PhaseEvent::Start)
            .await
            .unwrap();

        let (publisher, rx) = EventPublisher::channel(64);
        let aggregator = ProgressAggregator::new(store.clone(), publisher);
        (aggregator, store, rx, campaign.campaign_uuid)
    }

    fn sample(campaign_uuid: Uuid, processed: i64, status: PhaseStatus) -> ProgressEvent {
        ProgressEvent {
            campaign_uuid,
            phase: PhaseKind::Dns,
            processed_items: processed,
            total_items: 10,
            successful_items: processed,
            failed_items: 0,
            progress_percentage: processed as f64 * 10.0,
            status,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_drain_writes_counters_and_returns_last_event() {
        let (aggregator, store, mut events, campaign_uuid) = harness().await;
        let (tx, rx) = mpsc::channel(16);

        for processed in [2, 5, 10] {
            tx.send(sample(campaign_uuid, processed, PhaseStatus::InProgress))
                .await
                .unwrap();
        }
        drop(tx);

        let last = aggregator
            .drain(campaign_uuid, PhaseKind::Dns, rx, false)
            .await
            .unwrap();
        assert_eq!(last.processed_items, 10);

        let campaign = store.get_campaign(campaign_uuid).await.unwrap();
        assert_eq!(campaign.processed_items, 10);
        assert!(campaign.counters_consistent());

        // Three progress events published downstream, in emission order
        for expected in [2, 5, 10] {
            match events.recv().await.unwrap() {
                CampaignEvent::Progress {
                    processed_items, ..
                } => assert_eq!(processed_items, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_suppressed_drain_drops_pre_pause_emissions() {
        let (aggregator, store, mut events, campaign_uuid) = harness().await;
        store
            .transition_phase(campaign_uuid, PhaseKind::Dns, &PhaseEvent::Pause)
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(16);

        // A restored-paused worker must not surface anything it emitted
        // before consuming the reapplied Pause
        tx.send(sample(campaign_uuid, 3, PhaseStatus::InProgress))
            .await
            .unwrap();
        drop(tx);

        let last = aggregator
            .drain(campaign_uuid, PhaseKind::Dns, rx, true)
            .await;
        assert!(last.is_some());

        let campaign = store.get_campaign(campaign_uuid).await.unwrap();
        assert_eq!(campaign.processed_items, 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_suppression_lifts_once_the_store_leaves_paused() {
        let (aggregator, store, mut events, campaign_uuid) = harness().await;
        store
            .transition_phase(campaign_uuid, PhaseKind::Dns, &PhaseEvent::Pause)
            .await
            .unwrap();
        store
            .transition_phase(campaign_uuid, PhaseKind::Dns, &PhaseEvent::Resume)
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(16);

        // Post-resume emissions flow normally even when the drain began in
        // the suppressed state
        tx.send(sample(campaign_uuid, 4, PhaseStatus::InProgress))
            .await
            .unwrap();
        drop(tx);

        aggregator
            .drain(campaign_uuid, PhaseKind::Dns, rx, true)
            .await;

        let campaign = store.get_campaign(campaign_uuid).await.unwrap();
        assert_eq!(campaign.processed_items, 4);
        assert!(matches!(
            events.recv().await.unwrap(),
            CampaignEvent::Progress {
                processed_items: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_non_monotonic_updates_are_discarded() {
        let (aggregator, store, _events, campaign_uuid) = harness().await;
        let (tx, rx) = mpsc::channel(16);

        tx.send(sample(campaign_uuid, 7, PhaseStatus::InProgress))
            .await
            .unwrap();
        tx.send(sample(campaign_uuid, 4, PhaseStatus::InProgress))
            .await
            .unwrap();
        drop(tx);

        aggregator
            .drain(campaign_uuid, PhaseKind::Dns, rx, false)
            .await;

        let campaign = store.get_campaign(campaign_uuid).await.unwrap();
        assert_eq!(campaign.processed_items, 7);
    }

    #[tokio::test]
    async fn test_reconcile_publishes_final_counters() {
        let (aggregator, _store, mut events, campaign_uuid) = harness().await;

        let campaign = aggregator
            .reconcile(
                campaign_uuid,
                PhaseKind::Dns,
                &PhaseEvent::Complete,
                Some(ProgressCounters {
                    processed_items: 10,
                    total_items: 10,
                    successful_items: 9,
                    failed_items: 1,
                }),
            )
            .await
            .unwrap();
        assert_eq!(campaign.status, PhaseStatus::Completed);
        assert_eq!(campaign.progress_percentage, 100.0);

        match events.recv().await.unwrap() {
            CampaignEvent::CountersReconciled { counters, .. } => {
                assert_eq!(counters.processed_items, 10);
                assert_eq!(counters.successful_items, 9);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
