//! In-memory campaign store.
//!
//! Shares the transition table and counter rules with the Postgres backend
//! so orchestration tests exercise identical semantics without a database.
//! The whole state sits behind one mutex; no lock is held across an await.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::models::{Campaign, NewCampaign, PhaseConfiguration, PhaseExecution};
use crate::state_machine::{next_status, PhaseEvent, PhaseStatus};
use crate::types::{AuthContext, PhaseKind};

use super::ProgressCounters;

#[derive(Debug, Default)]
struct MemoryState {
    campaigns: HashMap<Uuid, Campaign>,
    executions: HashMap<(Uuid, PhaseKind), Vec<PhaseExecution>>,
    configurations: HashMap<(Uuid, PhaseKind), PhaseConfiguration>,
}

impl MemoryState {
    fn visible(&self, campaign_uuid: Uuid, auth: &AuthContext) -> Option<&Campaign> {
        self.campaigns
            .get(&campaign_uuid)
            .filter(|c| auth.is_admin() || c.owner_uuid == auth.user_uuid)
    }

    fn latest_execution(&self, campaign_uuid: Uuid, phase: PhaseKind) -> Option<&PhaseExecution> {
        self.executions
            .get(&(campaign_uuid, phase))
            .and_then(|runs| runs.last())
    }

    fn latest_execution_mut(
        &mut self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> Option<&mut PhaseExecution> {
        self.executions
            .get_mut(&(campaign_uuid, phase))
            .and_then(|runs| runs.last_mut())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCampaignStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn create_campaign(&self, new: NewCampaign) -> OrchestrationResult<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            campaign_uuid: Uuid::now_v7(),
            owner_uuid: new.owner_uuid,
            display_name: new.display_name,
            campaign_type: new.campaign_type,
            current_phase: new.campaign_type.initial_phase(),
            status: PhaseStatus::NotStarted,
            processed_items: 0,
            total_items: 0,
            successful_items: 0,
            failed_items: 0,
            progress_percentage: 0.0,
            error_message: None,
            estimated_completion_at: None,
            auto_advance: new.auto_advance,
            created_at: now,
            updated_at: now,
        };
        self.lock()
            .campaigns
            .insert(campaign.campaign_uuid, campaign.clone());
        Ok(campaign)
    }

    pub async fn get_campaign(&self, campaign_uuid: Uuid) -> OrchestrationResult<Campaign> {
        self.lock()
            .campaigns
            .get(&campaign_uuid)
            .cloned()
            .ok_or(OrchestrationError::NotFound)
    }

    pub async fn get_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<Campaign> {
        self.lock()
            .visible(campaign_uuid, auth)
            .cloned()
            .ok_or(OrchestrationError::NotFound)
    }

    pub async fn list_campaigns_for_user(
        &self,
        auth: &AuthContext,
    ) -> OrchestrationResult<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .lock()
            .campaigns
            .values()
            .filter(|c| auth.is_admin() || c.owner_uuid == auth.user_uuid)
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    pub async fn delete_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<()> {
        let mut state = self.lock();
        let campaign = state
            .visible(campaign_uuid, auth)
            .ok_or(OrchestrationError::NotFound)?;
        if !campaign.status.is_terminal() {
            return Err(OrchestrationError::IllegalTransition {
                from: campaign.status,
                to: PhaseStatus::Archived,
            });
        }
        state.campaigns.remove(&campaign_uuid);
        state.executions.retain(|(c, _), _| *c != campaign_uuid);
        state.configurations.retain(|(c, _), _| *c != campaign_uuid);
        Ok(())
    }

    pub async fn archive_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<Campaign> {
        let mut state = self.lock();
        let current = state
            .visible(campaign_uuid, auth)
            .map(|c| c.status)
            .ok_or(OrchestrationError::NotFound)?;
        let next = next_status(current, &PhaseEvent::Archive)?;

        let campaign = state
            .campaigns
            .get_mut(&campaign_uuid)
            .ok_or(OrchestrationError::NotFound)?;
        campaign.status = next;
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }

    pub async fn upsert_phase_configuration_for_user(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        config: serde_json::Value,
        auth: &AuthContext,
    ) -> OrchestrationResult<PhaseConfiguration> {
        let mut state = self.lock();
        if state.visible(campaign_uuid, auth).is_none() {
            return Err(OrchestrationError::NotFound);
        }
        if let Some(execution) = state.latest_execution(campaign_uuid, phase) {
            if !execution.status.is_terminal() {
                return Err(OrchestrationError::ConfigurationInvalid {
                    reason: format!(
                        "phase {phase} has a live execution in status {}",
                        execution.status
                    ),
                });
            }
        }

        let now = Utc::now();
        let entry = state
            .configurations
            .entry((campaign_uuid, phase))
            .or_insert_with(|| PhaseConfiguration {
                campaign_uuid,
                phase,
                config: serde_json::Value::Null,
                created_at: now,
                updated_at: now,
            });
        entry.config = config;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    pub async fn get_phase_configuration(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<Option<PhaseConfiguration>> {
        Ok(self
            .lock()
            .configurations
            .get(&(campaign_uuid, phase))
            .cloned())
    }

    pub async fn create_phase_execution(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<PhaseExecution> {
        let mut state = self.lock();
        let campaign_status = state
            .campaigns
            .get(&campaign_uuid)
            .map(|c| c.status)
            .ok_or(OrchestrationError::NotFound)?;
        if campaign_status.is_terminal() {
            return Err(OrchestrationError::IllegalTransition {
                from: campaign_status,
                to: PhaseStatus::Queued,
            });
        }

        let sequence = match state.latest_execution(campaign_uuid, phase) {
            Some(latest) if !latest.status.is_terminal() => {
                return Err(OrchestrationError::IllegalTransition {
                    from: latest.status,
                    to: PhaseStatus::Queued,
                });
            }
            Some(latest) => latest.sequence + 1,
            None => 1,
        };

        let execution = PhaseExecution {
            campaign_uuid,
            phase,
            sequence,
            status: PhaseStatus::Queued,
            started_at: None,
            completed_at: None,
            last_heartbeat_at: None,
            error_message: None,
        };
        state
            .executions
            .entry((campaign_uuid, phase))
            .or_default()
            .push(execution.clone());

        let campaign = state
            .campaigns
            .get_mut(&campaign_uuid)
            .ok_or(OrchestrationError::NotFound)?;
        campaign.current_phase = phase;
        campaign.status = PhaseStatus::Queued;
        campaign.processed_items = 0;
        campaign.total_items = 0;
        campaign.successful_items = 0;
        campaign.failed_items = 0;
        campaign.progress_percentage = 0.0;
        campaign.error_message = None;
        campaign.updated_at = Utc::now();

        Ok(execution)
    }

    pub async fn transition_phase(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        event: &PhaseEvent,
    ) -> OrchestrationResult<PhaseStatus> {
        let mut state = self.lock();
        if !state.campaigns.contains_key(&campaign_uuid) {
            return Err(OrchestrationError::NotFound);
        }

        let now = Utc::now();
        let error_message = match event {
            PhaseEvent::Fail(reason) => Some(reason.clone()),
            _ => None,
        };

        let execution = state
            .latest_execution_mut(campaign_uuid, phase)
            .ok_or(OrchestrationError::PhaseNotRunning {
                campaign_uuid,
                phase,
            })?;
        let next = next_status(execution.status, event)?;

        execution.status = next;
        if matches!(event, PhaseEvent::Start) && execution.started_at.is_none() {
            execution.started_at = Some(now);
        }
        if next.is_terminal() && execution.completed_at.is_none() {
            execution.completed_at = Some(now);
        }
        if error_message.is_some() {
            execution.error_message = error_message.clone();
        }

        let campaign = state
            .campaigns
            .get_mut(&campaign_uuid)
            .ok_or(OrchestrationError::NotFound)?;
        campaign.status = next;
        if error_message.is_some() {
            campaign.error_message = error_message;
        }
        campaign.updated_at = now;

        Ok(next)
    }

    pub async fn update_progress(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        counters: ProgressCounters,
    ) -> OrchestrationResult<bool> {
        let mut state = self.lock();
        let campaign = state
            .campaigns
            .get_mut(&campaign_uuid)
            .ok_or(OrchestrationError::NotFound)?;

        // Monotonic within the execution: discard a decreasing write
        if counters.processed_items < campaign.processed_items {
            return Ok(false);
        }

        campaign.processed_items = counters.processed_items;
        campaign.total_items = counters.total_items;
        campaign.successful_items = counters.successful_items;
        campaign.failed_items = counters.failed_items;
        campaign.progress_percentage =
            Campaign::derive_percentage(counters.processed_items, counters.total_items);
        campaign.updated_at = Utc::now();

        if let Some(execution) = state.latest_execution_mut(campaign_uuid, phase) {
            if !execution.status.is_terminal() {
                execution.last_heartbeat_at = Some(Utc::now());
            }
        }
        Ok(true)
    }

    pub async fn reconcile_phase_terminal(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        event: &PhaseEvent,
        final_counters: Option<ProgressCounters>,
    ) -> OrchestrationResult<Campaign> {
        let mut state = self.lock();
        let (stored_processed, stored_total, stored_successful, stored_failed) = {
            let campaign = state
                .campaigns
                .get(&campaign_uuid)
                .ok_or(OrchestrationError::NotFound)?;
            (
                campaign.processed_items,
                campaign.total_items,
                campaign.successful_items,
                campaign.failed_items,
            )
        };

        let mut processed = final_counters
            .map(|c| c.processed_items.max(stored_processed))
            .unwrap_or(stored_processed);
        let total = final_counters.map(|c| c.total_items).unwrap_or(stored_total);
        if total > 0 {
            processed = processed.min(total);
        }
        let successful = final_counters
            .map(|c| c.successful_items)
            .unwrap_or(stored_successful)
            .min(processed);
        let failed = final_counters
            .map(|c| c.failed_items)
            .unwrap_or(stored_failed)
            .min(processed - successful);

        let target = match event {
            PhaseEvent::Complete => PhaseStatus::Completed,
            PhaseEvent::Cancel => PhaseStatus::Cancelled,
            PhaseEvent::Fail(_) => PhaseStatus::Failed,
            other => {
                return Err(OrchestrationError::store(
                    "reconcile_phase_terminal",
                    format!("non-terminal event {other}"),
                ))
            }
        };

        let now = Utc::now();
        let error_message = match event {
            PhaseEvent::Fail(reason) => Some(reason.clone()),
            _ => None,
        };

        let execution = state
            .latest_execution_mut(campaign_uuid, phase)
            .ok_or(OrchestrationError::PhaseNotRunning {
                campaign_uuid,
                phase,
            })?;

        let next = if execution.status == target {
            target
        } else {
            let next = next_status(execution.status, event)?;
            if matches!(event, PhaseEvent::Complete) && total > 0 && processed != total {
                return Err(OrchestrationError::IllegalTransition {
                    from: execution.status,
                    to: PhaseStatus::Completed,
                });
            }
            next
        };

        execution.status = next;
        if execution.completed_at.is_none() {
            execution.completed_at = Some(now);
        }
        if error_message.is_some() {
            execution.error_message = error_message.clone();
        }

        let campaign = state
            .campaigns
            .get_mut(&campaign_uuid)
            .ok_or(OrchestrationError::NotFound)?;
        campaign.status = next;
        campaign.processed_items = processed;
        campaign.total_items = total;
        campaign.successful_items = successful;
        campaign.failed_items = failed;
        campaign.progress_percentage = Campaign::derive_percentage(processed, total);
        if error_message.is_some() {
            campaign.error_message = error_message;
        }
        campaign.updated_at = now;

        Ok(campaign.clone())
    }

    pub async fn list_inflight_executions(&self) -> OrchestrationResult<Vec<PhaseExecution>> {
        let state = self.lock();
        let mut inflight: Vec<PhaseExecution> = state
            .executions
            .values()
            .flat_map(|runs| runs.iter())
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect();
        inflight.sort_by_key(|e| (e.campaign_uuid, e.phase.as_str(), e.sequence));
        Ok(inflight)
    }

    pub async fn advance_campaign_phase(
        &self,
        campaign_uuid: Uuid,
        next_phase: PhaseKind,
    ) -> OrchestrationResult<Campaign> {
        let mut state = self.lock();
        let campaign = state
            .campaigns
            .get_mut(&campaign_uuid)
            .ok_or(OrchestrationError::NotFound)?;
        campaign.current_phase = next_phase;
        campaign.status = PhaseStatus::NotStarted;
        campaign.processed_items = 0;
        campaign.total_items = 0;
        campaign.successful_items = 0;
        campaign.failed_items = 0;
        campaign.progress_percentage = 0.0;
        campaign.error_message = None;
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CampaignType;

    fn owner() -> AuthContext {
        AuthContext::new(Uuid::new_v4())
    }

    async fn seeded_campaign(store: &MemoryCampaignStore, auth: &AuthContext) -> Campaign {
        store
            .create_campaign(NewCampaign {
                owner_uuid: auth.user_uuid,
                display_name: "dns-sweep".into(),
                campaign_type: CampaignType::DnsValidation,
                auto_advance: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_owner_filter_hides_foreign_campaigns() {
        let store = MemoryCampaignStore::new();
        let alice = owner();
        let bob = owner();
        let campaign = seeded_campaign(&store, &alice).await;

        assert!(store
            .get_campaign_for_user(campaign.campaign_uuid, &alice)
            .await
            .is_ok());
        let err = store
            .get_campaign_for_user(campaign.campaign_uuid, &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::NotFound));

        // Admin capability bypasses the owner predicate
        let admin = AuthContext::with_roles(Uuid::new_v4(), vec!["admin".into()]);
        assert!(store
            .get_campaign_for_user(campaign.campaign_uuid, &admin)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_single_live_execution_per_phase() {
        let store = MemoryCampaignStore::new();
        let auth = owner();
        let campaign = seeded_campaign(&store, &auth).await;

        store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap();
        let err = store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_progress_updates_are_monotonic() {
        let store = MemoryCampaignStore::new();
        let auth = owner();
        let campaign = seeded_campaign(&store, &auth).await;
        store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap();

        let write = |processed| ProgressCounters {
            processed_items: processed,
            total_items: 100,
            successful_items: 0,
            failed_items: 0,
        };

        assert!(store
            .update_progress(campaign.campaign_uuid, PhaseKind::Dns, write(10))
            .await
            .unwrap());
        // A decrease is discarded, not applied
        assert!(!store
            .update_progress(campaign.campaign_uuid, PhaseKind::Dns, write(5))
            .await
            .unwrap());

        let stored = store.get_campaign(campaign.campaign_uuid).await.unwrap();
        assert_eq!(stored.processed_items, 10);
        assert_eq!(stored.progress_percentage, 10.0);
    }

    #[tokio::test]
    async fn test_reconcile_clamps_and_completes() {
        let store = MemoryCampaignStore::new();
        let auth = owner();
        let campaign = seeded_campaign(&store, &auth).await;
        store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap();
        store
            .transition_phase(campaign.campaign_uuid, PhaseKind::Dns, &PhaseEvent::Start)
            .await
            .unwrap();

        let reconciled = store
            .reconcile_phase_terminal(
                campaign.campaign_uuid,
                PhaseKind::Dns,
                &PhaseEvent::Complete,
                Some(ProgressCounters {
                    processed_items: 120,
                    total_items: 100,
                    successful_items: 90,
                    failed_items: 10,
                }),
            )
            .await
            .unwrap();

        assert_eq!(reconciled.status, PhaseStatus::Completed);
        assert_eq!(reconciled.processed_items, 100);
        assert_eq!(reconciled.progress_percentage, 100.0);
        assert!(reconciled.counters_consistent());

        let executions = store.list_inflight_executions().await.unwrap();
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent_on_same_status() {
        let store = MemoryCampaignStore::new();
        let auth = owner();
        let campaign = seeded_campaign(&store, &auth).await;
        store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap();
        store
            .transition_phase(campaign.campaign_uuid, PhaseKind::Dns, &PhaseEvent::Start)
            .await
            .unwrap();
        store
            .transition_phase(campaign.campaign_uuid, PhaseKind::Dns, &PhaseEvent::Cancel)
            .await
            .unwrap();

        // Terminal event observed after the operator already cancelled
        let campaign_after = store
            .reconcile_phase_terminal(
                campaign.campaign_uuid,
                PhaseKind::Dns,
                &PhaseEvent::Cancel,
                None,
            )
            .await
            .unwrap();
        assert_eq!(campaign_after.status, PhaseStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_configuration_locked_while_execution_live() {
        let store = MemoryCampaignStore::new();
        let auth = owner();
        let campaign = seeded_campaign(&store, &auth).await;

        store
            .upsert_phase_configuration_for_user(
                campaign.campaign_uuid,
                PhaseKind::Dns,
                serde_json::json!({"resolver": "8.8.8.8"}),
                &auth,
            )
            .await
            .unwrap();

        store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap();

        let err = store
            .upsert_phase_configuration_for_user(
                campaign.campaign_uuid,
                PhaseKind::Dns,
                serde_json::json!({"resolver": "1.1.1.1"}),
                &auth,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ConfigurationInvalid { .. }
        ));
    }

    #[tokio::test]
    async fn test_terminal_execution_carries_completed_at() {
        let store = MemoryCampaignStore::new();
        let auth = owner();
        let campaign = seeded_campaign(&store, &auth).await;
        store
            .create_phase_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .await
            .unwrap();
        store
            .transition_phase(campaign.campaign_uuid, PhaseKind::Dns, &PhaseEvent::Start)
            .await
            .unwrap();
        store
            .transition_phase(
                campaign.campaign_uuid,
                PhaseKind::Dns,
                &PhaseEvent::Fail("resolver unreachable".into()),
            )
            .await
            .unwrap();

        let state = store.lock();
        let execution = state
            .latest_execution(campaign.campaign_uuid, PhaseKind::Dns)
            .unwrap();
        assert!(execution.status.is_terminal());
        assert!(execution.completed_at.is_some());
        assert_eq!(
            execution.error_message.as_deref(),
            Some("resolver unreachable")
        );
    }
}
