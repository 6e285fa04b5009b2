//! Postgres backend for the campaign store.
//!
//! All multi-row updates (status + counters) run inside one transaction,
//! serialised by `SELECT … FOR UPDATE` on the campaign row. Owner predicates
//! live in the `WHERE` clause of the user-filtered variants.

use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::models::{Campaign, NewCampaign, PhaseConfiguration, PhaseExecution};
use crate::state_machine::{next_status, PhaseEvent, PhaseStatus};
use crate::types::{AuthContext, PhaseKind};

use super::ProgressCounters;

/// Embedded migrations for the three core relations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct PgCampaignStore {
    pool: PgPool,
}

impl PgCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_campaign(&self, new: NewCampaign) -> OrchestrationResult<Campaign> {
        let campaign_uuid = Uuid::now_v7();
        let initial_phase = new.campaign_type.initial_phase();

        let campaign = sqlx::query_as::<_, Campaign>(
            "INSERT INTO campaigns \
               (campaign_uuid, owner_uuid, display_name, campaign_type, current_phase, status, \
                auto_advance, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) \
             RETURNING *",
        )
        .bind(campaign_uuid)
        .bind(new.owner_uuid)
        .bind(&new.display_name)
        .bind(new.campaign_type.as_str())
        .bind(initial_phase.as_str())
        .bind(PhaseStatus::NotStarted.as_str())
        .bind(new.auto_advance)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OrchestrationError::store("create_campaign", e))?;

        debug!(
            campaign_uuid = %campaign.campaign_uuid,
            campaign_type = %campaign.campaign_type,
            "Created campaign"
        );
        Ok(campaign)
    }

    pub async fn get_campaign(&self, campaign_uuid: Uuid) -> OrchestrationResult<Campaign> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE campaign_uuid = $1")
            .bind(campaign_uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| OrchestrationError::store("get_campaign", e))?
            .ok_or(OrchestrationError::NotFound)
    }

    pub async fn get_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<Campaign> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE campaign_uuid = $1 AND (owner_uuid = $2 OR $3)",
        )
        .bind(campaign_uuid)
        .bind(auth.user_uuid)
        .bind(auth.is_admin())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OrchestrationError::store("get_campaign_for_user", e))?
        .ok_or(OrchestrationError::NotFound)
    }

    pub async fn list_campaigns_for_user(
        &self,
        auth: &AuthContext,
    ) -> OrchestrationResult<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE owner_uuid = $1 OR $2 ORDER BY created_at DESC",
        )
        .bind(auth.user_uuid)
        .bind(auth.is_admin())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestrationError::store("list_campaigns_for_user", e))
    }

    pub async fn delete_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<()> {
        let campaign = self.get_campaign_for_user(campaign_uuid, auth).await?;
        if !campaign.status.is_terminal() {
            return Err(OrchestrationError::IllegalTransition {
                from: campaign.status,
                to: PhaseStatus::Archived,
            });
        }

        // Executions and configurations cascade with the campaign row
        sqlx::query("DELETE FROM campaigns WHERE campaign_uuid = $1")
            .bind(campaign_uuid)
            .execute(&self.pool)
            .await
            .map_err(|e| OrchestrationError::store("delete_campaign", e))?;
        Ok(())
    }

    pub async fn archive_campaign_for_user(
        &self,
        campaign_uuid: Uuid,
        auth: &AuthContext,
    ) -> OrchestrationResult<Campaign> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrchestrationError::store("archive_campaign", e))?;

        let campaign = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns \
             WHERE campaign_uuid = $1 AND (owner_uuid = $2 OR $3) FOR UPDATE",
        )
        .bind(campaign_uuid)
        .bind(auth.user_uuid)
        .bind(auth.is_admin())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("archive_campaign", e))?
        .ok_or(OrchestrationError::NotFound)?;

        let next = next_status(campaign.status, &PhaseEvent::Archive)?;

        let archived = sqlx::query_as::<_, Campaign>(
            "UPDATE campaigns SET status = $2, updated_at = NOW() \
             WHERE campaign_uuid = $1 RETURNING *",
        )
        .bind(campaign_uuid)
        .bind(next.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("archive_campaign", e))?;

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::store("archive_campaign", e))?;
        Ok(archived)
    }

    pub async fn upsert_phase_configuration_for_user(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        config: serde_json::Value,
        auth: &AuthContext,
    ) -> OrchestrationResult<PhaseConfiguration> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrchestrationError::store("upsert_phase_configuration", e))?;

        let owned: Option<(Uuid,)> = sqlx::query_as(
            "SELECT campaign_uuid FROM campaigns \
             WHERE campaign_uuid = $1 AND (owner_uuid = $2 OR $3) FOR UPDATE",
        )
        .bind(campaign_uuid)
        .bind(auth.user_uuid)
        .bind(auth.is_admin())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("upsert_phase_configuration", e))?;
        if owned.is_none() {
            return Err(OrchestrationError::NotFound);
        }

        // Configuration changes while a phase is live are forbidden
        let live: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM phase_executions \
             WHERE campaign_uuid = $1 AND phase = $2 \
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("upsert_phase_configuration", e))?;
        if let Some((status,)) = live {
            let status: PhaseStatus = status
                .parse()
                .map_err(|e| OrchestrationError::store("upsert_phase_configuration", e))?;
            if !status.is_terminal() {
                return Err(OrchestrationError::ConfigurationInvalid {
                    reason: format!("phase {phase} has a live execution in status {status}"),
                });
            }
        }

        let row = sqlx::query_as::<_, PhaseConfiguration>(
            "INSERT INTO phase_configurations (campaign_uuid, phase, config, created_at, updated_at) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (campaign_uuid, phase) \
             DO UPDATE SET config = EXCLUDED.config, updated_at = NOW() \
             RETURNING *",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .bind(&config)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("upsert_phase_configuration", e))?;

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::store("upsert_phase_configuration", e))?;
        Ok(row)
    }

    pub async fn get_phase_configuration(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<Option<PhaseConfiguration>> {
        sqlx::query_as::<_, PhaseConfiguration>(
            "SELECT * FROM phase_configurations WHERE campaign_uuid = $1 AND phase = $2",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OrchestrationError::store("get_phase_configuration", e))
    }

    pub async fn create_phase_execution(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
    ) -> OrchestrationResult<PhaseExecution> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrchestrationError::store("create_phase_execution", e))?;

        let campaign = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE campaign_uuid = $1 FOR UPDATE",
        )
        .bind(campaign_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("create_phase_execution", e))?
        .ok_or(OrchestrationError::NotFound)?;

        if campaign.status.is_terminal() {
            return Err(OrchestrationError::IllegalTransition {
                from: campaign.status,
                to: PhaseStatus::Queued,
            });
        }

        let latest: Option<(i32, String)> = sqlx::query_as(
            "SELECT sequence, status FROM phase_executions \
             WHERE campaign_uuid = $1 AND phase = $2 \
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("create_phase_execution", e))?;

        let sequence = match latest {
            Some((seq, status)) => {
                let status: PhaseStatus = status
                    .parse()
                    .map_err(|e| OrchestrationError::store("create_phase_execution", e))?;
                if !status.is_terminal() {
                    return Err(OrchestrationError::IllegalTransition {
                        from: status,
                        to: PhaseStatus::Queued,
                    });
                }
                seq + 1
            }
            None => 1,
        };

        let execution = sqlx::query_as::<_, PhaseExecution>(
            "INSERT INTO phase_executions (campaign_uuid, phase, sequence, status) \
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .bind(sequence)
        .bind(PhaseStatus::Queued.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("create_phase_execution", e))?;

        // Point the campaign at this phase and reset the phase-scoped counters
        sqlx::query(
            "UPDATE campaigns \
             SET current_phase = $2, status = $3, processed_items = 0, total_items = 0, \
                 successful_items = 0, failed_items = 0, progress_percentage = 0, \
                 error_message = NULL, updated_at = NOW() \
             WHERE campaign_uuid = $1",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .bind(PhaseStatus::Queued.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("create_phase_execution", e))?;

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::store("create_phase_execution", e))?;
        Ok(execution)
    }

    pub async fn transition_phase(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        event: &PhaseEvent,
    ) -> OrchestrationResult<PhaseStatus> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrchestrationError::store("transition_phase", e))?;

        // Row-level lock on the campaign serialises concurrent transitions
        let _campaign = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE campaign_uuid = $1 FOR UPDATE",
        )
        .bind(campaign_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("transition_phase", e))?
        .ok_or(OrchestrationError::NotFound)?;

        let execution = sqlx::query_as::<_, PhaseExecution>(
            "SELECT * FROM phase_executions \
             WHERE campaign_uuid = $1 AND phase = $2 \
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("transition_phase", e))?
        .ok_or(OrchestrationError::PhaseNotRunning {
            campaign_uuid,
            phase,
        })?;

        let next = next_status(execution.status, event)?;
        let error_message = match event {
            PhaseEvent::Fail(reason) => Some(reason.clone()),
            _ => None,
        };
        let now = Utc::now();

        sqlx::query(
            "UPDATE phase_executions \
             SET status = $4, \
                 started_at = CASE WHEN $5 AND started_at IS NULL THEN $7 ELSE started_at END, \
                 completed_at = CASE WHEN $6 THEN $7 ELSE completed_at END, \
                 error_message = COALESCE($8, error_message) \
             WHERE campaign_uuid = $1 AND phase = $2 AND sequence = $3",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .bind(execution.sequence)
        .bind(next.as_str())
        .bind(matches!(event, PhaseEvent::Start))
        .bind(next.is_terminal())
        .bind(now)
        .bind(&error_message)
        .execute(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("transition_phase", e))?;

        sqlx::query(
            "UPDATE campaigns \
             SET status = $2, error_message = COALESCE($3, error_message), updated_at = NOW() \
             WHERE campaign_uuid = $1",
        )
        .bind(campaign_uuid)
        .bind(next.as_str())
        .bind(&error_message)
        .execute(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("transition_phase", e))?;

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::store("transition_phase", e))?;

        debug!(
            campaign_uuid = %campaign_uuid,
            phase = %phase,
            from = %execution.status,
            to = %next,
            "Persisted phase transition"
        );
        Ok(next)
    }

    pub async fn update_progress(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        counters: ProgressCounters,
    ) -> OrchestrationResult<bool> {
        let percentage =
            Campaign::derive_percentage(counters.processed_items, counters.total_items);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrchestrationError::store("update_progress", e))?;

        // Monotonic guard in the predicate: a decrease is discarded, not applied
        let updated = sqlx::query(
            "UPDATE campaigns \
             SET processed_items = $2, total_items = $3, successful_items = $4, \
                 failed_items = $5, progress_percentage = $6, updated_at = NOW() \
             WHERE campaign_uuid = $1 AND processed_items <= $2",
        )
        .bind(campaign_uuid)
        .bind(counters.processed_items)
        .bind(counters.total_items)
        .bind(counters.successful_items)
        .bind(counters.failed_items)
        .bind(percentage)
        .execute(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("update_progress", e))?;

        if updated.rows_affected() == 0 {
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT campaign_uuid FROM campaigns WHERE campaign_uuid = $1")
                    .bind(campaign_uuid)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| OrchestrationError::store("update_progress", e))?;
            tx.commit()
                .await
                .map_err(|e| OrchestrationError::store("update_progress", e))?;
            return match exists {
                Some(_) => Ok(false),
                None => Err(OrchestrationError::NotFound),
            };
        }

        sqlx::query(
            "UPDATE phase_executions SET last_heartbeat_at = NOW() \
             WHERE campaign_uuid = $1 AND phase = $2 AND completed_at IS NULL",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("update_progress", e))?;

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::store("update_progress", e))?;
        Ok(true)
    }

    pub async fn reconcile_phase_terminal(
        &self,
        campaign_uuid: Uuid,
        phase: PhaseKind,
        event: &PhaseEvent,
        final_counters: Option<ProgressCounters>,
    ) -> OrchestrationResult<Campaign> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrchestrationError::store("reconcile_phase_terminal", e))?;

        let campaign = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE campaign_uuid = $1 FOR UPDATE",
        )
        .bind(campaign_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("reconcile_phase_terminal", e))?
        .ok_or(OrchestrationError::NotFound)?;

        let execution = sqlx::query_as::<_, PhaseExecution>(
            "SELECT * FROM phase_executions \
             WHERE campaign_uuid = $1 AND phase = $2 \
             ORDER BY sequence DESC LIMIT 1",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("reconcile_phase_terminal", e))?
        .ok_or(OrchestrationError::PhaseNotRunning {
            campaign_uuid,
            phase,
        })?;

        // Reconciliation counters: final event wins over stored, then clamp
        let mut processed = final_counters
            .map(|c| c.processed_items.max(campaign.processed_items))
            .unwrap_or(campaign.processed_items);
        let total = final_counters
            .map(|c| c.total_items)
            .unwrap_or(campaign.total_items);
        if total > 0 {
            processed = processed.min(total);
        }
        let successful = final_counters
            .map(|c| c.successful_items)
            .unwrap_or(campaign.successful_items)
            .min(processed);
        let failed = final_counters
            .map(|c| c.failed_items)
            .unwrap_or(campaign.failed_items)
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

        // Idempotent when the terminal status is already in place
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

        let error_message = match event {
            PhaseEvent::Fail(reason) => Some(reason.clone()),
            _ => None,
        };
        let percentage = Campaign::derive_percentage(processed, total);

        sqlx::query(
            "UPDATE phase_executions \
             SET status = $4, completed_at = COALESCE(completed_at, NOW()), \
                 error_message = COALESCE($5, error_message) \
             WHERE campaign_uuid = $1 AND phase = $2 AND sequence = $3",
        )
        .bind(campaign_uuid)
        .bind(phase.as_str())
        .bind(execution.sequence)
        .bind(next.as_str())
        .bind(&error_message)
        .execute(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("reconcile_phase_terminal", e))?;

        let reconciled = sqlx::query_as::<_, Campaign>(
            "UPDATE campaigns \
             SET status = $2, processed_items = $3, total_items = $4, successful_items = $5, \
                 failed_items = $6, progress_percentage = $7, \
                 error_message = COALESCE($8, error_message), updated_at = NOW() \
             WHERE campaign_uuid = $1 RETURNING *",
        )
        .bind(campaign_uuid)
        .bind(next.as_str())
        .bind(processed)
        .bind(total)
        .bind(successful)
        .bind(failed)
        .bind(percentage)
        .bind(&error_message)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| OrchestrationError::store("reconcile_phase_terminal", e))?;

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::store("reconcile_phase_terminal", e))?;
        Ok(reconciled)
    }

    pub async fn list_inflight_executions(&self) -> OrchestrationResult<Vec<PhaseExecution>> {
        sqlx::query_as::<_, PhaseExecution>(
            "SELECT * FROM phase_executions \
             WHERE status IN ('queued', 'in_progress', 'paused') \
             ORDER BY campaign_uuid, phase, sequence",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestrationError::store("list_inflight_executions", e))
    }

    pub async fn advance_campaign_phase(
        &self,
        campaign_uuid: Uuid,
        next_phase: PhaseKind,
    ) -> OrchestrationResult<Campaign> {
        sqlx::query_as::<_, Campaign>(
            "UPDATE campaigns \
             SET current_phase = $2, status = $3, processed_items = 0, total_items = 0, \
                 successful_items = 0, failed_items = 0, progress_percentage = 0, \
                 error_message = NULL, updated_at = NOW() \
             WHERE campaign_uuid = $1 RETURNING *",
        )
        .bind(campaign_uuid)
        .bind(next_phase.as_str())
        .bind(PhaseStatus::NotStarted.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OrchestrationError::store("advance_campaign_phase", e))?
        .ok_or(OrchestrationError::NotFound)
    }
}
