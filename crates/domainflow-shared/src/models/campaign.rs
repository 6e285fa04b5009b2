//! Campaign aggregate row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::state_machine::PhaseStatus;
use crate::types::{CampaignType, PhaseKind};

/// A named, owned unit of work consisting of an ordered sequence of phases.
///
/// The processed/total/successful/failed counters are scoped to the current
/// phase execution and reset when a new phase starts. `progress_percentage`
/// is derived, never written independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_uuid: Uuid,
    pub owner_uuid: Uuid,
    pub display_name: String,
    pub campaign_type: CampaignType,
    pub current_phase: PhaseKind,
    pub status: PhaseStatus,
    pub processed_items: i64,
    pub total_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
    pub progress_percentage: f64,
    pub error_message: Option<String>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub auto_advance: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Derived percentage: `100 * processed / total` when `total > 0`, else 0
    pub fn derive_percentage(processed_items: i64, total_items: i64) -> f64 {
        if total_items > 0 {
            (processed_items as f64 / total_items as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Counter invariants from the data model. Store write paths uphold
    /// these; tests assert them on every observed snapshot.
    pub fn counters_consistent(&self) -> bool {
        let bounded = self.total_items == 0 || self.processed_items <= self.total_items;
        let partitioned = self.successful_items + self.failed_items <= self.processed_items;
        let pct_in_range = (0.0..=100.0).contains(&self.progress_percentage);
        bounded && partitioned && pct_in_range
    }
}

impl<'r> FromRow<'r, PgRow> for Campaign {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let campaign_type: String = row.try_get("campaign_type")?;
        let current_phase: String = row.try_get("current_phase")?;
        let status: String = row.try_get("status")?;

        Ok(Self {
            campaign_uuid: row.try_get("campaign_uuid")?,
            owner_uuid: row.try_get("owner_uuid")?,
            display_name: row.try_get("display_name")?,
            campaign_type: CampaignType::from_str(&campaign_type).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "campaign_type".into(),
                    source: e.into(),
                }
            })?,
            current_phase: PhaseKind::from_str(&current_phase).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "current_phase".into(),
                    source: e.into(),
                }
            })?,
            status: PhaseStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: e.into(),
            })?,
            processed_items: row.try_get("processed_items")?,
            total_items: row.try_get("total_items")?,
            successful_items: row.try_get("successful_items")?,
            failed_items: row.try_get("failed_items")?,
            progress_percentage: row.try_get("progress_percentage")?,
            error_message: row.try_get("error_message")?,
            estimated_completion_at: row.try_get("estimated_completion_at")?,
            auto_advance: row.try_get("auto_advance")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Parameters for creating a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub owner_uuid: Uuid,
    pub display_name: String,
    pub campaign_type: CampaignType,
    #[serde(default = "default_auto_advance")]
    pub auto_advance: bool,
}

fn default_auto_advance() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_percentage() {
        assert_eq!(Campaign::derive_percentage(0, 0), 0.0);
        assert_eq!(Campaign::derive_percentage(5, 0), 0.0);
        assert_eq!(Campaign::derive_percentage(50, 200), 25.0);
        assert_eq!(Campaign::derive_percentage(200, 200), 100.0);
        // Clamped even if a caller hands in inconsistent inputs
        assert_eq!(Campaign::derive_percentage(300, 200), 100.0);
    }

    #[test]
    fn test_counters_consistent() {
        let mut campaign = Campaign {
            campaign_uuid: Uuid::new_v4(),
            owner_uuid: Uuid::new_v4(),
            display_name: "spring-sweep".into(),
            campaign_type: CampaignType::DnsValidation,
            current_phase: PhaseKind::Dns,
            status: PhaseStatus::InProgress,
            processed_items: 10,
            total_items: 20,
            successful_items: 7,
            failed_items: 3,
            progress_percentage: 50.0,
            error_message: None,
            estimated_completion_at: None,
            auto_advance: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(campaign.counters_consistent());

        campaign.processed_items = 25;
        assert!(!campaign.counters_consistent());

        campaign.processed_items = 10;
        campaign.successful_items = 9;
        campaign.failed_items = 3;
        assert!(!campaign.counters_consistent());
    }
}
