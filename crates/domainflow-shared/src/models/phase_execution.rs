//! Phase execution row: a single run of one phase for one campaign.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::state_machine::PhaseStatus;
use crate::types::PhaseKind;

/// One run of a phase. At most one execution per (campaign, phase) may be in
/// a non-terminal status at any time; `sequence` increments per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub campaign_uuid: Uuid,
    pub phase: PhaseKind,
    pub sequence: i32,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for PhaseExecution {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let phase: String = row.try_get("phase")?;
        let status: String = row.try_get("status")?;

        Ok(Self {
            campaign_uuid: row.try_get("campaign_uuid")?,
            phase: PhaseKind::from_str(&phase).map_err(|e| sqlx::Error::ColumnDecode {
                index: "phase".into(),
                source: e.into(),
            })?,
            sequence: row.try_get("sequence")?,
            status: PhaseStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: e.into(),
            })?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            last_heartbeat_at: row.try_get("last_heartbeat_at")?,
            error_message: row.try_get("error_message")?,
        })
    }
}
