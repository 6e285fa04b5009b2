//! Phase configuration row: schemaless per-phase configuration blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::types::PhaseKind;

/// Per-(campaign, phase) configuration blob. Required to transition a phase
/// out of `NotStarted`; immutable while the phase has a non-terminal
/// execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfiguration {
    pub campaign_uuid: Uuid,
    pub phase: PhaseKind,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PhaseConfiguration {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let phase: String = row.try_get("phase")?;

        Ok(Self {
            campaign_uuid: row.try_get("campaign_uuid")?,
            phase: PhaseKind::from_str(&phase).map_err(|e| sqlx::Error::ColumnDecode {
                index: "phase".into(),
                source: e.into(),
            })?,
            config: row.try_get("config")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
