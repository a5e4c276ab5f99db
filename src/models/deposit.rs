//! Append-only record of a physical deposit into a collection box.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::from_millis;

/// One physical deposit. Written once by the box ingestion path, never updated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DepositRecord {
    pub id: Uuid,

    /// Filename of the photo taken at deposit time.
    pub filename: String,

    pub box_id: String,

    /// Finder who dropped the item off, when the box could identify them.
    pub finder_id: Option<String>,

    /// When the box captured the deposit.
    pub deposit_timestamp: DateTime<Utc>,

    /// When the service accepted the record.
    pub recorded_at: DateTime<Utc>,
}

/// Deposit event as reported by a box.
#[derive(Deserialize, Clone, Debug)]
pub struct NewDeposit {
    pub filename: String,
    pub deposit_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub finder_id: Option<String>,
}

#[derive(FromRow, Debug)]
pub(crate) struct DepositRow {
    pub id: Uuid,
    pub filename: String,
    pub box_id: String,
    pub finder_id: Option<String>,
    pub deposit_timestamp: i64,
    pub recorded_at: i64,
}

impl From<DepositRow> for DepositRecord {
    fn from(row: DepositRow) -> Self {
        Self {
            id: row.id,
            filename: row.filename,
            box_id: row.box_id,
            finder_id: row.finder_id,
            deposit_timestamp: from_millis(row.deposit_timestamp),
            recorded_at: from_millis(row.recorded_at),
        }
    }
}
