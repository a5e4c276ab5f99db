//! Represents a found item and its claim state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use super::from_millis;

/// Claim state of a found item.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    Claimed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::Claimed => "claimed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(ItemStatus::Available),
            "claimed" => Some(ItemStatus::Claimed),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The claimant currently holding an item and the claim window.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClaimHold {
    pub claimed_by: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A found item as recorded by the item store.
///
/// `claim` is `Some` exactly when the stored status is `claimed`; the three
/// claim columns are always written and cleared together.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FoundItem {
    pub id: i64,
    pub filename: String,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub image_embedding: Vec<f32>,
    #[serde(skip_serializing)]
    pub description_embedding: Option<Vec<f32>>,
    pub claim: Option<ClaimHold>,
    pub uploaded_at: DateTime<Utc>,
}

impl FoundItem {
    /// Status as stored, ignoring expiry.
    pub fn stored_status(&self) -> ItemStatus {
        if self.claim.is_some() {
            ItemStatus::Claimed
        } else {
            ItemStatus::Available
        }
    }

    /// Status a caller observes at `now`: a lapsed claim reads as available.
    pub fn status_at(&self, now: DateTime<Utc>) -> ItemStatus {
        match &self.claim {
            Some(hold) if now <= hold.expires_at => ItemStatus::Claimed,
            _ => ItemStatus::Available,
        }
    }

    /// The live claim at `now`, if any.
    pub fn live_claim(&self, now: DateTime<Utc>) -> Option<&ClaimHold> {
        self.claim
            .as_ref()
            .filter(|_| self.status_at(now) == ItemStatus::Claimed)
    }

    /// Copy of this item with lazy expiry applied for presentation.
    pub fn view_at(&self, now: DateTime<Utc>) -> ItemView {
        let hold = self.live_claim(now);
        ItemView {
            id: self.id,
            filename: self.filename.clone(),
            description: self.description.clone(),
            status: self.status_at(now),
            claimed_by: hold.map(|h| h.claimed_by.clone()),
            claimed_at: hold.map(|h| h.claimed_at),
            expires_at: hold.map(|h| h.expires_at),
            uploaded_at: self.uploaded_at,
        }
    }
}

/// Caller-facing projection of a [`FoundItem`] at a given instant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemView {
    pub id: i64,
    pub filename: String,
    pub description: Option<String>,
    pub status: ItemStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
}

/// Input for a new deposit. Embeddings come from the external embedding service.
#[derive(Deserialize, Clone, Debug)]
pub struct NewItem {
    pub filename: String,
    pub image_embedding: Vec<f32>,
    #[serde(default)]
    pub description_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Raw `found_items` row. Embeddings are JSON arrays, timestamps epoch millis.
#[derive(FromRow, Debug)]
pub(crate) struct FoundItemRow {
    pub id: i64,
    pub filename: String,
    pub description: Option<String>,
    pub image_embedding: String,
    pub description_embedding: Option<String>,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub uploaded_at: i64,
}

impl FoundItemRow {
    pub(crate) fn into_item(self) -> Result<FoundItem, serde_json::Error> {
        let image_embedding: Vec<f32> = serde_json::from_str(&self.image_embedding)?;
        let description_embedding = self
            .description_embedding
            .as_deref()
            .map(serde_json::from_str::<Vec<f32>>)
            .transpose()?;

        let claim = match (
            ItemStatus::parse(&self.status),
            self.claimed_by,
            self.claimed_at,
            self.expires_at,
        ) {
            (Some(ItemStatus::Claimed), Some(claimed_by), Some(claimed_at), Some(expires_at)) => {
                Some(ClaimHold {
                    claimed_by,
                    claimed_at: from_millis(claimed_at),
                    expires_at: from_millis(expires_at),
                })
            }
            _ => None,
        };

        Ok(FoundItem {
            id: self.id,
            filename: self.filename,
            description: self.description,
            image_embedding,
            description_embedding,
            claim,
            uploaded_at: from_millis(self.uploaded_at),
        })
    }
}

/// Columns selected for every item query, in `FoundItemRow` order.
pub(crate) const ITEM_COLUMNS: &str = "id, filename, description, image_embedding, \
     description_embedding, status, claimed_by, claimed_at, expires_at, uploaded_at";
