//! src/services/item_store.rs
//!
//! ItemStore — durable record of found items backed by SQLite. Claim state
//! lives on the same row; transitions on it belong to `ClaimManager`, which
//! shares this store's pool.

use crate::{
    db::is_unique_violation,
    models::{
        item::{FoundItem, FoundItemRow, ITEM_COLUMNS, NewItem},
        to_millis,
    },
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item `{0}` not found")]
    NotFound(String),
    #[error("an item with filename `{0}` already exists")]
    DuplicateFilename(String),
    #[error("item {0} is currently claimed")]
    AlreadyClaimed(i64),
    #[error("item {item_id} is not claimed by `{claimant}`")]
    NotClaimHolder { item_id: i64, claimant: String },
    #[error("invalid filename `{0}`")]
    InvalidFilename(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("search threshold must lie in [-1, 1], got {0}")]
    InvalidThreshold(f32),
    #[error("claim duration {0} runs past the supported timestamp range")]
    ClaimWindowOutOfRange(String),
    #[error("stored embedding is malformed: {0}")]
    CorruptEmbedding(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl ItemError {
    /// Failures of the underlying store, as opposed to expected outcomes.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, ItemError::Sqlx(_) | ItemError::CorruptEmbedding(_))
    }
}

pub type ItemResult<T> = Result<T, ItemError>;

const MAX_FILENAME_LEN: usize = 255;

#[derive(Clone)]
pub struct ItemStore {
    pub(crate) db: Arc<SqlitePool>,
}

impl ItemStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Filenames are single path components; the image store keys files by them.
    fn ensure_filename_safe(filename: &str) -> ItemResult<()> {
        let bad = filename.is_empty()
            || filename.len() > MAX_FILENAME_LEN
            || filename.trim() != filename
            || filename.contains('/')
            || filename.contains('\\')
            || filename == "."
            || filename == ".."
            || filename.bytes().any(|b| b.is_ascii_control());
        if bad {
            return Err(ItemError::InvalidFilename(filename.to_string()));
        }
        Ok(())
    }

    /// Image and description embeddings must be non-empty, finite and of one dimension.
    fn ensure_embeddings_valid(item: &NewItem) -> ItemResult<()> {
        validate_vector("image_embedding", &item.image_embedding)?;
        if let Some(desc) = &item.description_embedding {
            validate_vector("description_embedding", desc)?;
            if desc.len() != item.image_embedding.len() {
                return Err(ItemError::InvalidEmbedding(format!(
                    "description_embedding has {} dimensions, image_embedding has {}",
                    desc.len(),
                    item.image_embedding.len()
                )));
            }
        }
        Ok(())
    }

    /// Insert a new available item and return its id.
    pub async fn create(&self, item: NewItem, now: DateTime<Utc>) -> ItemResult<i64> {
        Self::ensure_filename_safe(&item.filename)?;
        Self::ensure_embeddings_valid(&item)?;

        let image_json = serde_json::to_string(&item.image_embedding)?;
        let desc_json = item
            .description_embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let description = item.description.filter(|d| !d.trim().is_empty());

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO found_items (
                filename, description, image_embedding, description_embedding,
                status, uploaded_at
             ) VALUES (?, ?, ?, ?, 'available', ?)
             RETURNING id",
        )
        .bind(&item.filename)
        .bind(description)
        .bind(image_json)
        .bind(desc_json)
        .bind(to_millis(now))
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(id) => {
                info!(item_id = id, filename = %item.filename, "found item recorded");
                Ok(id)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(ItemError::DuplicateFilename(item.filename))
            }
            Err(err) => Err(ItemError::Sqlx(err)),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> ItemResult<FoundItem> {
        debug!(item_id = id, "fetching item");
        let row = sqlx::query_as::<_, FoundItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM found_items WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ItemError::NotFound(id.to_string()))?;
        Ok(row.into_item()?)
    }

    pub async fn get_by_filename(&self, filename: &str) -> ItemResult<FoundItem> {
        let row = sqlx::query_as::<_, FoundItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM found_items WHERE filename = ?"
        ))
        .bind(filename)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ItemError::NotFound(filename.to_string()))?;
        Ok(row.into_item()?)
    }

    /// Items a claimant could take at `now`: available rows plus claimed rows
    /// whose hold has lapsed. Read-only; lapsed rows are not reset here.
    pub async fn list_available(&self, now: DateTime<Utc>) -> ItemResult<Vec<FoundItem>> {
        let rows = sqlx::query_as::<_, FoundItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM found_items
             WHERE status = 'available' OR (status = 'claimed' AND expires_at < ?)
             ORDER BY uploaded_at ASC, id ASC"
        ))
        .bind(to_millis(now))
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter()
            .map(|row| row.into_item().map_err(ItemError::from))
            .collect()
    }

    /// Every item regardless of claim state, oldest first.
    pub async fn list_all(&self) -> ItemResult<Vec<FoundItem>> {
        let rows = sqlx::query_as::<_, FoundItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM found_items ORDER BY uploaded_at ASC, id ASC"
        ))
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter()
            .map(|row| row.into_item().map_err(ItemError::from))
            .collect()
    }

    /// Remove an item by filename. Deleting an absent item reports `NotFound`.
    pub async fn delete(&self, filename: &str) -> ItemResult<()> {
        let result = sqlx::query("DELETE FROM found_items WHERE filename = ?")
            .bind(filename)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ItemError::NotFound(filename.to_string()));
        }
        info!(filename, "found item deleted");
        Ok(())
    }

    /// Administrative bulk delete. Returns the number of rows removed.
    pub async fn clear(&self) -> ItemResult<u64> {
        let result = sqlx::query("DELETE FROM found_items")
            .execute(&*self.db)
            .await?;
        info!(removed = result.rows_affected(), "all found items cleared");
        Ok(result.rows_affected())
    }
}

pub(crate) fn validate_vector(name: &str, values: &[f32]) -> ItemResult<()> {
    if values.is_empty() {
        return Err(ItemError::InvalidEmbedding(format!("{name} is empty")));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ItemError::InvalidEmbedding(format!(
            "{name} contains non-finite values"
        )));
    }
    Ok(())
}
