//! src/services/lost_found_service.rs
//!
//! LostFoundService — the entry point the HTTP layer talks to. It wires the
//! item store, claim manager, box controller and search ranker over one
//! shared SQLite pool and applies lazy expiry on every read path.

use crate::{
    models::{
        collection_box::{BoxUpdate, CollectionBox},
        deposit::{DepositRecord, NewDeposit},
        item::{ClaimHold, ItemStatus, ItemView, NewItem},
    },
    services::{
        box_controller::{BoxController, BoxResult},
        claim_manager::{ClaimManager, DEFAULT_CLAIM_DURATION_SECS},
        expiry_sweeper::ExpirySweeper,
        item_store::{ItemError, ItemResult, ItemStore, validate_vector},
        search_ranker::{ScoreBlend, SearchRanker},
    },
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tunables for the core services.
#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub claim_duration: Duration,
    /// Threshold applied when a search does not supply one.
    pub search_threshold: f32,
    pub score_blend: ScoreBlend,
    /// Largest accepted gap between a box-reported deposit time and arrival.
    pub max_deposit_skew: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            claim_duration: Duration::seconds(DEFAULT_CLAIM_DURATION_SECS),
            search_threshold: 0.2,
            score_blend: ScoreBlend::Average,
            max_deposit_skew: Duration::seconds(5),
        }
    }
}

/// One search result, with claim state as of the search instant.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub item_id: i64,
    pub filename: String,
    pub description: Option<String>,
    pub score: f32,
    pub status: ItemStatus,
    pub claimed_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LostFoundService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    items: ItemStore,
    claims: ClaimManager,
    boxes: BoxController,
    ranker: SearchRanker,
    search_threshold: f32,
}

impl LostFoundService {
    pub fn new(db: Arc<SqlitePool>, settings: ServiceSettings) -> Self {
        let items = ItemStore::new(db.clone());
        let claims = ClaimManager::new(items.clone(), settings.claim_duration);
        let boxes = BoxController::new(db.clone(), settings.max_deposit_skew);
        Self {
            db,
            items,
            claims,
            boxes,
            ranker: SearchRanker::new(settings.score_blend),
            search_threshold: settings.search_threshold,
        }
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn claims(&self) -> &ClaimManager {
        &self.claims
    }

    pub fn boxes(&self) -> &BoxController {
        &self.boxes
    }

    /// A stopped sweeper over this service's claims.
    pub fn expiry_sweeper(&self, period: std::time::Duration) -> ExpirySweeper {
        ExpirySweeper::new(self.claims.clone(), period)
    }

    /// Reset lapsed claims before a read. Failure here is not fatal because
    /// every read applies the same expiry rule itself.
    async fn opportunistic_sweep(&self, now: DateTime<Utc>) {
        match self.claims.release_expired(now).await {
            Ok(0) => {}
            Ok(released) => debug!(released, "released expired claims before read"),
            Err(err) => warn!(error = %err, "opportunistic sweep failed, continuing with lazy expiry"),
        }
    }

    // --- items ---

    pub async fn deposit(&self, item: NewItem, now: DateTime<Utc>) -> ItemResult<i64> {
        self.items.create(item, now).await
    }

    pub async fn claim(
        &self,
        item_id: i64,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> ItemResult<ClaimHold> {
        self.claims.claim(item_id, claimant, now).await
    }

    pub async fn release(&self, item_id: i64, claimant: &str, now: DateTime<Utc>) -> ItemResult<()> {
        self.claims.release(item_id, claimant, now).await
    }

    pub async fn release_expired(&self, now: DateTime<Utc>) -> ItemResult<u64> {
        self.claims.release_expired(now).await
    }

    /// Rank currently available items against `query`. `threshold` falls back
    /// to the configured default. The query must have the dimension of the
    /// stored image embeddings.
    pub async fn search(
        &self,
        query: &[f32],
        threshold: Option<f32>,
        now: DateTime<Utc>,
    ) -> ItemResult<Vec<SearchHit>> {
        validate_vector("query embedding", query)?;
        let threshold = threshold.unwrap_or(self.search_threshold);
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ItemError::InvalidThreshold(threshold));
        }

        self.opportunistic_sweep(now).await;
        let candidates = self.items.list_available(now).await?;
        if let Some(stored) = candidates
            .iter()
            .find(|item| item.image_embedding.len() != query.len())
        {
            return Err(ItemError::InvalidEmbedding(format!(
                "query embedding has {} dimensions, stored item {} has {}",
                query.len(),
                stored.id,
                stored.image_embedding.len()
            )));
        }
        let candidate_count = candidates.len();
        let ranked = self.ranker.rank(query, candidates, threshold);
        debug!(candidate_count, hits = ranked.len(), threshold, "search ranked");

        Ok(ranked
            .into_iter()
            .map(|scored| {
                let view = scored.item.view_at(now);
                SearchHit {
                    item_id: view.id,
                    filename: view.filename,
                    description: view.description,
                    score: scored.score,
                    status: view.status,
                    claimed_by: view.claimed_by,
                    expires_at: view.expires_at,
                    uploaded_at: view.uploaded_at,
                }
            })
            .collect())
    }

    pub async fn list_items(&self, now: DateTime<Utc>) -> ItemResult<Vec<ItemView>> {
        self.opportunistic_sweep(now).await;
        let items = self.items.list_all().await?;
        Ok(items.iter().map(|item| item.view_at(now)).collect())
    }

    pub async fn list_available(&self, now: DateTime<Utc>) -> ItemResult<Vec<ItemView>> {
        let items = self.items.list_available(now).await?;
        Ok(items.iter().map(|item| item.view_at(now)).collect())
    }

    pub async fn get_item(&self, item_id: i64, now: DateTime<Utc>) -> ItemResult<ItemView> {
        Ok(self.items.get_by_id(item_id).await?.view_at(now))
    }

    pub async fn delete_item(&self, filename: &str) -> ItemResult<()> {
        self.items.delete(filename).await
    }

    pub async fn clear_items(&self) -> ItemResult<u64> {
        self.items.clear().await
    }

    // --- boxes ---

    pub async fn register_box(
        &self,
        box_id: &str,
        capacity: i64,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        self.boxes.register(box_id, capacity, now).await
    }

    pub async fn box_status(&self, box_id: &str) -> BoxResult<CollectionBox> {
        self.boxes.get(box_id).await
    }

    pub async fn list_boxes(&self) -> BoxResult<Vec<CollectionBox>> {
        self.boxes.list().await
    }

    pub async fn update_box_status(
        &self,
        box_id: &str,
        update: BoxUpdate,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        self.boxes.update_status(box_id, update, now).await
    }

    pub async fn open_door(&self, box_id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.boxes.open_door(box_id, now).await
    }

    pub async fn close_door(&self, box_id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.boxes.close_door(box_id, now).await
    }

    pub async fn request_collection(
        &self,
        box_id: &str,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        self.boxes.request_collection(box_id, now).await
    }

    pub async fn collection_complete(
        &self,
        box_id: &str,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        self.boxes.collection_complete(box_id, now).await
    }

    pub async fn set_maintenance(
        &self,
        box_id: &str,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        self.boxes.set_maintenance(box_id, now).await
    }

    pub async fn set_offline(&self, box_id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.boxes.set_offline(box_id, now).await
    }

    pub async fn delete_box(&self, box_id: &str) -> BoxResult<()> {
        self.boxes.delete(box_id).await
    }

    pub async fn record_deposit(
        &self,
        box_id: &str,
        deposit: NewDeposit,
        now: DateTime<Utc>,
    ) -> BoxResult<(DepositRecord, CollectionBox)> {
        self.boxes.record_deposit(box_id, deposit, now).await
    }

    pub async fn list_deposits(&self, box_id: &str) -> BoxResult<Vec<DepositRecord>> {
        self.boxes.list_deposits(box_id).await
    }
}
