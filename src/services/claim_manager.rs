//! Claim lifecycle over the item store.
//!
//! Every transition is one conditional `UPDATE`: the status/expiry check and
//! the write happen inside the same statement, so concurrent claimants (and a
//! sweep racing a claim) are serialized by SQLite's write lock instead of by a
//! read-then-write sequence in this process.

use crate::{
    models::{from_millis, item::ClaimHold, to_millis},
    services::item_store::{ItemError, ItemResult, ItemStore},
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

/// Claim window used when no duration is configured.
pub const DEFAULT_CLAIM_DURATION_SECS: i64 = 60 * 60;

#[derive(Clone)]
pub struct ClaimManager {
    store: ItemStore,
    claim_duration: Duration,
}

impl ClaimManager {
    pub fn new(store: ItemStore, claim_duration: Duration) -> Self {
        Self {
            store,
            claim_duration,
        }
    }

    pub fn claim_duration(&self) -> Duration {
        self.claim_duration
    }

    /// Take an exclusive hold on `item_id` for `claim_duration` starting at `now`.
    ///
    /// Succeeds on an available item or one whose previous hold has lapsed
    /// (`now >= expires_at`). Exactly one of several concurrent callers wins;
    /// the rest see `AlreadyClaimed`.
    pub async fn claim(
        &self,
        item_id: i64,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> ItemResult<ClaimHold> {
        let expires_at = now
            .checked_add_signed(self.claim_duration)
            .ok_or_else(|| ItemError::ClaimWindowOutOfRange(self.claim_duration.to_string()))?;
        let now_ms = to_millis(now);
        let expires_ms = to_millis(expires_at);

        let claimed = sqlx::query_as::<_, (String, i64, i64)>(
            "UPDATE found_items
             SET status = 'claimed', claimed_by = ?1, claimed_at = ?2, expires_at = ?3
             WHERE id = ?4 AND (status = 'available' OR expires_at <= ?2)
             RETURNING claimed_by, claimed_at, expires_at",
        )
        .bind(claimant)
        .bind(now_ms)
        .bind(expires_ms)
        .bind(item_id)
        .fetch_optional(&*self.store.db)
        .await?;

        match claimed {
            Some((claimed_by, claimed_at, expires_at)) => {
                info!(item_id, claimant, expires_at = %from_millis(expires_at), "item claimed");
                Ok(ClaimHold {
                    claimed_by,
                    claimed_at: from_millis(claimed_at),
                    expires_at: from_millis(expires_at),
                })
            }
            None => {
                if self.exists(item_id).await? {
                    debug!(item_id, claimant, "claim rejected, hold still live");
                    Err(ItemError::AlreadyClaimed(item_id))
                } else {
                    Err(ItemError::NotFound(item_id.to_string()))
                }
            }
        }
    }

    /// Give up a live hold early. Only the current holder may release.
    pub async fn release(&self, item_id: i64, claimant: &str, now: DateTime<Utc>) -> ItemResult<()> {
        let result = sqlx::query(
            "UPDATE found_items
             SET status = 'available', claimed_by = NULL, claimed_at = NULL, expires_at = NULL
             WHERE id = ? AND status = 'claimed' AND claimed_by = ? AND expires_at >= ?",
        )
        .bind(item_id)
        .bind(claimant)
        .bind(to_millis(now))
        .execute(&*self.store.db)
        .await?;

        if result.rows_affected() == 1 {
            info!(item_id, claimant, "claim released by holder");
            return Ok(());
        }
        if self.exists(item_id).await? {
            Err(ItemError::NotClaimHolder {
                item_id,
                claimant: claimant.to_string(),
            })
        } else {
            Err(ItemError::NotFound(item_id.to_string()))
        }
    }

    /// Reset every hold with `expires_at < now` back to available.
    ///
    /// Returns how many rows this call transitioned; a concurrent or repeated
    /// sweep over the same rows counts nothing further.
    pub async fn release_expired(&self, now: DateTime<Utc>) -> ItemResult<u64> {
        let result = sqlx::query(
            "UPDATE found_items
             SET status = 'available', claimed_by = NULL, claimed_at = NULL, expires_at = NULL
             WHERE status = 'claimed' AND expires_at < ?",
        )
        .bind(to_millis(now))
        .execute(&*self.store.db)
        .await?;

        let released = result.rows_affected();
        if released > 0 {
            info!(released, "released expired claims");
        }
        Ok(released)
    }

    async fn exists(&self, item_id: i64) -> ItemResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM found_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&*self.store.db)
            .await?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, models::item::NewItem};
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn setup(duration: Duration) -> (ItemStore, ClaimManager) {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = ItemStore::new(Arc::new(pool));
        let claims = ClaimManager::new(store.clone(), duration);
        (store, claims)
    }

    async fn deposit(store: &ItemStore, filename: &str, at: DateTime<Utc>) -> i64 {
        store
            .create(
                NewItem {
                    filename: filename.into(),
                    image_embedding: vec![1.0, 0.0, 0.0],
                    description_embedding: None,
                    description: None,
                },
                at,
            )
            .await
            .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn claim_sets_expiry_to_claim_time_plus_duration() {
        let duration = Duration::minutes(1);
        let (store, claims) = setup(duration).await;
        let id = deposit(&store, "phone.jpg", t0()).await;

        let hold = claims.claim(id, "alice", t0()).await.unwrap();
        assert_eq!(hold.claimed_at, t0());
        assert_eq!(hold.expires_at, t0() + duration);

        let stored = store.get_by_id(id).await.unwrap();
        assert_eq!(stored.claim, Some(hold));
    }

    #[tokio::test]
    async fn live_hold_blocks_other_claimants_without_mutation() {
        let (store, claims) = setup(Duration::hours(1)).await;
        let id = deposit(&store, "phone.jpg", t0()).await;
        claims.claim(id, "alice", t0()).await.unwrap();

        let err = claims
            .claim(id, "bob", t0() + Duration::minutes(59))
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::AlreadyClaimed(got) if got == id));

        let hold = store.get_by_id(id).await.unwrap().claim.unwrap();
        assert_eq!(hold.claimed_by, "alice");
        assert_eq!(hold.claimed_at, t0());
    }

    #[tokio::test]
    async fn lapsed_hold_can_be_reclaimed_without_a_sweep() {
        let (store, claims) = setup(Duration::hours(1)).await;
        let id = deposit(&store, "phone.jpg", t0()).await;
        claims.claim(id, "alice", t0()).await.unwrap();

        let later = t0() + Duration::hours(1);
        let hold = claims.claim(id, "bob", later).await.unwrap();
        assert_eq!(hold.claimed_by, "bob");
        assert_eq!(hold.expires_at, later + Duration::hours(1));
    }

    #[tokio::test]
    async fn window_past_the_timestamp_range_is_an_error_not_a_panic() {
        let (store, claims) = setup(Duration::days(365 * 1_000_000)).await;
        let id = deposit(&store, "phone.jpg", t0()).await;

        let err = claims.claim(id, "alice", t0()).await.unwrap_err();
        assert!(matches!(err, ItemError::ClaimWindowOutOfRange(_)));
        assert!(store.get_by_id(id).await.unwrap().claim.is_none());
    }

    #[tokio::test]
    async fn claiming_a_missing_item_is_not_found() {
        let (_store, claims) = setup(Duration::hours(1)).await;
        let err = claims.claim(42, "alice", t0()).await.unwrap_err();
        assert!(matches!(err, ItemError::NotFound(id) if id == "42"));
    }

    #[tokio::test]
    async fn only_the_holder_can_release() {
        let (store, claims) = setup(Duration::hours(1)).await;
        let id = deposit(&store, "phone.jpg", t0()).await;
        claims.claim(id, "alice", t0()).await.unwrap();

        let err = claims
            .release(id, "bob", t0() + Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::NotClaimHolder { .. }));

        claims
            .release(id, "alice", t0() + Duration::minutes(1))
            .await
            .unwrap();
        assert!(store.get_by_id(id).await.unwrap().claim.is_none());

        let err = claims.release(id, "alice", t0()).await.unwrap_err();
        assert!(matches!(err, ItemError::NotClaimHolder { .. }));
        assert!(matches!(
            claims.release(999, "alice", t0()).await.unwrap_err(),
            ItemError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn release_expired_only_touches_lapsed_holds() {
        let (store, claims) = setup(Duration::hours(1)).await;
        let old = deposit(&store, "old.jpg", t0()).await;
        let fresh = deposit(&store, "fresh.jpg", t0()).await;
        claims.claim(old, "alice", t0()).await.unwrap();
        claims
            .claim(fresh, "bob", t0() + Duration::minutes(30))
            .await
            .unwrap();

        let sweep_at = t0() + Duration::minutes(61);
        assert_eq!(claims.release_expired(sweep_at).await.unwrap(), 1);
        assert_eq!(claims.release_expired(sweep_at).await.unwrap(), 0);

        assert!(store.get_by_id(old).await.unwrap().claim.is_none());
        assert_eq!(
            store.get_by_id(fresh).await.unwrap().claim.unwrap().claimed_by,
            "bob"
        );
    }
}
