//! src/services/box_controller.rs
//!
//! BoxController — state machine for smart collection boxes backed by SQLite.
//!
//! Each event is a single conditional `UPDATE ... RETURNING` keyed by box id,
//! so a box transition is atomic on its own row and boxes never lock each
//! other. When the guard rejects the row we re-read it to tell an unknown box
//! apart from an event with no defined effect in the current state.

use crate::{
    db::is_unique_violation,
    models::{
        collection_box::{BOX_COLUMNS, BoxRow, BoxUpdate, CollectionBox},
        deposit::{DepositRecord, DepositRow, NewDeposit},
        to_millis,
    },
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BoxError {
    #[error("box `{0}` not found")]
    BoxNotFound(String),
    #[error("box `{0}` already exists")]
    BoxAlreadyExists(String),
    #[error("box id `{0}` is invalid")]
    InvalidBoxId(String),
    #[error("capacity must be positive, got {0}")]
    InvalidCapacity(i64),
    #[error("box `{box_id}` cannot {event}: {reason}")]
    InvalidTransition {
        box_id: String,
        event: String,
        reason: String,
    },
    #[error("deposit timestamp {timestamp} is outside the accepted window (received at {received_at})")]
    StaleDeposit {
        timestamp: DateTime<Utc>,
        received_at: DateTime<Utc>,
    },
    #[error("box `{0}` holds an unrecognised status value")]
    CorruptRow(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl BoxError {
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, BoxError::Sqlx(_) | BoxError::CorruptRow(_))
    }
}

pub type BoxResult<T> = Result<T, BoxError>;

/// Events accepted by a registered box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxEvent {
    Deposit,
    OpenDoor,
    CloseDoor,
    RequestCollection,
    CollectionComplete,
    SetMaintenance,
    SetOffline,
}

impl BoxEvent {
    /// `SET` clause and extra guard for the event. `?1` is the update time, `?2` the box id.
    fn statement(&self) -> (&'static str, &'static str) {
        match self {
            BoxEvent::Deposit => (
                "current_load = current_load + 1,
                 status = CASE WHEN current_load + 1 >= capacity THEN 'collect_request' ELSE status END",
                "AND current_load < capacity
                 AND status IN ('available', 'full', 'collect_request')",
            ),
            BoxEvent::OpenDoor => ("door_status = 'open'", ""),
            BoxEvent::CloseDoor => ("door_status = 'closed'", ""),
            BoxEvent::RequestCollection => ("status = 'collect_request', door_status = 'open'", ""),
            BoxEvent::CollectionComplete => (
                "status = 'available', door_status = 'closed', current_load = 0",
                "",
            ),
            BoxEvent::SetMaintenance => ("status = 'maintenance'", ""),
            BoxEvent::SetOffline => ("status = 'offline'", ""),
        }
    }

    fn sql(&self) -> String {
        let (set, guard) = self.statement();
        format!(
            "UPDATE boxes SET {set}, last_updated = ?1 WHERE id = ?2 {guard} RETURNING {BOX_COLUMNS}"
        )
    }

    /// Why the guard rejected this event for `current`.
    fn rejection(&self, current: &CollectionBox) -> String {
        match self {
            BoxEvent::Deposit if !current.status.is_operational() => {
                format!("box is {}", current.status)
            }
            BoxEvent::Deposit => format!(
                "box is at capacity ({}/{})",
                current.current_load, current.capacity
            ),
            _ => "no effect in current state".into(),
        }
    }
}

impl fmt::Display for BoxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoxEvent::Deposit => "deposit",
            BoxEvent::OpenDoor => "open door",
            BoxEvent::CloseDoor => "close door",
            BoxEvent::RequestCollection => "request collection",
            BoxEvent::CollectionComplete => "complete collection",
            BoxEvent::SetMaintenance => "enter maintenance",
            BoxEvent::SetOffline => "go offline",
        };
        f.write_str(name)
    }
}

const MAX_BOX_ID_LEN: usize = 64;

#[derive(Clone)]
pub struct BoxController {
    db: Arc<SqlitePool>,
    max_deposit_skew: Duration,
}

impl BoxController {
    pub fn new(db: Arc<SqlitePool>, max_deposit_skew: Duration) -> Self {
        Self {
            db,
            max_deposit_skew,
        }
    }

    /// Box ids come from device firmware: ASCII letters, digits, `-` and `_`.
    fn ensure_box_id_safe(id: &str) -> BoxResult<()> {
        if id.is_empty()
            || id.len() > MAX_BOX_ID_LEN
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BoxError::InvalidBoxId(id.to_string()));
        }
        Ok(())
    }

    /// Register a new box: available, door closed, empty.
    pub async fn register(
        &self,
        id: &str,
        capacity: i64,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        Self::ensure_box_id_safe(id)?;
        if capacity <= 0 {
            return Err(BoxError::InvalidCapacity(capacity));
        }

        let inserted = sqlx::query_as::<_, BoxRow>(&format!(
            "INSERT INTO boxes (id, status, door_status, capacity, current_load, last_updated)
             VALUES (?, 'available', 'closed', ?, 0, ?)
             RETURNING {BOX_COLUMNS}"
        ))
        .bind(id)
        .bind(capacity)
        .bind(to_millis(now))
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(row) => {
                info!(box_id = id, capacity, "box registered");
                decode(row)
            }
            Err(err) if is_unique_violation(&err) => Err(BoxError::BoxAlreadyExists(id.into())),
            Err(err) => Err(BoxError::Sqlx(err)),
        }
    }

    pub async fn get(&self, id: &str) -> BoxResult<CollectionBox> {
        debug!(box_id = id, "fetching box");
        fetch_box(&*self.db, id)
            .await?
            .ok_or_else(|| BoxError::BoxNotFound(id.into()))
    }

    pub async fn list(&self) -> BoxResult<Vec<CollectionBox>> {
        let rows = sqlx::query_as::<_, BoxRow>(&format!(
            "SELECT {BOX_COLUMNS} FROM boxes ORDER BY id ASC"
        ))
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(decode).collect()
    }

    /// Apply one state-machine event to a box.
    pub async fn apply(
        &self,
        id: &str,
        event: BoxEvent,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        let mut conn = self.db.acquire().await?;
        let updated = apply_event(&mut *conn, id, event, now).await?;
        self.settle(&mut *conn, id, event, updated).await
    }

    pub async fn deposit(&self, id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.apply(id, BoxEvent::Deposit, now).await
    }

    pub async fn open_door(&self, id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.apply(id, BoxEvent::OpenDoor, now).await
    }

    pub async fn close_door(&self, id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.apply(id, BoxEvent::CloseDoor, now).await
    }

    pub async fn request_collection(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        self.apply(id, BoxEvent::RequestCollection, now).await
    }

    pub async fn collection_complete(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        self.apply(id, BoxEvent::CollectionComplete, now).await
    }

    pub async fn set_maintenance(&self, id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.apply(id, BoxEvent::SetMaintenance, now).await
    }

    pub async fn set_offline(&self, id: &str, now: DateTime<Utc>) -> BoxResult<CollectionBox> {
        self.apply(id, BoxEvent::SetOffline, now).await
    }

    /// Raw status write used by device firmware and operators.
    ///
    /// Unset fields keep their value. The write is refused when the resulting
    /// load would leave `0 ..= capacity`, or when an `available` box would sit
    /// at capacity.
    pub async fn update_status(
        &self,
        id: &str,
        update: BoxUpdate,
        now: DateTime<Utc>,
    ) -> BoxResult<CollectionBox> {
        let invalid = |reason: &str| BoxError::InvalidTransition {
            box_id: id.to_string(),
            event: "update status".into(),
            reason: reason.to_string(),
        };
        if update.is_empty() {
            return Err(invalid(
                "at least one of status, door_status or current_load is required",
            ));
        }
        if update.current_load.is_some_and(|load| load < 0) {
            return Err(invalid("current_load cannot be negative"));
        }

        let updated = sqlx::query_as::<_, BoxRow>(&format!(
            "UPDATE boxes SET
                status = COALESCE(?1, status),
                door_status = COALESCE(?2, door_status),
                current_load = COALESCE(?3, current_load),
                last_updated = ?4
             WHERE id = ?5
               AND COALESCE(?3, current_load) <= capacity
               AND (COALESCE(?3, current_load) < capacity OR COALESCE(?1, status) <> 'available')
             RETURNING {BOX_COLUMNS}"
        ))
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.door_status.map(|d| d.as_str()))
        .bind(update.current_load)
        .bind(to_millis(now))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        if let Some(row) = updated {
            let updated = decode(row)?;
            info!(box_id = id, status = %updated.status, door = %updated.door_status,
                  load = updated.current_load, "box status updated");
            return Ok(updated);
        }

        let current = self.get(id).await?;
        let load = update.current_load.unwrap_or(current.current_load);
        let status = update.status.unwrap_or(current.status);
        let reason = if load > current.capacity {
            format!(
                "current_load {} exceeds capacity {}",
                load, current.capacity
            )
        } else if load == current.capacity && !status.may_be_at_capacity() {
            format!("a {} box cannot sit at capacity", status)
        } else {
            // The guard saw a different row than the one re-read here.
            "box changed during the update, retry".to_string()
        };
        warn!(box_id = id, %reason, "box status update refused");
        Err(invalid(&reason))
    }

    /// Administrative removal. The deposit log is kept.
    pub async fn delete(&self, id: &str) -> BoxResult<()> {
        let result = sqlx::query("DELETE FROM boxes WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BoxError::BoxNotFound(id.into()));
        }
        info!(box_id = id, "box deleted");
        Ok(())
    }

    /// Ingest a physical deposit: bump the box load and append a deposit record
    /// in one transaction.
    ///
    /// The box-reported timestamp must be within `max_deposit_skew` of `now`
    /// in either direction.
    pub async fn record_deposit(
        &self,
        box_id: &str,
        deposit: NewDeposit,
        now: DateTime<Utc>,
    ) -> BoxResult<(DepositRecord, CollectionBox)> {
        let skew = now - deposit.deposit_timestamp;
        if skew > self.max_deposit_skew || -skew > self.max_deposit_skew {
            warn!(box_id, filename = %deposit.filename, skew_ms = skew.num_milliseconds(),
                  "deposit timestamp outside accepted window");
            return Err(BoxError::StaleDeposit {
                timestamp: deposit.deposit_timestamp,
                received_at: now,
            });
        }
        if deposit.filename.trim().is_empty() {
            return Err(BoxError::InvalidTransition {
                box_id: box_id.to_string(),
                event: BoxEvent::Deposit.to_string(),
                reason: "deposit filename is empty".into(),
            });
        }

        let mut tx = self.db.begin().await?;
        let updated = apply_event(&mut *tx, box_id, BoxEvent::Deposit, now).await?;
        let collection_box = self
            .settle(&mut *tx, box_id, BoxEvent::Deposit, updated)
            .await?;

        let record = DepositRecord {
            id: Uuid::new_v4(),
            filename: deposit.filename,
            box_id: box_id.to_string(),
            finder_id: deposit.finder_id,
            deposit_timestamp: deposit.deposit_timestamp,
            recorded_at: now,
        };
        sqlx::query(
            "INSERT INTO deposits (id, filename, box_id, finder_id, deposit_timestamp, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(&record.box_id)
        .bind(&record.finder_id)
        .bind(to_millis(record.deposit_timestamp))
        .bind(to_millis(record.recorded_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(box_id, filename = %record.filename, load = collection_box.current_load,
              status = %collection_box.status, "deposit recorded");
        Ok((record, collection_box))
    }

    /// Deposit log for one box, oldest first.
    pub async fn list_deposits(&self, box_id: &str) -> BoxResult<Vec<DepositRecord>> {
        self.get(box_id).await?;
        let rows = sqlx::query_as::<_, DepositRow>(
            "SELECT id, filename, box_id, finder_id, deposit_timestamp, recorded_at
             FROM deposits WHERE box_id = ? ORDER BY recorded_at ASC, deposit_timestamp ASC",
        )
        .bind(box_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(DepositRecord::from).collect())
    }

    /// Turn the outcome of a guarded update into the new box or a typed error.
    async fn settle<'c, E>(
        &self,
        exec: E,
        id: &str,
        event: BoxEvent,
        updated: Option<BoxRow>,
    ) -> BoxResult<CollectionBox>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        if let Some(row) = updated {
            let updated = decode(row)?;
            info!(box_id = id, %event, status = %updated.status, door = %updated.door_status,
                  load = updated.current_load, "box transition applied");
            return Ok(updated);
        }

        match fetch_box(exec, id).await? {
            None => Err(BoxError::BoxNotFound(id.into())),
            Some(current) => {
                let reason = event.rejection(&current);
                warn!(box_id = id, %event, %reason, "box transition refused");
                Err(BoxError::InvalidTransition {
                    box_id: id.into(),
                    event: event.to_string(),
                    reason,
                })
            }
        }
    }
}

async fn apply_event<'c, E>(
    exec: E,
    id: &str,
    event: BoxEvent,
    now: DateTime<Utc>,
) -> BoxResult<Option<BoxRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    Ok(sqlx::query_as::<_, BoxRow>(&event.sql())
        .bind(to_millis(now))
        .bind(id)
        .fetch_optional(exec)
        .await?)
}

async fn fetch_box<'c, E>(exec: E, id: &str) -> BoxResult<Option<CollectionBox>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, BoxRow>(&format!(
        "SELECT {BOX_COLUMNS} FROM boxes WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;
    row.map(decode).transpose()
}

fn decode(row: BoxRow) -> BoxResult<CollectionBox> {
    let id = row.id.clone();
    row.into_box().ok_or(BoxError::CorruptRow(id))
}

