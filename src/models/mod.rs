//! Core data models for the lost-and-found service.
//!
//! Found items, collection boxes and the deposit log. Rows are read with
//! `sqlx::FromRow` and converted into the domain types here; everything
//! serializes as JSON via `serde`.

pub mod collection_box;
pub mod deposit;
pub mod item;

use chrono::{DateTime, Utc};

/// Timestamps are persisted as unix epoch milliseconds.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
