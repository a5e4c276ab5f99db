//! Represents a smart collection box and its device state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use super::from_millis;

/// Logical state of a box.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoxStatus {
    /// Ready to receive items.
    Available,
    /// At capacity.
    Full,
    /// Full and waiting for physical collection.
    CollectRequest,
    Maintenance,
    Offline,
}

impl BoxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxStatus::Available => "available",
            BoxStatus::Full => "full",
            BoxStatus::CollectRequest => "collect_request",
            BoxStatus::Maintenance => "maintenance",
            BoxStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(BoxStatus::Available),
            "full" => Some(BoxStatus::Full),
            "collect_request" => Some(BoxStatus::CollectRequest),
            "maintenance" => Some(BoxStatus::Maintenance),
            "offline" => Some(BoxStatus::Offline),
            _ => None,
        }
    }

    /// Whether the box accepts deposits in this state.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            BoxStatus::Available | BoxStatus::Full | BoxStatus::CollectRequest
        )
    }

    /// States allowed to hold a load equal to capacity.
    pub fn may_be_at_capacity(&self) -> bool {
        !matches!(self, BoxStatus::Available)
    }
}

impl fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical door state.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoorStatus {
    Closed,
    Open,
}

impl DoorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorStatus::Closed => "closed",
            DoorStatus::Open => "open",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "closed" => Some(DoorStatus::Closed),
            "open" => Some(DoorStatus::Open),
            _ => None,
        }
    }
}

impl fmt::Display for DoorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered collection box.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CollectionBox {
    /// Externally assigned device identifier.
    pub id: String,

    pub status: BoxStatus,

    pub door_status: DoorStatus,

    /// Number of items the box can hold.
    pub capacity: i64,

    /// Items currently inside, `0 ..= capacity`.
    pub current_load: i64,

    /// Refreshed on every successful transition.
    pub last_updated: DateTime<Utc>,
}

impl CollectionBox {
    pub fn is_full(&self) -> bool {
        self.current_load >= self.capacity
    }

    pub fn needs_collection(&self) -> bool {
        self.status == BoxStatus::CollectRequest
    }

    pub fn door_open(&self) -> bool {
        self.door_status == DoorStatus::Open
    }
}

/// Partial update accepted by the raw status endpoint.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct BoxUpdate {
    #[serde(default)]
    pub status: Option<BoxStatus>,
    #[serde(default)]
    pub door_status: Option<DoorStatus>,
    #[serde(default)]
    pub current_load: Option<i64>,
}

impl BoxUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.door_status.is_none() && self.current_load.is_none()
    }
}

#[derive(FromRow, Debug)]
pub(crate) struct BoxRow {
    pub id: String,
    pub status: String,
    pub door_status: String,
    pub capacity: i64,
    pub current_load: i64,
    pub last_updated: i64,
}

impl BoxRow {
    /// `None` when a status column holds a value outside the known set.
    pub(crate) fn into_box(self) -> Option<CollectionBox> {
        Some(CollectionBox {
            status: BoxStatus::parse(&self.status)?,
            door_status: DoorStatus::parse(&self.door_status)?,
            id: self.id,
            capacity: self.capacity,
            current_load: self.current_load,
            last_updated: from_millis(self.last_updated),
        })
    }
}

pub(crate) const BOX_COLUMNS: &str =
    "id, status, door_status, capacity, current_load, last_updated";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_available_boxes_must_have_headroom() {
        assert!(!BoxStatus::Available.may_be_at_capacity());
        assert!(BoxStatus::Full.may_be_at_capacity());
        assert!(BoxStatus::CollectRequest.may_be_at_capacity());
    }

    #[test]
    fn maintenance_and_offline_refuse_deposits() {
        assert!(BoxStatus::Available.is_operational());
        assert!(BoxStatus::CollectRequest.is_operational());
        assert!(!BoxStatus::Maintenance.is_operational());
        assert!(!BoxStatus::Offline.is_operational());
    }

    #[test]
    fn unknown_status_strings_are_rejected() {
        assert_eq!(BoxStatus::parse("collect_request"), Some(BoxStatus::CollectRequest));
        assert_eq!(BoxStatus::parse("Full"), None);
        assert_eq!(DoorStatus::parse("ajar"), None);
    }
}
