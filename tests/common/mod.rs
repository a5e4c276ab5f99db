//! Shared setup for the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use lost_found::{
    db,
    models::item::NewItem,
    services::lost_found_service::{LostFoundService, ServiceSettings},
};
use std::{path::PathBuf, sync::Arc};
use uuid::Uuid;

/// A file-backed database in the temp dir, removed on drop. File-backed so
/// that concurrent tests really run on several pooled connections.
pub struct TestDb {
    pub service: LostFoundService,
    path: PathBuf,
}

impl TestDb {
    pub async fn new() -> Self {
        Self::with_settings(ServiceSettings::default()).await
    }

    pub async fn with_settings(settings: ServiceSettings) -> Self {
        let path = std::env::temp_dir().join(format!("lost-found-{}.db", Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        let pool = db::connect(&url).await.expect("connect test db");
        db::run_migrations(&pool).await.expect("migrate test db");
        Self {
            service: LostFoundService::new(Arc::new(pool), settings),
            path,
        }
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn one_hour() -> ServiceSettings {
    ServiceSettings {
        claim_duration: Duration::hours(1),
        ..ServiceSettings::default()
    }
}

pub fn new_item(filename: &str, image: Vec<f32>) -> NewItem {
    NewItem {
        filename: filename.into(),
        image_embedding: image,
        description_embedding: None,
        description: None,
    }
}
