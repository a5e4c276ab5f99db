//! Lost & found service: found-item claims with expiry, collection-box state,
//! and embedding similarity search over a SQLite store.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;
use services::lost_found_service::LostFoundService;

/// The full HTTP application with state attached.
pub fn app(service: LostFoundService) -> Router {
    routes::routes::routes().with_state(service)
}
