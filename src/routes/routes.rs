//! Defines routes for item and collection-box operations.
//!
//! ## Structure
//! - **Item endpoints**
//!   - `POST   /items` — deposit a found item
//!   - `GET    /items` — list all items with their current status
//!   - `DELETE /items` — remove every item
//!   - `GET    /items/{id}` — fetch one item
//!   - `DELETE /items/{filename}` — remove one item by filename
//!   - `POST   /items/{id}/release` — holder gives up a claim
//!   - `POST   /claim`, `POST /release-expired`, `POST /search`
//!
//! - **Box endpoints**
//!   - `POST   /box/register`, `GET /boxes`
//!   - `GET|POST /box/{id}/status`, `DELETE /box/{id}`
//!   - `POST   /box/{id}/door/open|close`, `/request_collection`,
//!     `/collection_complete`, `/maintenance`, `/offline`, `/deposit`
//!   - `GET    /box/{id}/items` — deposit log
//!
//! `/items/{key}` is shared by the id and filename forms; each handler
//! extracts the segment as the type it needs.

use crate::{
    handlers::{
        box_handlers::{
            box_status, close_door, collection_complete, delete_box, list_boxes, list_deposits,
            open_door, record_deposit, register_box, request_collection, set_maintenance,
            set_offline, update_box_status,
        },
        health_handlers::{healthz, readyz},
        item_handlers::{
            claim_item, clear_items, delete_item, deposit_item, get_item, list_items,
            release_expired, release_item, search_items,
        },
    },
    services::lost_found_service::LostFoundService,
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build and return the router for every lost & found route.
///
/// The router carries shared state (`LostFoundService`) to all handlers.
pub fn routes() -> Router<LostFoundService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Item routes
        .route(
            "/items",
            post(deposit_item).get(list_items).delete(clear_items),
        )
        .route("/items/{key}", get(get_item).delete(delete_item))
        .route("/items/{key}/release", post(release_item))
        .route("/claim", post(claim_item))
        .route("/release-expired", post(release_expired))
        .route("/search", post(search_items))
        // Box routes
        .route("/box/register", post(register_box))
        .route("/boxes", get(list_boxes))
        .route("/box/{id}", delete(delete_box))
        .route("/box/{id}/status", get(box_status).post(update_box_status))
        .route("/box/{id}/door/open", post(open_door))
        .route("/box/{id}/door/close", post(close_door))
        .route("/box/{id}/request_collection", post(request_collection))
        .route("/box/{id}/collection_complete", post(collection_complete))
        .route("/box/{id}/maintenance", post(set_maintenance))
        .route("/box/{id}/offline", post(set_offline))
        .route("/box/{id}/deposit", post(record_deposit))
        .route("/box/{id}/items", get(list_deposits))
}
