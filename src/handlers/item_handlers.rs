//! HTTP handlers for found items: deposit, claim, release, search.
//! Every handler reads the clock once and passes it down, so a request sees
//! one consistent instant.

use crate::{
    errors::AppError,
    models::item::{ClaimHold, ItemView, NewItem},
    services::lost_found_service::{LostFoundService, SearchHit},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ClaimReq {
    pub item_id: i64,
    pub claimant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseReq {
    pub claimant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchReq {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct DepositResp {
    pub item_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ClaimResp {
    pub item_id: i64,
    #[serde(flatten)]
    pub hold: ClaimHold,
}

#[derive(Debug, Serialize)]
pub struct CountResp {
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct SearchResp {
    pub results: Vec<SearchHit>,
}

/// `POST /items`
pub async fn deposit_item(
    State(service): State<LostFoundService>,
    Json(req): Json<NewItem>,
) -> Result<impl IntoResponse, AppError> {
    let item_id = service.deposit(req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(DepositResp { item_id })))
}

/// `GET /items`
pub async fn list_items(
    State(service): State<LostFoundService>,
) -> Result<Json<Vec<ItemView>>, AppError> {
    Ok(Json(service.list_items(Utc::now()).await?))
}

/// `GET /items/{id}`
pub async fn get_item(
    State(service): State<LostFoundService>,
    Path(item_id): Path<i64>,
) -> Result<Json<ItemView>, AppError> {
    Ok(Json(service.get_item(item_id, Utc::now()).await?))
}

/// `DELETE /items/{filename}`
pub async fn delete_item(
    State(service): State<LostFoundService>,
    Path(filename): Path<String>,
) -> Result<StatusCode, AppError> {
    service.delete_item(&filename).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /items`
pub async fn clear_items(
    State(service): State<LostFoundService>,
) -> Result<Json<CountResp>, AppError> {
    let count = service.clear_items().await?;
    Ok(Json(CountResp { count }))
}

/// `POST /claim`
pub async fn claim_item(
    State(service): State<LostFoundService>,
    Json(req): Json<ClaimReq>,
) -> Result<Json<ClaimResp>, AppError> {
    let claimant = req.claimant_id.trim();
    if claimant.is_empty() {
        return Err(AppError::bad_request("claimant_id must not be empty"));
    }
    let hold = service.claim(req.item_id, claimant, Utc::now()).await?;
    Ok(Json(ClaimResp {
        item_id: req.item_id,
        hold,
    }))
}

/// `POST /items/{id}/release`
pub async fn release_item(
    State(service): State<LostFoundService>,
    Path(item_id): Path<i64>,
    Json(req): Json<ReleaseReq>,
) -> Result<StatusCode, AppError> {
    let claimant = req.claimant_id.trim();
    if claimant.is_empty() {
        return Err(AppError::bad_request("claimant_id must not be empty"));
    }
    service.release(item_id, claimant, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /release-expired`
pub async fn release_expired(
    State(service): State<LostFoundService>,
) -> Result<Json<CountResp>, AppError> {
    let count = service.release_expired(Utc::now()).await?;
    Ok(Json(CountResp { count }))
}

/// `POST /search`
pub async fn search_items(
    State(service): State<LostFoundService>,
    Json(req): Json<SearchReq>,
) -> Result<Json<SearchResp>, AppError> {
    let results = service
        .search(&req.embedding, req.threshold, Utc::now())
        .await?;
    Ok(Json(SearchResp { results }))
}
