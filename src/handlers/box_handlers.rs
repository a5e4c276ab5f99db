//! HTTP handlers for collection boxes. Door and collection events map one to
//! one onto `BoxController` transitions.

use crate::{
    errors::AppError,
    models::{
        collection_box::{BoxUpdate, CollectionBox},
        deposit::{DepositRecord, NewDeposit},
    },
    services::lost_found_service::LostFoundService,
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
pub struct RegisterBoxReq {
    pub box_id: String,
    pub capacity: i64,
}

/// Box state plus the flags box firmware polls for.
#[derive(Debug, Serialize)]
pub struct BoxView {
    #[serde(flatten)]
    pub state: CollectionBox,
    pub is_full: bool,
    pub needs_collection: bool,
    pub door_open: bool,
}

impl From<CollectionBox> for BoxView {
    fn from(state: CollectionBox) -> Self {
        Self {
            is_full: state.is_full(),
            needs_collection: state.needs_collection(),
            door_open: state.door_open(),
            state,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DepositResp {
    pub deposit: DepositRecord,
    #[serde(rename = "box")]
    pub box_state: BoxView,
}

type BoxReply = Result<Json<BoxView>, AppError>;

/// `POST /box/register`
pub async fn register_box(
    State(service): State<LostFoundService>,
    Json(req): Json<RegisterBoxReq>,
) -> Result<impl IntoResponse, AppError> {
    let registered = service
        .register_box(&req.box_id, req.capacity, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(BoxView::from(registered))))
}

/// `GET /boxes`
pub async fn list_boxes(
    State(service): State<LostFoundService>,
) -> Result<Json<Vec<BoxView>>, AppError> {
    let boxes = service.list_boxes().await?;
    Ok(Json(boxes.into_iter().map(BoxView::from).collect()))
}

/// `GET /box/{id}/status`
pub async fn box_status(State(service): State<LostFoundService>, Path(id): Path<String>) -> BoxReply {
    Ok(Json(service.box_status(&id).await?.into()))
}

/// `POST /box/{id}/status`
pub async fn update_box_status(
    State(service): State<LostFoundService>,
    Path(id): Path<String>,
    Json(update): Json<BoxUpdate>,
) -> BoxReply {
    let updated = service.update_box_status(&id, update, Utc::now()).await?;
    Ok(Json(updated.into()))
}

/// `DELETE /box/{id}`
pub async fn delete_box(
    State(service): State<LostFoundService>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    service.delete_box(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /box/{id}/door/open`
pub async fn open_door(State(service): State<LostFoundService>, Path(id): Path<String>) -> BoxReply {
    Ok(Json(service.open_door(&id, Utc::now()).await?.into()))
}

/// `POST /box/{id}/door/close`
pub async fn close_door(State(service): State<LostFoundService>, Path(id): Path<String>) -> BoxReply {
    Ok(Json(service.close_door(&id, Utc::now()).await?.into()))
}

/// `POST /box/{id}/request_collection`
pub async fn request_collection(
    State(service): State<LostFoundService>,
    Path(id): Path<String>,
) -> BoxReply {
    Ok(Json(service.request_collection(&id, Utc::now()).await?.into()))
}

/// `POST /box/{id}/collection_complete`
pub async fn collection_complete(
    State(service): State<LostFoundService>,
    Path(id): Path<String>,
) -> BoxReply {
    Ok(Json(service.collection_complete(&id, Utc::now()).await?.into()))
}

/// `POST /box/{id}/maintenance`
pub async fn set_maintenance(
    State(service): State<LostFoundService>,
    Path(id): Path<String>,
) -> BoxReply {
    Ok(Json(service.set_maintenance(&id, Utc::now()).await?.into()))
}

/// `POST /box/{id}/offline`
pub async fn set_offline(State(service): State<LostFoundService>, Path(id): Path<String>) -> BoxReply {
    Ok(Json(service.set_offline(&id, Utc::now()).await?.into()))
}

/// `POST /box/{id}/deposit`
///
/// Records the deposit and bumps the load in one transaction.
pub async fn record_deposit(
    State(service): State<LostFoundService>,
    Path(id): Path<String>,
    Json(req): Json<NewDeposit>,
) -> Result<impl IntoResponse, AppError> {
    let (deposit, box_state) = service.record_deposit(&id, req, Utc::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(DepositResp {
            deposit,
            box_state: box_state.into(),
        }),
    ))
}

/// `GET /box/{id}/items`
pub async fn list_deposits(
    State(service): State<LostFoundService>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DepositRecord>>, AppError> {
    Ok(Json(service.list_deposits(&id).await?))
}
