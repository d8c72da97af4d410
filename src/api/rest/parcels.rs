use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::api::rest::response::success;
use crate::error::AppError;
use crate::models::parcel::{NewParcel, ParcelEdit, ParcelStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/parcel", post(create_parcel).get(list_parcels))
        .route("/api/v1/parcel/:id", get(get_parcel).put(edit_parcel))
        .route(
            "/api/v1/parcel/:id/carrier-request",
            post(add_carrier_request).get(list_carrier_requests),
        )
        .route("/api/v1/parcel/:id/accept", post(accept_carrier))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<ParcelStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Deserialize)]
pub struct CarrierBody {
    #[serde(default)]
    pub carrier_id: i64,
}

impl CarrierBody {
    fn carrier_id(&self) -> Result<i64, AppError> {
        if self.carrier_id <= 0 {
            return Err(AppError::BadRequest("carrier id is required".to_string()));
        }
        Ok(self.carrier_id)
    }
}

fn parcel_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, AppError> {
    match path {
        Ok(Path(id)) if id > 0 => Ok(id),
        Ok(Path(id)) => Err(AppError::BadRequest(format!("invalid parcel id {id}"))),
        Err(err) => Err(AppError::BadRequest(format!("invalid parcel id: {err}"))),
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|err| AppError::Unprocessable(err.body_text()))
}

async fn create_parcel(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewParcel>, JsonRejection>,
) -> Result<Response, AppError> {
    let parcel = state.parcels.create_parcel(body(payload)?).await?;
    Ok(success(StatusCode::CREATED, parcel))
}

async fn list_parcels(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|err| AppError::BadRequest(err.body_text()))?;
    let parcels = state
        .parcels
        .list_parcels(query.status, query.limit, query.offset)
        .await?;
    Ok(success(StatusCode::OK, parcels))
}

async fn get_parcel(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, AppError> {
    let parcel = state.parcels.get_parcel(parcel_id(path)?).await?;
    Ok(success(StatusCode::OK, parcel))
}

async fn edit_parcel(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ParcelEdit>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parcel_id(path)?;
    let parcel = state.parcels.edit_parcel(id, body(payload)?).await?;
    Ok(success(StatusCode::OK, parcel))
}

async fn add_carrier_request(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CarrierBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parcel_id(path)?;
    let carrier_id = body(payload)?.carrier_id()?;

    state
        .carrier_requests
        .submit_request(id, carrier_id)
        .await?;
    Ok(success(StatusCode::CREATED, "Success"))
}

async fn list_carrier_requests(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, AppError> {
    let requests = state.parcels.list_requests(parcel_id(path)?).await?;
    Ok(success(StatusCode::OK, requests))
}

async fn accept_carrier(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CarrierBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parcel_id(path)?;
    let carrier_id = body(payload)?.carrier_id()?;

    let assignment = state
        .carrier_requests
        .assign_carrier(id, carrier_id)
        .await?;
    Ok(success(StatusCode::OK, assignment))
}
