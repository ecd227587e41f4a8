//! Sharing endpoints.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use arx_types::{RequestContext, SharePermission};

use crate::pipeline::{envelope, envelope_message, ApiError};
use crate::rest::dto::{ShareRequest, UpdateShareRequest};
use crate::SharedState;

pub async fn create(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(req): Json<ShareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let share = state.services.sharing.share(&ctx, id, req.into_input()?)?;
    Ok((StatusCode::CREATED, envelope_message(share, "share created")))
}

pub async fn update(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateShareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let permission = SharePermission::from_str(&req.permission)?;
    let share = state.services.sharing.update_share(&ctx, id, permission)?;
    Ok(envelope_message(share, "share updated"))
}

pub async fn revoke(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.sharing.revoke(&ctx, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_self(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.sharing.remove_self(&ctx, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_for_secret(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let shares = state.services.sharing.list_for_secret(&ctx, id)?;
    Ok(envelope(shares))
}

pub async fn outbound(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let shares = state.services.sharing.list_outbound(&ctx)?;
    Ok(envelope(shares))
}

pub async fn sharing_status(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    // Indicators ride on the metadata get, which enforces read access.
    let record = state.services.secrets.get(&ctx, id, false)?;
    Ok(envelope(record.sharing))
}
