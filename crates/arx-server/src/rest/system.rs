//! Health, system, and audit endpoints.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Extension;

use arx_types::RequestContext;

use crate::admin;
use crate::pipeline::{envelope, envelope_message, ApiError};
use crate::rest::dto::AuditLogsQuery;
use crate::SharedState;

/// Public liveness endpoint; everything else requires a principal.
pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    axum::Json(admin::health(&state))
}

pub async fn info(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let info = admin::info(&state, &ctx)?;
    Ok(envelope(info))
}

pub async fn metrics(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let metrics = admin::metrics(&state, &ctx)?;
    Ok(envelope(metrics))
}

pub async fn rotate_dek(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let new_version = admin::rotate_dek(&state, &ctx)?;
    Ok(envelope_message(
        serde_json::json!({ "dek_version": new_version }),
        "DEK rotated",
    ))
}

pub async fn rotate_kek(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let new_version = admin::rotate_kek(&state, &ctx)?;
    Ok(envelope_message(
        serde_json::json!({ "kek_version": new_version }),
        "KEK rotated",
    ))
}

pub async fn audit_logs(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<AuditLogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = query.into_filter()?;
    let page = state.services.audit.query(&ctx, &filter)?;
    Ok(envelope(page))
}

pub async fn rbac_logs(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<AuditLogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = query.into_filter()?;
    let page = state.services.audit.query_rbac(&ctx, &filter)?;
    Ok(envelope(page))
}
