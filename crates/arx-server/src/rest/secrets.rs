//! Secret endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Serialize;

use arx_types::{RequestContext, SecretVersion};

use crate::pipeline::{envelope, envelope_message, ApiError};
use crate::rest::dto::{
    CreateSecretRequest, IncludeValueQuery, ListSecretsQuery, UpdateSecretRequest,
};
use crate::SharedState;

pub async fn create(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateSecretRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.services.secrets.create(&ctx, req.into())?;
    Ok((StatusCode::CREATED, envelope_message(record, "secret created")))
}

pub async fn get(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Query(query): Query<IncludeValueQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.services.secrets.get(&ctx, id, query.include_value)?;
    Ok(envelope(record))
}

pub async fn update(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSecretRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.services.secrets.update(&ctx, id, req.into())?;
    Ok(envelope_message(record, "secret updated"))
}

pub async fn delete(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.secrets.delete(&ctx, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ListSecretsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = query.into_filter()?;
    let page = state.services.secrets.list(&ctx, &filter)?;
    Ok(envelope(page))
}

/// `GET /shared-secrets`: the listing pre-filtered to rows shared with the
/// caller.
pub async fn shared_with_me(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ListSecretsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut filter = query.into_filter()?;
    filter.shared_only = true;
    filter.owned_only = false;
    let page = state.services.secrets.list(&ctx, &filter)?;
    Ok(envelope(page))
}

/// Version metadata only; ciphertext never leaves the server.
#[derive(Serialize)]
struct VersionView {
    version: i64,
    read_count: i64,
    created_at: chrono::DateTime<chrono::Utc>,
    algorithm: String,
    kek_version: u32,
    dek_version: u32,
    chunk_count: usize,
}

impl From<SecretVersion> for VersionView {
    fn from(v: SecretVersion) -> Self {
        Self {
            version: v.version,
            read_count: v.read_count,
            created_at: v.created_at,
            algorithm: v.metadata.algorithm.clone(),
            kek_version: v.metadata.kek_version,
            dek_version: v.metadata.dek_version,
            chunk_count: v.metadata.chunks.len(),
        }
    }
}

pub async fn versions(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let versions = state.services.secrets.list_versions(&ctx, id)?;
    let views: Vec<VersionView> = versions.into_iter().map(VersionView::from).collect();
    Ok(envelope(views))
}
