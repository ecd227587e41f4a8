//! REST shell: the axum router over the shared request pipeline.

mod docs;
pub mod dto;
mod rbac;
mod secrets;
mod shares;
mod system;

use std::any::Any;

use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::pipeline::{self, ApiError};
use crate::SharedState;

/// Panic trap: any panic inside a handler becomes an opaque internal error
/// without leaking the payload or request arguments.
fn panic_handler(panic: Box<dyn Any + Send + 'static>) -> Response {
    let summary = if panic.downcast_ref::<&str>().is_some() || panic.downcast_ref::<String>().is_some()
    {
        "panic with message"
    } else {
        "panic"
    };
    tracing::error!(kind = summary, "request handler panicked");
    ApiError(arx_types::ArxError::internal("handler panicked")).into_response()
}

async fn not_found() -> impl IntoResponse {
    ApiError(arx_types::ArxError::not_found("route")).into_response()
}

/// Build the full REST router. Public routes: health and docs; everything
/// else passes the authenticate stage first.
pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/secrets", get(secrets::list).post(secrets::create))
        .route(
            "/secrets/:id",
            get(secrets::get).put(secrets::update).delete(secrets::delete),
        )
        .route("/secrets/:id/versions", get(secrets::versions))
        .route("/secrets/:id/sharing-status", get(shares::sharing_status))
        .route("/secrets/:id/share", post(shares::create))
        .route("/secrets/:id/shares", get(shares::list_for_secret))
        .route("/secrets/:id/self-share", delete(shares::remove_self))
        .route("/shares", get(shares::outbound))
        .route("/shares/:id", put(shares::update).delete(shares::revoke))
        .route("/shared-secrets", get(secrets::shared_with_me))
        .route("/users", get(rbac::list_users).post(rbac::create_user))
        .route(
            "/users/:id",
            get(rbac::get_user).put(rbac::update_user).delete(rbac::delete_user),
        )
        .route("/groups", post(rbac::create_group))
        .route("/groups/:id/members", post(rbac::add_member))
        .route("/groups/:id/members/:user_id", delete(rbac::remove_member))
        .route("/roles", get(rbac::list_roles).post(rbac::create_role))
        .route("/roles/:id", delete(rbac::delete_role))
        .route(
            "/user-roles",
            get(rbac::list_user_roles)
                .post(rbac::assign_role)
                .delete(rbac::remove_role),
        )
        .route("/audit/logs", get(system::audit_logs))
        .route("/audit/rbac-logs", get(system::rbac_logs))
        .route("/system/info", get(system::info))
        .route("/system/metrics", get(system::metrics))
        .route("/system/rotate-dek", post(system::rotate_dek))
        .route("/system/rotate-kek", post(system::rotate_kek))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            pipeline::authenticate,
        ))
        .route_layer(middleware::from_fn(pipeline::no_store));

    let public = Router::new()
        .route("/health", get(system::health))
        .route("/openapi.yaml", get(docs::openapi))
        .route("/swagger/", get(docs::swagger));

    Router::new()
        .nest("/api/v1", public.merge(protected))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
