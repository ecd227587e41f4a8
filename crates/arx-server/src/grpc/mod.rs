//! gRPC shell: tonic services mirroring the REST surface over the same
//! pipeline stages.

mod convert;
mod services;

pub use services::{
    AuditGrpc, RoleGrpc, SecretGrpc, ShareGrpc, SystemGrpc, UserGrpc,
};

use std::sync::atomic::Ordering;

use chrono::{Duration, Utc};
use tonic::{Code, Request, Status};

use arx_store::NewAuditEvent;
use arx_types::{ArxError, AuditKind, ErrorKind, Principal, RequestContext};

use crate::pb;
use crate::pipeline::token_digest;
use crate::{messages, AppState, SharedState};

/// Domain error → gRPC status. Messages resolve through the same locale
/// policy as the REST edge; internals stay in the server log.
pub fn status_from(e: ArxError) -> Status {
    let kind = e.kind();
    if kind == ErrorKind::Internal {
        tracing::error!(error = %e, "request failed");
    }
    let code = match kind {
        ErrorKind::InvalidArgument => Code::InvalidArgument,
        ErrorKind::Unauthenticated => Code::Unauthenticated,
        ErrorKind::PermissionDenied => Code::PermissionDenied,
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::AlreadyExists => Code::AlreadyExists,
        ErrorKind::Expired => Code::FailedPrecondition,
        ErrorKind::ResourceExhausted => Code::ResourceExhausted,
        ErrorKind::Conflict => Code::Aborted,
        ErrorKind::Cancelled => Code::Cancelled,
        ErrorKind::CryptoUnavailable
        | ErrorKind::CryptoKeyMissing
        | ErrorKind::CryptoIntegrity
        | ErrorKind::Internal => Code::Internal,
    };
    Status::new(code, messages::resolve(kind))
}

/// Credential resolution for unary calls: same bearer token contract as
/// REST, carried in the `authorization` metadata key.
pub(crate) fn authenticate<T>(state: &AppState, request: &Request<T>) -> Result<RequestContext, Status> {
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let token = request
        .metadata()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|t| t.trim().to_string());

    let token = match token {
        Some(token) if !token.is_empty() => token,
        _ => {
            let _ = state.services.store.log_event(
                NewAuditEvent::new(AuditKind::AuthFailed)
                    .details(serde_json::json!({ "reason": "missing bearer token", "transport": "grpc" })),
            );
            return Err(status_from(ArxError::unauthenticated("missing bearer token")));
        }
    };

    let anon = RequestContext::anonymous();
    let user = state
        .services
        .store
        .find_user_by_token_digest(&anon, &token_digest(&token))
        .map_err(status_from)?
        .ok_or_else(|| {
            let _ = state.services.store.log_event(
                NewAuditEvent::new(AuditKind::AuthFailed)
                    .details(serde_json::json!({ "reason": "unknown or expired token", "transport": "grpc" })),
            );
            status_from(ArxError::unauthenticated("invalid token"))
        })?;

    state.grpc_limiter.check(user.id).map_err(status_from)?;

    Ok(
        RequestContext::authenticated(Principal::new(user.id, user.username))
            .with_deadline(Utc::now() + Duration::seconds(30)),
    )
}

/// Assemble the tonic server with all six services registered.
pub fn build_server(state: SharedState) -> tonic::transport::server::Router {
    use pb::audit_service_server::AuditServiceServer;
    use pb::role_service_server::RoleServiceServer;
    use pb::secret_service_server::SecretServiceServer;
    use pb::share_service_server::ShareServiceServer;
    use pb::system_service_server::SystemServiceServer;
    use pb::user_service_server::UserServiceServer;

    tonic::transport::Server::builder()
        .add_service(SecretServiceServer::new(SecretGrpc::new(state.clone())))
        .add_service(ShareServiceServer::new(ShareGrpc::new(state.clone())))
        .add_service(UserServiceServer::new(UserGrpc::new(state.clone())))
        .add_service(RoleServiceServer::new(RoleGrpc::new(state.clone())))
        .add_service(AuditServiceServer::new(AuditGrpc::new(state.clone())))
        .add_service(SystemServiceServer::new(SystemGrpc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping_matches_the_table() {
        assert_eq!(
            status_from(ArxError::invalid_argument("x")).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            status_from(ArxError::unauthenticated("x")).code(),
            Code::Unauthenticated
        );
        assert_eq!(
            status_from(ArxError::permission_denied("x")).code(),
            Code::PermissionDenied
        );
        assert_eq!(status_from(ArxError::not_found("x")).code(), Code::NotFound);
        assert_eq!(
            status_from(ArxError::already_exists("x")).code(),
            Code::AlreadyExists
        );
        assert_eq!(
            status_from(ArxError::expired("x")).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            status_from(ArxError::resource_exhausted("x")).code(),
            Code::ResourceExhausted
        );
        assert_eq!(status_from(ArxError::conflict("x")).code(), Code::Aborted);
        assert_eq!(status_from(ArxError::CryptoIntegrity).code(), Code::Internal);
    }

    #[test]
    fn crypto_statuses_carry_no_key_detail() {
        let status = status_from(ArxError::CryptoKeyMissing);
        assert!(!status.message().contains("version"));
        assert_eq!(
            status.message(),
            status_from(ArxError::CryptoUnavailable).message()
        );
    }
}
