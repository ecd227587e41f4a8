//! tonic service implementations.

use std::collections::VecDeque;
use std::pin::Pin;
use std::str::FromStr;

use futures::Stream;
use tonic::{Request, Response, Status};

use arx_core::{CreateSecretInput, ShareInput, UpdateSecretInput};
use arx_types::{
    Action, AuditEvent, AuditFilter, AuditKind, Permission, Resource, SecretFilter, SecretSort,
    SharePermission,
};

use super::{authenticate, convert, status_from};
use crate::{admin, pb, SharedState};

macro_rules! grpc_service {
    ($name:ident) => {
        pub struct $name {
            state: SharedState,
        }

        impl $name {
            pub fn new(state: SharedState) -> Self {
                Self { state }
            }
        }
    };
}

grpc_service!(SecretGrpc);
grpc_service!(ShareGrpc);
grpc_service!(UserGrpc);
grpc_service!(RoleGrpc);
grpc_service!(AuditGrpc);
grpc_service!(SystemGrpc);

fn parse_share_permission(value: &str) -> Result<SharePermission, Status> {
    SharePermission::from_str(value).map_err(status_from)
}

// ── SecretService ───────────────────────────────────────────────────────

#[tonic::async_trait]
impl pb::secret_service_server::SecretService for SecretGrpc {
    async fn create_secret(
        &self,
        request: Request<pb::CreateSecretRequest>,
    ) -> Result<Response<pb::SecretRecord>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();

        let expires_at = match req.expires_at.as_deref() {
            Some(value) => Some(convert::parse_timestamp("expires_at", value)?),
            None => None,
        };
        let metadata = match req.metadata_json.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|_| Status::invalid_argument("metadata_json is not valid JSON"))?,
            ),
            None => None,
        };

        let record = self
            .state
            .services
            .secrets
            .create(
                &ctx,
                CreateSecretInput {
                    name: req.name,
                    value: req.value,
                    namespace: req.namespace,
                    zone: req.zone,
                    environment: req.environment,
                    secret_type: req.secret_type,
                    metadata,
                    tags: req.tags,
                    max_reads: req.max_reads,
                    expires_at,
                },
            )
            .map_err(status_from)?;
        Ok(Response::new(convert::secret_record(record)))
    }

    async fn get_secret(
        &self,
        request: Request<pb::GetSecretRequest>,
    ) -> Result<Response<pb::SecretRecord>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let record = self
            .state
            .services
            .secrets
            .get(&ctx, req.id, req.include_value)
            .map_err(status_from)?;
        Ok(Response::new(convert::secret_record(record)))
    }

    async fn update_secret(
        &self,
        request: Request<pb::UpdateSecretRequest>,
    ) -> Result<Response<pb::SecretRecord>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();

        let expires_at = if req.clear_expiration {
            Some(None)
        } else {
            match req.expires_at.as_deref() {
                Some(value) => Some(Some(convert::parse_timestamp("expires_at", value)?)),
                None => None,
            }
        };
        let max_reads = if req.clear_max_reads {
            Some(None)
        } else {
            req.max_reads.map(Some)
        };
        let metadata = match req.metadata_json.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|_| Status::invalid_argument("metadata_json is not valid JSON"))?,
            ),
            None => None,
        };

        let record = self
            .state
            .services
            .secrets
            .update(
                &ctx,
                req.id,
                UpdateSecretInput {
                    new_value: req.new_value,
                    metadata,
                    secret_type: req.secret_type,
                    max_reads,
                    expires_at,
                    ..Default::default()
                },
            )
            .map_err(status_from)?;
        Ok(Response::new(convert::secret_record(record)))
    }

    async fn delete_secret(
        &self,
        request: Request<pb::DeleteSecretRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        self.state
            .services
            .secrets
            .delete(&ctx, req.id)
            .map_err(status_from)?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn list_secrets(
        &self,
        request: Request<pb::ListSecretsRequest>,
    ) -> Result<Response<pb::ListSecretsResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();

        let permission_at_least = match req.permission.as_deref() {
            Some(value) => Some(parse_share_permission(value)?),
            None => None,
        };
        let sort_by = match req.sort_by.as_deref() {
            Some("created_at") => SecretSort::CreatedAt,
            Some("shared_at") => SecretSort::SharedAt,
            Some("owner") => SecretSort::Owner,
            _ => SecretSort::Name,
        };
        let filter = SecretFilter {
            namespace: req.namespace,
            zone: req.zone,
            environment: req.environment,
            secret_type: req.secret_type,
            owned_only: req.show_owned_only,
            shared_only: req.show_shared_only,
            permission_at_least,
            page: req.page,
            page_size: req.page_size,
            sort_by,
        };

        let page = self
            .state
            .services
            .secrets
            .list(&ctx, &filter)
            .map_err(status_from)?;
        Ok(Response::new(pb::ListSecretsResponse {
            page: page.page,
            page_size: page.page_size,
            total: page.total,
            total_pages: page.total_pages,
            items: page.items.into_iter().map(convert::secret_record).collect(),
        }))
    }

    async fn list_versions(
        &self,
        request: Request<pb::ListVersionsRequest>,
    ) -> Result<Response<pb::ListVersionsResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let versions = self
            .state
            .services
            .secrets
            .list_versions(&ctx, req.id)
            .map_err(status_from)?;
        Ok(Response::new(pb::ListVersionsResponse {
            versions: versions.into_iter().map(convert::version).collect(),
        }))
    }

    async fn get_sharing_status(
        &self,
        request: Request<pb::SharingStatusRequest>,
    ) -> Result<Response<pb::SharingIndicators>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let record = self
            .state
            .services
            .secrets
            .get(&ctx, req.id, false)
            .map_err(status_from)?;
        let indicators = record
            .sharing
            .ok_or_else(|| Status::internal("indicators missing"))?;
        Ok(Response::new(convert::indicators(indicators)))
    }
}

// ── ShareService ────────────────────────────────────────────────────────

#[tonic::async_trait]
impl pb::share_service_server::ShareService for ShareGrpc {
    async fn create_share(
        &self,
        request: Request<pb::CreateShareRequest>,
    ) -> Result<Response<pb::Share>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let share = self
            .state
            .services
            .sharing
            .share(
                &ctx,
                req.secret_id,
                ShareInput {
                    recipient_id: req.recipient_id,
                    is_group: req.is_group,
                    permission: parse_share_permission(&req.permission)?,
                },
            )
            .map_err(status_from)?;
        Ok(Response::new(convert::share(share)))
    }

    async fn update_share(
        &self,
        request: Request<pb::UpdateShareRequest>,
    ) -> Result<Response<pb::Share>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let share = self
            .state
            .services
            .sharing
            .update_share(&ctx, req.share_id, parse_share_permission(&req.permission)?)
            .map_err(status_from)?;
        Ok(Response::new(convert::share(share)))
    }

    async fn revoke_share(
        &self,
        request: Request<pb::RevokeShareRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        self.state
            .services
            .sharing
            .revoke(&ctx, req.share_id)
            .map_err(status_from)?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn remove_self(
        &self,
        request: Request<pb::RemoveSelfRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        self.state
            .services
            .sharing
            .remove_self(&ctx, req.secret_id)
            .map_err(status_from)?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn list_secret_shares(
        &self,
        request: Request<pb::ListSecretSharesRequest>,
    ) -> Result<Response<pb::SharesResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let shares = self
            .state
            .services
            .sharing
            .list_for_secret(&ctx, req.secret_id)
            .map_err(status_from)?;
        Ok(Response::new(pb::SharesResponse {
            shares: shares.into_iter().map(convert::share).collect(),
        }))
    }

    async fn list_outbound(
        &self,
        request: Request<pb::Empty>,
    ) -> Result<Response<pb::SharesResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let shares = self
            .state
            .services
            .sharing
            .list_outbound(&ctx)
            .map_err(status_from)?;
        Ok(Response::new(pb::SharesResponse {
            shares: shares.into_iter().map(convert::share).collect(),
        }))
    }

    async fn list_received(
        &self,
        request: Request<pb::ListReceivedRequest>,
    ) -> Result<Response<pb::SharesResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let shares = self
            .state
            .services
            .sharing
            .list_for_recipient(&ctx, req.user_id)
            .map_err(status_from)?;
        Ok(Response::new(pb::SharesResponse {
            shares: shares.into_iter().map(convert::share).collect(),
        }))
    }
}

// ── UserService ─────────────────────────────────────────────────────────

#[tonic::async_trait]
impl pb::user_service_server::UserService for UserGrpc {
    async fn create_user(
        &self,
        request: Request<pb::CreateUserRequest>,
    ) -> Result<Response<pb::User>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let user = self
            .state
            .services
            .users
            .create_user(&ctx, &req.username, req.email.as_deref(), &req.password)
            .map_err(status_from)?;
        Ok(Response::new(convert::user(user)))
    }

    async fn get_user(
        &self,
        request: Request<pb::GetUserRequest>,
    ) -> Result<Response<pb::User>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let user = self
            .state
            .services
            .users
            .get_user(&ctx, req.id)
            .map_err(status_from)?;
        Ok(Response::new(convert::user(user)))
    }

    async fn list_users(
        &self,
        request: Request<pb::Empty>,
    ) -> Result<Response<pb::UsersResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let users = self
            .state
            .services
            .users
            .list_users(&ctx)
            .map_err(status_from)?;
        Ok(Response::new(pb::UsersResponse {
            users: users.into_iter().map(convert::user).collect(),
        }))
    }

    async fn update_user(
        &self,
        request: Request<pb::UpdateUserRequest>,
    ) -> Result<Response<pb::User>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let user = self
            .state
            .services
            .users
            .update_user(&ctx, req.id, req.email.as_deref(), req.password.as_deref())
            .map_err(status_from)?;
        Ok(Response::new(convert::user(user)))
    }

    async fn delete_user(
        &self,
        request: Request<pb::DeleteUserRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        self.state
            .services
            .users
            .delete_user(&ctx, req.id)
            .map_err(status_from)?;
        Ok(Response::new(pb::Empty {}))
    }
}

// ── RoleService ─────────────────────────────────────────────────────────

#[tonic::async_trait]
impl pb::role_service_server::RoleService for RoleGrpc {
    async fn create_role(
        &self,
        request: Request<pb::CreateRoleRequest>,
    ) -> Result<Response<pb::Role>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        let permissions = req
            .permissions
            .iter()
            .map(|p| p.parse::<Permission>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(status_from)?;
        let role = self
            .state
            .services
            .rbac
            .create_role(&ctx, &req.name, &req.description, &permissions)
            .map_err(status_from)?;
        Ok(Response::new(pb::Role {
            id: role.id,
            name: role.name,
            description: role.description,
            permissions: req.permissions,
        }))
    }

    async fn list_roles(
        &self,
        request: Request<pb::Empty>,
    ) -> Result<Response<pb::RolesResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        self.state
            .services
            .rbac
            .require(&ctx, Permission::new(Resource::Roles, Action::Read), None)
            .map_err(status_from)?;

        let store = &self.state.services.store;
        let mut roles = Vec::new();
        for role in store.list_roles(&ctx).map_err(status_from)? {
            let permissions = store
                .permissions_for_role(&ctx, role.id)
                .map_err(status_from)?;
            roles.push(pb::Role {
                id: role.id,
                name: role.name,
                description: role.description,
                permissions,
            });
        }
        Ok(Response::new(pb::RolesResponse { roles }))
    }

    async fn delete_role(
        &self,
        request: Request<pb::DeleteRoleRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        self.state
            .services
            .rbac
            .delete_role(&ctx, req.id)
            .map_err(status_from)?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn assign_role(
        &self,
        request: Request<pb::AssignRoleRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        if req.is_group {
            self.state
                .services
                .rbac
                .assign_role_to_group(&ctx, req.principal_id, req.role_id, req.namespace_id)
                .map_err(status_from)?;
        } else {
            self.state
                .services
                .rbac
                .assign_role_to_user(&ctx, req.principal_id, req.role_id, req.namespace_id)
                .map_err(status_from)?;
        }
        Ok(Response::new(pb::Empty {}))
    }

    async fn remove_role(
        &self,
        request: Request<pb::AssignRoleRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let req = request.into_inner();
        if req.is_group {
            self.state
                .services
                .rbac
                .remove_role_from_group(&ctx, req.principal_id, req.role_id, req.namespace_id)
                .map_err(status_from)?;
        } else {
            self.state
                .services
                .rbac
                .remove_role_from_user(&ctx, req.principal_id, req.role_id, req.namespace_id)
                .map_err(status_from)?;
        }
        Ok(Response::new(pb::Empty {}))
    }
}

// ── AuditService ────────────────────────────────────────────────────────

fn audit_filter_from(req: pb::QueryLogsRequest) -> Result<AuditFilter, Status> {
    let kind = match req.action.as_deref() {
        Some(action) => Some(AuditKind::parse(action).ok_or_else(|| {
            Status::invalid_argument(format!("unknown action {action}"))
        })?),
        None => None,
    };
    let from = match req.from.as_deref() {
        Some(value) => Some(convert::parse_timestamp("from", value)?),
        None => None,
    };
    let to = match req.to.as_deref() {
        Some(value) => Some(convert::parse_timestamp("to", value)?),
        None => None,
    };
    Ok(AuditFilter {
        kind,
        actor_user_id: req.actor_user_id,
        target_user_id: req.target_user_id,
        namespace_id: req.namespace_id,
        from,
        to,
        page: req.page,
        page_size: req.page_size,
    })
}

#[tonic::async_trait]
impl pb::audit_service_server::AuditService for AuditGrpc {
    type TailLogsStream =
        Pin<Box<dyn Stream<Item = Result<pb::AuditEvent, Status>> + Send + 'static>>;

    async fn query_logs(
        &self,
        request: Request<pb::QueryLogsRequest>,
    ) -> Result<Response<pb::AuditLogsResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let filter = audit_filter_from(request.into_inner())?;
        let page = self
            .state
            .services
            .audit
            .query(&ctx, &filter)
            .map_err(status_from)?;
        Ok(Response::new(pb::AuditLogsResponse {
            page: page.page,
            page_size: page.page_size,
            total: page.total,
            total_pages: page.total_pages,
            items: page.items.into_iter().map(convert::audit_event).collect(),
        }))
    }

    async fn query_rbac_logs(
        &self,
        request: Request<pb::QueryLogsRequest>,
    ) -> Result<Response<pb::AuditLogsResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let filter = audit_filter_from(request.into_inner())?;
        let page = self
            .state
            .services
            .audit
            .query_rbac(&ctx, &filter)
            .map_err(status_from)?;
        Ok(Response::new(pb::AuditLogsResponse {
            page: page.page,
            page_size: page.page_size,
            total: page.total,
            total_pages: page.total_pages,
            items: page
                .items
                .into_iter()
                .map(|e| pb::AuditEvent {
                    id: e.id,
                    kind: e.kind.as_str().to_string(),
                    actor_user_id: e.actor_user_id,
                    secret_id: None,
                    target_user_id: e.target_user_id,
                    role_id: e.role_id,
                    namespace_id: e.namespace_id,
                    details_json: e.details.to_string(),
                    timestamp: e.timestamp.to_rfc3339(),
                })
                .collect(),
        }))
    }

    async fn tail_logs(
        &self,
        request: Request<pb::TailRequest>,
    ) -> Result<Response<Self::TailLogsStream>, Status> {
        // Authenticate once; the tail context carries no deadline because
        // the stream lives until the client hangs up.
        let ctx = authenticate(&self.state, &request)?;
        let ctx = match ctx.principal() {
            Some(p) => arx_types::RequestContext::authenticated(p.clone()),
            None => return Err(Status::unauthenticated("missing principal")),
        };
        let after_id = request.into_inner().after_id;

        // Pre-flight permission check so denials fail the call, not the
        // first stream item.
        self.state
            .services
            .audit
            .tail(&ctx, after_id, 1)
            .map_err(status_from)?;

        struct TailState {
            state: SharedState,
            ctx: arx_types::RequestContext,
            after_id: i64,
            buffer: VecDeque<AuditEvent>,
            failed: bool,
        }

        let stream = futures::stream::unfold(
            TailState {
                state: self.state.clone(),
                ctx,
                after_id,
                buffer: VecDeque::new(),
                failed: false,
            },
            |mut st| async move {
                if st.failed {
                    return None;
                }
                loop {
                    if let Some(event) = st.buffer.pop_front() {
                        return Some((Ok(convert::audit_event(event)), st));
                    }
                    match st.state.services.audit.tail(&st.ctx, st.after_id, 256) {
                        Ok(batch) if batch.is_empty() => {
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                        Ok(batch) => {
                            if let Some(last) = batch.last() {
                                st.after_id = last.id;
                            }
                            st.buffer.extend(batch);
                        }
                        Err(e) => {
                            st.failed = true;
                            return Some((Err(status_from(e)), st));
                        }
                    }
                }
            },
        );

        Ok(Response::new(Box::pin(stream)))
    }
}

// ── SystemService ───────────────────────────────────────────────────────

#[tonic::async_trait]
impl pb::system_service_server::SystemService for SystemGrpc {
    async fn health(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::HealthResponse>, Status> {
        let report = admin::health(&self.state);
        Ok(Response::new(pb::HealthResponse {
            status: report.status.to_string(),
            timestamp: report.timestamp.to_rfc3339(),
            uptime_seconds: report.uptime,
            checks: report
                .checks
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }))
    }

    async fn get_info(
        &self,
        request: Request<pb::Empty>,
    ) -> Result<Response<pb::InfoResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let info = admin::info(&self.state, &ctx).map_err(status_from)?;
        Ok(Response::new(pb::InfoResponse {
            version: info.version.to_string(),
            uptime_seconds: info.uptime_seconds,
            database_path: info.database_path,
            users: info.users,
            secrets: info.secrets,
            shares: info.shares,
            audit_events: info.audit_events,
            encryption_enabled: info.encryption_enabled,
            kek_version: info.kek_version,
            dek_version: info.dek_version,
        }))
    }

    async fn get_metrics(
        &self,
        request: Request<pb::Empty>,
    ) -> Result<Response<pb::MetricsResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let metrics = admin::metrics(&self.state, &ctx).map_err(status_from)?;
        Ok(Response::new(pb::MetricsResponse {
            requests_total: metrics.requests_total,
            secrets: metrics.secrets,
            shares: metrics.shares,
            users: metrics.users,
            audit_events: metrics.audit_events,
        }))
    }

    async fn rotate_dek(
        &self,
        request: Request<pb::Empty>,
    ) -> Result<Response<pb::RotateResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let new_version = admin::rotate_dek(&self.state, &ctx).map_err(status_from)?;
        Ok(Response::new(pb::RotateResponse { new_version }))
    }

    async fn rotate_kek(
        &self,
        request: Request<pb::Empty>,
    ) -> Result<Response<pb::RotateResponse>, Status> {
        let ctx = authenticate(&self.state, &request)?;
        let new_version = admin::rotate_kek(&self.state, &ctx).map_err(status_from)?;
        Ok(Response::new(pb::RotateResponse { new_version }))
    }
}
