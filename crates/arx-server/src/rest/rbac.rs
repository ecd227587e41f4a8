//! RBAC management endpoints: users, roles, assignments.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Serialize;

use arx_types::{Action, ArxError, Permission, RequestContext, Resource};

use crate::pipeline::{envelope, envelope_message, ApiError};
use crate::rest::dto::{
    CreateRoleRequest, CreateUserRequest, UpdateUserRequest, UserRoleRequest, UserRolesQuery,
};
use crate::SharedState;

// ── users ───────────────────────────────────────────────────────────────

pub async fn create_user(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user =
        state
            .services
            .users
            .create_user(&ctx, &req.username, req.email.as_deref(), &req.password)?;
    Ok((StatusCode::CREATED, envelope_message(user, "user created")))
}

pub async fn get_user(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.services.users.get_user(&ctx, id)?;
    Ok(envelope(user))
}

pub async fn list_users(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.services.users.list_users(&ctx)?;
    Ok(envelope(users))
}

pub async fn update_user(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.services.users.update_user(
        &ctx,
        id,
        req.email.as_deref(),
        req.password.as_deref(),
    )?;
    Ok(envelope_message(user, "user updated"))
}

pub async fn delete_user(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.users.delete_user(&ctx, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── groups ──────────────────────────────────────────────────────────────

pub async fn create_group(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<crate::rest::dto::CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state
        .services
        .users
        .create_group(&ctx, &req.name, &req.description)?;
    Ok((StatusCode::CREATED, envelope_message(group, "group created")))
}

pub async fn add_member(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(group_id): Path<i64>,
    Json(req): Json<crate::rest::dto::MembershipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.users.add_member(&ctx, req.user_id, group_id)?;
    Ok((
        StatusCode::CREATED,
        envelope_message(serde_json::json!({}), "member added"),
    ))
}

pub async fn remove_member(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path((group_id, user_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.users.remove_member(&ctx, user_id, group_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── roles ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RoleView {
    id: i64,
    name: String,
    description: String,
    permissions: Vec<String>,
}

pub async fn create_role(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let permissions = req
        .permissions
        .iter()
        .map(|p| p.parse::<Permission>())
        .collect::<Result<Vec<_>, _>>()?;
    let role = state
        .services
        .rbac
        .create_role(&ctx, &req.name, &req.description, &permissions)?;
    let view = RoleView {
        id: role.id,
        name: role.name,
        description: role.description,
        permissions: req.permissions,
    };
    Ok((StatusCode::CREATED, envelope_message(view, "role created")))
}

pub async fn list_roles(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .rbac
        .require(&ctx, Permission::new(Resource::Roles, Action::Read), None)?;

    let store = &state.services.store;
    let mut views = Vec::new();
    for role in store.list_roles(&ctx)? {
        let permissions = store.permissions_for_role(&ctx, role.id)?;
        views.push(RoleView {
            id: role.id,
            name: role.name,
            description: role.description,
            permissions,
        });
    }
    Ok(envelope(views))
}

pub async fn delete_role(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.rbac.delete_role(&ctx, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── role assignments ────────────────────────────────────────────────────

fn assignment_target(req: &UserRoleRequest) -> Result<(i64, bool), ArxError> {
    match (req.user_id, req.group_id) {
        (Some(user_id), None) => Ok((user_id, false)),
        (None, Some(group_id)) => Ok((group_id, true)),
        _ => Err(ArxError::invalid_argument(
            "exactly one of user_id or group_id is required",
        )),
    }
}

pub async fn assign_role(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<UserRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal_id, is_group) = assignment_target(&req)?;
    if is_group {
        state
            .services
            .rbac
            .assign_role_to_group(&ctx, principal_id, req.role_id, req.namespace_id)?;
    } else {
        state
            .services
            .rbac
            .assign_role_to_user(&ctx, principal_id, req.role_id, req.namespace_id)?;
    }
    Ok((
        StatusCode::CREATED,
        envelope_message(serde_json::json!({}), "role assigned"),
    ))
}

pub async fn remove_role(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<UserRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal_id, is_group) = assignment_target(&req)?;
    if is_group {
        state
            .services
            .rbac
            .remove_role_from_group(&ctx, principal_id, req.role_id, req.namespace_id)?;
    } else {
        state
            .services
            .rbac
            .remove_role_from_user(&ctx, principal_id, req.role_id, req.namespace_id)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct AssignmentView {
    role_id: i64,
    role_name: String,
    namespace_id: Option<i64>,
}

pub async fn list_user_roles(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<UserRolesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = ctx.require_principal().map_err(ApiError::from)?.clone();
    let user_id = query.user_id.unwrap_or(principal.user_id);
    if user_id != principal.user_id {
        state
            .services
            .rbac
            .require(&ctx, Permission::new(Resource::Roles, Action::Read), None)?;
    }

    let store = &state.services.store;
    let mut views = Vec::new();
    for (role_id, namespace_id) in store.role_assignments_for_user(&ctx, user_id)? {
        let role = store.get_role(&ctx, role_id)?;
        views.push(AssignmentView {
            role_id,
            role_name: role.name,
            namespace_id,
        });
    }
    Ok(envelope(views))
}
