//! Request DTOs for the REST surface.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;

use arx_core::{CreateSecretInput, ShareInput, UpdateSecretInput};
use arx_types::{
    ArxError, AuditFilter, AuditKind, Result, SecretFilter, SecretSort, SharePermission,
};

#[derive(Debug, Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    pub value: String,
    pub namespace: String,
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(rename = "type")]
    pub secret_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub max_reads: Option<i64>,
    pub expiration: Option<DateTime<Utc>>,
}

fn default_zone() -> String {
    "global".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl From<CreateSecretRequest> for CreateSecretInput {
    fn from(req: CreateSecretRequest) -> Self {
        Self {
            name: req.name,
            value: req.value,
            namespace: req.namespace,
            zone: req.zone,
            environment: req.environment,
            secret_type: req.secret_type,
            metadata: req.metadata,
            tags: req.tags,
            max_reads: req.max_reads,
            expires_at: req.expiration,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSecretRequest {
    pub value: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub secret_type: Option<String>,
    pub max_reads: Option<i64>,
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clear_max_reads: bool,
    #[serde(default)]
    pub clear_expiration: bool,
    // Immutable fields; present only so attempts to change them are
    // rejected explicitly rather than ignored.
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub zone: Option<String>,
    pub environment: Option<String>,
}

impl From<UpdateSecretRequest> for UpdateSecretInput {
    fn from(req: UpdateSecretRequest) -> Self {
        let max_reads = if req.clear_max_reads {
            Some(None)
        } else {
            req.max_reads.map(Some)
        };
        let expires_at = if req.clear_expiration {
            Some(None)
        } else {
            req.expiration.map(Some)
        };
        Self {
            new_value: req.value,
            metadata: req.metadata,
            secret_type: req.secret_type,
            max_reads,
            expires_at,
            name: req.name,
            namespace: req.namespace,
            zone: req.zone,
            environment: req.environment,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub recipient_id: i64,
    #[serde(default)]
    pub is_group: bool,
    pub permission: String,
}

impl ShareRequest {
    pub fn into_input(self) -> Result<ShareInput> {
        Ok(ShareInput {
            recipient_id: self.recipient_id,
            is_group: self.is_group,
            permission: SharePermission::from_str(&self.permission)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateShareRequest {
    pub permission: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncludeValueQuery {
    #[serde(default)]
    pub include_value: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSecretsQuery {
    pub namespace: Option<String>,
    pub zone: Option<String>,
    pub environment: Option<String>,
    #[serde(rename = "type")]
    pub secret_type: Option<String>,
    #[serde(default)]
    pub show_owned_only: bool,
    #[serde(default)]
    pub show_shared_only: bool,
    pub permission: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    pub sort_by: Option<SecretSort>,
}

impl ListSecretsQuery {
    pub fn into_filter(self) -> Result<SecretFilter> {
        let permission_at_least = match self.permission.as_deref() {
            Some(p) => Some(SharePermission::from_str(p)?),
            None => None,
        };
        Ok(SecretFilter {
            namespace: self.namespace,
            zone: self.zone,
            environment: self.environment,
            secret_type: self.secret_type,
            owned_only: self.show_owned_only,
            shared_only: self.show_shared_only,
            permission_at_least,
            page: self.page,
            page_size: self.page_size,
            sort_by: self.sort_by.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogsQuery {
    pub action: Option<String>,
    pub actor_user_id: Option<i64>,
    pub target_user_id: Option<i64>,
    pub namespace_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

impl AuditLogsQuery {
    pub fn into_filter(self) -> Result<AuditFilter> {
        let kind = match self.action.as_deref() {
            Some(action) => Some(
                AuditKind::parse(action)
                    .ok_or_else(|| ArxError::invalid_argument(format!("unknown action {action}")))?,
            ),
            None => None,
        };
        Ok(AuditFilter {
            kind,
            actor_user_id: self.actor_user_id,
            target_user_id: self.target_user_id,
            namespace_id: self.namespace_id,
            from: self.from,
            to: self.to,
            page: self.page,
            page_size: self.page_size,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Assignment target: exactly one of `user_id` or `group_id`.
#[derive(Debug, Deserialize)]
pub struct UserRoleRequest {
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
    pub role_id: i64,
    pub namespace_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserRolesQuery {
    pub user_id: Option<i64>,
}
