//! Append-only audit event model.
//!
//! Two logical streams share the shape: general audit (`secret_*`,
//! `share_*`, authentication events) and RBAC audit (role lifecycle and
//! assignment changes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed event kinds. The wire form is the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SecretCreated,
    SecretAccessed,
    SecretUpdated,
    SecretDeleted,
    ShareCreated,
    ShareUpdated,
    ShareRevoked,
    ShareSelfRemoved,
    RoleAssigned,
    RoleRemoved,
    RoleCreated,
    RoleDeleted,
    AuthFailed,
    PermissionDenied,
    OperationCancelled,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretCreated => "secret_created",
            Self::SecretAccessed => "secret_accessed",
            Self::SecretUpdated => "secret_updated",
            Self::SecretDeleted => "secret_deleted",
            Self::ShareCreated => "share_created",
            Self::ShareUpdated => "share_updated",
            Self::ShareRevoked => "share_revoked",
            Self::ShareSelfRemoved => "share_self_removed",
            Self::RoleAssigned => "role_assigned",
            Self::RoleRemoved => "role_removed",
            Self::RoleCreated => "role_created",
            Self::RoleDeleted => "role_deleted",
            Self::AuthFailed => "auth_failed",
            Self::PermissionDenied => "permission_denied",
            Self::OperationCancelled => "operation_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "secret_created" => Self::SecretCreated,
            "secret_accessed" => Self::SecretAccessed,
            "secret_updated" => Self::SecretUpdated,
            "secret_deleted" => Self::SecretDeleted,
            "share_created" => Self::ShareCreated,
            "share_updated" => Self::ShareUpdated,
            "share_revoked" => Self::ShareRevoked,
            "share_self_removed" => Self::ShareSelfRemoved,
            "role_assigned" => Self::RoleAssigned,
            "role_removed" => Self::RoleRemoved,
            "role_created" => Self::RoleCreated,
            "role_deleted" => Self::RoleDeleted,
            "auth_failed" => Self::AuthFailed,
            "permission_denied" => Self::PermissionDenied,
            "operation_cancelled" => Self::OperationCancelled,
            _ => return None,
        };
        Some(kind)
    }

    /// RBAC-stream events are queried separately from the general stream.
    pub fn is_rbac(&self) -> bool {
        matches!(
            self,
            Self::RoleAssigned | Self::RoleRemoved | Self::RoleCreated | Self::RoleDeleted
        )
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub kind: AuditKind,
    /// Absent for failed authentication with no resolvable principal.
    pub actor_user_id: Option<i64>,
    pub secret_id: Option<i64>,
    pub target_user_id: Option<i64>,
    pub role_id: Option<i64>,
    pub namespace_id: Option<i64>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// RBAC-stream specialization: same storage, narrowed accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacAuditEvent {
    pub id: i64,
    pub kind: AuditKind,
    pub actor_user_id: Option<i64>,
    pub role_id: Option<i64>,
    pub target_user_id: Option<i64>,
    pub namespace_id: Option<i64>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl From<AuditEvent> for RbacAuditEvent {
    fn from(e: AuditEvent) -> Self {
        Self {
            id: e.id,
            kind: e.kind,
            actor_user_id: e.actor_user_id,
            role_id: e.role_id,
            target_user_id: e.target_user_id,
            namespace_id: e.namespace_id,
            details: e.details,
            timestamp: e.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        for kind in [
            AuditKind::SecretCreated,
            AuditKind::ShareSelfRemoved,
            AuditKind::RoleDeleted,
            AuditKind::PermissionDenied,
            AuditKind::OperationCancelled,
        ] {
            assert_eq!(AuditKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AuditKind::parse("secret_exploded"), None);
    }

    #[test]
    fn rbac_stream_membership() {
        assert!(AuditKind::RoleAssigned.is_rbac());
        assert!(AuditKind::RoleDeleted.is_rbac());
        assert!(!AuditKind::SecretAccessed.is_rbac());
        assert!(!AuditKind::AuthFailed.is_rbac());
    }
}
