//! Domain ↔ wire conversions for the gRPC shell.

use chrono::{DateTime, Utc};
use tonic::Status;

use arx_core::{SecretRecord, ShareDetails, ShareView, SharingIndicators};
use arx_types::{ArxError, AuditEvent, SecretVersion, User};

use crate::pb;

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, Status> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            super::status_from(ArxError::invalid_argument(format!(
                "{field} must be an RFC 3339 timestamp"
            )))
        })
}

pub(crate) fn share_details(details: ShareDetails) -> pb::ShareDetails {
    pb::ShareDetails {
        total_shares: details.total_shares,
        direct_shares: details.direct_shares,
        group_shares: details.group_shares,
        recent_shares: details.recent_shares,
        permission_text: details.permission_text,
        share_summary: details.share_summary,
    }
}

pub(crate) fn indicators(indicators: SharingIndicators) -> pb::SharingIndicators {
    pb::SharingIndicators {
        icon: indicators.icon.to_string(),
        badge: indicators.badge.to_string(),
        can_read: indicators.can_read,
        can_write: indicators.can_write,
        can_share: indicators.can_share,
        can_delete: indicators.can_delete,
        status_text: indicators.status_text,
        details: indicators.share_details.map(share_details),
    }
}

pub(crate) fn secret_record(record: SecretRecord) -> pb::SecretRecord {
    pb::SecretRecord {
        id: record.node.id,
        name: record.node.name.clone(),
        namespace: record.namespace,
        zone: record.zone,
        environment: record.environment,
        is_secret: record.node.is_secret,
        secret_type: record.node.secret_type.clone(),
        max_reads: record.node.max_reads,
        expires_at: record.node.expires_at.map(|t| t.to_rfc3339()),
        metadata_json: record.node.metadata.to_string(),
        status: record.node.status.as_str().to_string(),
        owner_id: record.node.owner_id,
        is_shared: record.node.is_shared,
        created_at: record.node.created_at.to_rfc3339(),
        updated_at: record.node.updated_at.to_rfc3339(),
        latest_version: record.latest_version,
        value: record.value,
        sharing: record.sharing.map(indicators),
    }
}

pub(crate) fn version(v: SecretVersion) -> pb::SecretVersion {
    pb::SecretVersion {
        version: v.version,
        read_count: v.read_count,
        created_at: v.created_at.to_rfc3339(),
        algorithm: v.metadata.algorithm.clone(),
        kek_version: v.metadata.kek_version,
        dek_version: v.metadata.dek_version,
        chunk_count: v.metadata.chunks.len() as u32,
    }
}

pub(crate) fn share(view: ShareView) -> pb::Share {
    pb::Share {
        id: view.id,
        secret_id: view.secret_id,
        recipient_id: view.recipient_id,
        is_group: view.is_group,
        recipient_name: view.recipient_name,
        permission: view.permission.as_str().to_string(),
        created_at: view.created_at.to_rfc3339(),
        updated_at: view.updated_at.to_rfc3339(),
    }
}

pub(crate) fn user(user: User) -> pb::User {
    pb::User {
        id: user.id,
        username: user.username,
        email: user.email,
        created_at: user.created_at.to_rfc3339(),
    }
}

pub(crate) fn audit_event(event: AuditEvent) -> pb::AuditEvent {
    pb::AuditEvent {
        id: event.id,
        kind: event.kind.as_str().to_string(),
        actor_user_id: event.actor_user_id,
        secret_id: event.secret_id,
        target_user_id: event.target_user_id,
        role_id: event.role_id,
        namespace_id: event.namespace_id,
        details_json: event.details.to_string(),
        timestamp: event.timestamp.to_rfc3339(),
    }
}
