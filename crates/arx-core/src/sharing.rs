//! Sharing service: share issuance, revocation, self-removal, and the
//! per-requester sharing indicators used by listings.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use arx_crypto::CryptoEngine;
use arx_rbac::Rbac;
use arx_store::{NewAuditEvent, Store};
use arx_types::{
    Action, ArxError, AuditKind, Permission, Principal, RequestContext, Resource, Result,
    SecretNode, SharePermission, ShareRecord,
};

/// Share record shaped for the API. Recipient names are resolved only for
/// requesters allowed to see them.
#[derive(Debug, Clone, Serialize)]
pub struct ShareView {
    pub id: i64,
    pub secret_id: i64,
    pub recipient_id: i64,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    pub permission: SharePermission,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Arguments to `share`.
#[derive(Debug, Clone)]
pub struct ShareInput {
    pub recipient_id: i64,
    pub is_group: bool,
    pub permission: SharePermission,
}

/// Aggregated share statistics shown to owners and admins.
#[derive(Debug, Clone, Serialize)]
pub struct ShareDetails {
    pub total_shares: u32,
    pub direct_shares: u32,
    pub group_shares: u32,
    /// Shares created within the last 7 days.
    pub recent_shares: u32,
    pub permission_text: String,
    pub share_summary: String,
}

/// UI-facing summary of a secret's sharing state from the perspective of a
/// specific requester.
#[derive(Debug, Clone, Serialize)]
pub struct SharingIndicators {
    pub icon: &'static str,
    pub badge: &'static str,
    pub can_read: bool,
    pub can_write: bool,
    pub can_share: bool,
    pub can_delete: bool,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_details: Option<ShareDetails>,
}

#[derive(Clone)]
pub struct SharingService {
    store: Store,
    crypto: Arc<CryptoEngine>,
    rbac: Rbac,
}

/// NotFound when the principal has no demonstrable relationship with the
/// secret, PermissionDenied when they do (e.g. a revoked recipient).
pub(crate) fn visibility_error(
    store: &Store,
    ctx: &RequestContext,
    node: &SecretNode,
    principal: &Principal,
) -> ArxError {
    let group_ids = store
        .group_ids_for_user(ctx, principal.user_id)
        .unwrap_or_default();
    match store.had_share_for_principal(ctx, node.id, principal.user_id, &group_ids) {
        Ok(true) => ArxError::permission_denied("no access to this secret"),
        _ => ArxError::not_found("secret"),
    }
}

impl SharingService {
    pub fn new(store: Store, crypto: Arc<CryptoEngine>, rbac: Rbac) -> Self {
        Self {
            store,
            crypto,
            rbac,
        }
    }

    fn active_node(&self, ctx: &RequestContext, secret_id: i64) -> Result<SecretNode> {
        let node = self.store.get_secret(ctx, secret_id)?;
        if !node.is_active() {
            return Err(ArxError::not_found("secret"));
        }
        Ok(node)
    }

    fn view(&self, ctx: &RequestContext, share: &ShareRecord, resolve_names: bool) -> ShareView {
        let recipient_name = if resolve_names {
            if share.is_group {
                self.store.get_group(ctx, share.recipient_id).ok().map(|g| g.name)
            } else {
                self.store.get_user(ctx, share.recipient_id).ok().map(|u| u.username)
            }
        } else {
            None
        };
        ShareView {
            id: share.id,
            secret_id: share.secret_id,
            recipient_id: share.recipient_id,
            is_group: share.is_group,
            recipient_name,
            permission: share.permission,
            created_at: share.created_at,
            updated_at: share.updated_at,
        }
    }

    /// Grant a recipient access at `read` or `write` level, escrowing a
    /// per-share wrapped DEK.
    pub fn share(&self, ctx: &RequestContext, secret_id: i64, input: ShareInput) -> Result<ShareView> {
        let principal = ctx.require_principal()?.clone();
        let node = self.active_node(ctx, secret_id)?;

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_share {
            if caps.can_read {
                self.log_denied(&principal, node.id, "share");
                return Err(ArxError::permission_denied("sharing requires ownership"));
            }
            return Err(visibility_error(&self.store, ctx, &node, &principal));
        }

        if !input.is_group && input.recipient_id == node.owner_id {
            return Err(ArxError::invalid_argument(
                "owner cannot be a recipient of their own share",
            ));
        }

        // Recipient must exist.
        if input.is_group {
            self.store
                .get_group(ctx, input.recipient_id)
                .map_err(|_| ArxError::not_found("recipient group"))?;
        } else {
            self.store
                .get_user(ctx, input.recipient_id)
                .map_err(|_| ArxError::not_found("recipient user"))?;
        }

        if self
            .store
            .find_share(ctx, secret_id, input.recipient_id, input.is_group)?
            .is_some()
        {
            return Err(ArxError::already_exists("share"));
        }

        let wrapped = self
            .crypto
            .wrap_for_recipient(input.recipient_id, input.is_group)?;
        let wrapped = if wrapped.is_empty() { None } else { Some(wrapped) };

        let share = self.store.create_share(
            ctx,
            secret_id,
            node.owner_id,
            input.recipient_id,
            input.is_group,
            input.permission,
            wrapped,
        )?;

        let mut event = NewAuditEvent::new(AuditKind::ShareCreated)
            .actor(principal.user_id)
            .secret(secret_id)
            .namespace(node.namespace_id)
            .details(serde_json::json!({
                "permission": input.permission.as_str(),
                "is_group": input.is_group,
                "recipient_id": input.recipient_id,
            }));
        if !input.is_group {
            event = event.target_user(input.recipient_id);
        }
        self.store.log_event(event)?;
        tracing::info!(secret_id, recipient = input.recipient_id, "share created");

        Ok(self.view(ctx, &share, true))
    }

    pub fn update_share(
        &self,
        ctx: &RequestContext,
        share_id: i64,
        permission: SharePermission,
    ) -> Result<ShareView> {
        let principal = ctx.require_principal()?.clone();
        let share = self.store.get_share(ctx, share_id)?;
        if !share.is_active() {
            return Err(ArxError::not_found("share"));
        }
        let node = self.active_node(ctx, share.secret_id)?;

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_share {
            self.log_denied(&principal, node.id, "update_share");
            return Err(ArxError::permission_denied("managing shares requires ownership"));
        }

        let updated = self.store.update_share_permission(ctx, share_id, permission)?;

        let mut event = NewAuditEvent::new(AuditKind::ShareUpdated)
            .actor(principal.user_id)
            .secret(node.id)
            .namespace(node.namespace_id)
            .details(serde_json::json!({ "permission": permission.as_str() }));
        if !updated.is_group {
            event = event.target_user(updated.recipient_id);
        }
        self.store.log_event(event)?;

        Ok(self.view(ctx, &updated, true))
    }

    /// Revoke a share: soft-delete the record and destroy its wrapped DEK.
    pub fn revoke(&self, ctx: &RequestContext, share_id: i64) -> Result<()> {
        let principal = ctx.require_principal()?.clone();
        let share = self.store.get_share(ctx, share_id)?;
        if !share.is_active() {
            return Err(ArxError::not_found("share"));
        }
        let node = self.active_node(ctx, share.secret_id)?;

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_share {
            self.log_denied(&principal, node.id, "revoke");
            return Err(ArxError::permission_denied("revoking requires ownership"));
        }

        let revoked = self.store.soft_delete_share(ctx, share_id)?;

        let mut event = NewAuditEvent::new(AuditKind::ShareRevoked)
            .actor(principal.user_id)
            .secret(node.id)
            .namespace(node.namespace_id)
            .details(serde_json::json!({ "recipient_id": revoked.recipient_id }));
        if !revoked.is_group {
            event = event.target_user(revoked.recipient_id);
        }
        self.store.log_event(event)?;
        tracing::info!(secret_id = node.id, share_id, "share revoked");

        Ok(())
    }

    /// A recipient removing their own direct share. Group shares are not
    /// eligible; membership is managed elsewhere.
    pub fn remove_self(&self, ctx: &RequestContext, secret_id: i64) -> Result<()> {
        let principal = ctx.require_principal()?.clone();
        let node = self.active_node(ctx, secret_id)?;

        let direct = self
            .store
            .find_share(ctx, secret_id, principal.user_id, false)?;
        let share = match direct {
            Some(share) => share,
            None => {
                let group_ids = self.store.group_ids_for_user(ctx, principal.user_id)?;
                let via_group = self
                    .store
                    .find_share_for_principal(ctx, secret_id, principal.user_id, &group_ids)?;
                return match via_group {
                    Some(_) => Err(ArxError::invalid_argument(
                        "shared via a group; leave the group to remove access",
                    )),
                    None => Err(visibility_error(&self.store, ctx, &node, &principal)),
                };
            }
        };

        self.store.soft_delete_share(ctx, share.id)?;

        self.store.log_event(
            NewAuditEvent::new(AuditKind::ShareSelfRemoved)
                .actor(principal.user_id)
                .secret(secret_id)
                .namespace(node.namespace_id),
        )?;
        Ok(())
    }

    /// Shares on one secret; owner or `secrets.admin` only.
    pub fn list_for_secret(&self, ctx: &RequestContext, secret_id: i64) -> Result<Vec<ShareView>> {
        let principal = ctx.require_principal()?.clone();
        let node = self.active_node(ctx, secret_id)?;

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_share {
            if caps.can_read {
                return Err(ArxError::permission_denied("listing shares requires ownership"));
            }
            return Err(visibility_error(&self.store, ctx, &node, &principal));
        }

        let shares = self.store.list_shares_for_secret(ctx, secret_id)?;
        Ok(shares.iter().map(|s| self.view(ctx, s, true)).collect())
    }

    /// The caller's outbound shares across all their secrets.
    pub fn list_outbound(&self, ctx: &RequestContext) -> Result<Vec<ShareView>> {
        let principal = ctx.require_principal()?;
        let shares = self.store.list_shares_by_owner(ctx, principal.user_id)?;
        Ok(shares.iter().map(|s| self.view(ctx, s, true)).collect())
    }

    /// Shares where `user_id` is the recipient. Callers may inspect their
    /// own; `secrets.admin` may inspect anyone's.
    pub fn list_for_recipient(&self, ctx: &RequestContext, user_id: i64) -> Result<Vec<ShareView>> {
        let principal = ctx.require_principal()?.clone();
        if principal.user_id != user_id {
            let admin = self.rbac.has_permission(
                ctx,
                principal.user_id,
                Permission::new(Resource::Secrets, Action::Admin),
                None,
            )?;
            if !admin {
                self.log_denied(&principal, user_id, "list_recipient_shares");
                return Err(ArxError::permission_denied(
                    "inspecting another user's shares requires secrets.admin",
                ));
            }
        }
        let group_ids = self.store.group_ids_for_user(ctx, user_id)?;
        let shares = self
            .store
            .list_shares_for_recipient(ctx, user_id, &group_ids)?;
        Ok(shares.iter().map(|s| self.view(ctx, s, true)).collect())
    }

    /// Sharing indicators for one (secret, requester) pair; a snapshot, no
    /// stronger consistency promised.
    pub fn indicators(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        node: &SecretNode,
    ) -> Result<SharingIndicators> {
        let caps = self.rbac.secret_capabilities(ctx, principal, node)?;

        let (icon, badge, status_text): (&'static str, &'static str, String) = if caps.is_owner {
            if node.is_shared {
                (
                    "shared-owner",
                    "OWNER",
                    "You own this secret and have shared it".to_string(),
                )
            } else {
                ("owned", "OWNER", "You own this secret".to_string())
            }
        } else if let Some(share) = &caps.share {
            match share.permission {
                SharePermission::Write => (
                    "shared-write",
                    "SHARED",
                    "Shared with you (read and write)".to_string(),
                ),
                SharePermission::Read => (
                    "shared-read",
                    "READ-ONLY",
                    "Shared with you (read-only)".to_string(),
                ),
            }
        } else if node.is_shared {
            (
                "shared",
                if caps.can_write { "SHARED" } else { "READ-ONLY" },
                "Accessible via namespace permissions".to_string(),
            )
        } else {
            (
                "owned",
                if caps.can_write { "SHARED" } else { "READ-ONLY" },
                "Accessible via namespace permissions".to_string(),
            )
        };

        let share_details = if caps.can_share {
            Some(self.details(ctx, node.id)?)
        } else {
            None
        };

        Ok(SharingIndicators {
            icon,
            badge,
            can_read: caps.can_read,
            can_write: caps.can_write,
            can_share: caps.can_share,
            can_delete: caps.can_delete,
            status_text,
            share_details,
        })
    }

    fn details(&self, ctx: &RequestContext, secret_id: i64) -> Result<ShareDetails> {
        let shares = self.store.list_shares_for_secret(ctx, secret_id)?;
        let total = shares.len() as u32;
        let group = shares.iter().filter(|s| s.is_group).count() as u32;
        let direct = total - group;
        let cutoff = Utc::now() - Duration::days(7);
        let recent = shares.iter().filter(|s| s.created_at >= cutoff).count() as u32;
        let writes = shares
            .iter()
            .filter(|s| s.permission == SharePermission::Write)
            .count() as u32;

        Ok(ShareDetails {
            total_shares: total,
            direct_shares: direct,
            group_shares: group,
            recent_shares: recent,
            permission_text: format!("read: {}, write: {}", total - writes, writes),
            share_summary: format!(
                "{total} active share{} ({direct} user{}, {group} group{})",
                if total == 1 { "" } else { "s" },
                if direct == 1 { "" } else { "s" },
                if group == 1 { "" } else { "s" },
            ),
        })
    }

    fn log_denied(&self, principal: &Principal, target: i64, operation: &str) {
        let _ = self.store.log_event(
            NewAuditEvent::new(AuditKind::PermissionDenied)
                .actor(principal.user_id)
                .secret(target)
                .details(serde_json::json!({ "operation": operation })),
        );
    }
}
