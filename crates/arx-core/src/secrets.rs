//! Secret service: lifecycle and versioning of secret nodes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use arx_crypto::CryptoEngine;
use arx_rbac::Rbac;
use arx_store::{NewAuditEvent, NewSecretNode, ReadClaim, Store};
use arx_types::{
    ArxError, AuditKind, FieldViolation, Page, Principal, RequestContext, Result, SecretFilter,
    SecretNode, SecretVersion,
};

use crate::sharing::{visibility_error, SharingIndicators, SharingService};
use crate::validate;
use crate::ServiceLimits;

/// Arguments to `create`.
#[derive(Debug, Clone)]
pub struct CreateSecretInput {
    pub name: String,
    pub value: String,
    pub namespace: String,
    pub zone: String,
    pub environment: String,
    pub secret_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub tags: Vec<String>,
    pub max_reads: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Arguments to `update`. The outer `Option` on `max_reads`/`expires_at`
/// distinguishes "leave unchanged" from "set or clear". The immutable-field
/// slots exist so attempts to change them fail loudly instead of silently.
#[derive(Debug, Clone, Default)]
pub struct UpdateSecretInput {
    pub new_value: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub secret_type: Option<String>,
    pub max_reads: Option<Option<i64>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub zone: Option<String>,
    pub environment: Option<String>,
}

/// A secret enriched for the API: scope names resolved, value decrypted on
/// request, sharing indicators scoped to the requester.
#[derive(Debug, Clone, Serialize)]
pub struct SecretRecord {
    #[serde(flatten)]
    pub node: SecretNode,
    pub namespace: String,
    pub zone: String,
    pub environment: String,
    pub latest_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharing: Option<SharingIndicators>,
}

#[derive(Clone)]
pub struct SecretService {
    store: Store,
    crypto: Arc<CryptoEngine>,
    rbac: Rbac,
    sharing: SharingService,
    limits: ServiceLimits,
}

impl SecretService {
    pub fn new(
        store: Store,
        crypto: Arc<CryptoEngine>,
        rbac: Rbac,
        sharing: SharingService,
        limits: ServiceLimits,
    ) -> Self {
        Self {
            store,
            crypto,
            rbac,
            sharing,
            limits,
        }
    }

    fn record(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        node: SecretNode,
        value: Option<String>,
        latest_version: Option<i64>,
    ) -> Result<SecretRecord> {
        let (namespace, zone, environment) =
            self.store
                .scope_names(ctx, node.namespace_id, node.zone_id, node.environment_id)?;
        let latest_version = match latest_version {
            Some(v) => v,
            None if node.is_secret => self.store.latest_version(ctx, node.id)?.version,
            None => 0,
        };
        let sharing = self.sharing.indicators(ctx, principal, &node)?;
        Ok(SecretRecord {
            node,
            namespace,
            zone,
            environment,
            latest_version,
            value,
            sharing: Some(sharing),
        })
    }

    /// Create a secret leaf with its first version.
    pub fn create(&self, ctx: &RequestContext, input: CreateSecretInput) -> Result<SecretRecord> {
        let principal = ctx.require_principal()?.clone();

        let mut violations: Vec<FieldViolation> = Vec::new();
        validate::check_name("name", &input.name, &mut violations);
        validate::check_name("namespace", &input.namespace, &mut violations);
        validate::check_name("zone", &input.zone, &mut violations);
        validate::check_name("environment", &input.environment, &mut violations);
        validate::check_max_reads(input.max_reads, &mut violations);
        validate::check_expiration(input.expires_at, &mut violations);
        validate::finish(violations)?;

        let namespace = self.store.ensure_namespace(ctx, &input.namespace)?;
        let zone_id = self.store.ensure_zone(ctx, &input.zone)?;
        let environment_id = self.store.ensure_environment(ctx, &input.environment)?;

        self.rbac.require(
            ctx,
            arx_types::Permission::new(arx_types::Resource::Secrets, arx_types::Action::Write),
            Some(namespace.id),
        )?;

        let owned = self
            .store
            .count_active_secrets_owned_by(ctx, principal.user_id)?;
        if owned >= self.limits.max_secrets_per_user as u64 {
            return Err(ArxError::resource_exhausted(format!(
                "secret limit of {} reached",
                self.limits.max_secrets_per_user
            )));
        }

        if self
            .store
            .find_secret_by_name(ctx, namespace.id, zone_id, environment_id, None, &input.name)?
            .is_some()
        {
            return Err(ArxError::already_exists(format!("secret {}", input.name)));
        }

        let mut metadata = match input.metadata {
            Some(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
            Some(other) if !other.is_null() => {
                return Err(ArxError::invalid_argument("metadata must be an object"));
            }
            _ => serde_json::json!({}),
        };
        if !input.tags.is_empty() {
            metadata["tags"] = serde_json::json!(input.tags);
        }

        let (ciphertext, enc_meta) = self.crypto.encrypt(input.value.as_bytes())?;

        let node = self.store.create_secret(
            ctx,
            NewSecretNode {
                parent_id: None,
                namespace_id: namespace.id,
                zone_id,
                environment_id,
                name: input.name.clone(),
                is_secret: true,
                secret_type: input.secret_type,
                max_reads: input.max_reads,
                expires_at: input.expires_at,
                metadata,
                owner_id: principal.user_id,
            },
            &ciphertext,
            &enc_meta,
        )?;

        self.store.log_event(
            NewAuditEvent::new(AuditKind::SecretCreated)
                .actor(principal.user_id)
                .secret(node.id)
                .namespace(node.namespace_id)
                .details(serde_json::json!({ "name": node.name })),
        )?;
        tracing::info!(secret_id = node.id, name = %node.name, "secret created");

        self.record(ctx, &principal, node, None, Some(1))
    }

    /// Fetch a secret. With `include_value` the latest version is decrypted
    /// and the read-count claimed; metadata-only reads touch nothing.
    pub fn get(&self, ctx: &RequestContext, id: i64, include_value: bool) -> Result<SecretRecord> {
        let principal = ctx.require_principal()?.clone();
        let node = self.store.get_secret(ctx, id)?;
        if !node.is_active() {
            return Err(ArxError::not_found("secret"));
        }

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_read {
            return Err(visibility_error(&self.store, ctx, &node, &principal));
        }

        if !include_value {
            return self.record(ctx, &principal, node, None, None);
        }
        if !node.is_secret {
            return Err(ArxError::invalid_argument("folders carry no value"));
        }

        if let Some(expires_at) = node.expires_at {
            if expires_at <= Utc::now() {
                return Err(ArxError::expired("secret has expired"));
            }
        }

        let claimed = match self.store.claim_read(ctx, id, node.max_reads)? {
            ReadClaim::Version(version) => version,
            ReadClaim::Exhausted => {
                return Err(ArxError::expired("read limit reached"));
            }
        };

        let plaintext = self.crypto.decrypt(&claimed.ciphertext, &claimed.metadata)?;
        let value = String::from_utf8_lossy(&plaintext).into_owned();

        self.store.log_event(
            NewAuditEvent::new(AuditKind::SecretAccessed)
                .actor(principal.user_id)
                .secret(node.id)
                .namespace(node.namespace_id)
                .details(serde_json::json!({
                    "version": claimed.version,
                    "read_count": claimed.read_count,
                })),
        )?;

        let version = claimed.version;
        self.record(ctx, &principal, node, Some(value), Some(version))
    }

    /// Update mutable fields and optionally rotate the value into a new
    /// version. Name, namespace, zone, environment, and parent are fixed at
    /// creation.
    pub fn update(&self, ctx: &RequestContext, id: i64, input: UpdateSecretInput) -> Result<SecretRecord> {
        let principal = ctx.require_principal()?.clone();
        let node = self.store.get_secret(ctx, id)?;
        if !node.is_active() {
            return Err(ArxError::not_found("secret"));
        }

        let mut violations: Vec<FieldViolation> = Vec::new();
        for (field, attempted) in [
            ("name", input.name.is_some()),
            ("namespace", input.namespace.is_some()),
            ("zone", input.zone.is_some()),
            ("environment", input.environment.is_some()),
        ] {
            if attempted {
                violations.push(FieldViolation::new(field, "immutable after creation"));
            }
        }
        if let Some(max_reads) = input.max_reads {
            validate::check_max_reads(max_reads, &mut violations);
        }
        if let Some(Some(expires_at)) = input.expires_at {
            validate::check_expiration(Some(expires_at), &mut violations);
        }
        validate::finish(violations)?;

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_write {
            if caps.can_read {
                self.store.log_event(
                    NewAuditEvent::new(AuditKind::PermissionDenied)
                        .actor(principal.user_id)
                        .secret(node.id)
                        .details(serde_json::json!({ "operation": "update" })),
                )?;
                return Err(ArxError::permission_denied("write access required"));
            }
            return Err(visibility_error(&self.store, ctx, &node, &principal));
        }

        let value_rotated = if let Some(new_value) = &input.new_value {
            let (ciphertext, enc_meta) = self.crypto.encrypt(new_value.as_bytes())?;
            self.store.append_version(ctx, id, &ciphertext, &enc_meta)?;
            true
        } else {
            false
        };

        let node = self.store.update_secret_fields(
            ctx,
            id,
            input.metadata.as_ref(),
            input.secret_type.as_deref(),
            input.max_reads,
            input.expires_at,
        )?;

        self.store.log_event(
            NewAuditEvent::new(AuditKind::SecretUpdated)
                .actor(principal.user_id)
                .secret(node.id)
                .namespace(node.namespace_id)
                .details(serde_json::json!({ "value_rotated": value_rotated })),
        )?;

        self.record(ctx, &principal, node, None, None)
    }

    /// Soft-delete: hides the node, revokes every active share, destroys
    /// their wrapped DEKs. Recipients can never delete.
    pub fn delete(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        let principal = ctx.require_principal()?.clone();
        let node = self.store.get_secret(ctx, id)?;
        if !node.is_active() {
            return Err(ArxError::not_found("secret"));
        }

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_delete {
            if caps.can_read {
                self.store.log_event(
                    NewAuditEvent::new(AuditKind::PermissionDenied)
                        .actor(principal.user_id)
                        .secret(node.id)
                        .details(serde_json::json!({ "operation": "delete" })),
                )?;
                return Err(ArxError::permission_denied("delete access required"));
            }
            return Err(visibility_error(&self.store, ctx, &node, &principal));
        }

        self.store.soft_delete_secret(ctx, id)?;

        self.store.log_event(
            NewAuditEvent::new(AuditKind::SecretDeleted)
                .actor(principal.user_id)
                .secret(node.id)
                .namespace(node.namespace_id)
                .details(serde_json::json!({ "name": node.name })),
        )?;
        tracing::info!(secret_id = node.id, "secret deleted");
        Ok(())
    }

    /// Paged listing under the caller's visibility, each row enriched with
    /// its sharing indicators.
    pub fn list(&self, ctx: &RequestContext, filter: &SecretFilter) -> Result<Page<SecretRecord>> {
        let principal = ctx.require_principal()?.clone();
        let scope = self.rbac.list_scope(ctx, &principal)?;
        let filter = filter.clone().normalized();

        let (rows, total) = self.store.list_secrets(ctx, &scope, &filter)?;
        let mut records = Vec::with_capacity(rows.len());
        for node in rows {
            records.push(self.record(ctx, &principal, node, None, None)?);
        }
        Ok(Page::new(records, filter.page, filter.page_size, total))
    }

    /// Version history; requires the same read access as a metadata get.
    pub fn list_versions(&self, ctx: &RequestContext, id: i64) -> Result<Vec<SecretVersion>> {
        let principal = ctx.require_principal()?.clone();
        let node = self.store.get_secret(ctx, id)?;
        if !node.is_active() {
            return Err(ArxError::not_found("secret"));
        }

        let caps = self.rbac.secret_capabilities(ctx, &principal, &node)?;
        if !caps.can_read {
            return Err(visibility_error(&self.store, ctx, &node, &principal));
        }

        self.store.list_versions(ctx, id)
    }
}
