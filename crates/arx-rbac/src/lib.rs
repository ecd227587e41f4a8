//! Identity & RBAC evaluator.
//!
//! Decides whether a principal may perform an action on a resource within a
//! namespace. A principal's effective permission set is the union over every
//! role reachable directly or through group membership, restricted to
//! assignments that are global or match the target namespace. The matching
//! `<resource>.admin` permission subsumes every action on that resource.
//!
//! For secret-level operations the evaluator overlays ownership and shares:
//! owners hold implicit read/write/delete/share rights, recipients act at
//! their share's level, and share-of-a-shared-secret is never allowed.

mod seed;

pub use seed::seed_roles;

use std::collections::HashSet;

use arx_store::{ListScope, NewAuditEvent, ReadableNamespaces, Store};
use arx_types::{
    Action, ArxError, AuditKind, Permission, Principal, RequestContext, Resource, Result, Role,
    SecretNode, SharePermission, ShareRecord,
};

/// What a principal can do with one specific secret.
#[derive(Debug, Clone)]
pub struct SecretCapabilities {
    pub is_owner: bool,
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_share: bool,
    /// The share granting access, when access comes from sharing.
    pub share: Option<ShareRecord>,
}

impl SecretCapabilities {
    fn none() -> Self {
        Self {
            is_owner: false,
            can_read: false,
            can_write: false,
            can_delete: false,
            can_share: false,
            share: None,
        }
    }
}

/// The evaluator. Cheap to clone; all state lives in the store.
#[derive(Clone)]
pub struct Rbac {
    store: Store,
}

impl Rbac {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Effective permission set for a principal in a namespace (global-only
    /// when `namespace_id` is `None`).
    pub fn effective_permissions(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<HashSet<Permission>> {
        let names = self
            .store
            .effective_permissions(ctx, user_id, namespace_id)?;
        Ok(names
            .iter()
            .filter_map(|name| name.parse::<Permission>().ok())
            .collect())
    }

    /// True when the set holds `required` or the subsuming
    /// `<resource>.admin`.
    pub fn allows(set: &HashSet<Permission>, required: Permission) -> bool {
        set.contains(&required) || set.contains(&required.admin_of())
    }

    pub fn has_permission(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        required: Permission,
        namespace_id: Option<i64>,
    ) -> Result<bool> {
        let set = self.effective_permissions(ctx, user_id, namespace_id)?;
        Ok(Self::allows(&set, required))
    }

    /// Permission gate used by the request pipeline. On denial, writes the
    /// `permission_denied` audit row before returning the error.
    pub fn require(
        &self,
        ctx: &RequestContext,
        required: Permission,
        namespace_id: Option<i64>,
    ) -> Result<()> {
        let principal = ctx.require_principal()?;
        if self.has_permission(ctx, principal.user_id, required, namespace_id)? {
            return Ok(());
        }
        self.store.log_event(
            NewAuditEvent::new(AuditKind::PermissionDenied)
                .actor(principal.user_id)
                .details(serde_json::json!({ "required": required.to_string() })),
        )?;
        Err(ArxError::permission_denied(format!(
            "requires {required}"
        )))
    }

    /// Ownership, namespace, and share overlay for one secret.
    pub fn secret_capabilities(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        node: &SecretNode,
    ) -> Result<SecretCapabilities> {
        let set =
            self.effective_permissions(ctx, principal.user_id, Some(node.namespace_id))?;
        let admin = set.contains(&Permission::new(Resource::Secrets, Action::Admin));

        if node.owner_id == principal.user_id {
            return Ok(SecretCapabilities {
                is_owner: true,
                can_read: true,
                can_write: true,
                can_delete: true,
                can_share: true,
                share: None,
            });
        }

        let mut caps = SecretCapabilities::none();
        caps.can_read = admin || set.contains(&Permission::new(Resource::Secrets, Action::Read));
        caps.can_write = admin || set.contains(&Permission::new(Resource::Secrets, Action::Write));
        caps.can_delete =
            admin || set.contains(&Permission::new(Resource::Secrets, Action::Delete));
        // Sharing someone else's secret takes secrets.admin; a share grant
        // never confers it.
        caps.can_share = admin;

        let group_ids = self.store.group_ids_for_user(ctx, principal.user_id)?;
        if let Some(share) =
            self.store
                .find_share_for_principal(ctx, node.id, principal.user_id, &group_ids)?
        {
            caps.can_read = true;
            if share.permission == SharePermission::Write {
                caps.can_write = true;
            }
            caps.share = Some(share);
        }

        Ok(caps)
    }

    /// Visibility scope for secret listings: which namespaces the principal
    /// can read (and write) wholesale, plus their group memberships.
    pub fn list_scope(&self, ctx: &RequestContext, principal: &Principal) -> Result<ListScope> {
        let group_ids = self.store.group_ids_for_user(ctx, principal.user_id)?;
        let global = self.effective_permissions(ctx, principal.user_id, None)?;

        let readable = if Self::allows(&global, Permission::new(Resource::Secrets, Action::Read)) {
            ReadableNamespaces::All
        } else {
            ReadableNamespaces::Ids(self.store.namespaces_with_permission(
                ctx,
                principal.user_id,
                &["secrets.read", "secrets.admin"],
            )?)
        };
        let writable = if Self::allows(&global, Permission::new(Resource::Secrets, Action::Write)) {
            ReadableNamespaces::All
        } else {
            ReadableNamespaces::Ids(self.store.namespaces_with_permission(
                ctx,
                principal.user_id,
                &["secrets.write", "secrets.admin"],
            )?)
        };

        Ok(ListScope {
            user_id: principal.user_id,
            group_ids,
            readable_namespaces: readable,
            writable_namespaces: writable,
        })
    }

    // ── role management (RBAC audit stream) ─────────────────────────────

    pub fn create_role(
        &self,
        ctx: &RequestContext,
        name: &str,
        description: &str,
        permissions: &[Permission],
    ) -> Result<Role> {
        let actor = ctx.require_principal()?.user_id;
        self.require(ctx, Permission::new(Resource::Roles, Action::Write), None)?;

        let role = self.store.create_role(ctx, name, description)?;
        for permission in permissions {
            let pid = self.store.ensure_permission(ctx, &permission.to_string())?;
            self.store.grant_permission_to_role(ctx, role.id, pid)?;
        }

        self.store.log_event(
            NewAuditEvent::new(AuditKind::RoleCreated)
                .actor(actor)
                .role(role.id)
                .details(serde_json::json!({ "name": name })),
        )?;
        tracing::info!(role = name, "role created");
        Ok(role)
    }

    pub fn delete_role(&self, ctx: &RequestContext, role_id: i64) -> Result<()> {
        let actor = ctx.require_principal()?.user_id;
        self.require(ctx, Permission::new(Resource::Roles, Action::Delete), None)?;

        let role = self.store.get_role(ctx, role_id)?;
        self.store.delete_role(ctx, role_id)?;

        self.store.log_event(
            NewAuditEvent::new(AuditKind::RoleDeleted)
                .actor(actor)
                .role(role_id)
                .details(serde_json::json!({ "name": role.name })),
        )?;
        Ok(())
    }

    pub fn assign_role_to_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<()> {
        let actor = ctx.require_principal()?.user_id;
        self.require(ctx, Permission::new(Resource::Roles, Action::Assign), namespace_id)?;

        // Both sides must exist before the row lands.
        self.store.get_user(ctx, user_id)?;
        self.store.get_role(ctx, role_id)?;
        self.store
            .assign_role_to_user(ctx, user_id, role_id, namespace_id)?;

        let mut event = NewAuditEvent::new(AuditKind::RoleAssigned)
            .actor(actor)
            .role(role_id)
            .target_user(user_id);
        if let Some(ns) = namespace_id {
            event = event.namespace(ns);
        }
        self.store.log_event(event)?;
        Ok(())
    }

    pub fn remove_role_from_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<()> {
        let actor = ctx.require_principal()?.user_id;
        self.require(ctx, Permission::new(Resource::Roles, Action::Assign), namespace_id)?;

        if !self
            .store
            .remove_role_from_user(ctx, user_id, role_id, namespace_id)?
        {
            return Err(ArxError::not_found("role assignment"));
        }

        let mut event = NewAuditEvent::new(AuditKind::RoleRemoved)
            .actor(actor)
            .role(role_id)
            .target_user(user_id);
        if let Some(ns) = namespace_id {
            event = event.namespace(ns);
        }
        self.store.log_event(event)?;
        Ok(())
    }

    pub fn assign_role_to_group(
        &self,
        ctx: &RequestContext,
        group_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<()> {
        let actor = ctx.require_principal()?.user_id;
        self.require(ctx, Permission::new(Resource::Roles, Action::Assign), namespace_id)?;

        self.store.get_group(ctx, group_id)?;
        self.store.get_role(ctx, role_id)?;
        self.store
            .assign_role_to_group(ctx, group_id, role_id, namespace_id)?;

        let mut event = NewAuditEvent::new(AuditKind::RoleAssigned)
            .actor(actor)
            .role(role_id)
            .details(serde_json::json!({ "group_id": group_id }));
        if let Some(ns) = namespace_id {
            event = event.namespace(ns);
        }
        self.store.log_event(event)?;
        Ok(())
    }

    pub fn remove_role_from_group(
        &self,
        ctx: &RequestContext,
        group_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<()> {
        let actor = ctx.require_principal()?.user_id;
        self.require(ctx, Permission::new(Resource::Roles, Action::Assign), namespace_id)?;

        if !self
            .store
            .remove_role_from_group(ctx, group_id, role_id, namespace_id)?
        {
            return Err(ArxError::not_found("role assignment"));
        }

        let mut event = NewAuditEvent::new(AuditKind::RoleRemoved)
            .actor(actor)
            .role(role_id)
            .details(serde_json::json!({ "group_id": group_id }));
        if let Some(ns) = namespace_id {
            event = event.namespace(ns);
        }
        self.store.log_event(event)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Store, Rbac, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(
            &dir.path().join("arx.db"),
            arx_store::PoolOptions::default(),
        )
        .unwrap();
        let rbac = Rbac::new(store.clone());
        seed_roles(&store).unwrap();
        (store, rbac, dir)
    }

    fn grant(store: &Store, rbac_role: &str, user: i64, ns: Option<i64>) {
        let ctx = RequestContext::anonymous();
        let role = store.get_role_by_name(&ctx, rbac_role).unwrap().unwrap();
        store.assign_role_to_user(&ctx, user, role.id, ns).unwrap();
    }

    #[test]
    fn editor_can_write_viewer_cannot() {
        let (store, rbac, _guard) = setup();
        let ctx = RequestContext::anonymous();
        let alice = store.create_user(&ctx, "alice", None, "x").unwrap();
        let eve = store.create_user(&ctx, "eve", None, "x").unwrap();
        let ns = store.ensure_namespace(&ctx, "default").unwrap();

        grant(&store, "editor", alice.id, Some(ns.id));
        grant(&store, "viewer", eve.id, Some(ns.id));

        let write = Permission::new(Resource::Secrets, Action::Write);
        assert!(rbac
            .has_permission(&ctx, alice.id, write, Some(ns.id))
            .unwrap());
        assert!(!rbac.has_permission(&ctx, eve.id, write, Some(ns.id)).unwrap());

        // Viewer still reads.
        let read = Permission::new(Resource::Secrets, Action::Read);
        assert!(rbac.has_permission(&ctx, eve.id, read, Some(ns.id)).unwrap());
    }

    #[test]
    fn admin_permission_subsumes_actions() {
        let (store, rbac, _guard) = setup();
        let ctx = RequestContext::anonymous();
        let root = store.create_user(&ctx, "root", None, "x").unwrap();

        grant(&store, "super_admin", root.id, None);

        for action in [Action::Read, Action::Write, Action::Delete] {
            assert!(rbac
                .has_permission(&ctx, root.id, Permission::new(Resource::Secrets, action), Some(42))
                .unwrap());
        }
    }

    #[test]
    fn namespace_scoping_limits_grants() {
        let (store, rbac, _guard) = setup();
        let ctx = RequestContext::anonymous();
        let bob = store.create_user(&ctx, "bob", None, "x").unwrap();
        let team = store.ensure_namespace(&ctx, "team").unwrap();
        let other = store.ensure_namespace(&ctx, "other").unwrap();

        grant(&store, "editor", bob.id, Some(team.id));

        let write = Permission::new(Resource::Secrets, Action::Write);
        assert!(rbac.has_permission(&ctx, bob.id, write, Some(team.id)).unwrap());
        assert!(!rbac
            .has_permission(&ctx, bob.id, write, Some(other.id))
            .unwrap());
    }

    #[test]
    fn permission_monotonicity_under_grant_and_revoke() {
        let (store, rbac, _guard) = setup();
        let ctx = RequestContext::anonymous();
        let bob = store.create_user(&ctx, "bob", None, "x").unwrap();
        let ns = store.ensure_namespace(&ctx, "default").unwrap();

        let before = rbac
            .effective_permissions(&ctx, bob.id, Some(ns.id))
            .unwrap();

        grant(&store, "viewer", bob.id, Some(ns.id));
        let with_viewer = rbac
            .effective_permissions(&ctx, bob.id, Some(ns.id))
            .unwrap();
        assert!(before.is_subset(&with_viewer));

        grant(&store, "editor", bob.id, Some(ns.id));
        let with_both = rbac
            .effective_permissions(&ctx, bob.id, Some(ns.id))
            .unwrap();
        assert!(with_viewer.is_subset(&with_both));

        let editor = store.get_role_by_name(&ctx, "editor").unwrap().unwrap();
        store
            .remove_role_from_user(&ctx, bob.id, editor.id, Some(ns.id))
            .unwrap();
        let after_revoke = rbac
            .effective_permissions(&ctx, bob.id, Some(ns.id))
            .unwrap();
        assert!(after_revoke.is_subset(&with_both));
        assert_eq!(after_revoke, with_viewer);
    }

    #[test]
    fn owner_gets_full_capabilities_recipient_gets_share_level() {
        let (store, rbac, _guard) = setup();
        let ctx = RequestContext::anonymous();
        let alice = store.create_user(&ctx, "alice", None, "x").unwrap();
        let bob = store.create_user(&ctx, "bob", None, "x").unwrap();
        let ns = store.ensure_namespace(&ctx, "default").unwrap();
        let zone = store.ensure_zone(&ctx, "global").unwrap();
        let env = store.ensure_environment(&ctx, "development").unwrap();

        let node = store
            .create_secret(
                &ctx,
                arx_store::NewSecretNode {
                    parent_id: None,
                    namespace_id: ns.id,
                    zone_id: zone,
                    environment_id: env,
                    name: "s".to_string(),
                    is_secret: true,
                    secret_type: None,
                    max_reads: None,
                    expires_at: None,
                    metadata: serde_json::json!({}),
                    owner_id: alice.id,
                },
                b"ct",
                &arx_types::EncryptionMetadata {
                    algorithm: arx_types::EncryptionMetadata::NONE.to_string(),
                    nonce: Vec::new(),
                    kek_version: 0,
                    dek_version: 0,
                    chunks: Vec::new(),
                },
            )
            .unwrap();

        let owner_caps = rbac
            .secret_capabilities(&ctx, &Principal::new(alice.id, "alice"), &node)
            .unwrap();
        assert!(owner_caps.is_owner && owner_caps.can_share && owner_caps.can_delete);

        let bob_principal = Principal::new(bob.id, "bob");
        let before = rbac.secret_capabilities(&ctx, &bob_principal, &node).unwrap();
        assert!(!before.can_read && !before.can_write);

        store
            .create_share(&ctx, node.id, alice.id, bob.id, false, SharePermission::Read, None)
            .unwrap();
        let after = rbac.secret_capabilities(&ctx, &bob_principal, &node).unwrap();
        assert!(after.can_read);
        assert!(!after.can_write);
        assert!(!after.can_share, "recipients can never re-share");
        assert!(!after.can_delete, "recipients can never delete");
        assert!(after.share.is_some());
    }

    #[test]
    fn assignment_changes_emit_rbac_audit() {
        let (store, rbac, _guard) = setup();
        let anon = RequestContext::anonymous();
        let root = store.create_user(&anon, "root", None, "x").unwrap();
        let bob = store.create_user(&anon, "bob", None, "x").unwrap();
        grant(&store, "super_admin", root.id, None);

        let ctx = RequestContext::authenticated(Principal::new(root.id, "root"));
        let viewer = store.get_role_by_name(&ctx, "viewer").unwrap().unwrap();

        rbac.assign_role_to_user(&ctx, bob.id, viewer.id, None).unwrap();
        rbac.remove_role_from_user(&ctx, bob.id, viewer.id, None).unwrap();

        let events = store
            .query_events(&ctx, &arx_types::AuditFilter::default(), true)
            .unwrap();
        let kinds: Vec<AuditKind> = events.items.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&AuditKind::RoleAssigned));
        assert!(kinds.contains(&AuditKind::RoleRemoved));
    }

    #[test]
    fn unprivileged_role_creation_denied_and_audited() {
        let (store, rbac, _guard) = setup();
        let anon = RequestContext::anonymous();
        let mallory = store.create_user(&anon, "mallory", None, "x").unwrap();

        let ctx = RequestContext::authenticated(Principal::new(mallory.id, "mallory"));
        let err = rbac.create_role(&ctx, "backdoor", "", &[]).unwrap_err();
        assert_eq!(err.kind(), arx_types::ErrorKind::PermissionDenied);

        let denied = store
            .query_events(
                &ctx,
                &arx_types::AuditFilter {
                    kind: Some(AuditKind::PermissionDenied),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(denied.total, 1);
        assert_eq!(denied.items[0].actor_user_id, Some(mallory.id));
    }
}
