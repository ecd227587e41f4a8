//! Built-in roles and the permission catalog, loaded on first start.

use arx_store::Store;
use arx_types::{Action, Permission, RequestContext, Resource, Result};

/// Role name → permission names. The catalog itself is the full
/// resource × action cross product.
const ROLE_MATRIX: &[(&str, &str, &[&str])] = &[
    (
        "super_admin",
        "Unrestricted administrator",
        &[
            "secrets.admin",
            "users.admin",
            "roles.admin",
            "system.admin",
            "audit.admin",
            "namespaces.admin",
        ],
    ),
    (
        "admin",
        "Administers secrets, users, and roles",
        &[
            "secrets.admin",
            "users.admin",
            "roles.admin",
            "namespaces.admin",
            "audit.read",
            "system.read",
        ],
    ),
    (
        "editor",
        "Creates and maintains secrets",
        &[
            "secrets.read",
            "secrets.write",
            "secrets.delete",
            "namespaces.read",
        ],
    ),
    (
        "viewer",
        "Read-only access to secrets",
        &["secrets.read", "namespaces.read"],
    ),
    (
        "auditor",
        "Reads audit trails and secret metadata",
        &["audit.read", "secrets.read", "namespaces.read"],
    ),
];

/// Idempotent: inserts are get-or-create, so repeated starts are no-ops.
pub fn seed_roles(store: &Store) -> Result<()> {
    let ctx = RequestContext::anonymous();

    for resource in Resource::ALL {
        for action in Action::ALL {
            store.ensure_permission(&ctx, &Permission::new(resource, action).to_string())?;
        }
    }

    for (name, description, permissions) in ROLE_MATRIX {
        let role = match store.get_role_by_name(&ctx, name)? {
            Some(role) => role,
            None => store.create_role(&ctx, name, description)?,
        };
        for permission in *permissions {
            let pid = store.ensure_permission(&ctx, permission)?;
            store.grant_permission_to_role(&ctx, role.id, pid)?;
        }
    }

    tracing::debug!("seed roles loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(
            &dir.path().join("arx.db"),
            arx_store::PoolOptions::default(),
        )
        .unwrap();
        seed_roles(&store).unwrap();
        seed_roles(&store).unwrap();

        let ctx = RequestContext::anonymous();
        let roles = store.list_roles(&ctx).unwrap();
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        for expected in ["super_admin", "admin", "editor", "viewer", "auditor"] {
            assert!(names.contains(&expected), "missing {expected}");
        }

        let editor = store.get_role_by_name(&ctx, "editor").unwrap().unwrap();
        let perms = store.permissions_for_role(&ctx, editor.id).unwrap();
        assert!(perms.contains(&"secrets.write".to_string()));
        assert!(!perms.contains(&"secrets.admin".to_string()));
    }
}
