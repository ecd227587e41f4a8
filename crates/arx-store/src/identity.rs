//! Users, groups, roles, permissions, assignments, and bearer tokens.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;

use arx_types::{AuthToken, Group, Namespace, RequestContext, Result, Role, User};

use crate::{db_err, not_found, Store};

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

const USER_COLS: &str = "id, username, email, password_hash, created_at";
const GROUP_COLS: &str = "id, name, description, created_at";
const ROLE_COLS: &str = "id, name, description, created_at";

impl Store {
    // ── users ───────────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        ctx: &RequestContext,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<User> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![username, email, password_hash, Utc::now()],
        )
        .map_err(|e| db_err(&format!("user {username}"), e))?;
        let id = conn.last_insert_rowid();
        self.get_user(ctx, id)
    }

    pub fn get_user(&self, ctx: &RequestContext, id: i64) -> Result<User> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(|e| db_err("get user", e))?
        .ok_or_else(|| not_found("user"))
    }

    pub fn get_user_by_username(&self, ctx: &RequestContext, username: &str) -> Result<Option<User>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(|e| db_err("get user by username", e))
    }

    pub fn list_users(&self, ctx: &RequestContext) -> Result<Vec<User>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLS} FROM users ORDER BY username"))
            .map_err(|e| db_err("list users", e))?;
        let users = stmt
            .query_map([], user_from_row)
            .map_err(|e| db_err("list users", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list users", e))?;
        Ok(users)
    }

    pub fn update_user(
        &self,
        ctx: &RequestContext,
        id: i64,
        email: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<User> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE users SET email = COALESCE(?2, email),
                                  password_hash = COALESCE(?3, password_hash)
                 WHERE id = ?1",
                params![id, email, password_hash],
            )
            .map_err(|e| db_err("update user", e))?;
        if changed == 0 {
            return Err(not_found("user"));
        }
        self.get_user(ctx, id)
    }

    pub fn delete_user(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| db_err("delete user", e))?;
        if changed == 0 {
            return Err(not_found("user"));
        }
        Ok(())
    }

    // ── groups ──────────────────────────────────────────────────────────

    pub fn create_group(
        &self,
        ctx: &RequestContext,
        name: &str,
        description: &str,
    ) -> Result<Group> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_groups (name, description, created_at) VALUES (?1, ?2, ?3)",
            params![name, description, Utc::now()],
        )
        .map_err(|e| db_err(&format!("group {name}"), e))?;
        let id = conn.last_insert_rowid();
        self.get_group(ctx, id)
    }

    pub fn get_group(&self, ctx: &RequestContext, id: i64) -> Result<Group> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {GROUP_COLS} FROM user_groups WHERE id = ?1"),
            params![id],
            group_from_row,
        )
        .optional()
        .map_err(|e| db_err("get group", e))?
        .ok_or_else(|| not_found("group"))
    }

    pub fn add_member(&self, ctx: &RequestContext, user_id: i64, group_id: i64) -> Result<()> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO memberships (user_id, group_id) VALUES (?1, ?2)",
            params![user_id, group_id],
        )
        .map_err(|e| db_err("add member", e))?;
        Ok(())
    }

    pub fn remove_member(&self, ctx: &RequestContext, user_id: i64, group_id: i64) -> Result<()> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM memberships WHERE user_id = ?1 AND group_id = ?2",
            params![user_id, group_id],
        )
        .map_err(|e| db_err("remove member", e))?;
        Ok(())
    }

    /// Groups the user belongs to; the transitive half of role resolution.
    pub fn group_ids_for_user(&self, ctx: &RequestContext, user_id: i64) -> Result<Vec<i64>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT group_id FROM memberships WHERE user_id = ?1")
            .map_err(|e| db_err("group ids", e))?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))
            .map_err(|e| db_err("group ids", e))?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(|e| db_err("group ids", e))?;
        Ok(ids)
    }

    pub fn member_user_ids(&self, ctx: &RequestContext, group_id: i64) -> Result<Vec<i64>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM memberships WHERE group_id = ?1")
            .map_err(|e| db_err("member ids", e))?;
        let ids = stmt
            .query_map(params![group_id], |row| row.get(0))
            .map_err(|e| db_err("member ids", e))?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(|e| db_err("member ids", e))?;
        Ok(ids)
    }

    // ── roles & permissions ─────────────────────────────────────────────

    pub fn create_role(&self, ctx: &RequestContext, name: &str, description: &str) -> Result<Role> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO roles (name, description, created_at) VALUES (?1, ?2, ?3)",
            params![name, description, Utc::now()],
        )
        .map_err(|e| db_err(&format!("role {name}"), e))?;
        let id = conn.last_insert_rowid();
        self.get_role(ctx, id)
    }

    pub fn get_role(&self, ctx: &RequestContext, id: i64) -> Result<Role> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ROLE_COLS} FROM roles WHERE id = ?1"),
            params![id],
            role_from_row,
        )
        .optional()
        .map_err(|e| db_err("get role", e))?
        .ok_or_else(|| not_found("role"))
    }

    pub fn get_role_by_name(&self, ctx: &RequestContext, name: &str) -> Result<Option<Role>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ROLE_COLS} FROM roles WHERE name = ?1"),
            params![name],
            role_from_row,
        )
        .optional()
        .map_err(|e| db_err("get role by name", e))
    }

    pub fn list_roles(&self, ctx: &RequestContext) -> Result<Vec<Role>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {ROLE_COLS} FROM roles ORDER BY name"))
            .map_err(|e| db_err("list roles", e))?;
        let roles = stmt
            .query_map([], role_from_row)
            .map_err(|e| db_err("list roles", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list roles", e))?;
        Ok(roles)
    }

    pub fn delete_role(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM roles WHERE id = ?1", params![id])
            .map_err(|e| db_err("delete role", e))?;
        if changed == 0 {
            return Err(not_found("role"));
        }
        Ok(())
    }

    /// Get-or-create a permission row by name.
    pub fn ensure_permission(&self, ctx: &RequestContext, name: &str) -> Result<i64> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO permissions (name) VALUES (?1)",
            params![name],
        )
        .map_err(|e| db_err("ensure permission", e))?;
        conn.query_row(
            "SELECT id FROM permissions WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| db_err("ensure permission", e))
    }

    pub fn grant_permission_to_role(
        &self,
        ctx: &RequestContext,
        role_id: i64,
        permission_id: i64,
    ) -> Result<()> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
            params![role_id, permission_id],
        )
        .map_err(|e| db_err("grant permission", e))?;
        Ok(())
    }

    pub fn permissions_for_role(&self, ctx: &RequestContext, role_id: i64) -> Result<Vec<String>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT p.name FROM permissions p
                 JOIN role_permissions rp ON rp.permission_id = p.id
                 WHERE rp.role_id = ?1 ORDER BY p.name",
            )
            .map_err(|e| db_err("role permissions", e))?;
        let names = stmt
            .query_map(params![role_id], |row| row.get(0))
            .map_err(|e| db_err("role permissions", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| db_err("role permissions", e))?;
        Ok(names)
    }

    // ── role assignments ────────────────────────────────────────────────

    pub fn assign_role_to_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<()> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO user_role_assignments (user_id, role_id, namespace_id)
             VALUES (?1, ?2, ?3)",
            params![user_id, role_id, namespace_id],
        )
        .map_err(|e| db_err("assign role", e))?;
        Ok(())
    }

    pub fn remove_role_from_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<bool> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM user_role_assignments
                 WHERE user_id = ?1 AND role_id = ?2
                   AND COALESCE(namespace_id, 0) = COALESCE(?3, 0)",
                params![user_id, role_id, namespace_id],
            )
            .map_err(|e| db_err("remove role", e))?;
        Ok(changed > 0)
    }

    pub fn assign_role_to_group(
        &self,
        ctx: &RequestContext,
        group_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<()> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO group_role_assignments (group_id, role_id, namespace_id)
             VALUES (?1, ?2, ?3)",
            params![group_id, role_id, namespace_id],
        )
        .map_err(|e| db_err("assign group role", e))?;
        Ok(())
    }

    pub fn remove_role_from_group(
        &self,
        ctx: &RequestContext,
        group_id: i64,
        role_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<bool> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM group_role_assignments
                 WHERE group_id = ?1 AND role_id = ?2
                   AND COALESCE(namespace_id, 0) = COALESCE(?3, 0)",
                params![group_id, role_id, namespace_id],
            )
            .map_err(|e| db_err("remove group role", e))?;
        Ok(changed > 0)
    }

    /// Role ids assigned to a user, with the namespace scope of each row.
    pub fn role_assignments_for_user(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> Result<Vec<(i64, Option<i64>)>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT role_id, namespace_id FROM user_role_assignments WHERE user_id = ?1")
            .map_err(|e| db_err("user assignments", e))?;
        let rows = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| db_err("user assignments", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("user assignments", e))?;
        Ok(rows)
    }

    /// Effective permission names for a principal in a namespace: the union
    /// over direct and group-held roles whose assignment is global
    /// (namespace NULL) or matches the target namespace.
    pub fn effective_permissions(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        namespace_id: Option<i64>,
    ) -> Result<HashSet<String>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT p.name
                 FROM permissions p
                 JOIN role_permissions rp ON rp.permission_id = p.id
                 WHERE rp.role_id IN (
                     SELECT role_id FROM user_role_assignments
                     WHERE user_id = ?1
                       AND (namespace_id IS NULL OR namespace_id = ?2)
                     UNION
                     SELECT gra.role_id FROM group_role_assignments gra
                     JOIN memberships m ON m.group_id = gra.group_id
                     WHERE m.user_id = ?1
                       AND (gra.namespace_id IS NULL OR gra.namespace_id = ?2)
                 )",
            )
            .map_err(|e| db_err("effective permissions", e))?;
        let names = stmt
            .query_map(params![user_id, namespace_id], |row| row.get(0))
            .map_err(|e| db_err("effective permissions", e))?
            .collect::<rusqlite::Result<HashSet<String>>>()
            .map_err(|e| db_err("effective permissions", e))?;
        Ok(names)
    }

    /// Namespace ids where scoped assignments (direct or via groups) grant
    /// the user any of the named permissions. Global assignments are not
    /// included; callers query those with a NULL namespace.
    pub fn namespaces_with_permission(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        permission_names: &[&str],
    ) -> Result<Vec<i64>> {
        ctx.check_deadline()?;
        if permission_names.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;

        let marks: Vec<String> = (0..permission_names.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let sql = format!(
            "SELECT DISTINCT a.namespace_id FROM (
                 SELECT role_id, namespace_id FROM user_role_assignments WHERE user_id = ?1
                 UNION
                 SELECT gra.role_id, gra.namespace_id FROM group_role_assignments gra
                 JOIN memberships m ON m.group_id = gra.group_id WHERE m.user_id = ?1
             ) a
             JOIN role_permissions rp ON rp.role_id = a.role_id
             JOIN permissions p ON p.id = rp.permission_id
             WHERE a.namespace_id IS NOT NULL AND p.name IN ({})",
            marks.join(", ")
        );

        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
        for name in permission_names {
            params_vec.push(name);
        }

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| db_err("namespaces with permission", e))?;
        let ids = stmt
            .query_map(params_vec.as_slice(), |row| row.get(0))
            .map_err(|e| db_err("namespaces with permission", e))?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(|e| db_err("namespaces with permission", e))?;
        Ok(ids)
    }

    // ── namespaces, zones, environments ─────────────────────────────────

    pub fn ensure_namespace(&self, ctx: &RequestContext, name: &str) -> Result<Namespace> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO namespaces (name, description, created_at) VALUES (?1, '', ?2)",
            params![name, Utc::now()],
        )
        .map_err(|e| db_err("ensure namespace", e))?;
        conn.query_row(
            "SELECT id, name, description, created_at FROM namespaces WHERE name = ?1",
            params![name],
            |row| {
                Ok(Namespace {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .map_err(|e| db_err("ensure namespace", e))
    }

    pub fn find_namespace(&self, ctx: &RequestContext, name: &str) -> Result<Option<i64>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id FROM namespaces WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| db_err("find namespace", e))
    }

    pub fn ensure_zone(&self, ctx: &RequestContext, name: &str) -> Result<i64> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO zones (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now()],
        )
        .map_err(|e| db_err("ensure zone", e))?;
        conn.query_row("SELECT id FROM zones WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .map_err(|e| db_err("ensure zone", e))
    }

    pub fn ensure_environment(&self, ctx: &RequestContext, name: &str) -> Result<i64> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO environments (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now()],
        )
        .map_err(|e| db_err("ensure environment", e))?;
        conn.query_row(
            "SELECT id FROM environments WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| db_err("ensure environment", e))
    }

    /// (namespace, zone, environment) display names for a secret row.
    pub fn scope_names(
        &self,
        ctx: &RequestContext,
        namespace_id: i64,
        zone_id: i64,
        environment_id: i64,
    ) -> Result<(String, String, String)> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let namespace = conn
            .query_row(
                "SELECT name FROM namespaces WHERE id = ?1",
                params![namespace_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("scope names", e))?
            .unwrap_or_else(|| "?".to_string());
        let zone = conn
            .query_row("SELECT name FROM zones WHERE id = ?1", params![zone_id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| db_err("scope names", e))?
            .unwrap_or_else(|| "?".to_string());
        let environment = conn
            .query_row(
                "SELECT name FROM environments WHERE id = ?1",
                params![environment_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("scope names", e))?
            .unwrap_or_else(|| "?".to_string());
        Ok((namespace, zone, environment))
    }

    // ── bearer tokens ───────────────────────────────────────────────────

    pub fn insert_token(
        &self,
        ctx: &RequestContext,
        token_digest: &str,
        user_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<AuthToken> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO auth_tokens (token_digest, user_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![token_digest, user_id, expires_at, Utc::now()],
        )
        .map_err(|e| db_err("insert token", e))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, token_digest, user_id, expires_at, created_at
             FROM auth_tokens WHERE id = ?1",
            params![id],
            |row| {
                Ok(AuthToken {
                    id: row.get(0)?,
                    token_digest: row.get(1)?,
                    user_id: row.get(2)?,
                    expires_at: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .map_err(|e| db_err("insert token", e))
    }

    /// Resolve a token digest to its user, ignoring expired tokens.
    pub fn find_user_by_token_digest(
        &self,
        ctx: &RequestContext,
        token_digest: &str,
    ) -> Result<Option<User>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {USER_COLS} FROM users
                 WHERE id = (
                     SELECT user_id FROM auth_tokens
                     WHERE token_digest = ?1
                       AND (expires_at IS NULL OR expires_at > ?2)
                 )"
            ),
            params![token_digest, Utc::now()],
            user_from_row,
        )
        .optional()
        .map_err(|e| db_err("resolve token", e))
    }

    // ── counters for system endpoints ───────────────────────────────────

    pub fn count_rows(&self, ctx: &RequestContext, table: Table) -> Result<u64> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let sql = match table {
            Table::Users => "SELECT COUNT(*) FROM users",
            Table::Secrets => {
                "SELECT COUNT(*) FROM secret_nodes WHERE deleted_at IS NULL AND is_secret = 1"
            }
            Table::Shares => "SELECT COUNT(*) FROM shares WHERE deleted_at IS NULL",
            Table::AuditEvents => "SELECT COUNT(*) FROM audit_events",
        };
        conn.query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| db_err("count rows", e))
    }
}

/// Tables exposed to the system-info counters.
#[derive(Debug, Clone, Copy)]
pub enum Table {
    Users,
    Secrets,
    Shares,
    AuditEvents,
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_types::{ArxError, RequestContext};

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("arx.db"), crate::PoolOptions::default()).unwrap();
        (store, dir)
    }

    #[test]
    fn user_crud_and_uniqueness() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();

        let alice = store
            .create_user(&ctx, "alice", Some("alice@example.com"), "x")
            .unwrap();
        assert_eq!(alice.username, "alice");

        let dup = store.create_user(&ctx, "alice", None, "y");
        assert!(matches!(dup, Err(ArxError::AlreadyExists(_))));

        let fetched = store.get_user_by_username(&ctx, "alice").unwrap().unwrap();
        assert_eq!(fetched.id, alice.id);

        store.delete_user(&ctx, alice.id).unwrap();
        assert!(store.get_user(&ctx, alice.id).is_err());
    }

    #[test]
    fn effective_permissions_union_direct_and_group() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();

        let bob = store.create_user(&ctx, "bob", None, "x").unwrap();
        let ops = store.create_group(&ctx, "ops", "").unwrap();
        store.add_member(&ctx, bob.id, ops.id).unwrap();

        let reader = store.create_role(&ctx, "reader", "").unwrap();
        let writer = store.create_role(&ctx, "writer", "").unwrap();
        let p_read = store.ensure_permission(&ctx, "secrets.read").unwrap();
        let p_write = store.ensure_permission(&ctx, "secrets.write").unwrap();
        store.grant_permission_to_role(&ctx, reader.id, p_read).unwrap();
        store.grant_permission_to_role(&ctx, writer.id, p_write).unwrap();

        let team_ns = store.ensure_namespace(&ctx, "team").unwrap();
        let other_ns = store.ensure_namespace(&ctx, "other").unwrap();

        // Direct role scoped to `team`, group role global.
        store
            .assign_role_to_user(&ctx, bob.id, reader.id, Some(team_ns.id))
            .unwrap();
        store
            .assign_role_to_group(&ctx, ops.id, writer.id, None)
            .unwrap();

        let in_team = store
            .effective_permissions(&ctx, bob.id, Some(team_ns.id))
            .unwrap();
        assert!(in_team.contains("secrets.read"));
        assert!(in_team.contains("secrets.write"));

        let in_other = store
            .effective_permissions(&ctx, bob.id, Some(other_ns.id))
            .unwrap();
        assert!(!in_other.contains("secrets.read"));
        assert!(in_other.contains("secrets.write"));
    }

    #[test]
    fn token_resolution_honours_expiry() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let carol = store.create_user(&ctx, "carol", None, "x").unwrap();

        store.insert_token(&ctx, "digest-live", carol.id, None).unwrap();
        store
            .insert_token(
                &ctx,
                "digest-dead",
                carol.id,
                Some(Utc::now() - chrono::Duration::minutes(1)),
            )
            .unwrap();

        assert!(store
            .find_user_by_token_digest(&ctx, "digest-live")
            .unwrap()
            .is_some());
        assert!(store
            .find_user_by_token_digest(&ctx, "digest-dead")
            .unwrap()
            .is_none());
        assert!(store
            .find_user_by_token_digest(&ctx, "digest-unknown")
            .unwrap()
            .is_none());
    }

    #[test]
    fn removing_role_assignment_respects_namespace_scope() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();

        let dave = store.create_user(&ctx, "dave", None, "x").unwrap();
        let role = store.create_role(&ctx, "viewer", "").unwrap();
        let ns = store.ensure_namespace(&ctx, "apps").unwrap();

        store
            .assign_role_to_user(&ctx, dave.id, role.id, Some(ns.id))
            .unwrap();
        store.assign_role_to_user(&ctx, dave.id, role.id, None).unwrap();

        // Removing the global assignment leaves the scoped one in place.
        assert!(store.remove_role_from_user(&ctx, dave.id, role.id, None).unwrap());
        let rows = store.role_assignments_for_user(&ctx, dave.id).unwrap();
        assert_eq!(rows, vec![(role.id, Some(ns.id))]);
    }
}
