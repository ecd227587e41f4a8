//! Secret nodes and their versions.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use arx_types::{
    ArxError, EncryptionMetadata, RequestContext, Result, SecretFilter, SecretNode, SecretSort,
    SecretStatus, SecretVersion,
};

use crate::{begin, db_err, not_found, Store};

const NODE_COLS: &str = "id, parent_id, namespace_id, zone_id, environment_id, name, is_secret, \
                         secret_type, max_reads, expires_at, metadata, status, owner_id, \
                         is_shared, created_by, created_at, updated_at, deleted_at";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<SecretNode> {
    let metadata: String = row.get(10)?;
    let status: String = row.get(11)?;
    Ok(SecretNode {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        namespace_id: row.get(2)?,
        zone_id: row.get(3)?,
        environment_id: row.get(4)?,
        name: row.get(5)?,
        is_secret: row.get(6)?,
        secret_type: row.get(7)?,
        max_reads: row.get(8)?,
        expires_at: row.get(9)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        status: if status == "deleted" {
            SecretStatus::Deleted
        } else {
            SecretStatus::Active
        },
        owner_id: row.get(12)?,
        is_shared: row.get(13)?,
        created_by: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
        deleted_at: row.get(17)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<SecretVersion> {
    let metadata: String = row.get(4)?;
    Ok(SecretVersion {
        id: row.get(0)?,
        secret_id: row.get(1)?,
        version: row.get(2)?,
        ciphertext: row.get(3)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(EncryptionMetadata {
            algorithm: EncryptionMetadata::NONE.to_string(),
            nonce: Vec::new(),
            kek_version: 0,
            dek_version: 0,
            chunks: Vec::new(),
        }),
        read_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const VERSION_COLS: &str = "id, secret_id, version, ciphertext, metadata, read_count, created_at";

/// Fields of a node fixed at creation.
#[derive(Debug, Clone)]
pub struct NewSecretNode {
    pub parent_id: Option<i64>,
    pub namespace_id: i64,
    pub zone_id: i64,
    pub environment_id: i64,
    pub name: String,
    pub is_secret: bool,
    pub secret_type: Option<String>,
    pub max_reads: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub owner_id: i64,
}

/// Which namespaces a listing principal can read (or write) beyond
/// ownership and shares.
#[derive(Debug, Clone)]
pub enum ReadableNamespaces {
    /// Namespace-admin shortcut: every namespace qualifies.
    All,
    Ids(Vec<i64>),
}

/// Principal-derived inputs to `list_secrets`, computed by the RBAC layer.
#[derive(Debug, Clone)]
pub struct ListScope {
    pub user_id: i64,
    pub group_ids: Vec<i64>,
    pub readable_namespaces: ReadableNamespaces,
    pub writable_namespaces: ReadableNamespaces,
}

/// Outcome of an atomic read-count claim.
#[derive(Debug)]
pub enum ReadClaim {
    /// The claimed version, read-count already incremented.
    Version(SecretVersion),
    /// `max_reads` spent before this call.
    Exhausted,
}

impl Store {
    /// Insert a node together with its first version, one transaction.
    pub fn create_secret(
        &self,
        ctx: &RequestContext,
        node: NewSecretNode,
        ciphertext: &[u8],
        metadata: &EncryptionMetadata,
    ) -> Result<SecretNode> {
        ctx.check_deadline()?;
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO secret_nodes
                 (parent_id, namespace_id, zone_id, environment_id, name, is_secret,
                  secret_type, max_reads, expires_at, metadata, status, owner_id,
                  is_shared, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', ?11, 0, ?12, ?13, ?13)",
            params![
                node.parent_id,
                node.namespace_id,
                node.zone_id,
                node.environment_id,
                node.name,
                node.is_secret,
                node.secret_type,
                node.max_reads,
                node.expires_at,
                node.metadata.to_string(),
                node.owner_id,
                node.owner_id,
                now,
            ],
        )
        .map_err(|e| db_err(&format!("secret {}", node.name), e))?;
        let secret_id = tx.last_insert_rowid();

        if node.is_secret {
            let meta_json = serde_json::to_string(metadata)
                .map_err(|e| ArxError::internal(format!("encode metadata: {e}")))?;
            tx.execute(
                "INSERT INTO secret_versions (secret_id, version, ciphertext, metadata, created_at)
                 VALUES (?1, 1, ?2, ?3, ?4)",
                params![secret_id, ciphertext, meta_json, now],
            )
            .map_err(|e| db_err("first version", e))?;
        }

        tx.commit()
            .map_err(|e| ArxError::internal(format!("commit create secret: {e}")))?;
        drop(conn);
        self.get_secret(ctx, secret_id)
    }

    /// Fetch a node regardless of status; callers decide how deleted rows
    /// surface (visibility policy lives in the service layer).
    pub fn get_secret(&self, ctx: &RequestContext, id: i64) -> Result<SecretNode> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {NODE_COLS} FROM secret_nodes WHERE id = ?1"),
            params![id],
            node_from_row,
        )
        .optional()
        .map_err(|e| db_err("get secret", e))?
        .ok_or_else(|| not_found("secret"))
    }

    pub fn find_secret_by_name(
        &self,
        ctx: &RequestContext,
        namespace_id: i64,
        zone_id: i64,
        environment_id: i64,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Option<SecretNode>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {NODE_COLS} FROM secret_nodes
                 WHERE namespace_id = ?1 AND zone_id = ?2 AND environment_id = ?3
                   AND COALESCE(parent_id, 0) = COALESCE(?4, 0)
                   AND name = ?5 AND deleted_at IS NULL"
            ),
            params![namespace_id, zone_id, environment_id, parent_id, name],
            node_from_row,
        )
        .optional()
        .map_err(|e| db_err("find secret by name", e))
    }

    /// Mutable metadata update. `max_reads`/`expires_at` use the outer
    /// Option for "change or keep", the inner for "set or clear". Always
    /// bumps `updated_at`.
    pub fn update_secret_fields(
        &self,
        ctx: &RequestContext,
        id: i64,
        metadata: Option<&serde_json::Value>,
        secret_type: Option<&str>,
        max_reads: Option<Option<i64>>,
        expires_at: Option<Option<DateTime<Utc>>>,
    ) -> Result<SecretNode> {
        ctx.check_deadline()?;
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;

        if let Some(metadata) = metadata {
            tx.execute(
                "UPDATE secret_nodes SET metadata = ?2 WHERE id = ?1",
                params![id, metadata.to_string()],
            )
            .map_err(|e| db_err("update metadata", e))?;
        }
        if let Some(secret_type) = secret_type {
            tx.execute(
                "UPDATE secret_nodes SET secret_type = ?2 WHERE id = ?1",
                params![id, secret_type],
            )
            .map_err(|e| db_err("update type", e))?;
        }
        if let Some(max_reads) = max_reads {
            tx.execute(
                "UPDATE secret_nodes SET max_reads = ?2 WHERE id = ?1",
                params![id, max_reads],
            )
            .map_err(|e| db_err("update max_reads", e))?;
        }
        if let Some(expires_at) = expires_at {
            tx.execute(
                "UPDATE secret_nodes SET expires_at = ?2 WHERE id = ?1",
                params![id, expires_at],
            )
            .map_err(|e| db_err("update expiration", e))?;
        }

        let changed = tx
            .execute(
                "UPDATE secret_nodes SET updated_at = ?2 WHERE id = ?1",
                params![id, Utc::now()],
            )
            .map_err(|e| db_err("touch secret", e))?;
        if changed == 0 {
            return Err(not_found("secret"));
        }

        tx.commit()
            .map_err(|e| ArxError::internal(format!("commit update secret: {e}")))?;
        drop(conn);
        self.get_secret(ctx, id)
    }

    /// Atomically allocate the next version number and insert. A concurrent
    /// duplicate surfaces as `Conflict`.
    pub fn append_version(
        &self,
        ctx: &RequestContext,
        secret_id: i64,
        ciphertext: &[u8],
        metadata: &EncryptionMetadata,
    ) -> Result<SecretVersion> {
        ctx.check_deadline()?;
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let now = Utc::now();

        let next: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM secret_versions WHERE secret_id = ?1",
                params![secret_id],
                |row| row.get(0),
            )
            .map_err(|e| db_err("next version", e))?;

        let meta_json = serde_json::to_string(metadata)
            .map_err(|e| ArxError::internal(format!("encode metadata: {e}")))?;
        tx.execute(
            "INSERT INTO secret_versions (secret_id, version, ciphertext, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![secret_id, next, ciphertext, meta_json, now],
        )
        .map_err(|e| match db_err("append version", e) {
            ArxError::AlreadyExists(_) => ArxError::conflict("concurrent version append"),
            other => other,
        })?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE secret_nodes SET updated_at = ?2 WHERE id = ?1",
            params![secret_id, now],
        )
        .map_err(|e| db_err("touch secret", e))?;

        tx.commit()
            .map_err(|e| ArxError::internal(format!("commit append version: {e}")))?;
        drop(conn);

        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {VERSION_COLS} FROM secret_versions WHERE id = ?1"),
            params![id],
            version_from_row,
        )
        .map_err(|e| db_err("append version", e))
    }

    /// Versions in chronological (ascending) order.
    pub fn list_versions(&self, ctx: &RequestContext, secret_id: i64) -> Result<Vec<SecretVersion>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERSION_COLS} FROM secret_versions
                 WHERE secret_id = ?1 ORDER BY version"
            ))
            .map_err(|e| db_err("list versions", e))?;
        let versions = stmt
            .query_map(params![secret_id], version_from_row)
            .map_err(|e| db_err("list versions", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list versions", e))?;
        Ok(versions)
    }

    pub fn latest_version(&self, ctx: &RequestContext, secret_id: i64) -> Result<SecretVersion> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {VERSION_COLS} FROM secret_versions
                 WHERE secret_id = ?1 ORDER BY version DESC LIMIT 1"
            ),
            params![secret_id],
            version_from_row,
        )
        .optional()
        .map_err(|e| db_err("latest version", e))?
        .ok_or_else(|| not_found("secret version"))
    }

    /// Claim one read of the latest version: checks the read budget and
    /// increments the counter in the same transaction.
    pub fn claim_read(
        &self,
        ctx: &RequestContext,
        secret_id: i64,
        max_reads: Option<i64>,
    ) -> Result<ReadClaim> {
        ctx.check_deadline()?;
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;

        let latest = tx
            .query_row(
                &format!(
                    "SELECT {VERSION_COLS} FROM secret_versions
                     WHERE secret_id = ?1 ORDER BY version DESC LIMIT 1"
                ),
                params![secret_id],
                version_from_row,
            )
            .optional()
            .map_err(|e| db_err("claim read", e))?
            .ok_or_else(|| not_found("secret version"))?;

        if let Some(max) = max_reads {
            if latest.read_count >= max {
                return Ok(ReadClaim::Exhausted);
            }
        }

        tx.execute(
            "UPDATE secret_versions SET read_count = read_count + 1 WHERE id = ?1",
            params![latest.id],
        )
        .map_err(|e| db_err("claim read", e))?;
        tx.commit()
            .map_err(|e| ArxError::internal(format!("commit claim read: {e}")))?;

        let mut claimed = latest;
        claimed.read_count += 1;
        Ok(ReadClaim::Version(claimed))
    }

    /// Soft-delete the node; its active shares are soft-deleted and their
    /// wrapped DEKs destroyed in the same transaction.
    pub fn soft_delete_secret(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        ctx.check_deadline()?;
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let now = Utc::now();

        let changed = tx
            .execute(
                "UPDATE secret_nodes
                 SET status = 'deleted', deleted_at = ?2, updated_at = ?2, is_shared = 0
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, now],
            )
            .map_err(|e| db_err("delete secret", e))?;
        if changed == 0 {
            return Err(not_found("secret"));
        }

        tx.execute(
            "UPDATE shares SET deleted_at = ?2, updated_at = ?2, wrapped_dek = NULL
             WHERE secret_id = ?1 AND deleted_at IS NULL",
            params![id, now],
        )
        .map_err(|e| db_err("delete secret shares", e))?;

        tx.commit()
            .map_err(|e| ArxError::internal(format!("commit delete secret: {e}")))
    }

    /// Re-derive `is_shared` from the share table.
    pub fn recompute_is_shared(&self, ctx: &RequestContext, secret_id: i64) -> Result<bool> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE secret_nodes SET is_shared = EXISTS(
                 SELECT 1 FROM shares WHERE secret_id = ?1 AND deleted_at IS NULL)
             WHERE id = ?1",
            params![secret_id],
        )
        .map_err(|e| db_err("recompute is_shared", e))?;
        conn.query_row(
            "SELECT is_shared FROM secret_nodes WHERE id = ?1",
            params![secret_id],
            |row| row.get(0),
        )
        .map_err(|e| db_err("recompute is_shared", e))
    }

    pub fn count_active_secrets_owned_by(&self, ctx: &RequestContext, user_id: i64) -> Result<u64> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM secret_nodes
             WHERE owner_id = ?1 AND deleted_at IS NULL AND is_secret = 1",
            params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(|e| db_err("count owned", e))
    }

    /// Paged listing under the caller's visibility scope. Returns the page
    /// rows and the total matching count.
    pub fn list_secrets(
        &self,
        ctx: &RequestContext,
        scope: &ListScope,
        filter: &SecretFilter,
    ) -> Result<(Vec<SecretNode>, u64)> {
        ctx.check_deadline()?;
        let filter = filter.clone().normalized();
        let conn = self.conn()?;

        let mut clauses: Vec<String> = vec![
            "n.deleted_at IS NULL".to_string(),
            "n.is_secret = 1".to_string(),
        ];
        let mut params_vec: Vec<SqlValue> = Vec::new();

        let push_param = |params_vec: &mut Vec<SqlValue>, v: SqlValue| -> String {
            params_vec.push(v);
            format!("?{}", params_vec.len())
        };

        // Visibility: owner, recipient (direct or via group), or a readable
        // namespace.
        {
            let uid = push_param(&mut params_vec, SqlValue::Integer(scope.user_id));
            let mut share_clause = format!(
                "(s.is_group = 0 AND s.recipient_id = {uid})"
            );
            if !scope.group_ids.is_empty() {
                let marks: Vec<String> = scope
                    .group_ids
                    .iter()
                    .map(|g| push_param(&mut params_vec, SqlValue::Integer(*g)))
                    .collect();
                share_clause = format!(
                    "({share_clause} OR (s.is_group = 1 AND s.recipient_id IN ({})))",
                    marks.join(", ")
                );
            }
            let ns_clause = match &scope.readable_namespaces {
                ReadableNamespaces::All => "1 = 1".to_string(),
                ReadableNamespaces::Ids(ids) if ids.is_empty() => "1 = 0".to_string(),
                ReadableNamespaces::Ids(ids) => {
                    let marks: Vec<String> = ids
                        .iter()
                        .map(|n| push_param(&mut params_vec, SqlValue::Integer(*n)))
                        .collect();
                    format!("n.namespace_id IN ({})", marks.join(", "))
                }
            };
            clauses.push(format!(
                "(n.owner_id = {uid}
                  OR EXISTS (SELECT 1 FROM shares s
                             WHERE s.secret_id = n.id AND s.deleted_at IS NULL
                               AND {share_clause})
                  OR {ns_clause})"
            ));
        }

        if let Some(namespace) = &filter.namespace {
            let mark = push_param(&mut params_vec, SqlValue::Text(namespace.clone()));
            clauses.push(format!(
                "n.namespace_id = (SELECT id FROM namespaces WHERE name = {mark})"
            ));
        }
        if let Some(zone) = &filter.zone {
            let mark = push_param(&mut params_vec, SqlValue::Text(zone.clone()));
            clauses.push(format!("n.zone_id = (SELECT id FROM zones WHERE name = {mark})"));
        }
        if let Some(environment) = &filter.environment {
            let mark = push_param(&mut params_vec, SqlValue::Text(environment.clone()));
            clauses.push(format!(
                "n.environment_id = (SELECT id FROM environments WHERE name = {mark})"
            ));
        }
        if let Some(secret_type) = &filter.secret_type {
            let mark = push_param(&mut params_vec, SqlValue::Text(secret_type.clone()));
            clauses.push(format!("n.secret_type = {mark}"));
        }
        if filter.owned_only {
            let mark = push_param(&mut params_vec, SqlValue::Integer(scope.user_id));
            clauses.push(format!("n.owner_id = {mark}"));
        }
        if filter.shared_only {
            let uid = push_param(&mut params_vec, SqlValue::Integer(scope.user_id));
            let mut recipient = format!("(s.is_group = 0 AND s.recipient_id = {uid})");
            if !scope.group_ids.is_empty() {
                let marks: Vec<String> = scope
                    .group_ids
                    .iter()
                    .map(|g| push_param(&mut params_vec, SqlValue::Integer(*g)))
                    .collect();
                recipient = format!(
                    "({recipient} OR (s.is_group = 1 AND s.recipient_id IN ({})))",
                    marks.join(", ")
                );
            }
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM shares s
                         WHERE s.secret_id = n.id AND s.deleted_at IS NULL AND {recipient})"
            ));
        }
        if let Some(level) = filter.permission_at_least {
            if level.allows_write() {
                let uid = push_param(&mut params_vec, SqlValue::Integer(scope.user_id));
                let mut recipient = format!("(s.is_group = 0 AND s.recipient_id = {uid})");
                if !scope.group_ids.is_empty() {
                    let marks: Vec<String> = scope
                        .group_ids
                        .iter()
                        .map(|g| push_param(&mut params_vec, SqlValue::Integer(*g)))
                        .collect();
                    recipient = format!(
                        "({recipient} OR (s.is_group = 1 AND s.recipient_id IN ({})))",
                        marks.join(", ")
                    );
                }
                let ns_clause = match &scope.writable_namespaces {
                    ReadableNamespaces::All => "1 = 1".to_string(),
                    ReadableNamespaces::Ids(ids) if ids.is_empty() => "1 = 0".to_string(),
                    ReadableNamespaces::Ids(ids) => {
                        let marks: Vec<String> = ids
                            .iter()
                            .map(|n| push_param(&mut params_vec, SqlValue::Integer(*n)))
                            .collect();
                        format!("n.namespace_id IN ({})", marks.join(", "))
                    }
                };
                clauses.push(format!(
                    "(n.owner_id = {uid}
                      OR EXISTS (SELECT 1 FROM shares s
                                 WHERE s.secret_id = n.id AND s.deleted_at IS NULL
                                   AND s.permission = 'write' AND {recipient})
                      OR {ns_clause})"
                ));
            }
        }

        let where_sql = clauses.join(" AND ");
        let order_sql = match filter.sort_by {
            SecretSort::Name => "n.name ASC",
            SecretSort::CreatedAt => "n.created_at DESC",
            SecretSort::SharedAt => {
                "(SELECT MAX(s.created_at) FROM shares s
                  WHERE s.secret_id = n.id AND s.deleted_at IS NULL) DESC"
            }
            SecretSort::Owner => "(SELECT username FROM users u WHERE u.id = n.owner_id) ASC",
        };

        let count_sql = format!("SELECT COUNT(*) FROM secret_nodes n WHERE {where_sql}");
        let total: i64 = conn
            .query_row(&count_sql, params_from_iter(params_vec.iter()), |row| {
                row.get(0)
            })
            .map_err(|e| db_err("count secrets", e))?;

        let limit_mark = {
            params_vec.push(SqlValue::Integer(filter.page_size as i64));
            format!("?{}", params_vec.len())
        };
        let offset_mark = {
            params_vec.push(SqlValue::Integer(filter.offset() as i64));
            format!("?{}", params_vec.len())
        };
        let qualified_cols = NODE_COLS
            .split(", ")
            .map(|c| format!("n.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let page_sql = format!(
            "SELECT {qualified_cols} FROM secret_nodes n WHERE {where_sql}
             ORDER BY {order_sql} LIMIT {limit_mark} OFFSET {offset_mark}"
        );

        let mut stmt = conn
            .prepare(&page_sql)
            .map_err(|e| db_err("list secrets", e))?;
        let rows = stmt
            .query_map(params_from_iter(params_vec.iter()), node_from_row)
            .map_err(|e| db_err("list secrets", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list secrets", e))?;

        Ok((rows, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_types::RequestContext;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("arx.db"), crate::PoolOptions::default()).unwrap();
        (store, dir)
    }

    fn seed(store: &Store, ctx: &RequestContext) -> (i64, i64, i64, i64) {
        let owner = store.create_user(ctx, "alice", None, "x").unwrap();
        let ns = store.ensure_namespace(ctx, "default").unwrap();
        let zone = store.ensure_zone(ctx, "global").unwrap();
        let env = store.ensure_environment(ctx, "development").unwrap();
        (owner.id, ns.id, zone, env)
    }

    fn new_node(owner: i64, ns: i64, zone: i64, env: i64, name: &str) -> NewSecretNode {
        NewSecretNode {
            parent_id: None,
            namespace_id: ns,
            zone_id: zone,
            environment_id: env,
            name: name.to_string(),
            is_secret: true,
            secret_type: None,
            max_reads: None,
            expires_at: None,
            metadata: serde_json::json!({}),
            owner_id: owner,
        }
    }

    fn plain_meta() -> EncryptionMetadata {
        EncryptionMetadata {
            algorithm: EncryptionMetadata::NONE.to_string(),
            nonce: Vec::new(),
            kek_version: 0,
            dek_version: 0,
            chunks: Vec::new(),
        }
    }

    fn owner_scope(user_id: i64) -> ListScope {
        ListScope {
            user_id,
            group_ids: Vec::new(),
            readable_namespaces: ReadableNamespaces::Ids(Vec::new()),
            writable_namespaces: ReadableNamespaces::Ids(Vec::new()),
        }
    }

    #[test]
    fn create_enforces_name_uniqueness_among_active() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (owner, ns, zone, env) = seed(&store, &ctx);

        let node = store
            .create_secret(&ctx, new_node(owner, ns, zone, env, "db-password"), b"ct", &plain_meta())
            .unwrap();
        assert_eq!(node.name, "db-password");
        assert!(node.is_active());

        let dup = store.create_secret(
            &ctx,
            new_node(owner, ns, zone, env, "db-password"),
            b"ct",
            &plain_meta(),
        );
        assert!(matches!(dup, Err(ArxError::AlreadyExists(_))));

        // Soft-deleting frees the name.
        store.soft_delete_secret(&ctx, node.id).unwrap();
        store
            .create_secret(&ctx, new_node(owner, ns, zone, env, "db-password"), b"ct", &plain_meta())
            .unwrap();
    }

    #[test]
    fn versions_are_dense_and_monotonic() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (owner, ns, zone, env) = seed(&store, &ctx);
        let node = store
            .create_secret(&ctx, new_node(owner, ns, zone, env, "api-key"), b"v1", &plain_meta())
            .unwrap();

        store.append_version(&ctx, node.id, b"v2", &plain_meta()).unwrap();
        store.append_version(&ctx, node.id, b"v3", &plain_meta()).unwrap();

        let versions = store.list_versions(&ctx, node.id).unwrap();
        let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let latest = store.latest_version(&ctx, node.id).unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.ciphertext, b"v3");
    }

    #[test]
    fn claim_read_enforces_budget() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (owner, ns, zone, env) = seed(&store, &ctx);
        let node = store
            .create_secret(&ctx, new_node(owner, ns, zone, env, "otp"), b"123456", &plain_meta())
            .unwrap();

        match store.claim_read(&ctx, node.id, Some(1)).unwrap() {
            ReadClaim::Version(v) => assert_eq!(v.read_count, 1),
            ReadClaim::Exhausted => panic!("first read must pass"),
        }
        assert!(matches!(
            store.claim_read(&ctx, node.id, Some(1)).unwrap(),
            ReadClaim::Exhausted
        ));
        // Without a budget the counter keeps going.
        assert!(matches!(
            store.claim_read(&ctx, node.id, None).unwrap(),
            ReadClaim::Version(_)
        ));
    }

    #[test]
    fn soft_delete_cascades_to_shares() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (owner, ns, zone, env) = seed(&store, &ctx);
        let bob = store.create_user(&ctx, "bob", None, "x").unwrap();
        let node = store
            .create_secret(&ctx, new_node(owner, ns, zone, env, "shared"), b"ct", &plain_meta())
            .unwrap();

        store
            .create_share(&ctx, node.id, owner, bob.id, false,
                          arx_types::SharePermission::Read, Some(b"wrapped".to_vec()))
            .unwrap();
        assert!(store.recompute_is_shared(&ctx, node.id).unwrap());

        store.soft_delete_secret(&ctx, node.id).unwrap();

        let reloaded = store.get_secret(&ctx, node.id).unwrap();
        assert_eq!(reloaded.status, SecretStatus::Deleted);
        assert!(!reloaded.is_shared);
        assert!(store
            .list_shares_for_secret(&ctx, node.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn listing_respects_scope_and_filters() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (alice, ns, zone, env) = seed(&store, &ctx);
        let bob = store.create_user(&ctx, "bob", None, "x").unwrap();

        let mine = store
            .create_secret(&ctx, new_node(alice, ns, zone, env, "mine"), b"ct", &plain_meta())
            .unwrap();
        let theirs = store
            .create_secret(&ctx, new_node(bob.id, ns, zone, env, "theirs"), b"ct", &plain_meta())
            .unwrap();

        // Alice sees only her own secret without namespace read.
        let (rows, total) = store
            .list_secrets(&ctx, &owner_scope(alice), &SecretFilter::default())
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, mine.id);

        // Share bob's secret with alice; it becomes visible.
        store
            .create_share(&ctx, theirs.id, bob.id, alice, false,
                          arx_types::SharePermission::Read, None)
            .unwrap();
        let (_, total) = store
            .list_secrets(&ctx, &owner_scope(alice), &SecretFilter::default())
            .unwrap();
        assert_eq!(total, 2);

        // shared_only narrows back to the shared row.
        let (rows, total) = store
            .list_secrets(
                &ctx,
                &owner_scope(alice),
                &SecretFilter {
                    shared_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, theirs.id);

        // Namespace-wide read shows everything in the namespace.
        let scope = ListScope {
            readable_namespaces: ReadableNamespaces::Ids(vec![ns]),
            ..owner_scope(bob.id)
        };
        let (_, total) = store.list_secrets(&ctx, &scope, &SecretFilter::default()).unwrap();
        assert_eq!(total, 2);
    }
}
