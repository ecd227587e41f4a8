//! Share records and their wrapped DEKs.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;

use arx_types::{ArxError, RequestContext, Result, SharePermission, ShareRecord};

use crate::{begin, db_err, not_found, Store};

const SHARE_COLS: &str = "id, secret_id, owner_id, recipient_id, is_group, permission, \
                          wrapped_dek, created_at, updated_at, deleted_at";

fn share_from_row(row: &Row<'_>) -> rusqlite::Result<ShareRecord> {
    let permission: String = row.get(5)?;
    Ok(ShareRecord {
        id: row.get(0)?,
        secret_id: row.get(1)?,
        owner_id: row.get(2)?,
        recipient_id: row.get(3)?,
        is_group: row.get(4)?,
        permission: SharePermission::from_str(&permission).unwrap_or(SharePermission::Read),
        wrapped_dek: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}

impl Store {
    /// Insert a share and flip the node's `is_shared` flag in one
    /// transaction. A live duplicate triple surfaces as `AlreadyExists`.
    pub fn create_share(
        &self,
        ctx: &RequestContext,
        secret_id: i64,
        owner_id: i64,
        recipient_id: i64,
        is_group: bool,
        permission: SharePermission,
        wrapped_dek: Option<Vec<u8>>,
    ) -> Result<ShareRecord> {
        ctx.check_deadline()?;
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO shares
                 (secret_id, owner_id, recipient_id, is_group, permission, wrapped_dek,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                secret_id,
                owner_id,
                recipient_id,
                is_group,
                permission.as_str(),
                wrapped_dek,
                now,
            ],
        )
        .map_err(|e| db_err("share", e))?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE secret_nodes SET is_shared = 1 WHERE id = ?1",
            params![secret_id],
        )
        .map_err(|e| db_err("mark shared", e))?;

        tx.commit()
            .map_err(|e| ArxError::internal(format!("commit share: {e}")))?;
        drop(conn);
        self.get_share(ctx, id)
    }

    pub fn get_share(&self, ctx: &RequestContext, id: i64) -> Result<ShareRecord> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {SHARE_COLS} FROM shares WHERE id = ?1"),
            params![id],
            share_from_row,
        )
        .optional()
        .map_err(|e| db_err("get share", e))?
        .ok_or_else(|| not_found("share"))
    }

    pub fn update_share_permission(
        &self,
        ctx: &RequestContext,
        id: i64,
        permission: SharePermission,
    ) -> Result<ShareRecord> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE shares SET permission = ?2, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, permission.as_str(), Utc::now()],
            )
            .map_err(|e| db_err("update share", e))?;
        if changed == 0 {
            return Err(not_found("share"));
        }
        self.get_share(ctx, id)
    }

    /// Soft-delete the record and destroy its wrapped DEK, then re-derive
    /// the node's `is_shared` flag, all in one transaction.
    pub fn soft_delete_share(&self, ctx: &RequestContext, id: i64) -> Result<ShareRecord> {
        ctx.check_deadline()?;
        let mut conn = self.conn()?;
        let tx = begin(&mut conn)?;
        let now = Utc::now();

        let secret_id: i64 = tx
            .query_row(
                "SELECT secret_id FROM shares WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("revoke share", e))?
            .ok_or_else(|| not_found("share"))?;

        tx.execute(
            "UPDATE shares SET deleted_at = ?2, updated_at = ?2, wrapped_dek = NULL
             WHERE id = ?1",
            params![id, now],
        )
        .map_err(|e| db_err("revoke share", e))?;

        tx.execute(
            "UPDATE secret_nodes SET is_shared = EXISTS(
                 SELECT 1 FROM shares WHERE secret_id = ?1 AND deleted_at IS NULL)
             WHERE id = ?1",
            params![secret_id],
        )
        .map_err(|e| db_err("recompute is_shared", e))?;

        tx.commit()
            .map_err(|e| ArxError::internal(format!("commit revoke: {e}")))?;
        drop(conn);
        self.get_share(ctx, id)
    }

    /// The active share for an exact (secret, recipient, is_group) triple.
    pub fn find_share(
        &self,
        ctx: &RequestContext,
        secret_id: i64,
        recipient_id: i64,
        is_group: bool,
    ) -> Result<Option<ShareRecord>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {SHARE_COLS} FROM shares
                 WHERE secret_id = ?1 AND recipient_id = ?2 AND is_group = ?3
                   AND deleted_at IS NULL"
            ),
            params![secret_id, recipient_id, is_group],
            share_from_row,
        )
        .optional()
        .map_err(|e| db_err("find share", e))
    }

    /// The strongest active share covering a principal: their direct share
    /// or any share to a group they belong to, write preferred over read.
    pub fn find_share_for_principal(
        &self,
        ctx: &RequestContext,
        secret_id: i64,
        user_id: i64,
        group_ids: &[i64],
    ) -> Result<Option<ShareRecord>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;

        let mut sql = format!(
            "SELECT {SHARE_COLS} FROM shares
             WHERE secret_id = ?1 AND deleted_at IS NULL
               AND ((is_group = 0 AND recipient_id = ?2)"
        );
        if !group_ids.is_empty() {
            let marks: Vec<String> = (0..group_ids.len()).map(|i| format!("?{}", i + 3)).collect();
            sql.push_str(&format!(
                " OR (is_group = 1 AND recipient_id IN ({}))",
                marks.join(", ")
            ));
        }
        sql.push_str(") ORDER BY CASE permission WHEN 'write' THEN 0 ELSE 1 END LIMIT 1");

        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&secret_id, &user_id];
        for g in group_ids {
            params_vec.push(g);
        }

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| db_err("share for principal", e))?;
        let mut rows = stmt
            .query_map(params_vec.as_slice(), share_from_row)
            .map_err(|e| db_err("share for principal", e))?;
        match rows.next() {
            Some(row) => row.map(Some).map_err(|e| db_err("share for principal", e)),
            None => Ok(None),
        }
    }

    /// Whether any share row (live or revoked) ever covered the principal.
    /// Drives the NotFound-vs-PermissionDenied visibility decision: an
    /// ex-recipient demonstrably knew the secret existed.
    pub fn had_share_for_principal(
        &self,
        ctx: &RequestContext,
        secret_id: i64,
        user_id: i64,
        group_ids: &[i64],
    ) -> Result<bool> {
        ctx.check_deadline()?;
        let conn = self.conn()?;

        let mut sql = "SELECT COUNT(*) FROM shares
             WHERE secret_id = ?1 AND ((is_group = 0 AND recipient_id = ?2)"
            .to_string();
        if !group_ids.is_empty() {
            let marks: Vec<String> = (0..group_ids.len()).map(|i| format!("?{}", i + 3)).collect();
            sql.push_str(&format!(
                " OR (is_group = 1 AND recipient_id IN ({}))",
                marks.join(", ")
            ));
        }
        sql.push(')');

        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&secret_id, &user_id];
        for g in group_ids {
            params_vec.push(g);
        }

        let count: i64 = conn
            .query_row(&sql, params_vec.as_slice(), |row| row.get(0))
            .map_err(|e| db_err("had share", e))?;
        Ok(count > 0)
    }

    /// Active shares on a secret, newest first.
    pub fn list_shares_for_secret(
        &self,
        ctx: &RequestContext,
        secret_id: i64,
    ) -> Result<Vec<ShareRecord>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SHARE_COLS} FROM shares
                 WHERE secret_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC, id DESC"
            ))
            .map_err(|e| db_err("list shares", e))?;
        let shares = stmt
            .query_map(params![secret_id], share_from_row)
            .map_err(|e| db_err("list shares", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list shares", e))?;
        Ok(shares)
    }

    /// Active shares issued by an owner (their outbound shares).
    pub fn list_shares_by_owner(&self, ctx: &RequestContext, owner_id: i64) -> Result<Vec<ShareRecord>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SHARE_COLS} FROM shares
                 WHERE owner_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC, id DESC"
            ))
            .map_err(|e| db_err("list owner shares", e))?;
        let shares = stmt
            .query_map(params![owner_id], share_from_row)
            .map_err(|e| db_err("list owner shares", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list owner shares", e))?;
        Ok(shares)
    }

    /// Active shares where the user (or one of their groups) is recipient.
    pub fn list_shares_for_recipient(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        group_ids: &[i64],
    ) -> Result<Vec<ShareRecord>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;

        let mut sql = format!(
            "SELECT {SHARE_COLS} FROM shares
             WHERE deleted_at IS NULL AND ((is_group = 0 AND recipient_id = ?1)"
        );
        if !group_ids.is_empty() {
            let marks: Vec<String> = (0..group_ids.len()).map(|i| format!("?{}", i + 2)).collect();
            sql.push_str(&format!(
                " OR (is_group = 1 AND recipient_id IN ({}))",
                marks.join(", ")
            ));
        }
        sql.push_str(") ORDER BY created_at DESC, id DESC");

        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
        for g in group_ids {
            params_vec.push(g);
        }

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| db_err("list recipient shares", e))?;
        let shares = stmt
            .query_map(params_vec.as_slice(), share_from_row)
            .map_err(|e| db_err("list recipient shares", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list recipient shares", e))?;
        Ok(shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewSecretNode;
    use arx_types::EncryptionMetadata;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("arx.db"), crate::PoolOptions::default()).unwrap();
        (store, dir)
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

    fn setup(store: &Store, ctx: &RequestContext) -> (i64, i64, i64) {
        let alice = store.create_user(ctx, "alice", None, "x").unwrap();
        let bob = store.create_user(ctx, "bob", None, "x").unwrap();
        let ns = store.ensure_namespace(ctx, "default").unwrap();
        let zone = store.ensure_zone(ctx, "global").unwrap();
        let env = store.ensure_environment(ctx, "development").unwrap();
        let node = store
            .create_secret(
                ctx,
                NewSecretNode {
                    parent_id: None,
                    namespace_id: ns.id,
                    zone_id: zone,
                    environment_id: env,
                    name: "db-password".to_string(),
                    is_secret: true,
                    secret_type: None,
                    max_reads: None,
                    expires_at: None,
                    metadata: serde_json::json!({}),
                    owner_id: alice.id,
                },
                b"ct",
                &plain_meta(),
            )
            .unwrap();
        (alice.id, bob.id, node.id)
    }

    #[test]
    fn duplicate_active_triple_rejected_but_revoke_frees_it() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (alice, bob, secret) = setup(&store, &ctx);

        let share = store
            .create_share(&ctx, secret, alice, bob, false, SharePermission::Read,
                          Some(b"wrapped".to_vec()))
            .unwrap();
        assert!(store.get_secret(&ctx, secret).unwrap().is_shared);

        let dup = store.create_share(&ctx, secret, alice, bob, false, SharePermission::Write, None);
        assert!(matches!(dup, Err(ArxError::AlreadyExists(_))));

        let revoked = store.soft_delete_share(&ctx, share.id).unwrap();
        assert!(!revoked.is_active());
        assert!(revoked.wrapped_dek.is_none());
        assert!(!store.get_secret(&ctx, secret).unwrap().is_shared);

        // Triple is free again.
        store
            .create_share(&ctx, secret, alice, bob, false, SharePermission::Write, None)
            .unwrap();
    }

    #[test]
    fn principal_share_prefers_write() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (alice, bob, secret) = setup(&store, &ctx);

        let ops = store.create_group(&ctx, "ops", "").unwrap();
        store.add_member(&ctx, bob, ops.id).unwrap();

        store
            .create_share(&ctx, secret, alice, bob, false, SharePermission::Read, None)
            .unwrap();
        store
            .create_share(&ctx, secret, alice, ops.id, true, SharePermission::Write, None)
            .unwrap();

        let best = store
            .find_share_for_principal(&ctx, secret, bob, &[ops.id])
            .unwrap()
            .unwrap();
        assert_eq!(best.permission, SharePermission::Write);
        assert!(best.is_group);

        // Without the group the direct read share remains.
        let direct = store
            .find_share_for_principal(&ctx, secret, bob, &[])
            .unwrap()
            .unwrap();
        assert_eq!(direct.permission, SharePermission::Read);
    }

    #[test]
    fn recipient_and_owner_listings() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();
        let (alice, bob, secret) = setup(&store, &ctx);

        store
            .create_share(&ctx, secret, alice, bob, false, SharePermission::Read, None)
            .unwrap();

        assert_eq!(store.list_shares_by_owner(&ctx, alice).unwrap().len(), 1);
        assert_eq!(store.list_shares_by_owner(&ctx, bob).unwrap().len(), 0);
        assert_eq!(
            store.list_shares_for_recipient(&ctx, bob, &[]).unwrap().len(),
            1
        );
        assert_eq!(
            store.list_shares_for_recipient(&ctx, alice, &[]).unwrap().len(),
            0
        );
    }
}
