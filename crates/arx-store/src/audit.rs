//! Append-only audit log.
//!
//! `log_event` takes its own pooled connection and commits immediately, so
//! an audit row survives even when the domain operation it describes was
//! rolled back or denied. Nothing in this module updates or deletes rows.

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Row};

use arx_types::{AuditEvent, AuditFilter, AuditKind, Page, RequestContext, Result};

use crate::{db_err, Store};

const EVENT_COLS: &str = "id, kind, actor_user_id, secret_id, target_user_id, role_id, \
                          namespace_id, details, timestamp";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let kind: String = row.get(1)?;
    let details: String = row.get(7)?;
    Ok(AuditEvent {
        id: row.get(0)?,
        kind: AuditKind::parse(&kind).unwrap_or(AuditKind::PermissionDenied),
        actor_user_id: row.get(2)?,
        secret_id: row.get(3)?,
        target_user_id: row.get(4)?,
        role_id: row.get(5)?,
        namespace_id: row.get(6)?,
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        timestamp: row.get(8)?,
    })
}

/// Everything but the id and timestamp of a new event.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub kind: AuditKind,
    pub actor_user_id: Option<i64>,
    pub secret_id: Option<i64>,
    pub target_user_id: Option<i64>,
    pub role_id: Option<i64>,
    pub namespace_id: Option<i64>,
    pub details: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            actor_user_id: None,
            secret_id: None,
            target_user_id: None,
            role_id: None,
            namespace_id: None,
            details: serde_json::json!({}),
        }
    }

    pub fn actor(mut self, user_id: i64) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn secret(mut self, secret_id: i64) -> Self {
        self.secret_id = Some(secret_id);
        self
    }

    pub fn target_user(mut self, user_id: i64) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn role(mut self, role_id: i64) -> Self {
        self.role_id = Some(role_id);
        self
    }

    pub fn namespace(mut self, namespace_id: i64) -> Self {
        self.namespace_id = Some(namespace_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl Store {
    /// Append one event. Commits on its own connection regardless of any
    /// in-flight domain transaction.
    pub fn log_event(&self, event: NewAuditEvent) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_events
                 (kind, actor_user_id, secret_id, target_user_id, role_id, namespace_id,
                  details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.kind.as_str(),
                event.actor_user_id,
                event.secret_id,
                event.target_user_id,
                event.role_id,
                event.namespace_id,
                event.details.to_string(),
                Utc::now(),
            ],
        )
        .map_err(|e| db_err("log event", e))?;
        Ok(conn.last_insert_rowid())
    }

    /// Filtered page of events. `rbac_stream` selects the RBAC event kinds;
    /// otherwise the general stream (everything else) is returned.
    pub fn query_events(
        &self,
        ctx: &RequestContext,
        filter: &AuditFilter,
        rbac_stream: bool,
    ) -> Result<Page<AuditEvent>> {
        ctx.check_deadline()?;
        let filter = filter.clone().normalized();
        let conn = self.conn()?;

        let rbac_kinds = "('role_assigned', 'role_removed', 'role_created', 'role_deleted')";
        let mut clauses = vec![if rbac_stream {
            format!("kind IN {rbac_kinds}")
        } else {
            format!("kind NOT IN {rbac_kinds}")
        }];
        let mut params_vec: Vec<SqlValue> = Vec::new();
        let push = |params_vec: &mut Vec<SqlValue>, v: SqlValue| -> String {
            params_vec.push(v);
            format!("?{}", params_vec.len())
        };

        if let Some(kind) = filter.kind {
            let mark = push(&mut params_vec, SqlValue::Text(kind.as_str().to_string()));
            clauses.push(format!("kind = {mark}"));
        }
        if let Some(actor) = filter.actor_user_id {
            let mark = push(&mut params_vec, SqlValue::Integer(actor));
            clauses.push(format!("actor_user_id = {mark}"));
        }
        if let Some(target) = filter.target_user_id {
            let mark = push(&mut params_vec, SqlValue::Integer(target));
            clauses.push(format!("target_user_id = {mark}"));
        }
        if let Some(namespace) = filter.namespace_id {
            let mark = push(&mut params_vec, SqlValue::Integer(namespace));
            clauses.push(format!("namespace_id = {mark}"));
        }
        if let Some(from) = filter.from {
            let mark = push(&mut params_vec, SqlValue::Text(from.to_rfc3339()));
            clauses.push(format!("timestamp >= {mark}"));
        }
        if let Some(to) = filter.to {
            let mark = push(&mut params_vec, SqlValue::Text(to.to_rfc3339()));
            clauses.push(format!("timestamp <= {mark}"));
        }

        let where_sql = clauses.join(" AND ");

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM audit_events WHERE {where_sql}"),
                params_from_iter(params_vec.iter()),
                |row| row.get(0),
            )
            .map_err(|e| db_err("count events", e))?;

        let limit_mark = push(&mut params_vec, SqlValue::Integer(filter.page_size as i64));
        let offset_mark = push(&mut params_vec, SqlValue::Integer(filter.offset() as i64));
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLS} FROM audit_events WHERE {where_sql}
                 ORDER BY id DESC LIMIT {limit_mark} OFFSET {offset_mark}"
            ))
            .map_err(|e| db_err("query events", e))?;
        let items = stmt
            .query_map(params_from_iter(params_vec.iter()), event_from_row)
            .map_err(|e| db_err("query events", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("query events", e))?;

        Ok(Page::new(items, filter.page, filter.page_size, total as u64))
    }

    /// Events newer than `after_id`, oldest first; the gRPC audit tail.
    pub fn events_after(
        &self,
        ctx: &RequestContext,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<AuditEvent>> {
        ctx.check_deadline()?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLS} FROM audit_events WHERE id > ?1 ORDER BY id LIMIT ?2"
            ))
            .map_err(|e| db_err("tail events", e))?;
        let items = stmt
            .query_map(params![after_id, limit], event_from_row)
            .map_err(|e| db_err("tail events", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("tail events", e))?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("arx.db"), crate::PoolOptions::default()).unwrap();
        (store, dir)
    }

    #[test]
    fn streams_are_disjoint() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();

        store
            .log_event(NewAuditEvent::new(AuditKind::SecretCreated).actor(1).secret(9))
            .unwrap();
        store
            .log_event(NewAuditEvent::new(AuditKind::RoleAssigned).actor(1).role(2))
            .unwrap();

        let general = store
            .query_events(&ctx, &AuditFilter::default(), false)
            .unwrap();
        assert_eq!(general.total, 1);
        assert_eq!(general.items[0].kind, AuditKind::SecretCreated);

        let rbac = store.query_events(&ctx, &AuditFilter::default(), true).unwrap();
        assert_eq!(rbac.total, 1);
        assert_eq!(rbac.items[0].kind, AuditKind::RoleAssigned);
    }

    #[test]
    fn filters_narrow_by_actor_and_kind() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();

        for actor in [1, 1, 2] {
            store
                .log_event(NewAuditEvent::new(AuditKind::SecretAccessed).actor(actor))
                .unwrap();
        }
        store
            .log_event(NewAuditEvent::new(AuditKind::PermissionDenied).actor(2))
            .unwrap();

        let by_actor = store
            .query_events(
                &ctx,
                &AuditFilter {
                    actor_user_id: Some(1),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(by_actor.total, 2);

        let denied = store
            .query_events(
                &ctx,
                &AuditFilter {
                    kind: Some(AuditKind::PermissionDenied),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(denied.total, 1);
        assert_eq!(denied.items[0].actor_user_id, Some(2));
    }

    #[test]
    fn tail_returns_events_in_order() {
        let (store, _guard) = store();
        let ctx = RequestContext::anonymous();

        let first = store
            .log_event(NewAuditEvent::new(AuditKind::SecretCreated))
            .unwrap();
        let second = store
            .log_event(NewAuditEvent::new(AuditKind::SecretAccessed))
            .unwrap();

        let tail = store.events_after(&ctx, 0, 10).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].id, first);
        assert_eq!(tail[1].id, second);

        let after_first = store.events_after(&ctx, first, 10).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].id, second);
    }
}
