//! Relational storage adapter for the Arx secrets service.
//!
//! A SQLite database behind an r2d2 pool. Every public method is
//! individually transactional: it takes one connection from the pool, does
//! its writes inside a single transaction, and returns. Audit appends take
//! their own connection, so a rolled-back domain write still leaves its
//! denial trail (see [`audit`]).
//!
//! The blocking rusqlite calls are confined to this crate; callers hold no
//! locks across them.

mod audit;
mod identity;
mod schema;
mod secrets;
mod shares;

pub use audit::NewAuditEvent;
pub use identity::Table;
pub use secrets::{ListScope, NewSecretNode, ReadClaim, ReadableNamespaces};

use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use arx_types::{ArxError, Result};

pub(crate) type Pool = r2d2::Pool<SqliteConnectionManager>;
pub(crate) type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool sizing, mirrored from `storage.database` in the config file.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_open_conns: 16,
            max_idle_conns: 4,
        }
    }
}

/// Handle to the database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path, options: PoolOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArxError::internal(format!("create {}: {e}", parent.display())))?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = r2d2::Pool::builder()
            .max_size(options.max_open_conns.max(1))
            .min_idle(Some(options.max_idle_conns.min(options.max_open_conns)))
            .build(manager)
            .map_err(|e| ArxError::internal(format!("open database pool: {e}")))?;

        let store = Self { pool };
        store.migrate()?;
        tracing::info!(path = %path.display(), "database ready");
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(schema::MIGRATIONS)
            .map_err(|e| ArxError::internal(format!("migrate schema: {e}")))
    }

    pub(crate) fn conn(&self) -> Result<PooledConn> {
        self.pool
            .get()
            .map_err(|e| ArxError::internal(format!("database pool exhausted: {e}")))
    }

    /// Liveness probe for the health endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| ArxError::internal(format!("ping: {e}")))
    }
}

/// Translate a rusqlite failure into the domain taxonomy. Uniqueness
/// violations become `AlreadyExists`; callers that race on version append
/// re-map to `Conflict` at the site.
pub(crate) fn db_err(context: &str, e: rusqlite::Error) -> ArxError {
    if let rusqlite::Error::SqliteFailure(code, _) = &e {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return ArxError::already_exists(context.to_string());
        }
    }
    ArxError::internal(format!("{context}: {e}"))
}

pub(crate) fn not_found(what: &str) -> ArxError {
    ArxError::not_found(what.to_string())
}

/// Begin an immediate transaction; writers queue instead of failing.
pub(crate) fn begin(conn: &mut Connection) -> Result<rusqlite::Transaction<'_>> {
    conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(|e| ArxError::internal(format!("begin transaction: {e}")))
}
