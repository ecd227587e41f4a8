//! Admin & health: system status, key-file permission audit, and rotation
//! orchestration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use arx_config::ArxConfig;
use arx_crypto::{audit_key_file, fix_key_file_mode};
use arx_store::Table;
use arx_types::{Action, Permission, RequestContext, Resource, Result};

use crate::{AppState, SharedState};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub checks: BTreeMap<&'static str, String>,
}

/// Public liveness probe: database, encryption, and storage checks.
pub fn health(state: &AppState) -> HealthReport {
    let mut checks = BTreeMap::new();
    let mut healthy = true;

    match state.services.store.ping() {
        Ok(()) => checks.insert("database", "ok".to_string()),
        Err(_) => {
            healthy = false;
            checks.insert("database", "unreachable".to_string())
        }
    };

    match state.services.crypto.status() {
        Ok(status) if status.enabled => {
            checks.insert("encryption", format!("ok (dek v{})", status.dek_version))
        }
        Ok(_) => checks.insert("encryption", "disabled".to_string()),
        Err(_) => {
            healthy = false;
            checks.insert("encryption", "unavailable".to_string())
        }
    };

    let db_path = &state.config.storage.database.path;
    if db_path.parent().map(|p| p.exists()).unwrap_or(true) {
        checks.insert("storage", "ok".to_string());
    } else {
        healthy = false;
        checks.insert("storage", "missing".to_string());
    }

    HealthReport {
        status: if healthy { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        uptime: state.uptime_seconds(),
        checks,
    }
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub database_path: String,
    pub users: u64,
    pub secrets: u64,
    pub shares: u64,
    pub audit_events: u64,
    pub encryption_enabled: bool,
    pub kek_version: u32,
    pub dek_version: u32,
}

pub fn info(state: &AppState, ctx: &RequestContext) -> Result<SystemInfo> {
    state
        .services
        .rbac
        .require(ctx, Permission::new(Resource::System, Action::Read), None)?;

    let store = &state.services.store;
    let crypto = state.services.crypto.status()?;
    Ok(SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        database_path: state.config.storage.database.path.display().to_string(),
        users: store.count_rows(ctx, Table::Users)?,
        secrets: store.count_rows(ctx, Table::Secrets)?,
        shares: store.count_rows(ctx, Table::Shares)?,
        audit_events: store.count_rows(ctx, Table::AuditEvents)?,
        encryption_enabled: crypto.enabled,
        kek_version: crypto.kek_version,
        dek_version: crypto.dek_version,
    })
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub requests_total: u64,
    pub secrets: u64,
    pub shares: u64,
    pub users: u64,
    pub audit_events: u64,
}

pub fn metrics(state: &AppState, ctx: &RequestContext) -> Result<SystemMetrics> {
    state
        .services
        .rbac
        .require(ctx, Permission::new(Resource::System, Action::Read), None)?;

    let store = &state.services.store;
    Ok(SystemMetrics {
        requests_total: state
            .requests_total
            .load(std::sync::atomic::Ordering::Relaxed),
        secrets: store.count_rows(ctx, Table::Secrets)?,
        shares: store.count_rows(ctx, Table::Shares)?,
        users: store.count_rows(ctx, Table::Users)?,
        audit_events: store.count_rows(ctx, Table::AuditEvents)?,
    })
}

pub fn rotate_dek(state: &SharedState, ctx: &RequestContext) -> Result<u32> {
    state
        .services
        .rbac
        .require(ctx, Permission::new(Resource::System, Action::Admin), None)?;
    state.services.crypto.rotate_dek()
}

pub fn rotate_kek(state: &SharedState, ctx: &RequestContext) -> Result<u32> {
    state
        .services
        .rbac
        .require(ctx, Permission::new(Resource::System, Action::Admin), None)?;
    state.services.crypto.rotate_kek()
}

/// Startup audit of the key files per the `security` config: fix, tolerate,
/// or refuse to start.
pub fn check_key_files(config: &ArxConfig) -> anyhow::Result<()> {
    if !config.storage.encryption.enabled || !config.security.enable_file_permission_check {
        return Ok(());
    }

    for path in [
        &config.storage.encryption.kek_path,
        &config.storage.encryption.dek_path,
    ] {
        let report = audit_key_file(path);
        if !report.exists || report.owner_only {
            continue;
        }
        if config.security.auto_fix_file_permissions {
            tracing::warn!(path = %report.path, mode = ?report.mode, "tightening key file permissions");
            fix_key_file_mode(path)
                .map_err(|e| anyhow::anyhow!("failed to fix {}: {e}", report.path))?;
        } else if config.security.allow_unsafe_file_permissions {
            tracing::warn!(path = %report.path, mode = ?report.mode, "key file permissions are too open");
        } else {
            anyhow::bail!(
                "key file {} is readable by others (mode {:o}); refusing to start",
                report.path,
                report.mode.unwrap_or(0),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_with_keys(dir: &std::path::Path) -> ArxConfig {
        let mut config = ArxConfig::default();
        config.storage.encryption.kek_path = dir.join("kek.key");
        config.storage.encryption.dek_path = dir.join("dek.ring");
        config
    }

    #[cfg(unix)]
    #[test]
    fn loose_permissions_are_fixed_when_allowed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = config_with_keys(dir.path());
        let kek = &config.storage.encryption.kek_path;
        fs::write(kek, [0u8; 32]).unwrap();
        fs::set_permissions(kek, fs::Permissions::from_mode(0o644)).unwrap();

        check_key_files(&config).unwrap();
        let mode = fs::metadata(kek).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn loose_permissions_refuse_start_when_strict() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_keys(dir.path());
        config.security.auto_fix_file_permissions = false;
        config.security.allow_unsafe_file_permissions = false;

        let kek = &config.storage.encryption.kek_path;
        fs::write(kek, [0u8; 32]).unwrap();
        fs::set_permissions(kek, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(check_key_files(&config).is_err());
    }

    #[test]
    fn missing_key_files_pass_the_audit() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_keys(dir.path());
        check_key_files(&config).unwrap();
    }
}
