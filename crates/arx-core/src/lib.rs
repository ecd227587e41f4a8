//! Domain services of the Arx secret plane.
//!
//! Transport shells (REST, gRPC) call into these services through
//! [`Services`]; everything below is transport-agnostic. Each operation
//! enforces its own pre-conditions via the RBAC evaluator, runs its writes
//! through the storage adapter's per-call transactions, and records its
//! audit trail after the domain outcome is known, so denials leave a trace
//! even though nothing else was committed.

mod audit;
mod secrets;
mod sharing;
mod users;
mod validate;

pub use audit::AuditService;
pub use secrets::{CreateSecretInput, SecretRecord, SecretService, UpdateSecretInput};
pub use sharing::{ShareDetails, ShareInput, ShareView, SharingIndicators, SharingService};
pub use users::{hash_password, verify_password, UserService};

use std::sync::Arc;

use arx_crypto::CryptoEngine;
use arx_rbac::Rbac;
use arx_store::Store;

/// Service limits mirrored from `secrets.limits` in config.
#[derive(Debug, Clone)]
pub struct ServiceLimits {
    pub max_secrets_per_user: u32,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_secrets_per_user: 1000,
        }
    }
}

/// Bundle wiring the domain services to their dependencies.
#[derive(Clone)]
pub struct Services {
    pub secrets: SecretService,
    pub sharing: SharingService,
    pub audit: AuditService,
    pub users: UserService,
    pub rbac: Rbac,
    pub store: Store,
    pub crypto: Arc<CryptoEngine>,
}

impl Services {
    pub fn new(store: Store, crypto: Arc<CryptoEngine>, limits: ServiceLimits) -> Self {
        let rbac = Rbac::new(store.clone());
        let sharing = SharingService::new(store.clone(), crypto.clone(), rbac.clone());
        let secrets = SecretService::new(
            store.clone(),
            crypto.clone(),
            rbac.clone(),
            sharing.clone(),
            limits,
        );
        let audit = AuditService::new(store.clone(), rbac.clone());
        let users = UserService::new(store.clone(), rbac.clone());
        Self {
            secrets,
            sharing,
            audit,
            users,
            rbac,
            store,
            crypto,
        }
    }
}
