//! Shared domain model for the Arx secrets service.
//!
//! Every other crate in the workspace builds on these types: the entity
//! structs persisted by `arx-store`, the error taxonomy mapped to transport
//! statuses by `arx-server`, the permission vocabulary evaluated by
//! `arx-rbac`, and the request context threaded through every operation.

pub mod audit;
pub mod context;
pub mod entities;
pub mod error;
pub mod filter;
pub mod permission;

pub use audit::{AuditEvent, AuditKind, RbacAuditEvent};
pub use context::{Principal, RequestContext};
pub use entities::{
    AuthToken, ChunkMeta, EncryptionMetadata, Environment, Group, Membership, Namespace, Role,
    SecretNode, SecretStatus, SecretVersion, ShareRecord, User, Zone,
};
pub use error::{ArxError, ErrorKind, FieldViolation, Result};
pub use filter::{AuditFilter, Page, SecretFilter, SecretSort};
pub use permission::{Action, Permission, Resource, SharePermission};
