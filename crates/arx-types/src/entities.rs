//! Persisted entities of the secret plane.
//!
//! Ids are `i64` database rowids. Soft deletion is expressed by a nullable
//! `deleted_at`; deleted rows stay addressable for audit and purge jobs but
//! are invisible to default lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permission::SharePermission;

/// Logical multi-tenant boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Deployment locality tag, e.g. `us-east-1` or `global`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle tag, e.g. `production` or `development`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStatus {
    Active,
    Deleted,
}

impl SecretStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

/// A node in the secret name tree. Folders have `is_secret=false` and carry
/// no versions; leaves have `is_secret=true` and at least one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub namespace_id: i64,
    pub zone_id: i64,
    pub environment_id: i64,
    pub name: String,
    pub is_secret: bool,
    pub secret_type: Option<String>,
    pub max_reads: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Arbitrary caller-supplied mapping; tags live under the `tags` key.
    pub metadata: serde_json::Value,
    pub status: SecretStatus,
    pub owner_id: i64,
    /// Derived: true iff an active ShareRecord references this node.
    pub is_shared: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SecretNode {
    pub fn is_active(&self) -> bool {
        self.status == SecretStatus::Active
    }
}

/// Per-chunk encryption descriptor. Chunk ciphertexts are concatenated in
/// index order; `ciphertext_len` lets decryption split them back apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub index: u32,
    pub ciphertext_len: u32,
    pub nonce: Vec<u8>,
}

/// Encryption metadata persisted with every version.
///
/// `chunks` is empty for single-segment payloads, in which case `nonce`
/// holds the one GCM nonce. A plaintext version (encryption disabled in
/// config) records `algorithm = "none"` and empty nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: String,
    pub nonce: Vec<u8>,
    pub kek_version: u32,
    pub dek_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkMeta>,
}

impl EncryptionMetadata {
    pub const AES_256_GCM: &'static str = "AES-256-GCM";
    pub const NONE: &'static str = "none";

    pub fn is_encrypted(&self) -> bool {
        self.algorithm != Self::NONE
    }

    pub fn is_chunked(&self) -> bool {
        !self.chunks.is_empty()
    }
}

/// Immutable snapshot of a secret's encrypted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersion {
    pub id: i64,
    pub secret_id: i64,
    pub version: i64,
    #[serde(skip_serializing)]
    pub ciphertext: Vec<u8>,
    pub metadata: EncryptionMetadata,
    pub read_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: i64,
    pub group_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Authorization grant from an owner to a recipient (user or group).
///
/// The wrapped DEK is exclusively owned by the record: revocation destroys
/// it so that an ex-recipient holds no usable key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: i64,
    pub secret_id: i64,
    pub owner_id: i64,
    pub recipient_id: i64,
    pub is_group: bool,
    pub permission: SharePermission,
    #[serde(skip_serializing)]
    pub wrapped_dek: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ShareRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Bearer token record. Only the SHA-256 digest of the token string is
/// stored; minting and refresh are external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub id: i64,
    pub token_digest: String,
    pub user_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_metadata_chunked_flag() {
        let mut meta = EncryptionMetadata {
            algorithm: EncryptionMetadata::AES_256_GCM.to_string(),
            nonce: vec![0u8; 12],
            kek_version: 1,
            dek_version: 1,
            chunks: Vec::new(),
        };
        assert!(meta.is_encrypted());
        assert!(!meta.is_chunked());

        meta.chunks.push(ChunkMeta {
            index: 0,
            ciphertext_len: 64,
            nonce: vec![0u8; 12],
        });
        assert!(meta.is_chunked());
    }

    #[test]
    fn version_serialization_hides_ciphertext() {
        let version = SecretVersion {
            id: 1,
            secret_id: 1,
            version: 1,
            ciphertext: b"sealed".to_vec(),
            metadata: EncryptionMetadata {
                algorithm: EncryptionMetadata::NONE.to_string(),
                nonce: Vec::new(),
                kek_version: 0,
                dek_version: 0,
                chunks: Vec::new(),
            },
            read_count: 0,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&version).unwrap();
        assert!(json.get("ciphertext").is_none());
    }
}
