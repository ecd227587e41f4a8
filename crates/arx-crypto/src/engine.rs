//! The crypto engine: payload encryption, key rotation, recipient wrapping.

use std::path::PathBuf;
use std::sync::RwLock;

use rand::RngCore;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::Serialize;
use tracing::{info, warn};

use arx_types::{ArxError, ChunkMeta, EncryptionMetadata, Result};

use crate::keyfile::{self, RotationJournal};
use crate::keys::{DekEntry, KeyMaterial, KeyRing, RingFile};
use crate::recipient::{DerivedRecipientMaterial, RecipientMaterial};
use crate::NONCE_SIZE;

/// Chunked-encryption limits from config.
#[derive(Debug, Clone)]
pub struct ChunkingOptions {
    pub enabled: bool,
    pub max_chunk_size_kb: usize,
    pub max_chunks_per_secret: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chunk_size_kb: 256,
            max_chunks_per_secret: 64,
        }
    }
}

/// Engine construction options, mirrored from `storage.encryption` and
/// `secrets.chunking` in the config file.
#[derive(Debug, Clone)]
pub struct CryptoOptions {
    pub enabled: bool,
    pub use_kek: bool,
    pub kek_path: PathBuf,
    pub dek_path: PathBuf,
    pub chunking: ChunkingOptions,
}

/// Snapshot of key state for health and system endpoints. Exposes versions
/// only, never material.
#[derive(Debug, Clone, Serialize)]
pub struct CryptoStatus {
    pub enabled: bool,
    pub kek_version: u32,
    pub dek_version: u32,
    pub dek_versions_held: usize,
}

/// Envelope encryption engine. One writer (rotation), many readers.
pub struct CryptoEngine {
    options: CryptoOptions,
    ring: RwLock<KeyRing>,
    recipient: RwLock<Option<DerivedRecipientMaterial>>,
}

impl CryptoEngine {
    /// Engine with encryption off: payloads pass through unchanged and the
    /// metadata records `algorithm = "none"`.
    pub fn disabled() -> Self {
        Self {
            options: CryptoOptions {
                enabled: false,
                use_kek: false,
                kek_path: PathBuf::new(),
                dek_path: PathBuf::new(),
                chunking: ChunkingOptions::default(),
            },
            ring: RwLock::new(KeyRing {
                kek: None,
                kek_version: 0,
                deks: Default::default(),
                active_dek: 0,
            }),
            recipient: RwLock::new(None),
        }
    }

    /// Load key material from disk, bootstrapping fresh keys on first start
    /// and resuming an interrupted KEK rotation from its journal.
    pub fn open(options: CryptoOptions) -> Result<Self> {
        if !options.enabled {
            return Ok(Self::disabled());
        }

        let kek = if options.use_kek {
            match keyfile::read_key(&options.kek_path) {
                Ok(material) => Some(material),
                Err(_) if !options.kek_path.exists() => {
                    info!(path = %options.kek_path.display(), "generating initial KEK");
                    let material = KeyMaterial::generate();
                    keyfile::write_key(&options.kek_path, &material)?;
                    Some(material)
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let journal = RotationJournal::load(&options.kek_path)?;
        let fallback = match &journal {
            Some(j) => {
                warn!(
                    old_version = j.old_version,
                    new_version = j.new_version,
                    "resuming interrupted KEK rotation"
                );
                let raw = B64
                    .decode(&j.old_kek)
                    .map_err(|_| ArxError::CryptoUnavailable)?;
                Some(KeyMaterial::from_slice(&raw)?)
            }
            None => None,
        };

        let ring = match keyfile::read_text(&options.dek_path)? {
            Some(text) => {
                let file: RingFile =
                    serde_json::from_str(&text).map_err(|_| ArxError::CryptoUnavailable)?;
                let (mut ring, needed_fallback) =
                    file.into_ring(kek.clone(), fallback.as_ref())?;
                if needed_fallback {
                    // The KEK file was already replaced but the ring still
                    // carried the old wrap: finish the interrupted rotation.
                    if let Some(j) = &journal {
                        ring.kek_version = j.new_version;
                    }
                    Self::save_ring(&options.dek_path, &ring)?;
                }
                RotationJournal::clear(&options.kek_path)?;
                ring
            }
            None => {
                info!(path = %options.dek_path.display(), "generating initial DEK");
                let mut ring = KeyRing {
                    kek,
                    kek_version: if options.use_kek { 1 } else { 0 },
                    deks: Default::default(),
                    active_dek: 1,
                };
                ring.deks.insert(
                    1,
                    DekEntry {
                        material: KeyMaterial::generate(),
                        retired: false,
                    },
                );
                Self::save_ring(&options.dek_path, &ring)?;
                ring
            }
        };

        let recipient = Some(Self::recipient_material(&ring)?);
        Ok(Self {
            options,
            ring: RwLock::new(ring),
            recipient: RwLock::new(recipient),
        })
    }

    fn recipient_material(ring: &KeyRing) -> Result<DerivedRecipientMaterial> {
        match &ring.kek {
            Some(kek) => Ok(DerivedRecipientMaterial::new(kek, ring.kek_version)),
            None => Ok(DerivedRecipientMaterial::new(ring.active()?, 0)),
        }
    }

    fn save_ring(dek_path: &std::path::Path, ring: &KeyRing) -> Result<()> {
        let file = RingFile::from_ring(ring)?;
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| ArxError::internal(format!("encode key ring: {e}")))?;
        // Write-then-rename so a crash never truncates the only copy.
        let tmp = dek_path.with_extension("ring.tmp");
        keyfile::write_text(&tmp, &text)?;
        std::fs::rename(&tmp, dek_path)
            .map_err(|e| ArxError::internal(format!("replace key ring: {e}")))
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn status(&self) -> Result<CryptoStatus> {
        let ring = self.read_ring()?;
        Ok(CryptoStatus {
            enabled: self.options.enabled,
            kek_version: ring.kek_version,
            dek_version: ring.active_dek,
            dek_versions_held: ring.deks.len(),
        })
    }

    fn read_ring(&self) -> Result<std::sync::RwLockReadGuard<'_, KeyRing>> {
        self.ring
            .read()
            .map_err(|_| ArxError::internal("key ring lock poisoned"))
    }

    fn write_ring(&self) -> Result<std::sync::RwLockWriteGuard<'_, KeyRing>> {
        self.ring
            .write()
            .map_err(|_| ArxError::internal("key ring lock poisoned"))
    }

    /// Encrypt a payload with the active DEK, chunking when it exceeds the
    /// configured segment size.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, EncryptionMetadata)> {
        if !self.options.enabled {
            return Ok((
                plaintext.to_vec(),
                EncryptionMetadata {
                    algorithm: EncryptionMetadata::NONE.to_string(),
                    nonce: Vec::new(),
                    kek_version: 0,
                    dek_version: 0,
                    chunks: Vec::new(),
                },
            ));
        }

        let ring = self.read_ring()?;
        let dek = ring.active()?;

        let chunk_size = self.options.chunking.max_chunk_size_kb * 1024;
        let chunked =
            self.options.chunking.enabled && chunk_size > 0 && plaintext.len() > chunk_size;

        if !chunked {
            let mut nonce = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);
            let ciphertext = dek.encrypt_with_nonce(&nonce, plaintext)?;
            return Ok((
                ciphertext,
                EncryptionMetadata {
                    algorithm: EncryptionMetadata::AES_256_GCM.to_string(),
                    nonce: nonce.to_vec(),
                    kek_version: ring.kek_version,
                    dek_version: ring.active_dek,
                    chunks: Vec::new(),
                },
            ));
        }

        let chunk_count = plaintext.len().div_ceil(chunk_size);
        if chunk_count > self.options.chunking.max_chunks_per_secret {
            return Err(ArxError::resource_exhausted(format!(
                "secret exceeds {} chunks",
                self.options.chunking.max_chunks_per_secret
            )));
        }

        let mut ciphertext = Vec::with_capacity(plaintext.len() + chunk_count * 16);
        let mut chunks = Vec::with_capacity(chunk_count);
        for (index, segment) in plaintext.chunks(chunk_size).enumerate() {
            let mut nonce = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);
            let sealed = dek.encrypt_with_nonce(&nonce, segment)?;
            chunks.push(ChunkMeta {
                index: index as u32,
                ciphertext_len: sealed.len() as u32,
                nonce: nonce.to_vec(),
            });
            ciphertext.extend_from_slice(&sealed);
        }

        Ok((
            ciphertext,
            EncryptionMetadata {
                algorithm: EncryptionMetadata::AES_256_GCM.to_string(),
                nonce: Vec::new(),
                kek_version: ring.kek_version,
                dek_version: ring.active_dek,
                chunks,
            },
        ))
    }

    /// Decrypt a payload using the DEK version recorded in its metadata.
    pub fn decrypt(&self, ciphertext: &[u8], metadata: &EncryptionMetadata) -> Result<Vec<u8>> {
        if !metadata.is_encrypted() {
            return Ok(ciphertext.to_vec());
        }
        if !self.options.enabled {
            return Err(ArxError::CryptoUnavailable);
        }
        if metadata.algorithm != EncryptionMetadata::AES_256_GCM {
            return Err(ArxError::CryptoUnavailable);
        }

        let ring = self.read_ring()?;
        let dek = ring.dek(metadata.dek_version)?;

        if !metadata.is_chunked() {
            return dek.decrypt_with_nonce(&metadata.nonce, ciphertext);
        }

        let mut chunks = metadata.chunks.clone();
        chunks.sort_by_key(|c| c.index);

        let total: usize = chunks.iter().map(|c| c.ciphertext_len as usize).sum();
        if total != ciphertext.len() {
            return Err(ArxError::CryptoIntegrity);
        }

        let mut plaintext = Vec::with_capacity(ciphertext.len());
        let mut offset = 0usize;
        for chunk in &chunks {
            let end = offset + chunk.ciphertext_len as usize;
            let segment = dek.decrypt_with_nonce(&chunk.nonce, &ciphertext[offset..end])?;
            plaintext.extend_from_slice(&segment);
            offset = end;
        }
        Ok(plaintext)
    }

    /// Issue a new DEK version. The previous active version is retired:
    /// still able to decrypt, never used for new writes.
    pub fn rotate_dek(&self) -> Result<u32> {
        if !self.options.enabled {
            return Err(ArxError::CryptoUnavailable);
        }
        let mut ring = self.write_ring()?;
        let prior = ring.active_dek;
        if let Some(entry) = ring.deks.get_mut(&prior) {
            entry.retired = true;
        }
        let next = ring.deks.keys().max().copied().unwrap_or(0) + 1;
        ring.deks.insert(
            next,
            DekEntry {
                material: KeyMaterial::generate(),
                retired: false,
            },
        );
        ring.active_dek = next;
        Self::save_ring(&self.options.dek_path, &ring)?;

        if ring.kek.is_none() {
            // Recipient material tracks the active DEK when no KEK is used.
            *self
                .recipient
                .write()
                .map_err(|_| ArxError::internal("recipient lock poisoned"))? =
                Some(Self::recipient_material(&ring)?);
        }

        info!(dek_version = next, "DEK rotated");
        Ok(next)
    }

    /// Replace the KEK and re-wrap every DEK under it. The journal written
    /// first makes the operation resumable: either all DEKs end up wrapped
    /// under the new KEK or startup can still reach them via the pre-image.
    pub fn rotate_kek(&self) -> Result<u32> {
        if !self.options.enabled || !self.options.use_kek {
            return Err(ArxError::CryptoUnavailable);
        }
        let mut ring = self.write_ring()?;
        let old_kek = ring.kek.clone().ok_or(ArxError::CryptoUnavailable)?;
        let old_version = ring.kek_version;
        let new_version = old_version + 1;

        let journal = RotationJournal {
            old_version,
            new_version,
            old_kek: B64.encode(old_kek.bytes()),
        };
        journal.store(&self.options.kek_path)?;

        let new_kek = KeyMaterial::generate();
        keyfile::write_key(&self.options.kek_path, &new_kek)?;

        ring.kek = Some(new_kek);
        ring.kek_version = new_version;
        Self::save_ring(&self.options.dek_path, &ring)?;

        RotationJournal::clear(&self.options.kek_path)?;

        *self
            .recipient
            .write()
            .map_err(|_| ArxError::internal("recipient lock poisoned"))? =
            Some(Self::recipient_material(&ring)?);

        info!(kek_version = new_version, "KEK rotated");
        Ok(new_version)
    }

    /// Wrap the active DEK for a share recipient. The blob is owned by the
    /// ShareRecord and destroyed on revocation.
    pub fn wrap_for_recipient(&self, recipient_id: i64, is_group: bool) -> Result<Vec<u8>> {
        if !self.options.enabled {
            // Sharing still works without encryption; there is just no key
            // material to escrow.
            return Ok(Vec::new());
        }
        let ring = self.read_ring()?;
        let dek = ring.active()?;

        let guard = self
            .recipient
            .read()
            .map_err(|_| ArxError::internal("recipient lock poisoned"))?;
        let material = guard.as_ref().ok_or(ArxError::CryptoUnavailable)?;
        let wrapping = KeyMaterial::from_bytes(material.wrapping_key(recipient_id, is_group)?);
        wrapping.seal(dek.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(dir: &std::path::Path) -> CryptoOptions {
        CryptoOptions {
            enabled: true,
            use_kek: true,
            kek_path: dir.join("kek.key"),
            dek_path: dir.join("dek.ring"),
            chunking: ChunkingOptions {
                enabled: true,
                max_chunk_size_kb: 1,
                max_chunks_per_secret: 8,
            },
        }
    }

    #[test]
    fn round_trip_small_payload() {
        let dir = tempdir().unwrap();
        let engine = CryptoEngine::open(options(dir.path())).unwrap();

        let (ct, meta) = engine.encrypt(b"hunter2").unwrap();
        assert_eq!(meta.algorithm, EncryptionMetadata::AES_256_GCM);
        assert_eq!(meta.kek_version, 1);
        assert_eq!(meta.dek_version, 1);
        assert!(!meta.is_chunked());
        assert_ne!(ct, b"hunter2");
        assert_eq!(engine.decrypt(&ct, &meta).unwrap(), b"hunter2");
    }

    #[test]
    fn round_trip_chunk_boundaries() {
        let dir = tempdir().unwrap();
        let engine = CryptoEngine::open(options(dir.path())).unwrap();
        let chunk = 1024usize;

        for size in [chunk - 1, chunk, chunk + 1, 3 * chunk, 3 * chunk + 17] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let (ct, meta) = engine.encrypt(&payload).unwrap();
            if size > chunk {
                assert!(meta.is_chunked(), "size {size} should chunk");
                assert_eq!(meta.chunks.len(), size.div_ceil(chunk));
            } else {
                assert!(!meta.is_chunked(), "size {size} should not chunk");
            }
            assert_eq!(engine.decrypt(&ct, &meta).unwrap(), payload, "size {size}");
        }
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = CryptoEngine::open(options(dir.path())).unwrap();
        // 9 chunks of 1 KiB against a cap of 8.
        let payload = vec![0u8; 8 * 1024 + 1];
        let err = engine.encrypt(&payload).unwrap_err();
        assert_eq!(err.kind(), arx_types::ErrorKind::ResourceExhausted);
    }

    #[test]
    fn tampered_ciphertext_fails_integrity() {
        let dir = tempdir().unwrap();
        let engine = CryptoEngine::open(options(dir.path())).unwrap();
        let (mut ct, meta) = engine.encrypt(b"payload").unwrap();
        ct[0] ^= 0xff;
        assert!(matches!(
            engine.decrypt(&ct, &meta),
            Err(ArxError::CryptoIntegrity)
        ));
    }

    #[test]
    fn unknown_dek_version_is_key_missing() {
        let dir = tempdir().unwrap();
        let engine = CryptoEngine::open(options(dir.path())).unwrap();
        let (ct, mut meta) = engine.encrypt(b"payload").unwrap();
        meta.dek_version = 42;
        assert!(matches!(
            engine.decrypt(&ct, &meta),
            Err(ArxError::CryptoKeyMissing)
        ));
    }

    #[test]
    fn disabled_engine_passes_through() {
        let engine = CryptoEngine::disabled();
        let (ct, meta) = engine.encrypt(b"plain").unwrap();
        assert_eq!(ct, b"plain");
        assert!(!meta.is_encrypted());
        assert_eq!(engine.decrypt(&ct, &meta).unwrap(), b"plain");
    }

    #[test]
    fn dek_rotation_keeps_old_reads() {
        let dir = tempdir().unwrap();
        let engine = CryptoEngine::open(options(dir.path())).unwrap();

        let (old_ct, old_meta) = engine.encrypt(b"v1 payload").unwrap();
        let new_version = engine.rotate_dek().unwrap();
        assert_eq!(new_version, 2);

        let (new_ct, new_meta) = engine.encrypt(b"v2 payload").unwrap();
        assert_eq!(new_meta.dek_version, 2);

        assert_eq!(engine.decrypt(&old_ct, &old_meta).unwrap(), b"v1 payload");
        assert_eq!(engine.decrypt(&new_ct, &new_meta).unwrap(), b"v2 payload");
    }

    #[test]
    fn kek_rotation_preserves_all_ciphertexts() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path());
        let engine = CryptoEngine::open(opts.clone()).unwrap();

        let (ct, meta) = engine.encrypt(b"sealed before rotation").unwrap();
        engine.rotate_dek().unwrap();
        let new_kek = engine.rotate_kek().unwrap();
        assert_eq!(new_kek, 2);

        assert_eq!(
            engine.decrypt(&ct, &meta).unwrap(),
            b"sealed before rotation"
        );

        // A fresh engine loading from disk must see the same state.
        drop(engine);
        let reopened = CryptoEngine::open(opts).unwrap();
        let status = reopened.status().unwrap();
        assert_eq!(status.kek_version, 2);
        assert_eq!(status.dek_version, 2);
        assert_eq!(
            reopened.decrypt(&ct, &meta).unwrap(),
            b"sealed before rotation"
        );
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path());

        let (ct, meta) = {
            let engine = CryptoEngine::open(opts.clone()).unwrap();
            engine.encrypt(b"durable").unwrap()
        };

        let engine = CryptoEngine::open(opts).unwrap();
        assert_eq!(engine.decrypt(&ct, &meta).unwrap(), b"durable");
    }

    #[test]
    fn recipient_wrap_is_distinct_per_recipient() {
        let dir = tempdir().unwrap();
        let engine = CryptoEngine::open(options(dir.path())).unwrap();

        let a = engine.wrap_for_recipient(7, false).unwrap();
        let b = engine.wrap_for_recipient(8, false).unwrap();
        assert!(!a.is_empty());
        // Nonces are random, but the wrapped payloads must also differ in
        // key: unwrapping a under b's derived key must fail. Covered at the
        // derivation layer; here we only assert the blobs are non-trivial.
        assert_ne!(a, b);
    }
}
