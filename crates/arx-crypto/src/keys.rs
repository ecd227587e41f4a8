//! In-memory key hierarchy: KEK, versioned DEKs, and the persisted ring.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

use arx_types::{ArxError, Result};

use crate::{KEY_SIZE, NONCE_SIZE};

/// A 32-byte symmetric key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

impl KeyMaterial {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(ArxError::CryptoUnavailable);
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    fn cipher(&self) -> Aes256Gcm {
        // Key size is fixed by construction.
        Aes256Gcm::new_from_slice(&self.bytes).expect("32-byte key")
    }

    /// AES-256-GCM seal with a fresh random nonce; output is nonce || ct.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| ArxError::internal("seal failed"))?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Inverse of [`seal`](Self::seal).
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE {
            return Err(ArxError::CryptoIntegrity);
        }
        let (nonce_bytes, ct) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher()
            .decrypt(nonce, ct)
            .map_err(|_| ArxError::CryptoIntegrity)
    }

    /// Encrypt with an explicit nonce, used for payload segments whose nonce
    /// is recorded in the version metadata.
    pub fn encrypt_with_nonce(&self, nonce_bytes: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| ArxError::internal("encrypt failed"))
    }

    pub fn decrypt_with_nonce(&self, nonce_bytes: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(ArxError::CryptoIntegrity);
        }
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|_| ArxError::CryptoIntegrity)
    }
}

/// One DEK version held in memory.
pub(crate) struct DekEntry {
    pub material: KeyMaterial,
    /// Retired DEKs decrypt old ciphertexts but never encrypt new ones.
    pub retired: bool,
}

/// The live key hierarchy: current KEK plus every DEK version ever issued.
pub(crate) struct KeyRing {
    pub kek: Option<KeyMaterial>,
    pub kek_version: u32,
    pub deks: BTreeMap<u32, DekEntry>,
    pub active_dek: u32,
}

impl KeyRing {
    pub fn active(&self) -> Result<&KeyMaterial> {
        self.deks
            .get(&self.active_dek)
            .filter(|e| !e.retired)
            .map(|e| &e.material)
            .ok_or(ArxError::CryptoUnavailable)
    }

    pub fn dek(&self, version: u32) -> Result<&KeyMaterial> {
        self.deks
            .get(&version)
            .map(|e| &e.material)
            .ok_or(ArxError::CryptoKeyMissing)
    }
}

/// Serialized form of the ring file stored at `dek_path`. DEKs are wrapped
/// under the KEK version recorded here (or stored raw when `use_kek` is
/// off, signalled by `kek_version == 0`).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RingFile {
    pub kek_version: u32,
    pub active_dek: u32,
    pub deks: Vec<RingDek>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RingDek {
    pub version: u32,
    /// base64 of the wrapped (or raw) key bytes.
    pub key: String,
    #[serde(default)]
    pub retired: bool,
}

impl RingFile {
    pub fn from_ring(ring: &KeyRing) -> Result<Self> {
        let mut deks = Vec::with_capacity(ring.deks.len());
        for (version, entry) in &ring.deks {
            let key = match &ring.kek {
                Some(kek) => B64.encode(kek.seal(entry.material.bytes())?),
                None => B64.encode(entry.material.bytes()),
            };
            deks.push(RingDek {
                version: *version,
                key,
                retired: entry.retired,
            });
        }
        Ok(Self {
            kek_version: ring.kek_version,
            active_dek: ring.active_dek,
            deks,
        })
    }

    /// Rebuild the in-memory ring, unwrapping each DEK. When the recorded
    /// wrap fails under `kek`, `fallback_kek` (a mid-rotation pre-image) is
    /// tried and the entry is flagged for re-wrap by the caller.
    pub fn into_ring(
        self,
        kek: Option<KeyMaterial>,
        fallback_kek: Option<&KeyMaterial>,
    ) -> Result<(KeyRing, bool)> {
        let mut deks = BTreeMap::new();
        let mut needed_fallback = false;

        for entry in self.deks {
            let blob = B64
                .decode(&entry.key)
                .map_err(|_| ArxError::CryptoUnavailable)?;
            let material = match &kek {
                Some(kek_material) => match kek_material.open(&blob) {
                    Ok(raw) => KeyMaterial::from_slice(&raw)?,
                    Err(_) => {
                        let fallback = fallback_kek.ok_or(ArxError::CryptoKeyMissing)?;
                        needed_fallback = true;
                        KeyMaterial::from_slice(&fallback.open(&blob)?)?
                    }
                },
                None => KeyMaterial::from_slice(&blob)?,
            };
            deks.insert(
                entry.version,
                DekEntry {
                    material,
                    retired: entry.retired,
                },
            );
        }

        let ring = KeyRing {
            kek,
            kek_version: self.kek_version,
            deks,
            active_dek: self.active_dek,
        };
        // The active version must exist and be live.
        ring.active()?;
        Ok((ring, needed_fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = KeyMaterial::generate();
        let blob = key.seal(b"attack at dawn").unwrap();
        assert_eq!(key.open(&blob).unwrap(), b"attack at dawn");
    }

    #[test]
    fn open_rejects_tampering() {
        let key = KeyMaterial::generate();
        let mut blob = key.seal(b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(key.open(&blob), Err(ArxError::CryptoIntegrity)));
    }

    #[test]
    fn open_rejects_wrong_key() {
        let key = KeyMaterial::generate();
        let other = KeyMaterial::generate();
        let blob = key.seal(b"payload").unwrap();
        assert!(matches!(other.open(&blob), Err(ArxError::CryptoIntegrity)));
    }

    #[test]
    fn ring_file_round_trip_with_kek() {
        let kek = KeyMaterial::generate();
        let mut deks = BTreeMap::new();
        deks.insert(
            1,
            DekEntry {
                material: KeyMaterial::generate(),
                retired: true,
            },
        );
        deks.insert(
            2,
            DekEntry {
                material: KeyMaterial::generate(),
                retired: false,
            },
        );
        let ring = KeyRing {
            kek: Some(kek.clone()),
            kek_version: 3,
            deks,
            active_dek: 2,
        };
        let v2_bytes = *ring.dek(2).unwrap().bytes();

        let file = RingFile::from_ring(&ring).unwrap();
        let (restored, needed_fallback) = file.into_ring(Some(kek), None).unwrap();
        assert!(!needed_fallback);
        assert_eq!(restored.kek_version, 3);
        assert_eq!(restored.active_dek, 2);
        assert_eq!(restored.dek(2).unwrap().bytes(), &v2_bytes);
        assert!(restored.deks.get(&1).unwrap().retired);
    }

    #[test]
    fn ring_file_fallback_kek_recovers_pre_rotation_wrap() {
        let old_kek = KeyMaterial::generate();
        let new_kek = KeyMaterial::generate();
        let mut deks = BTreeMap::new();
        deks.insert(
            1,
            DekEntry {
                material: KeyMaterial::generate(),
                retired: false,
            },
        );
        let ring = KeyRing {
            kek: Some(old_kek.clone()),
            kek_version: 1,
            deks,
            active_dek: 1,
        };

        let file = RingFile::from_ring(&ring).unwrap();
        // Crash mid-rotation: the ring is still wrapped under the old KEK
        // but the key file already holds the new one.
        let (restored, needed_fallback) =
            file.into_ring(Some(new_kek), Some(&old_kek)).unwrap();
        assert!(needed_fallback);
        assert_eq!(
            restored.dek(1).unwrap().bytes(),
            ring.dek(1).unwrap().bytes()
        );
    }

    #[test]
    fn missing_active_dek_is_unavailable() {
        let ring = KeyRing {
            kek: None,
            kek_version: 0,
            deks: BTreeMap::new(),
            active_dek: 1,
        };
        assert!(matches!(ring.active(), Err(ArxError::CryptoUnavailable)));
        assert!(matches!(ring.dek(7), Err(ArxError::CryptoKeyMissing)));
    }
}
