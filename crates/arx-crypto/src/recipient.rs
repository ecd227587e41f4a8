//! Per-recipient wrapping material for shared secrets.
//!
//! Each share stores the secret's DEK wrapped under a key specific to the
//! recipient, so revoking the share destroys the only copy that recipient
//! could ever be served. The default source derives that key from the KEK
//! via HKDF-SHA256; real recipient-held key material can implement
//! [`RecipientMaterial`] instead.

use hkdf::Hkdf;
use sha2::Sha256;

use arx_types::{ArxError, Result};

use crate::keys::KeyMaterial;
use crate::KEY_SIZE;

const DERIVE_SALT: &[u8] = b"arx-recipient-wrap-v1";

/// Source of the 32-byte wrapping key for a share recipient.
pub trait RecipientMaterial: Send + Sync {
    fn wrapping_key(&self, recipient_id: i64, is_group: bool) -> Result<[u8; KEY_SIZE]>;
}

/// Deterministic derivation from the KEK of a given version.
///
/// Holds only the HKDF pseudo-random key, not the KEK itself; rebuilt by
/// the engine whenever the KEK rotates.
pub struct DerivedRecipientMaterial {
    prk: hkdf::Hkdf<Sha256>,
    kek_version: u32,
}

impl DerivedRecipientMaterial {
    pub(crate) fn new(kek: &KeyMaterial, kek_version: u32) -> Self {
        Self {
            prk: Hkdf::<Sha256>::new(Some(DERIVE_SALT), kek.bytes()),
            kek_version,
        }
    }

    pub fn kek_version(&self) -> u32 {
        self.kek_version
    }
}

impl RecipientMaterial for DerivedRecipientMaterial {
    fn wrapping_key(&self, recipient_id: i64, is_group: bool) -> Result<[u8; KEY_SIZE]> {
        let kind = if is_group { "group" } else { "user" };
        let info = format!("kek{}:{kind}:{recipient_id}", self.kek_version);
        let mut okm = [0u8; KEY_SIZE];
        self.prk
            .expand(info.as_bytes(), &mut okm)
            .map_err(|_| ArxError::internal("recipient key derivation failed"))?;
        Ok(okm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let kek = KeyMaterial::generate();
        let a = DerivedRecipientMaterial::new(&kek, 1);
        let b = DerivedRecipientMaterial::new(&kek, 1);
        assert_eq!(
            a.wrapping_key(7, false).unwrap(),
            b.wrapping_key(7, false).unwrap()
        );
    }

    #[test]
    fn distinct_per_recipient_kind_and_kek_version() {
        let kek = KeyMaterial::generate();
        let v1 = DerivedRecipientMaterial::new(&kek, 1);
        let v2 = DerivedRecipientMaterial::new(&kek, 2);

        let user7 = v1.wrapping_key(7, false).unwrap();
        assert_ne!(user7, v1.wrapping_key(8, false).unwrap());
        assert_ne!(user7, v1.wrapping_key(7, true).unwrap());
        assert_ne!(user7, v2.wrapping_key(7, false).unwrap());
    }
}
