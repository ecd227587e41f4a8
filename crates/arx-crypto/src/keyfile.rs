//! Key files on disk: strict-mode reads/writes, permission audit, and the
//! KEK rotation journal.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use arx_types::{ArxError, Result};

use crate::keys::KeyMaterial;
use crate::KEY_SIZE;

#[cfg(unix)]
const OWNER_ONLY: u32 = 0o600;

/// Outcome of a key-file permission audit.
#[derive(Debug, Clone, Serialize)]
pub struct KeyFileReport {
    pub path: String,
    pub exists: bool,
    /// Octal mode bits, unix only; `None` where the platform has no mode.
    pub mode: Option<u32>,
    pub owner_only: bool,
}

/// Inspect a key file's permissions without reading its contents.
pub fn audit_key_file(path: &Path) -> KeyFileReport {
    let exists = path.exists();
    #[cfg(unix)]
    let mode = if exists {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
    } else {
        None
    };
    #[cfg(not(unix))]
    let mode: Option<u32> = None;

    #[cfg(unix)]
    let owner_only = mode.map(|m| m & 0o077 == 0).unwrap_or(false);
    #[cfg(not(unix))]
    let owner_only = exists;

    KeyFileReport {
        path: path.display().to_string(),
        exists,
        mode,
        owner_only,
    }
}

/// Restrict a key file to owner read/write.
pub fn fix_key_file_mode(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(OWNER_ONLY);
        fs::set_permissions(path, perms)
            .map_err(|e| ArxError::internal(format!("chmod {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

pub(crate) fn read_key(path: &Path) -> Result<KeyMaterial> {
    let bytes = fs::read(path).map_err(|_| ArxError::CryptoUnavailable)?;
    if bytes.len() != KEY_SIZE {
        return Err(ArxError::CryptoUnavailable);
    }
    KeyMaterial::from_slice(&bytes)
}

/// Write a key file with owner-only mode set before any bytes land.
pub(crate) fn write_key(path: &Path, material: &KeyMaterial) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ArxError::internal(format!("create {}: {e}", parent.display())))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(OWNER_ONLY);
    }
    let mut file = options
        .open(path)
        .map_err(|e| ArxError::internal(format!("open {}: {e}", path.display())))?;
    file.write_all(material.bytes())
        .map_err(|e| ArxError::internal(format!("write {}: {e}", path.display())))?;
    file.sync_all()
        .map_err(|e| ArxError::internal(format!("sync {}: {e}", path.display())))?;
    // Pre-existing files keep their old mode; normalize.
    fix_key_file_mode(path)
}

pub(crate) fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ArxError::internal(format!("read {}: {e}", path.display()))),
    }
}

pub(crate) fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ArxError::internal(format!("create {}: {e}", parent.display())))?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(OWNER_ONLY);
    }
    let mut file = options
        .open(path)
        .map_err(|e| ArxError::internal(format!("open {}: {e}", path.display())))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| ArxError::internal(format!("write {}: {e}", path.display())))?;
    file.sync_all()
        .map_err(|e| ArxError::internal(format!("sync {}: {e}", path.display())))
}

/// Pre-image journal written before a KEK rotation touches the key file.
///
/// If the process dies between replacing the KEK file and re-wrapping the
/// ring, startup finds this journal and can still unwrap DEKs sealed under
/// the previous KEK.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RotationJournal {
    pub old_version: u32,
    pub new_version: u32,
    /// base64 of the outgoing KEK bytes.
    pub old_kek: String,
}

impl RotationJournal {
    pub fn path_for(kek_path: &Path) -> std::path::PathBuf {
        let mut p = kek_path.as_os_str().to_owned();
        p.push(".rotation");
        std::path::PathBuf::from(p)
    }

    pub fn load(kek_path: &Path) -> Result<Option<Self>> {
        match read_text(&Self::path_for(kek_path))? {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|_| ArxError::CryptoUnavailable),
            None => Ok(None),
        }
    }

    pub fn store(&self, kek_path: &Path) -> Result<()> {
        let text = serde_json::to_string(self)
            .map_err(|e| ArxError::internal(format!("encode rotation journal: {e}")))?;
        write_text(&Self::path_for(kek_path), &text)
    }

    pub fn clear(kek_path: &Path) -> Result<()> {
        let path = Self::path_for(kek_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArxError::internal(format!(
                "remove {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kek.key");
        let key = KeyMaterial::generate();
        write_key(&path, &key).unwrap();

        let loaded = read_key(&path).unwrap();
        assert_eq!(loaded.bytes(), key.bytes());
    }

    #[cfg(unix)]
    #[test]
    fn written_key_is_owner_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kek.key");
        write_key(&path, &KeyMaterial::generate()).unwrap();

        let report = audit_key_file(&path);
        assert!(report.exists);
        assert!(report.owner_only, "mode was {:?}", report.mode);
    }

    #[test]
    fn truncated_key_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kek.key");
        fs::write(&path, [0u8; 16]).unwrap();
        assert!(matches!(read_key(&path), Err(ArxError::CryptoUnavailable)));
    }

    #[test]
    fn journal_round_trip_and_clear() {
        let dir = tempdir().unwrap();
        let kek_path = dir.path().join("kek.key");

        assert!(RotationJournal::load(&kek_path).unwrap().is_none());

        let journal = RotationJournal {
            old_version: 1,
            new_version: 2,
            old_kek: "AAAA".to_string(),
        };
        journal.store(&kek_path).unwrap();

        let loaded = RotationJournal::load(&kek_path).unwrap().unwrap();
        assert_eq!(loaded.old_version, 1);
        assert_eq!(loaded.new_version, 2);

        RotationJournal::clear(&kek_path).unwrap();
        assert!(RotationJournal::load(&kek_path).unwrap().is_none());
    }
}
