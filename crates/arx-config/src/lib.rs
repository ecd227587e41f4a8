//! Declarative configuration for the Arx service.
//!
//! One TOML file enumerates every tunable: transports, storage, encryption,
//! chunking, security posture, and retention. Missing sections fall back to
//! defaults so a minimal file stays minimal.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Languages the built-in message catalog knows about.
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "de", "fr", "es"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxConfig {
    pub locale: LocaleConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub secrets: SecretsConfig,
    pub security: SecurityConfig,
    pub soft_delete: SoftDeleteConfig,
    pub purge: PurgeConfig,
}

impl Default for ArxConfig {
    fn default() -> Self {
        Self {
            locale: LocaleConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            secrets: SecretsConfig::default(),
            security: SecurityConfig::default(),
            soft_delete: SoftDeleteConfig::default(),
            purge: PurgeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    pub language: String,
    pub fallback_language: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            fallback_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub grpc: GrpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub port: u16,
    pub tls: TlsConfig,
    pub ratelimit: RateLimitConfig,
    pub swagger_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8200,
            tls: TlsConfig::default(),
            ratelimit: RateLimitConfig::default(),
            swagger_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub enabled: bool,
    pub port: u16,
    pub tls: TlsConfig,
    pub ratelimit: RateLimitConfig,
    pub reflection_enabled: bool,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8201,
            tls: TlsConfig::default(),
            ratelimit: RateLimitConfig::default(),
            reflection_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub auto_cert: bool,
    pub domains: Vec<String>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub allowed_ciphers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 50,
            burst: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: DatabaseConfig,
    pub encryption: EncryptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/arx.db"),
            max_open_conns: 16,
            max_idle_conns: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub use_kek: bool,
    pub kek_path: PathBuf,
    pub dek_path: PathBuf,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_kek: true,
            kek_path: PathBuf::from("./data/keys/kek.key"),
            dek_path: PathBuf::from("./data/keys/dek.ring"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub chunking: ChunkingConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub enabled: bool,
    pub max_chunk_size_kb: u32,
    pub max_chunks_per_secret: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chunk_size_kb: 256,
            max_chunks_per_secret: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_secrets_per_user: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_secrets_per_user: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_file_permission_check: bool,
    pub auto_fix_file_permissions: bool,
    pub allow_unsafe_file_permissions: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_file_permission_check: true,
            auto_fix_file_permissions: true,
            allow_unsafe_file_permissions: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftDeleteConfig {
    pub enabled: bool,
    pub retention_days: u32,
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub enabled: bool,
    /// Cron-style schedule evaluated by the external purge job.
    pub schedule: String,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: "0 3 * * *".to_string(),
        }
    }
}

impl ArxConfig {
    /// Load from `path`, or return defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("serialize: {e}")))?;
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, lang) in [
            ("locale.language", &self.locale.language),
            ("locale.fallback_language", &self.locale.fallback_language),
        ] {
            if !SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "{field}: unsupported language {lang:?}"
                )));
            }
        }

        if !self.server.http.enabled && !self.server.grpc.enabled {
            return Err(ConfigError::Invalid(
                "at least one of server.http or server.grpc must be enabled".to_string(),
            ));
        }

        if self.storage.database.max_open_conns == 0 {
            return Err(ConfigError::Invalid(
                "storage.database.max_open_conns must be at least 1".to_string(),
            ));
        }
        if self.storage.database.max_idle_conns > self.storage.database.max_open_conns {
            return Err(ConfigError::Invalid(
                "storage.database.max_idle_conns exceeds max_open_conns".to_string(),
            ));
        }

        if self.secrets.chunking.enabled {
            if self.secrets.chunking.max_chunk_size_kb == 0 {
                return Err(ConfigError::Invalid(
                    "secrets.chunking.max_chunk_size_kb must be at least 1".to_string(),
                ));
            }
            if self.secrets.chunking.max_chunks_per_secret == 0 {
                return Err(ConfigError::Invalid(
                    "secrets.chunking.max_chunks_per_secret must be at least 1".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ArxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.locale.language, "en");
        assert_eq!(config.server.http.port, 8200);
        assert_eq!(config.server.grpc.port, 8201);
        assert!(config.storage.encryption.enabled);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArxConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.http.port, 8200);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arx.toml");

        let mut config = ArxConfig::default();
        config.server.http.port = 9000;
        config.secrets.chunking.max_chunk_size_kb = 128;
        config.save(&path).unwrap();

        let loaded = ArxConfig::load(&path).unwrap();
        assert_eq!(loaded.server.http.port, 9000);
        assert_eq!(loaded.secrets.chunking.max_chunk_size_kb, 128);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arx.toml");
        fs::write(&path, "[server.http]\nport = 9999\n").unwrap();

        let loaded = ArxConfig::load(&path).unwrap();
        assert_eq!(loaded.server.http.port, 9999);
        assert_eq!(loaded.server.grpc.port, 8201);
        assert!(loaded.security.enable_file_permission_check);
    }

    #[test]
    fn rejects_unknown_language() {
        let mut config = ArxConfig::default();
        config.locale.language = "tlh".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_both_transports_disabled() {
        let mut config = ArxConfig::default();
        config.server.http.enabled = false;
        config.server.grpc.enabled = false;
        assert!(config.validate().is_err());
    }
}
