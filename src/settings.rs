//! On-disk settings file (`cabinet.toml`).
//!
//! Every field has a default so an empty or missing file yields a working
//! local setup. Environment variables override individual values during
//! [`crate::config::Config::resolve`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default settings file name, looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "cabinet.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub audit: AuditSettings,
    pub export: ExportSettings,
    pub log: LogSettings,
    pub defaults: TenantDefaultSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the libSQL file. Defaults to the platform data directory.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory for uploaded documents. Defaults to the platform data directory.
    pub root: Option<String>,
    pub max_upload_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: None,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    pub path: String,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "logs/audit.jsonl".to_string(),
            hash_chain: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub delimiter: String,
    pub decimal_comma: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            decimal_comma: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub json: bool,
    pub filter: Option<String>,
}

/// Values copied into a tenant's cabinet settings when the tenant is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantDefaultSettings {
    pub currency: String,
    pub vat_rate: String,
    pub hourly_rate: String,
    pub rounding_increment_minutes: u32,
    pub rounding_mode: String,
    pub invoice_prefix: String,
    pub credit_note_prefix: String,
    pub payment_terms_days: u32,
}

impl Default for TenantDefaultSettings {
    fn default() -> Self {
        Self {
            currency: "EUR".to_string(),
            vat_rate: "20".to_string(),
            hourly_rate: "150".to_string(),
            rounding_increment_minutes: 6,
            rounding_mode: "up".to_string(),
            invoice_prefix: "F".to_string(),
            credit_note_prefix: "AV".to_string(),
            payment_terms_days: 30,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings file at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::ReadFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        Self::from_toml(&raw).map_err(|reason| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Settings file location: `CABINET_CONFIG` or `./cabinet.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os("CABINET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[test]
    fn empty_file_uses_defaults() {
        let settings = Settings::from_toml("").expect("parse");
        assert_eq!(settings.server.bind, "127.0.0.1:8080");
        assert_eq!(settings.defaults.rounding_increment_minutes, 6);
        assert_eq!(settings.defaults.invoice_prefix, "F");
        assert!(settings.audit.hash_chain);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = Settings::from_toml(
            "[export]\ndelimiter = \";\"\n\n[defaults]\nrounding_increment_minutes = 15\n",
        )
        .expect("parse");
        assert_eq!(settings.export.delimiter, ";");
        assert!(!settings.export.decimal_comma);
        assert_eq!(settings.defaults.rounding_increment_minutes, 15);
        assert_eq!(settings.defaults.rounding_mode, "up");
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(settings.storage.max_upload_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn malformed_file_reports_parse_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cabinet.toml");
        std::fs::write(&path, "[server\nbind = 1").expect("write");
        let err = Settings::load(&path).expect_err("must fail");
        assert!(matches!(err, crate::error::ConfigError::ParseFailed { .. }));
    }
}
