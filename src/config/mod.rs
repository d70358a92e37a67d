//! Resolved runtime configuration.
//!
//! [`Settings`] carries what the operator wrote in `cabinet.toml`; [`Config`]
//! is the validated result after applying `CABINET_*` environment overrides.

pub(crate) mod helpers;

use std::net::SocketAddr;
use std::path::{Component, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::ConfigError;
use crate::settings::Settings;
use crate::timesheet::RoundingMode;
use helpers::{optional_env, parse_bool_env, parse_csv_list, parse_env, parse_string_env};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub max_upload_bytes: usize,
}

/// Audit log controls.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub hash_chain: bool,
}

/// CSV formatting options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportConfig {
    pub delimiter: u8,
    pub decimal_comma: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            decimal_comma: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub json: bool,
    pub filter: String,
}

/// Cabinet settings applied to newly created tenants.
#[derive(Debug, Clone)]
pub struct TenantDefaults {
    pub currency: String,
    pub vat_rate: Decimal,
    pub hourly_rate: Decimal,
    pub rounding_increment_minutes: u32,
    pub rounding_mode: RoundingMode,
    pub invoice_prefix: String,
    pub credit_note_prefix: String,
    pub payment_terms_days: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub audit: AuditConfig,
    pub export: ExportConfig,
    pub log: LogConfig,
    pub defaults: TenantDefaults,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("cabinet"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn validate_relative_safe_path(key: &str, raw: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "path must not be empty".to_string(),
        });
    }

    let raw_path = PathBuf::from(trimmed);
    let mut normalized = PathBuf::new();
    for component in raw_path.components() {
        match component {
            Component::ParentDir => {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "path must not contain '..' components".to_string(),
                });
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    if normalized.file_name().is_none() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "path must include a file name".to_string(),
        });
    }
    Ok(normalized)
}

fn parse_delimiter(raw: &str) -> Result<u8, ConfigError> {
    match raw {
        "," => Ok(b','),
        ";" => Ok(b';'),
        "\\t" | "\t" => Ok(b'\t'),
        other => Err(ConfigError::InvalidValue {
            key: "CABINET_CSV_DELIMITER".to_string(),
            message: format!("unsupported delimiter '{other}' (use ',', ';' or '\\t')"),
        }),
    }
}

fn parse_decimal(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    let value = Decimal::from_str(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    if value.is_sign_negative() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must not be negative".to_string(),
        });
    }
    Ok(value)
}

fn validate_prefix(key: &str, raw: &str) -> Result<String, ConfigError> {
    let prefix = raw.trim().to_ascii_uppercase();
    if prefix.is_empty()
        || prefix.len() > 8
        || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "prefix must be 1-8 ASCII letters or digits".to_string(),
        });
    }
    Ok(prefix)
}

impl TenantDefaults {
    fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = &settings.defaults;
        let rounding_mode_raw =
            parse_string_env("CABINET_ROUNDING_MODE", defaults.rounding_mode.clone())?;
        let rounding_mode = RoundingMode::from_db_value(&rounding_mode_raw.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "CABINET_ROUNDING_MODE".to_string(),
                message: format!("unsupported rounding mode '{rounding_mode_raw}'"),
            })?;
        let rounding_increment_minutes = parse_env(
            "CABINET_ROUNDING_INCREMENT",
            defaults.rounding_increment_minutes,
        )?;
        if rounding_increment_minutes > 60 {
            return Err(ConfigError::InvalidValue {
                key: "CABINET_ROUNDING_INCREMENT".to_string(),
                message: "increment must be at most 60 minutes".to_string(),
            });
        }

        Ok(Self {
            currency: parse_string_env("CABINET_CURRENCY", defaults.currency.clone())?
                .trim()
                .to_ascii_uppercase(),
            vat_rate: parse_decimal(
                "CABINET_VAT_RATE",
                &parse_string_env("CABINET_VAT_RATE", defaults.vat_rate.clone())?,
            )?,
            hourly_rate: parse_decimal(
                "CABINET_HOURLY_RATE",
                &parse_string_env("CABINET_HOURLY_RATE", defaults.hourly_rate.clone())?,
            )?,
            rounding_increment_minutes,
            rounding_mode,
            invoice_prefix: validate_prefix(
                "CABINET_INVOICE_PREFIX",
                &parse_string_env("CABINET_INVOICE_PREFIX", defaults.invoice_prefix.clone())?,
            )?,
            credit_note_prefix: validate_prefix(
                "CABINET_CREDIT_NOTE_PREFIX",
                &parse_string_env(
                    "CABINET_CREDIT_NOTE_PREFIX",
                    defaults.credit_note_prefix.clone(),
                )?,
            )?,
            payment_terms_days: parse_env(
                "CABINET_PAYMENT_TERMS_DAYS",
                defaults.payment_terms_days,
            )?,
        })
    }
}

impl Config {
    /// Validate settings and apply environment overrides.
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let bind_raw = parse_string_env("CABINET_BIND", settings.server.bind.clone())?;
        let bind = bind_raw
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "CABINET_BIND".to_string(),
                message: format!("'{bind_raw}': {e}"),
            })?;
        let allowed_origins = match optional_env("CABINET_ALLOWED_ORIGINS")? {
            Some(raw) => parse_csv_list(&raw),
            None => settings.server.allowed_origins.clone(),
        };

        let data_dir = default_data_dir();
        let database_path = match optional_env("CABINET_DB_PATH")?
            .or(settings.database.path.clone())
        {
            Some(raw) => validate_relative_safe_path("CABINET_DB_PATH", &raw)?,
            None => data_dir.join("cabinet.db"),
        };
        let storage_root = match optional_env("CABINET_STORAGE_ROOT")?
            .or(settings.storage.root.clone())
        {
            Some(raw) => validate_relative_safe_path("CABINET_STORAGE_ROOT", &raw)?,
            None => data_dir.join("documents"),
        };
        let max_upload_bytes =
            parse_env("CABINET_MAX_UPLOAD_BYTES", settings.storage.max_upload_bytes)?;
        if max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CABINET_MAX_UPLOAD_BYTES".to_string(),
                message: "upload limit must be greater than 0".to_string(),
            });
        }

        let delimiter_raw =
            parse_string_env("CABINET_CSV_DELIMITER", settings.export.delimiter.clone())?;

        Ok(Self {
            server: ServerConfig {
                bind,
                allowed_origins,
            },
            database: DatabaseConfig {
                path: database_path,
            },
            storage: StorageConfig {
                root: storage_root,
                max_upload_bytes,
            },
            audit: AuditConfig {
                enabled: parse_bool_env("CABINET_AUDIT_ENABLED", settings.audit.enabled)?,
                path: validate_relative_safe_path(
                    "CABINET_AUDIT_PATH",
                    &parse_string_env("CABINET_AUDIT_PATH", settings.audit.path.clone())?,
                )?,
                hash_chain: parse_bool_env("CABINET_AUDIT_HASH_CHAIN", settings.audit.hash_chain)?,
            },
            export: ExportConfig {
                delimiter: parse_delimiter(&delimiter_raw)?,
                decimal_comma: parse_bool_env(
                    "CABINET_CSV_DECIMAL_COMMA",
                    settings.export.decimal_comma,
                )?,
            },
            log: LogConfig {
                json: parse_bool_env("CABINET_LOG_JSON", settings.log.json)?,
                filter: settings
                    .log
                    .filter
                    .clone()
                    .unwrap_or_else(|| "cabinet=info,tower_http=info".to_string()),
            },
            defaults: TenantDefaults::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rust_decimal_macros::dec;

    use super::{Config, parse_delimiter, validate_prefix, validate_relative_safe_path};
    use crate::error::ConfigError;
    use crate::settings::Settings;
    use crate::timesheet::RoundingMode;

    #[test]
    fn resolve_uses_defaults() {
        let config = Config::resolve(&Settings::default()).expect("config");
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.export.delimiter, b',');
        assert!(config.audit.enabled);
        assert_eq!(config.audit.path, PathBuf::from("logs/audit.jsonl"));
        assert_eq!(config.defaults.vat_rate, dec!(20));
        assert_eq!(config.defaults.rounding_mode, RoundingMode::Up);
        assert_eq!(config.defaults.invoice_prefix, "F");
    }

    #[test]
    fn resolve_rejects_bad_bind_address() {
        let mut settings = Settings::default();
        settings.server.bind = "not-an-address".to_string();
        let err = Config::resolve(&settings).expect_err("must fail");
        let ConfigError::InvalidValue { key, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "CABINET_BIND");
    }

    #[test]
    fn resolve_rejects_unknown_rounding_mode() {
        let mut settings = Settings::default();
        settings.defaults.rounding_mode = "sideways".to_string();
        assert!(Config::resolve(&settings).is_err());
    }

    #[test]
    fn resolve_rejects_negative_vat_rate() {
        let mut settings = Settings::default();
        settings.defaults.vat_rate = "-5".to_string();
        assert!(Config::resolve(&settings).is_err());
    }

    #[test]
    fn relative_safe_path_normalizes_cur_dir() {
        let path = validate_relative_safe_path("K", "./logs/./audit.jsonl").expect("valid");
        assert_eq!(path, PathBuf::from("logs/audit.jsonl"));
    }

    #[test]
    fn relative_safe_path_rejects_parent_traversal() {
        let err = validate_relative_safe_path("K", "logs/../../etc/passwd").expect_err("reject");
        let ConfigError::InvalidValue { message, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert!(message.contains(".."), "unexpected message: {message}");
    }

    #[test]
    fn delimiter_accepts_semicolon_and_tab() {
        assert_eq!(parse_delimiter(";").expect("semicolon"), b';');
        assert_eq!(parse_delimiter("\\t").expect("tab"), b'\t');
        assert!(parse_delimiter("|").is_err());
    }

    #[test]
    fn prefix_is_uppercased_and_validated() {
        assert_eq!(validate_prefix("K", " fa ").expect("valid"), "FA");
        assert!(validate_prefix("K", "F-").is_err());
        assert!(validate_prefix("K", "").is_err());
    }
}
