use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use gdrive_core::{DriveError, OAuthError};
use thiserror::Error;
use time::Duration;

use crate::sync::detector::DEFAULT_MODIFIED_SKEW;
use crate::sync::engine::DEFAULT_PAGE_SIZE;
use crate::sync::sink::SinkError;
use crate::sync::watermark::WatermarkError;

const DEFAULT_SINK_BUCKET: &str = "api-connectors";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Startup failures. Any of these keeps the worker from taking jobs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no secrets configured; set GDSYNC_SECRETS_FILE or GDSYNC_SECRETS")]
    MissingSecrets,
    #[error("missing setting: {0}")]
    MissingSetting(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("failed to read secrets file {path:?}: {source}")]
    SecretsIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed secrets: {0}")]
    SecretsFormat(#[from] serde_json::Error),
    #[error("secrets must be a JSON object")]
    SecretsNotObject,
    #[error("invalid {key} in secrets: {source}")]
    InvalidSecret {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
    #[error("unsupported database scheme: {0}")]
    UnsupportedDatabase(String),
    #[error("database unavailable: {0}")]
    Database(#[from] sqlx::Error),
    #[error("watermark store setup failed: {0}")]
    Watermark(#[from] WatermarkError),
    #[error("invalid drive client settings: {0}")]
    Client(#[from] DriveError),
    #[error("invalid oauth client settings: {0}")]
    OAuth(#[from] OAuthError),
    #[error("invalid sink settings: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretsSource {
    File(PathBuf),
    Inline(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// S3-compatible gateway; objects land at `<endpoint>/<bucket>/<key>`.
    Http { endpoint: String, bucket: String },
    Directory { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub secrets: SecretsSource,
    /// Overrides the database built from `DB_CREDENTIALS` when set.
    pub database_url: Option<String>,
    pub drive_base_url: Option<String>,
    /// Token endpoint used when the drive credentials carry a refresh token.
    pub oauth_base_url: Option<String>,
    pub page_size: u32,
    pub modified_skew: Duration,
    pub sink: SinkTarget,
    pub db_max_connections: u32,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let secrets = if let Some(path) = var("GDSYNC_SECRETS_FILE") {
            SecretsSource::File(PathBuf::from(path))
        } else if let Some(inline) = var("GDSYNC_SECRETS") {
            SecretsSource::Inline(inline)
        } else {
            return Err(ConfigError::MissingSecrets);
        };

        let sink = if let Some(endpoint) = var("GDSYNC_SINK_URL") {
            SinkTarget::Http {
                endpoint,
                bucket: var("GDSYNC_SINK_BUCKET")
                    .unwrap_or_else(|| DEFAULT_SINK_BUCKET.to_string()),
            }
        } else if let Some(root) = var("GDSYNC_SINK_DIR") {
            SinkTarget::Directory {
                root: PathBuf::from(root),
            }
        } else {
            return Err(ConfigError::MissingSetting(
                "GDSYNC_SINK_URL or GDSYNC_SINK_DIR",
            ));
        };

        let page_size = parse_or("GDSYNC_PAGE_SIZE", var("GDSYNC_PAGE_SIZE"), DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(invalid("GDSYNC_PAGE_SIZE", page_size));
        }
        let db_max_connections = parse_or(
            "GDSYNC_DB_MAX_CONNECTIONS",
            var("GDSYNC_DB_MAX_CONNECTIONS"),
            DEFAULT_DB_MAX_CONNECTIONS,
        )?;
        if db_max_connections == 0 {
            return Err(invalid("GDSYNC_DB_MAX_CONNECTIONS", db_max_connections));
        }
        let skew_secs = parse_or(
            "GDSYNC_MODIFIED_SKEW_SECS",
            var("GDSYNC_MODIFIED_SKEW_SECS"),
            DEFAULT_MODIFIED_SKEW.whole_seconds(),
        )?;
        if skew_secs < 0 {
            return Err(invalid("GDSYNC_MODIFIED_SKEW_SECS", skew_secs));
        }

        Ok(Self {
            secrets,
            database_url: var("DATABASE_URL"),
            drive_base_url: var("GDSYNC_DRIVE_BASE_URL"),
            oauth_base_url: var("GDSYNC_OAUTH_BASE_URL"),
            page_size,
            modified_skew: Duration::seconds(skew_secs),
            sink,
            db_max_connections,
        })
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

fn invalid(name: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = config(&[
            ("GDSYNC_SECRETS_FILE", "/run/secrets/gdsync.json"),
            ("GDSYNC_SINK_DIR", "/var/lib/gdsync"),
        ])
        .unwrap();

        assert_eq!(
            config.secrets,
            SecretsSource::File(PathBuf::from("/run/secrets/gdsync.json"))
        );
        assert_eq!(
            config.sink,
            SinkTarget::Directory {
                root: PathBuf::from("/var/lib/gdsync")
            }
        );
        assert_eq!(config.page_size, 100);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.modified_skew, Duration::hours(5));
        assert_eq!(config.database_url, None);
        assert_eq!(config.drive_base_url, None);
        assert_eq!(config.oauth_base_url, None);
    }

    #[test]
    fn secrets_file_wins_over_inline_secrets() {
        let config = config(&[
            ("GDSYNC_SECRETS", "{}"),
            ("GDSYNC_SECRETS_FILE", "secrets.json"),
            ("GDSYNC_SINK_DIR", "out"),
        ])
        .unwrap();
        assert!(matches!(config.secrets, SecretsSource::File(_)));
    }

    #[test]
    fn http_sink_defaults_bucket() {
        let config = config(&[
            ("GDSYNC_SECRETS", "{}"),
            ("GDSYNC_SINK_URL", "http://minio:9000"),
            ("GDSYNC_SINK_DIR", "ignored"),
        ])
        .unwrap();
        assert_eq!(
            config.sink,
            SinkTarget::Http {
                endpoint: "http://minio:9000".into(),
                bucket: "api-connectors".into(),
            }
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("GDSYNC_SECRETS", "{}"),
            ("GDSYNC_SINK_DIR", "out"),
            ("GDSYNC_PAGE_SIZE", "25"),
            ("GDSYNC_MODIFIED_SKEW_SECS", "0"),
            ("GDSYNC_DB_MAX_CONNECTIONS", "2"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("GDSYNC_DRIVE_BASE_URL", "http://127.0.0.1:9999"),
            ("GDSYNC_OAUTH_BASE_URL", "http://127.0.0.1:9998"),
        ])
        .unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.modified_skew, Duration::ZERO);
        assert_eq!(config.db_max_connections, 2);
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(
            config.drive_base_url.as_deref(),
            Some("http://127.0.0.1:9999")
        );
        assert_eq!(
            config.oauth_base_url.as_deref(),
            Some("http://127.0.0.1:9998")
        );
    }

    #[test]
    fn blank_values_count_as_unset() {
        let err = config(&[("GDSYNC_SECRETS", "  "), ("GDSYNC_SINK_DIR", "out")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecrets));
    }

    #[test]
    fn missing_sink_is_rejected() {
        let err = config(&[("GDSYNC_SECRETS", "{}")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting(_)));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        for (name, value) in [
            ("GDSYNC_PAGE_SIZE", "many"),
            ("GDSYNC_PAGE_SIZE", "0"),
            ("GDSYNC_MODIFIED_SKEW_SECS", "-1"),
            ("GDSYNC_DB_MAX_CONNECTIONS", "0"),
        ] {
            let err = config(&[
                ("GDSYNC_SECRETS", "{}"),
                ("GDSYNC_SINK_DIR", "out"),
                (name, value),
            ])
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { name: got, .. } if got == name),
                "{name}={value}: {err}"
            );
        }
    }
}
