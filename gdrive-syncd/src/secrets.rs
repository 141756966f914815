//! Worker credentials.
//!
//! The secrets document is a JSON object. Secret managers often store each
//! section as a JSON-encoded string, so every section (and the document
//! itself) is decoded a second time when it arrives as a string.

use std::fmt;

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::{ConfigError, SecretsSource};

const DEFAULT_PG_PORT: u16 = 5432;

#[derive(Clone, Deserialize)]
pub struct DbCredentials {
    pub user: String,
    pub host: String,
    pub database: String,
    pub password: String,
    #[serde(default = "default_port", deserialize_with = "port_number")]
    pub port: u16,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Drive access: a short-lived `access_token`, an OAuth refresh token with
/// its client, or both.
#[derive(Clone, Deserialize)]
pub struct DriveCredentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

pub struct RefreshCredentials<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub refresh_token: &'a str,
}

impl DriveCredentials {
    pub fn refresh(&self) -> Option<RefreshCredentials<'_>> {
        Some(RefreshCredentials {
            client_id: self.client_id.as_deref()?,
            client_secret: self.client_secret.as_deref()?,
            refresh_token: self.refresh_token.as_deref()?,
        })
    }

    fn normalize(mut self) -> Result<Self, ConfigError> {
        for field in [
            &mut self.access_token,
            &mut self.refresh_token,
            &mut self.client_id,
            &mut self.client_secret,
        ] {
            if field.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *field = None;
            }
        }
        if self.refresh_token.is_some() {
            if self.client_id.is_none() {
                return Err(ConfigError::MissingCredentials("DRIVE_CREDENTIALS.client_id"));
            }
            if self.client_secret.is_none() {
                return Err(ConfigError::MissingCredentials(
                    "DRIVE_CREDENTIALS.client_secret",
                ));
            }
        } else if self.access_token.is_none() {
            return Err(ConfigError::MissingCredentials(
                "DRIVE_CREDENTIALS.access_token or DRIVE_CREDENTIALS.refresh_token",
            ));
        }
        Ok(self)
    }
}

#[derive(Clone, Deserialize)]
pub struct SinkCredentials {
    pub token: String,
}

#[derive(Clone)]
pub struct Secrets {
    pub database: Option<DbCredentials>,
    pub drive: DriveCredentials,
    pub sink: Option<SinkCredentials>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("database", &self.database)
            .field("drive", &"<redacted>")
            .field("sink", &self.sink.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Reads and decodes the secrets document. Called once during bootstrap.
pub async fn load_secrets(source: &SecretsSource) -> Result<Secrets, ConfigError> {
    let raw = match source {
        SecretsSource::Inline(raw) => raw.clone(),
        SecretsSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::SecretsIo {
                path: path.clone(),
                source,
            })?,
    };
    let secrets = parse_secrets(&raw)?;
    tracing::debug!(
        database = secrets.database.is_some(),
        drive_refresh = secrets.drive.refresh().is_some(),
        sink_token = secrets.sink.is_some(),
        "secrets loaded"
    );
    Ok(secrets)
}

pub fn parse_secrets(raw: &str) -> Result<Secrets, ConfigError> {
    let document = decode_nested(serde_json::from_str(raw)?)?;
    let Value::Object(map) = document else {
        return Err(ConfigError::SecretsNotObject);
    };

    let drive = section::<DriveCredentials>(&map, "DRIVE_CREDENTIALS")?
        .ok_or(ConfigError::MissingCredentials("DRIVE_CREDENTIALS"))?
        .normalize()?;

    Ok(Secrets {
        database: section(&map, "DB_CREDENTIALS")?,
        drive,
        sink: section(&map, "SINK_CREDENTIALS")?,
    })
}

fn section<T: DeserializeOwned>(
    map: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let value = match map.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value.clone(),
    };
    decode_nested(value)
        .and_then(serde_json::from_value)
        .map(Some)
        .map_err(|source| ConfigError::InvalidSecret { key, source })
}

fn decode_nested(value: Value) -> Result<Value, serde_json::Error> {
    match value {
        Value::String(encoded) => serde_json::from_str(&encoded),
        other => Ok(other),
    }
}

fn default_port() -> u16 {
    DEFAULT_PG_PORT
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

fn port_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match PortValue::deserialize(deserializer)? {
        PortValue::Number(port) => Ok(port),
        PortValue::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid port {text:?}"))),
    }
}
