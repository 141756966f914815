//! Decoding of queued job payloads.
//!
//! Payloads look like `{"type": "CREATE", "body": {"userId": 180,
//! "connectionId": 359, "folderId": "F1"}}`. Producers sometimes wrap the
//! object in stray quote characters or send it as a JSON string literal.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("job payload is empty")]
    Empty,
    #[error("invalid job payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job payload has an empty folderId")]
    MissingFolder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum JobKind {
    /// Transfer every leaf regardless of stored watermarks.
    #[serde(rename = "CREATE")]
    FullImport,
    /// Transfer only leaves that are new or newer than their watermark.
    #[serde(rename = "SYNC")]
    IncrementalSync,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::FullImport => "full-import",
            JobKind::IncrementalSync => "incremental-sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub kind: JobKind,
    pub owner_id: i64,
    pub connection_id: i64,
    pub root_folder_id: String,
}

impl fmt::Display for SyncJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} owner={} connection={} folder={}",
            self.kind.as_str(),
            self.owner_id,
            self.connection_id,
            self.root_folder_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct JobPayload {
    #[serde(rename = "type")]
    kind: JobKind,
    body: JobBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    user_id: i64,
    connection_id: i64,
    folder_id: String,
}

pub fn parse_job(raw: &str) -> Result<SyncJob, IntakeError> {
    let payload = unwrap_payload(raw);
    if payload.is_empty() {
        return Err(IntakeError::Empty);
    }
    let parsed: JobPayload = serde_json::from_str(&payload)?;
    let folder_id = parsed.body.folder_id.trim();
    if folder_id.is_empty() {
        return Err(IntakeError::MissingFolder);
    }
    Ok(SyncJob {
        kind: parsed.kind,
        owner_id: parsed.body.user_id,
        connection_id: parsed.body.connection_id,
        root_folder_id: folder_id.to_string(),
    })
}

/// Returns the JSON object text inside a possibly wrapped payload.
fn unwrap_payload(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(inner) = serde_json::from_str::<String>(trimmed) {
        return strip_wrapping_quotes(&inner).to_string();
    }
    strip_wrapping_quotes(trimmed).to_string()
}

/// Removes stray `"` and `'` characters around the payload. A JSON object
/// never starts or ends with either, so trimming them is lossless.
fn strip_wrapping_quotes(value: &str) -> &str {
    value
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
}
