use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::token::{TokenError, TokenProvider};

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILES_ENDPOINT: &str = "/drive/v3/files";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,modifiedTime)";

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
pub const CSV_MIME: &str = "text/csv";

/// Body of a file download or export, yielded chunk by chunk as it arrives.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Bytes, DriveError>> + Send>>;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    CannotBeABase(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("no usable access token: {0}")]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    tokens: Arc<TokenProvider>,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_tokens(base_url, Arc::new(TokenProvider::fixed(token)))
    }

    pub fn with_tokens(base_url: &str, tokens: Arc<TokenProvider>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            tokens,
        })
    }

    /// Lists one page of the direct children of `folder_id`.
    pub async fn list_children(
        &self,
        folder_id: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint(FILES_ENDPOINT)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("q", &parents_query(folder_id));
            query.append_pair("fields", LIST_FIELDS);
            if let Some(page_size) = page_size {
                query.append_pair("pageSize", &page_size.to_string());
            }
            if let Some(token) = page_token.filter(|t| !t.is_empty()) {
                query.append_pair("pageToken", token);
            }
        }
        let response = self.get_authorized(url).await?;
        Self::handle_response(response).await
    }

    /// Lists every direct child of `folder_id`, following `nextPageToken`
    /// until the provider reports no further pages.
    pub async fn list_children_all(
        &self,
        folder_id: &str,
        page_size: u32,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let page_size = page_size.max(1);
        let mut page_token: Option<String> = None;
        let mut files = Vec::new();
        loop {
            let page = self
                .list_children(folder_id, Some(page_size), page_token.as_deref())
                .await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    /// Converts a native document into `mime_type` and streams the result.
    pub async fn export_content(
        &self,
        file_id: &str,
        mime_type: &str,
    ) -> Result<ContentStream, DriveError> {
        let mut url = self.file_url(file_id, Some("export"))?;
        url.query_pairs_mut().append_pair("mimeType", mime_type);
        self.open_stream(url).await
    }

    /// Streams the stored bytes of a binary file unchanged.
    pub async fn fetch_content(&self, file_id: &str) -> Result<ContentStream, DriveError> {
        let mut url = self.file_url(file_id, None)?;
        url.query_pairs_mut().append_pair("alt", "media");
        self.open_stream(url).await
    }

    async fn open_stream(&self, url: Url) -> Result<ContentStream, DriveError> {
        let response = self.get_authorized(url).await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status, body });
        }
        Ok(Box::pin(response.bytes_stream().map_err(DriveError::from)))
    }

    /// Sends an authorized GET. A 401 triggers one token refresh and retry
    /// when the token can be refreshed.
    async fn get_authorized(&self, url: Url) -> Result<Response, DriveError> {
        let token = self.tokens.access_token().await?;
        let response = self.http.get(url.clone()).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED || !self.tokens.can_refresh() {
            return Ok(response);
        }
        tracing::debug!(url = %url, "access token rejected, refreshing");
        let token = self.tokens.refresh_now().await?;
        Ok(self.http.get(url).bearer_auth(&token).send().await?)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    fn file_url(&self, file_id: &str, action: Option<&str>) -> Result<Url, DriveError> {
        let mut url = self.endpoint(FILES_ENDPOINT)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DriveError::CannotBeABase(self.base_url.to_string()))?;
            segments.push(file_id);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            DriveError::Token(_) => Some(ApiErrorClass::Auth),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parents_query(folder_id: &str) -> String {
    // Drive query literals are single-quoted; quotes and backslashes inside must be escaped.
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Drive encodes int64 values as JSON strings.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl DriveFile {
    pub fn size_hint(&self) -> Option<u64> {
        self.size.as_deref().and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn parents_query_escapes_quotes() {
        assert_eq!(parents_query("F1"), "'F1' in parents");
        assert_eq!(parents_query("a'b"), "'a\\'b' in parents");
    }

    #[test]
    fn size_hint_parses_string_encoded_size() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"1","name":"a.csv","mimeType":"text/csv","size":"42"}"#,
        )
        .unwrap();
        assert_eq!(file.size_hint(), Some(42));
        assert!(file.modified_time.is_none());
    }
}
