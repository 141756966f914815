use std::{
    io,
    path::{Path, PathBuf},
    pin::Pin,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use url::Url;

use super::paths::{KeyError, key_segments, object_path_for};

/// Object body handed to a sink; consumed chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid object key: {0}")]
    Key(#[from] KeyError),
    #[error("endpoint cannot carry path segments: {0}")]
    CannotBeABase(String),
    #[error("object store returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Flat key/value object store that accepts streamed bodies.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Stores `body` under `key` and returns the object's location.
    async fn put(&self, key: &str, body: ByteStream) -> Result<String, SinkError>;
}

/// Streams objects with `PUT <endpoint>/<bucket>/<key>` to an S3-compatible
/// HTTP gateway.
#[derive(Clone)]
pub struct HttpObjectSink {
    http: Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl HttpObjectSink {
    pub fn new(
        endpoint: &str,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, SinkError> {
        Ok(Self {
            http: Client::new(),
            endpoint: Url::parse(endpoint)?,
            bucket: bucket.into(),
            token,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, SinkError> {
        let segments = key_segments(key)?;
        let mut url = self.endpoint.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SinkError::CannotBeABase(self.endpoint.to_string()))?;
            path.pop_if_empty();
            path.push(&self.bucket);
            path.extend(segments);
        }
        Ok(url)
    }
}

#[async_trait]
impl ObjectSink for HttpObjectSink {
    async fn put(&self, key: &str, body: ByteStream) -> Result<String, SinkError> {
        let url = self.object_url(key)?;
        let mut request = self
            .http
            .put(url.clone())
            .header("content-type", "text/csv")
            .body(reqwest::Body::wrap_stream(body));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        Ok(url.to_string())
    }
}

/// Writes objects into a directory tree, one file per key.
#[derive(Debug, Clone)]
pub struct FsObjectSink {
    root: PathBuf,
}

impl FsObjectSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectSink for FsObjectSink {
    async fn put(&self, key: &str, body: ByteStream) -> Result<String, SinkError> {
        let target = object_path_for(&self.root, key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(&target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut reader = StreamReader::new(body);

        let written = async {
            tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(())
        }
        .await;
        if let Err(err) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }

        tokio::fs::rename(&partial, &target).await?;
        Ok(target.display().to_string())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
