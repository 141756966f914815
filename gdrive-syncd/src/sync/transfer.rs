use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use gdrive_core::{CSV_MIME, ContentStream, DriveClient, DriveError};
use thiserror::Error;
use time::OffsetDateTime;

use super::detector::Decision;
use super::node::{NodeKind, RemoteNode};
use super::paths::object_key;
use super::sink::{ByteStream, ObjectSink, SinkError};
use super::watermark::{ExecutionStatus, NewWatermark, WatermarkError, WatermarkStore};
use crate::intake::SyncJob;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("content fetch failed: {0}")]
    Source(#[from] DriveError),
    #[error("sink upload failed: {0}")]
    Sink(#[from] SinkError),
    #[error("watermark update failed: {0}")]
    Watermark(#[from] WatermarkError),
    #[error("{0:?} nodes cannot be transferred")]
    NotTransferable(NodeKind),
    #[error("leaf was classified as skip")]
    Skipped,
}

/// Where leaf content is read from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Converts a native document into `mime_type`.
    async fn export(
        &self,
        file_id: &str,
        mime_type: &str,
    ) -> Result<ContentStream, DriveError>;

    async fn fetch(&self, file_id: &str) -> Result<ContentStream, DriveError>;
}

#[async_trait]
impl ContentSource for DriveClient {
    async fn export(
        &self,
        file_id: &str,
        mime_type: &str,
    ) -> Result<ContentStream, DriveError> {
        self.export_content(file_id, mime_type).await
    }

    async fn fetch(&self, file_id: &str) -> Result<ContentStream, DriveError> {
        self.fetch_content(file_id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub record_id: i64,
    pub key: String,
    pub location: String,
    pub bytes: u64,
}

/// Streams one leaf from Drive into the sink and records the attempt's
/// outcome on its watermark.
#[derive(Clone)]
pub struct TransferPipeline {
    source: Arc<dyn ContentSource>,
    store: Arc<dyn WatermarkStore>,
    sink: Arc<dyn ObjectSink>,
}

impl TransferPipeline {
    pub fn new(
        source: Arc<dyn ContentSource>,
        store: Arc<dyn WatermarkStore>,
        sink: Arc<dyn ObjectSink>,
    ) -> Self {
        Self {
            source,
            store,
            sink,
        }
    }

    /// Runs open → pre-commit → upload → outcome-commit for one leaf.
    ///
    /// A failure while opening the source happens before any watermark write.
    /// Once the pre-commit has produced a record id, the attempt always ends
    /// with that record marked `Successful` or `Error`. If the `Successful`
    /// commit itself fails, `Error` is written instead.
    pub async fn transfer(
        &self,
        node: &RemoteNode,
        folder_id: &str,
        job: &SyncJob,
        decision: &Decision,
    ) -> Result<TransferReport, TransferError> {
        if matches!(decision, Decision::Skip) {
            return Err(TransferError::Skipped);
        }
        let source = self.open_source(node).await?;
        let record_id = self.pre_commit(node, folder_id, job, decision).await?;
        let key = object_key(job.owner_id, folder_id, &node.name);

        let counter = Arc::new(AtomicU64::new(0));
        let body = counted(source, Arc::clone(&counter));

        match self.sink.put(&key, body).await {
            Ok(location) => {
                if let Err(err) = self
                    .store
                    .record_outcome(
                        record_id,
                        ExecutionStatus::Successful,
                        OffsetDateTime::now_utc(),
                    )
                    .await
                {
                    tracing::error!(
                        record_id,
                        file = %node.name,
                        location = %location,
                        error = %err,
                        "failed to record transfer success"
                    );
                    self.commit_error(record_id, node).await;
                    return Err(err.into());
                }
                Ok(TransferReport {
                    record_id,
                    key,
                    location,
                    bytes: counter.load(Ordering::Relaxed),
                })
            }
            Err(err) => {
                self.commit_error(record_id, node).await;
                Err(err.into())
            }
        }
    }

    async fn commit_error(&self, record_id: i64, node: &RemoteNode) {
        if let Err(err) = self
            .store
            .record_outcome(record_id, ExecutionStatus::Error, OffsetDateTime::now_utc())
            .await
        {
            tracing::error!(
                record_id,
                file = %node.name,
                error = %err,
                "failed to record transfer error"
            );
        }
    }

    async fn open_source(&self, node: &RemoteNode) -> Result<ContentStream, TransferError> {
        match node.kind {
            NodeKind::Document => Ok(self.source.export(&node.id, CSV_MIME).await?),
            NodeKind::PlainFile => Ok(self.source.fetch(&node.id).await?),
            other => Err(TransferError::NotTransferable(other)),
        }
    }

    /// Writes the `In Progress` watermark for this attempt and returns its id.
    async fn pre_commit(
        &self,
        node: &RemoteNode,
        folder_id: &str,
        job: &SyncJob,
        decision: &Decision,
    ) -> Result<i64, WatermarkError> {
        match decision {
            Decision::CreateUpdate(record) => {
                self.store
                    .mark_in_progress(record.id, node.modified_at)
                    .await?;
                Ok(record.id)
            }
            _ => {
                let record = self
                    .store
                    .upsert_in_progress(&NewWatermark::for_leaf(
                        job.connection_id,
                        folder_id,
                        node,
                    ))
                    .await?;
                Ok(record.id)
            }
        }
    }
}

fn counted(source: ContentStream, counter: Arc<AtomicU64>) -> ByteStream {
    Box::pin(
        source
            .map_err(io::Error::other)
            .inspect_ok(move |chunk| {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }),
    )
}
