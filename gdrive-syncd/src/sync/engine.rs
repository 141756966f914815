use std::sync::Arc;

use futures_util::future::BoxFuture;
use gdrive_core::{DriveClient, DriveError};
use thiserror::Error;

use super::detector::{ChangeDetector, Decision};
use super::node::{NodeKind, RemoteNode};
use super::sink::ObjectSink;
use super::transfer::TransferPipeline;
use super::watermark::{WatermarkError, WatermarkRecord, WatermarkStore};
use crate::intake::{JobKind, SyncJob};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
#[error("failed to list folder {folder_id}: {source}")]
pub struct ListingError {
    pub folder_id: String,
    #[source]
    pub source: DriveError,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("watermark error: {0}")]
    Watermark(#[from] WatermarkError),
    #[error(transparent)]
    Listing(#[from] ListingError),
}

/// State carried down every level of a walk.
#[derive(Debug, Clone, Copy)]
pub struct SyncContext<'a> {
    pub job: &'a SyncJob,
    /// Watermarks of the job's connection; `None` for full imports.
    pub prior: Option<&'a [WatermarkRecord]>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    pub folders: usize,
    pub leaves: usize,
    pub transferred: usize,
    pub skipped: usize,
    pub unsupported: usize,
    pub failed: usize,
    pub listing_errors: usize,
}

pub struct SyncEngine {
    client: DriveClient,
    store: Arc<dyn WatermarkStore>,
    transfer: TransferPipeline,
    detector: ChangeDetector,
    page_size: u32,
}

impl SyncEngine {
    pub fn new(
        client: DriveClient,
        store: Arc<dyn WatermarkStore>,
        sink: Arc<dyn ObjectSink>,
    ) -> Self {
        Self {
            transfer: TransferPipeline::new(Arc::new(client.clone()), Arc::clone(&store), sink),
            client,
            store,
            detector: ChangeDetector::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Runs a job to completion.
    ///
    /// Only a failure to load watermarks or to list the root folder is
    /// returned; everything below the root is logged and counted.
    pub async fn run_job(&self, job: &SyncJob) -> Result<WalkSummary, EngineError> {
        let records = match job.kind {
            JobKind::FullImport => None,
            JobKind::IncrementalSync => {
                let records = self.store.list_by_connection(job.connection_id).await?;
                tracing::debug!(
                    connection_id = job.connection_id,
                    records = records.len(),
                    "loaded watermarks"
                );
                Some(records)
            }
        };
        let ctx = SyncContext {
            job,
            prior: records.as_deref(),
        };

        let mut summary = WalkSummary::default();
        self.walk(&job.root_folder_id, "", &ctx, &mut summary)
            .await?;
        Ok(summary)
    }

    /// Depth-first walk of `folder_id`. Children are handled one at a time;
    /// a failed listing below this level is counted and does not stop siblings.
    pub fn walk<'a>(
        &'a self,
        folder_id: &'a str,
        path_prefix: &'a str,
        ctx: &'a SyncContext<'a>,
        summary: &'a mut WalkSummary,
    ) -> BoxFuture<'a, Result<(), ListingError>> {
        Box::pin(async move {
            let children = self
                .client
                .list_children_all(folder_id, self.page_size)
                .await
                .map_err(|source| ListingError {
                    folder_id: folder_id.to_string(),
                    source,
                })?;
            tracing::debug!(folder_id, path = path_prefix, children = children.len(), "listed folder");

            for file in children {
                let node = RemoteNode::from_drive(file);
                match node.kind {
                    NodeKind::Folder => {
                        summary.folders += 1;
                        let child_path = format!("{path_prefix}/{}", node.name);
                        if let Err(err) = self.walk(&node.id, &child_path, ctx, summary).await {
                            summary.listing_errors += 1;
                            tracing::error!(
                                job = %ctx.job,
                                path = %child_path,
                                error = %err,
                                classification = ?err.source.classification(),
                                retryable = err.source.is_retryable(),
                                "skipping subtree"
                            );
                        }
                    }
                    NodeKind::Document | NodeKind::PlainFile => {
                        summary.leaves += 1;
                        self.sync_leaf(&node, folder_id, path_prefix, ctx, summary)
                            .await;
                    }
                    NodeKind::Other => {
                        summary.unsupported += 1;
                        tracing::debug!(
                            file = %node.name,
                            mime_type = %node.mime_type,
                            "ignoring unsupported file type"
                        );
                    }
                }
            }
            Ok(())
        })
    }

    async fn sync_leaf(
        &self,
        node: &RemoteNode,
        folder_id: &str,
        path_prefix: &str,
        ctx: &SyncContext<'_>,
        summary: &mut WalkSummary,
    ) {
        let decision = self.detector.decide(node, folder_id, ctx.prior);
        if decision == Decision::Skip {
            summary.skipped += 1;
            tracing::debug!(folder_id, file = %node.name, "unchanged since last sync");
            return;
        }

        match self
            .transfer
            .transfer(node, folder_id, ctx.job, &decision)
            .await
        {
            Ok(report) => {
                summary.transferred += 1;
                tracing::info!(
                    path = %format!("{path_prefix}/{}", node.name),
                    record_id = report.record_id,
                    bytes = report.bytes,
                    location = %report.location,
                    update = matches!(decision, Decision::CreateUpdate(_)),
                    "file uploaded"
                );
            }
            Err(err) => {
                summary.failed += 1;
                tracing::error!(
                    job = %ctx.job,
                    path = %format!("{path_prefix}/{}", node.name),
                    error = %err,
                    "file transfer failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
