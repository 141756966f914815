use std::sync::Arc;

use anyhow::Context;
use gdrive_core::{DEFAULT_BASE_URL, DriveClient, OAuthClient, TokenProvider};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::config::{ConfigError, SinkTarget, WorkerConfig};
use crate::connection::{ConnectionFactory, DatabaseTarget};
use crate::intake::parse_job;
use crate::secrets::{DriveCredentials, load_secrets};
use crate::sync::detector::ChangeDetector;
use crate::sync::engine::{SyncEngine, WalkSummary};
use crate::sync::sink::{FsObjectSink, HttpObjectSink, ObjectSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(WalkSummary),
    /// The payload could not be decoded into a job.
    Rejected,
    /// The job's root could not be listed or its watermarks loaded.
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTally {
    pub received: usize,
    pub completed: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl RunTally {
    pub fn record(&mut self, outcome: &JobOutcome) {
        self.received += 1;
        match outcome {
            JobOutcome::Completed(_) => self.completed += 1,
            JobOutcome::Rejected => self.rejected += 1,
            JobOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct WorkerRuntime {
    factory: ConnectionFactory,
    engine: SyncEngine,
}

impl WorkerRuntime {
    pub async fn bootstrap(config: WorkerConfig) -> anyhow::Result<Self> {
        let secrets = load_secrets(&config.secrets)
            .await
            .context("failed to load secrets")?;

        let target =
            DatabaseTarget::resolve(config.database_url.as_deref(), secrets.database.as_ref())?;
        let factory = ConnectionFactory::new(target, config.db_max_connections);
        let store = factory
            .ready()
            .await
            .context("failed to initialize watermark store")?;

        let tokens = token_provider(&secrets.drive, config.oauth_base_url.as_deref())?;
        let client = DriveClient::with_tokens(
            config.drive_base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            Arc::new(tokens),
        )
        .map_err(ConfigError::from)?;

        let sink: Arc<dyn ObjectSink> = match &config.sink {
            SinkTarget::Http { endpoint, bucket } => Arc::new(
                HttpObjectSink::new(
                    endpoint,
                    bucket.clone(),
                    secrets.sink.as_ref().map(|sink| sink.token.clone()),
                )
                .map_err(ConfigError::from)?,
            ),
            SinkTarget::Directory { root } => {
                tokio::fs::create_dir_all(root)
                    .await
                    .with_context(|| format!("failed to create sink directory at {root:?}"))?;
                Arc::new(FsObjectSink::new(root.clone()))
            }
        };

        let engine = SyncEngine::new(client, store, sink)
            .with_page_size(config.page_size)
            .with_detector(ChangeDetector::new(config.modified_skew));

        tracing::info!(
            page_size = config.page_size,
            skew_secs = config.modified_skew.whole_seconds(),
            sink = ?config.sink,
            "worker ready"
        );
        Ok(Self { factory, engine })
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Decodes and runs one job. Failures stop here and are only logged.
    pub async fn process_payload(&self, raw: &str) -> JobOutcome {
        let job = match parse_job(raw) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(error = %err, "rejected job payload");
                return JobOutcome::Rejected;
            }
        };

        tracing::info!(job = %job, "job started");
        match self.engine.run_job(&job).await {
            Ok(summary) => {
                tracing::info!(
                    job = %job,
                    folders = summary.folders,
                    leaves = summary.leaves,
                    transferred = summary.transferred,
                    skipped = summary.skipped,
                    unsupported = summary.unsupported,
                    failed = summary.failed,
                    listing_errors = summary.listing_errors,
                    "job finished"
                );
                JobOutcome::Completed(summary)
            }
            Err(err) => {
                tracing::error!(job = %job, error = %err, "job failed");
                JobOutcome::Failed
            }
        }
    }

    /// Runs newline-delimited payloads one after another until EOF.
    pub async fn run<R>(&self, reader: R) -> anyhow::Result<RunTally>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut tally = RunTally::default();
        let mut lines = reader.lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("failed to read job payloads")?
        {
            if line.trim().is_empty() {
                continue;
            }
            let outcome = self.process_payload(&line).await;
            tally.record(&outcome);
        }
        Ok(tally)
    }
}

fn token_provider(
    credentials: &DriveCredentials,
    oauth_base_url: Option<&str>,
) -> Result<TokenProvider, ConfigError> {
    if let Some(refresh) = credentials.refresh() {
        let oauth = match oauth_base_url {
            Some(base_url) => {
                OAuthClient::with_base_url(base_url, refresh.client_id, refresh.client_secret)
            }
            None => OAuthClient::new(refresh.client_id, refresh.client_secret),
        }?;
        return Ok(TokenProvider::refreshing(
            oauth,
            refresh.refresh_token,
            credentials.access_token.clone(),
        ));
    }
    credentials
        .access_token
        .as_deref()
        .map(TokenProvider::fixed)
        .ok_or(ConfigError::MissingCredentials("DRIVE_CREDENTIALS.access_token"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretsSource;
    use crate::sync::watermark::ExecutionStatus;
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;
    use time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, sink_root: &Path) -> WorkerConfig {
        WorkerConfig {
            secrets: SecretsSource::Inline(
                json!({"DRIVE_CREDENTIALS": json!({"access_token": "worker-token"}).to_string()})
                    .to_string(),
            ),
            database_url: Some("sqlite::memory:".into()),
            drive_base_url: Some(server.uri()),
            oauth_base_url: None,
            page_size: 100,
            modified_skew: Duration::hours(5),
            sink: SinkTarget::Directory {
                root: sink_root.to_path_buf(),
            },
            db_max_connections: 1,
        }
    }

    #[tokio::test]
    async fn runs_payload_stream_and_tallies_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'F1' in parents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{
                    "id": "a1",
                    "name": "a.csv",
                    "mimeType": "text/csv",
                    "modifiedTime": "2024-01-01T10:00:00Z"
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'gone' in parents"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/a1"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let worker = WorkerRuntime::bootstrap(config(&server, dir.path()))
            .await
            .unwrap();
        assert!(worker.factory().is_ready());

        let input = [
            r#"'{"type":"CREATE","body":{"userId":180,"connectionId":359,"folderId":"F1"}}'"#,
            "",
            r#"{"type":"SYNC","body":{"userId":180,"connectionId":359,"folderId":"F1"}}"#,
            "not a payload",
            r#"{"type":"SYNC","body":{"userId":180,"connectionId":359,"folderId":"gone"}}"#,
        ]
        .join("\n");
        let tally = worker
            .run(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();

        assert_eq!(
            tally,
            RunTally {
                received: 4,
                completed: 2,
                rejected: 1,
                failed: 1,
            }
        );
        assert_eq!(
            std::fs::read(dir.path().join("180/F1/a.csv.csv")).unwrap(),
            b"a,b\n"
        );
        let store = worker.factory().ready().await.unwrap();
        let records = store.list_by_connection(359).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].last_execution_status,
            Some(ExecutionStatus::Successful)
        );
    }

    #[tokio::test]
    async fn bootstrap_requires_database_settings() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.database_url = None;

        let err = WorkerRuntime::bootstrap(config).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingCredentials(_))
        ));
    }

    #[tokio::test]
    async fn bootstrap_creates_sink_directory() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested/out");

        WorkerRuntime::bootstrap(config(&server, &root))
            .await
            .unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn refresh_credentials_fetch_a_token_before_the_first_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=1%2F%2Frefresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "minted-token",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(header("authorization", "Bearer minted-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.oauth_base_url = Some(server.uri());
        config.secrets = SecretsSource::Inline(
            json!({"DRIVE_CREDENTIALS": {
                "refresh_token": "1//refresh",
                "client_id": "worker-client",
                "client_secret": "worker-secret"
            }})
            .to_string(),
        );
        let worker = WorkerRuntime::bootstrap(config).await.unwrap();

        let payload = r#"{"type":"SYNC","body":{"userId":180,"connectionId":359,"folderId":"F1"}}"#;
        for _ in 0..2 {
            assert_eq!(
                worker.process_payload(payload).await,
                JobOutcome::Completed(WalkSummary::default())
            );
        }
    }
}
