use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::OnceCell;

use crate::config::ConfigError;
use crate::secrets::DbCredentials;
use crate::sync::watermark::WatermarkStore;
use crate::sync::watermark_pg::PgWatermarkStore;
use crate::sync::watermark_sqlite::SqliteWatermarkStore;

#[derive(Debug, Clone)]
pub enum DatabaseTarget {
    /// `sqlite:` or `postgres:` connection URL.
    Url(String),
    /// Postgres server described by the secrets document.
    Credentials(DbCredentials),
}

impl DatabaseTarget {
    /// An explicit URL takes precedence over stored credentials.
    pub fn resolve(
        url: Option<&str>,
        credentials: Option<&DbCredentials>,
    ) -> Result<Self, ConfigError> {
        match (url, credentials) {
            (Some(url), _) => Ok(Self::Url(url.to_string())),
            (None, Some(credentials)) => Ok(Self::Credentials(credentials.clone())),
            (None, None) => Err(ConfigError::MissingCredentials(
                "DB_CREDENTIALS or DATABASE_URL",
            )),
        }
    }

    fn backend(&self) -> &'static str {
        match self {
            Self::Url(url) if is_sqlite(url) => "sqlite",
            _ => "postgres",
        }
    }
}

/// Owns the watermark store connection for the life of the process.
///
/// Starts not-ready; [`ConnectionFactory::ready`] connects and migrates on the
/// first call and hands out the same store afterwards.
pub struct ConnectionFactory {
    target: DatabaseTarget,
    max_connections: u32,
    store: OnceCell<Arc<dyn WatermarkStore>>,
}

impl ConnectionFactory {
    pub fn new(target: DatabaseTarget, max_connections: u32) -> Self {
        Self {
            target,
            max_connections: max_connections.max(1),
            store: OnceCell::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.store.initialized()
    }

    pub async fn ready(&self) -> Result<Arc<dyn WatermarkStore>, ConfigError> {
        let store = self.store.get_or_try_init(|| self.connect()).await?;
        Ok(Arc::clone(store))
    }

    async fn connect(&self) -> Result<Arc<dyn WatermarkStore>, ConfigError> {
        let store: Arc<dyn WatermarkStore> = match &self.target {
            DatabaseTarget::Url(url) if is_sqlite(url) => {
                Arc::new(SqliteWatermarkStore::connect(url, self.max_connections).await?)
            }
            DatabaseTarget::Url(url) if is_postgres(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .connect(url)
                    .await?;
                Arc::new(PgWatermarkStore::new(pool))
            }
            DatabaseTarget::Url(url) => {
                let scheme = url.split(':').next().unwrap_or_default();
                return Err(ConfigError::UnsupportedDatabase(scheme.to_string()));
            }
            DatabaseTarget::Credentials(credentials) => {
                let options = PgConnectOptions::new()
                    .host(&credentials.host)
                    .port(credentials.port)
                    .username(&credentials.user)
                    .password(&credentials.password)
                    .database(&credentials.database);
                let pool = PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .connect_with(options)
                    .await?;
                Arc::new(PgWatermarkStore::new(pool))
            }
        };
        store.init().await?;
        tracing::info!(
            backend = self.target.backend(),
            max_connections = self.max_connections,
            "watermark store ready"
        );
        Ok(store)
    }
}

fn is_sqlite(url: &str) -> bool {
    url.starts_with("sqlite:")
}

fn is_postgres(url: &str) -> bool {
    url.starts_with("postgres:") || url.starts_with("postgresql:")
}
