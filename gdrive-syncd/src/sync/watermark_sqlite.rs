use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use time::OffsetDateTime;

use super::watermark::{
    ExecutionStatus, FlowStatus, FlowType, NewWatermark, WatermarkError, WatermarkRecord,
    WatermarkStore,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");

const SELECT_COLUMNS: &str = "SELECT id, name, connection_id, status, event_type, flow_type, last_execution_time, last_execution_status, last_modified FROM flows";

/// SQLite-backed watermark store, used for local runs and tests.
pub struct SqliteWatermarkStore {
    pool: SqlitePool,
}

impl SqliteWatermarkStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, WatermarkError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    fn map_row(row: SqliteRow) -> Result<WatermarkRecord, WatermarkError> {
        let status: String = row.try_get("status")?;
        let flow_type: String = row.try_get("flow_type")?;
        let last_execution_status: Option<String> = row.try_get("last_execution_status")?;
        Ok(WatermarkRecord {
            id: row.try_get("id")?,
            connection_id: row.try_get("connection_id")?,
            name: row.try_get("name")?,
            status: FlowStatus::parse(&status)?,
            event_type: row.try_get("event_type")?,
            flow_type: FlowType::parse(&flow_type)?,
            last_execution_time: row.try_get("last_execution_time")?,
            last_execution_status: last_execution_status
                .as_deref()
                .map(ExecutionStatus::parse)
                .transpose()?,
            last_modified: row.try_get("last_modified")?,
        })
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn init(&self) -> Result<(), WatermarkError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    async fn list_by_connection(
        &self,
        connection_id: i64,
    ) -> Result<Vec<WatermarkRecord>, WatermarkError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE connection_id = ?1 ORDER BY id ASC"
        ))
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn upsert_in_progress(
        &self,
        input: &NewWatermark,
    ) -> Result<WatermarkRecord, WatermarkError> {
        let row = sqlx::query(
            "INSERT INTO flows (
                name,
                connection_id,
                status,
                event_type,
                flow_type,
                last_execution_time,
                last_execution_status
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(connection_id, name) DO UPDATE SET
                event_type = excluded.event_type,
                last_execution_time = excluded.last_execution_time,
                last_execution_status = excluded.last_execution_status
             RETURNING id, name, connection_id, status, event_type, flow_type, last_execution_time, last_execution_status, last_modified",
        )
        .bind(&input.name)
        .bind(input.connection_id)
        .bind(FlowStatus::Active.as_str())
        .bind(&input.event_type)
        .bind(FlowType::Historical.as_str())
        .bind(input.last_execution_time)
        .bind(ExecutionStatus::InProgress.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::map_row(row)
    }

    async fn mark_in_progress(
        &self,
        id: i64,
        last_execution_time: Option<OffsetDateTime>,
    ) -> Result<(), WatermarkError> {
        let result = sqlx::query(
            "UPDATE flows SET last_execution_time = ?1, last_execution_status = ?2 WHERE id = ?3",
        )
        .bind(last_execution_time)
        .bind(ExecutionStatus::InProgress.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WatermarkError::MissingRecord(id));
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        id: i64,
        status: ExecutionStatus,
        at: OffsetDateTime,
    ) -> Result<(), WatermarkError> {
        let result = sqlx::query(
            "UPDATE flows SET last_execution_status = ?1, last_modified = ?2 WHERE id = ?3",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WatermarkError::MissingRecord(id));
        }
        Ok(())
    }
}
