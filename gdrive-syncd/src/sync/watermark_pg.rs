use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row, migrate::Migrator};
use time::OffsetDateTime;

use super::watermark::{
    ExecutionStatus, FlowStatus, FlowType, NewWatermark, WatermarkError, WatermarkRecord,
    WatermarkStore,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");

/// Postgres-backed watermark store over `api_connectors.flows`.
#[derive(Clone)]
pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> Result<WatermarkRecord, WatermarkError> {
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
impl WatermarkStore for PgWatermarkStore {
    async fn init(&self) -> Result<(), WatermarkError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    async fn list_by_connection(
        &self,
        connection_id: i64,
    ) -> Result<Vec<WatermarkRecord>, WatermarkError> {
        let rows = sqlx::query(
            "select id, name, connection_id, status, event_type, flow_type,
                    last_execution_time, last_execution_status, last_modified
             from api_connectors.flows
             where connection_id = $1
             order by id asc",
        )
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
            "insert into api_connectors.flows (
               name, connection_id, status, event_type, flow_type,
               last_execution_time, last_execution_status
             )
             values ($1, $2, $3, $4, $5, $6, $7)
             on conflict (connection_id, name) do update set
               event_type = excluded.event_type,
               last_execution_time = excluded.last_execution_time,
               last_execution_status = excluded.last_execution_status
             returning id, name, connection_id, status, event_type, flow_type,
                       last_execution_time, last_execution_status, last_modified",
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
            "update api_connectors.flows
             set last_execution_time = $1, last_execution_status = $2
             where id = $3",
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
            "update api_connectors.flows
             set last_execution_status = $1, last_modified = $2
             where id = $3",
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

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    async fn test_store() -> Option<PgWatermarkStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        let store = PgWatermarkStore::new(pool);
        store.init().await.ok()?;
        Some(store)
    }

    fn unique_connection() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp_nanos() as i64
    }

    #[tokio::test]
    async fn insert_then_list_round_trips_through_postgres() {
        let Some(store) = test_store().await else {
            return;
        };
        let connection_id = unique_connection();
        let created = store
            .upsert_in_progress(&NewWatermark {
                connection_id,
                name: "F1-a.csv".into(),
                event_type: "a.csv".into(),
                last_execution_time: Some(datetime!(2024-01-01 10:00 UTC)),
            })
            .await
            .expect("insert");

        store
            .record_outcome(
                created.id,
                ExecutionStatus::Successful,
                datetime!(2024-01-01 10:05 UTC),
            )
            .await
            .expect("outcome");

        let records = store.list_by_connection(connection_id).await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "a.csv");
        assert_eq!(
            records[0].last_execution_status,
            Some(ExecutionStatus::Successful)
        );
    }

    #[tokio::test]
    async fn repeated_upsert_keeps_one_record_per_name() {
        let Some(store) = test_store().await else {
            return;
        };
        let connection_id = unique_connection();
        let mut input = NewWatermark {
            connection_id,
            name: "F1-a.csv".into(),
            event_type: "a.csv".into(),
            last_execution_time: Some(datetime!(2024-01-01 10:00 UTC)),
        };
        let first = store.upsert_in_progress(&input).await.expect("first upsert");
        input.last_execution_time = Some(datetime!(2024-02-01 10:00 UTC));
        let second = store.upsert_in_progress(&input).await.expect("second upsert");

        assert_eq!(first.id, second.id);
        let records = store.list_by_connection(connection_id).await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].last_execution_time,
            Some(datetime!(2024-02-01 10:00 UTC))
        );
    }

    #[tokio::test]
    async fn mark_in_progress_on_unknown_id_fails() {
        let Some(store) = test_store().await else {
            return;
        };
        let err = store.mark_in_progress(-1, None).await.unwrap_err();
        assert!(matches!(err, WatermarkError::MissingRecord(-1)));
    }
}
