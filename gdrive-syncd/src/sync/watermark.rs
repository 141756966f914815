use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use super::node::RemoteNode;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid flow status: {0}")]
    InvalidStatus(String),
    #[error("invalid flow type: {0}")]
    InvalidFlowType(String),
    #[error("invalid execution status: {0}")]
    InvalidExecutionStatus(String),
    #[error("flow {0} not found")]
    MissingRecord(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Active,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Active => "Active",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WatermarkError> {
        match value {
            "Active" => Ok(FlowStatus::Active),
            other => Err(WatermarkError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    Historical,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Historical => "HISTORICAL",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WatermarkError> {
        match value {
            "HISTORICAL" => Ok(FlowType::Historical),
            other => Err(WatermarkError::InvalidFlowType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    InProgress,
    Successful,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::InProgress => "In Progress",
            ExecutionStatus::Successful => "Successful",
            ExecutionStatus::Error => "Error",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WatermarkError> {
        match value {
            "In Progress" => Ok(ExecutionStatus::InProgress),
            "Successful" => Ok(ExecutionStatus::Successful),
            "Error" => Ok(ExecutionStatus::Error),
            other => Err(WatermarkError::InvalidExecutionStatus(other.to_string())),
        }
    }
}

/// Identity of a leaf within a connection: the folder it was listed under
/// plus its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkKey<'a> {
    pub folder_id: &'a str,
    pub file_name: &'a str,
}

impl<'a> WatermarkKey<'a> {
    pub fn new(folder_id: &'a str, file_name: &'a str) -> Self {
        Self {
            folder_id,
            file_name,
        }
    }

    /// Value stored in the `name` column.
    pub fn flow_name(&self) -> String {
        format!("{}-{}", self.folder_id, self.file_name)
    }

    pub fn matches(&self, record: &WatermarkRecord) -> bool {
        record.event_type == self.file_name && record.name == self.flow_name()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkRecord {
    pub id: i64,
    pub connection_id: i64,
    pub name: String,
    pub status: FlowStatus,
    pub event_type: String,
    pub flow_type: FlowType,
    pub last_execution_time: Option<OffsetDateTime>,
    pub last_execution_status: Option<ExecutionStatus>,
    pub last_modified: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWatermark {
    pub connection_id: i64,
    pub name: String,
    pub event_type: String,
    pub last_execution_time: Option<OffsetDateTime>,
}

impl NewWatermark {
    pub fn for_leaf(connection_id: i64, folder_id: &str, node: &RemoteNode) -> Self {
        Self {
            connection_id,
            name: WatermarkKey::new(folder_id, &node.name).flow_name(),
            event_type: node.name.clone(),
            last_execution_time: node.modified_at,
        }
    }
}

/// Persistence for per-file sync watermarks.
///
/// Reads and writes are independent statements; two jobs for the same
/// connection running at once can interleave a read with another job's write.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn init(&self) -> Result<(), WatermarkError>;

    async fn list_by_connection(
        &self,
        connection_id: i64,
    ) -> Result<Vec<WatermarkRecord>, WatermarkError>;

    /// Inserts an `Active`/`HISTORICAL` record in `In Progress` state.
    ///
    /// There is at most one record per `(connection_id, name)`. When one
    /// already exists it is moved to `In Progress` with the new execution time
    /// and keeps its id.
    async fn upsert_in_progress(
        &self,
        input: &NewWatermark,
    ) -> Result<WatermarkRecord, WatermarkError>;

    /// Moves an existing record to `In Progress` for a newer remote version.
    async fn mark_in_progress(
        &self,
        id: i64,
        last_execution_time: Option<OffsetDateTime>,
    ) -> Result<(), WatermarkError>;

    async fn record_outcome(
        &self,
        id: i64,
        status: ExecutionStatus,
        at: OffsetDateTime,
    ) -> Result<(), WatermarkError>;
}
