//! Data source abstractions
//!
//! Backends own their concurrency control; entity updates carry an etag and
//! fail with [`DataSourceError::ConcurrencyConflict`] when it is stale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{RpWorkerQueueCommand, StatesEnum};
use crate::reliability::StatusCode;

/// Error type for data source operations
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// Entity not found
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Entity with the same id already exists
    #[error("entity already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed
    #[error("concurrency conflict on entity {id}")]
    ConcurrencyConflict { id: String },

    /// Backend unreachable or timing out
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    /// Stored document could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Provisioning state of a resource entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    Provisioning,
    Succeeded,
    Failed,
    Deleting,
    Deleted,
}

/// Persisted record of a provisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntity {
    pub id: String,
    pub resource_id: String,
    pub provisioning_state: ProvisioningState,
    pub saas_subscription_id: Option<String>,
    pub partner_account_id: Option<String>,

    /// Operation that last wrote this entity
    pub last_operation_id: Uuid,

    /// When that operation was created; used to detect superseded operations
    pub last_operation_started_at: DateTime<Utc>,

    #[serde(default)]
    pub properties: serde_json::Value,

    /// Assigned by the data source on every write
    pub etag: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Status of an operation as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed,
    Terminated,
}

/// Durable outcome of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: Uuid,
    pub resource_id: String,
    pub command: RpWorkerQueueCommand,
    pub status: OperationStatus,
    pub current_state: StatesEnum,
    pub failed_state: Option<StatesEnum>,
    pub status_code: Option<StatusCode>,
    pub message: Option<String>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

/// Resource entity persistence
#[async_trait]
pub trait ResourceEntityDataSource: Send + Sync {
    /// Insert a new entity; fails with `AlreadyExists` on id collision
    async fn add_entity(&self, entity: ResourceEntity) -> Result<ResourceEntity, DataSourceError>;

    async fn get_entity(&self, id: &str) -> Result<Option<ResourceEntity>, DataSourceError>;

    async fn list_entities_by_resource_id(
        &self,
        resource_id: &str,
    ) -> Result<Vec<ResourceEntity>, DataSourceError>;

    /// Replace an entity; `entity.etag` must match the stored etag
    async fn update_entity(
        &self,
        entity: ResourceEntity,
    ) -> Result<ResourceEntity, DataSourceError>;

    /// Returns `false` when nothing was deleted
    async fn delete_entity(&self, id: &str) -> Result<bool, DataSourceError>;

    /// Increment a named counter, returning the new value
    async fn increment_counter(&self, name: &str) -> Result<u64, DataSourceError>;

    async fn get_counter(&self, name: &str) -> Result<u64, DataSourceError>;
}

/// Operation outcome persistence
#[async_trait]
pub trait OperationRecordDataSource: Send + Sync {
    async fn upsert_operation(&self, record: OperationRecord) -> Result<(), DataSourceError>;

    async fn get_operation(
        &self,
        operation_id: Uuid,
    ) -> Result<Option<OperationRecord>, DataSourceError>;
}
