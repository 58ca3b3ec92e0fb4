//! External collaborators consumed through capability traits
//!
//! This module provides:
//! - [`QueueReader`] / [`QueueWriter`] for the work and dead-letter queues
//! - [`ResourceEntityDataSource`] and [`OperationRecordDataSource`] for persistence
//! - [`MarketplaceClient`] and [`PartnerClient`] for outbound partner calls
//! - [`MetricsRecorder`] for counters
//! - In-memory implementations of all of the above for tests and local runs

mod data_source;
mod memory;
mod metrics;
mod partner;
mod queue;

pub use data_source::{
    DataSourceError, OperationRecord, OperationRecordDataSource, OperationStatus,
    ProvisioningState, ResourceEntity, ResourceEntityDataSource,
};
pub use memory::{
    InMemoryCollaborators, InMemoryDataSource, InMemoryMarketplace, InMemoryPartner, InMemoryQueue,
};
pub use metrics::{MetricsRecorder, TracingMetrics};
pub use partner::{
    MarketplaceClient, NotificationKind, PartnerAccount, PartnerAccountStatus, PartnerClient,
    PartnerError, PartnerNotification, SaasCreateRequest, SaasSubscription,
    SaasSubscriptionStatus, SignupRequest, SsoConfiguration, ENTITY_NOT_FOUND,
};
pub use queue::{QueueError, QueueMessage, QueueReader, QueueWriter};
