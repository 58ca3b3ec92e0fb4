//! The mutable unit of work carried through a workflow

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::states::{RpWorkerQueueCommand, StatesEnum, SubState};
use crate::reliability::StatusCode;
use crate::state::StateError;

/// Why a workflow ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// State that was executing when the failure happened
    pub failed_state: Option<StatesEnum>,
    pub status_code: StatusCode,
    pub message: String,
}

/// Workflow context
///
/// Created when a message is dequeued, mutated by each state, and discarded
/// once a terminal state is reported. The only way a context outlives a
/// delivery is by being serialized back onto the queue for a retry.
///
/// Equality and hashing use `operation_id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateContext {
    /// Correlation id for the whole operation
    pub operation_id: Uuid,

    pub command: RpWorkerQueueCommand,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_state: Option<SubState>,

    /// Resource the operation acts on
    pub resource_id: String,

    /// Last completed state boundary (the next state to execute)
    pub current_state: StatesEnum,

    /// Delivery attempt, starting at 1
    pub attempt: u32,

    /// Retries already spent on partner "entity not found" errors
    #[serde(default)]
    pub entity_not_found_retries: u32,

    /// Results accumulated by states for their successors
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl StateContext {
    /// Create a fresh context positioned at `start_state`
    pub fn new(
        operation_id: Uuid,
        command: RpWorkerQueueCommand,
        resource_id: impl Into<String>,
        start_state: StatesEnum,
    ) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            command,
            sub_state: None,
            resource_id: resource_id.into(),
            current_state: start_state,
            attempt: 1,
            entity_not_found_retries: 0,
            payload: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            failure: None,
        }
    }

    pub fn with_sub_state(mut self, sub_state: SubState) -> Self {
        self.sub_state = Some(sub_state);
        self
    }

    pub fn with_payload(mut self, payload: BTreeMap<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Move to the next state boundary
    pub fn advance(&mut self, next: StatesEnum) {
        self.current_state = next;
        self.updated_at = Utc::now();
    }

    /// Move to `Failed`, keeping the reason
    pub fn fail(&mut self, failure: FailureInfo) {
        self.failure = Some(failure);
        self.advance(StatesEnum::Failed);
    }

    /// Store a payload value
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(|source| StateError::MalformedContext {
            key: key.to_string(),
            source,
        })?;
        self.payload.insert(key.to_string(), value);
        Ok(())
    }

    /// Read a payload value, `None` when absent
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        match self.payload.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| StateError::MalformedContext {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Read a payload value that an earlier state must have written
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        self.get(key)?
            .ok_or_else(|| StateError::MissingContext(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.payload.contains_key(key)
    }
}

impl PartialEq for StateContext {
    fn eq(&self, other: &Self) -> bool {
        self.operation_id == other.operation_id
    }
}

impl Eq for StateContext {}

impl Hash for StateContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.operation_id.hash(state);
    }
}

/// Well-known payload keys shared between states
pub mod keys {
    pub const SAAS_SUBSCRIPTION_ID: &str = "saasSubscriptionId";
    pub const SAAS_SUBSCRIPTION_NAME: &str = "saasSubscriptionName";
    pub const OFFER_ID: &str = "offerId";
    pub const PLAN_ID: &str = "planId";
    pub const PUBLISHER_ID: &str = "publisherId";
    pub const BENEFICIARY_TENANT_ID: &str = "beneficiaryTenantId";
    pub const RESOURCE_ENTITY_ID: &str = "resourceEntityId";
    pub const PARTNER_ACCOUNT_ID: &str = "partnerAccountId";
    pub const ORGANIZATION_ID: &str = "organizationId";
    pub const USER_EMAIL: &str = "userEmail";
    pub const SSO_CONFIGURATION: &str = "ssoConfiguration";
    pub const RESOURCE_PROPERTIES: &str = "resourceProperties";
    pub const NOTIFICATION_KIND: &str = "notificationKind";
    /// Overrides the operation id as the partner deduplication key
    pub const NOTIFICATION_ID: &str = "notificationId";
}
