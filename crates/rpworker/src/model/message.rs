//! Queue message envelope

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::context::StateContext;
use super::states::{RpWorkerQueueCommand, SubState};

/// A fresh command that has not started executing yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Caller-supplied correlation id; derived from the queue message id when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Uuid>,

    pub command: RpWorkerQueueCommand,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_state: Option<SubState>,

    pub resource_id: String,

    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
}

impl CommandRequest {
    pub fn new(command: RpWorkerQueueCommand, resource_id: impl Into<String>) -> Self {
        Self {
            operation_id: None,
            command,
            sub_state: None,
            resource_id: resource_id.into(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_operation_id(mut self, operation_id: Uuid) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    pub fn with_sub_state(mut self, sub_state: SubState) -> Self {
        self.sub_state = Some(sub_state);
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Body of every worker queue message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Start a new workflow
    Command(CommandRequest),

    /// Continue an in-flight workflow from its last completed state
    Resume(StateContext),
}

impl WorkerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}
