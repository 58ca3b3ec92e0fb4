//! State trait definition

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{
    DataSourceError, MarketplaceClient, MetricsRecorder, OperationRecordDataSource, PartnerClient,
    PartnerError, QueueError, QueueWriter, ResourceEntityDataSource, TracingMetrics,
};
use crate::model::{StateContext, StatesEnum};

/// Error raised by a state
///
/// States never decide whether they are retried; the
/// [`ErrorClassifier`](crate::reliability::ErrorClassifier) does.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Partner(#[from] PartnerError),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Input rejected; retrying would fail the same way
    #[error("validation failed: {0}")]
    Validation(String),

    /// A payload value an earlier state should have written is absent
    #[error("missing context value: {0}")]
    MissingContext(String),

    /// A payload value has the wrong shape
    #[error("malformed context value {key}: {source}")]
    MalformedContext {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The partner has not delivered an asynchronous callback yet
    #[error("awaiting partner callback: {0}")]
    AwaitingCallback(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StateError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Collaborators injected into every state
///
/// Cheap to clone; every handle is an `Arc`.
#[derive(Clone)]
pub struct StateEnv {
    pub data_source: Arc<dyn ResourceEntityDataSource>,
    pub operations: Arc<dyn OperationRecordDataSource>,
    pub marketplace: Arc<dyn MarketplaceClient>,
    pub partner: Arc<dyn PartnerClient>,

    /// Work queue, for follow-up commands
    pub queue_writer: Arc<dyn QueueWriter>,

    pub metrics: Arc<dyn MetricsRecorder>,
    pub cancellation: CancellationToken,
}

impl StateEnv {
    pub fn new(
        data_source: Arc<dyn ResourceEntityDataSource>,
        operations: Arc<dyn OperationRecordDataSource>,
        marketplace: Arc<dyn MarketplaceClient>,
        partner: Arc<dyn PartnerClient>,
        queue_writer: Arc<dyn QueueWriter>,
    ) -> Self {
        Self {
            data_source,
            operations,
            marketplace,
            partner,
            queue_writer,
            metrics: Arc::new(TracingMetrics),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl fmt::Debug for StateEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateEnv")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// One step of a provisioning workflow
///
/// A state performs idempotent check-then-act work through the collaborators
/// in [`StateEnv`], may write results into the context payload for its
/// successors, and returns the next state. It can be executed any number of
/// times for the same operation: a retry resumes at the state that failed,
/// so work done before the failure must be detected and not repeated.
///
/// # Example
///
/// ```ignore
/// #[derive(Default)]
/// struct ReserveQuota;
///
/// #[async_trait]
/// impl State for ReserveQuota {
///     const ID: StatesEnum = StatesEnum::CustomState1;
///
///     async fn execute(
///         &self,
///         ctx: &mut StateContext,
///         env: &StateEnv,
///     ) -> Result<StatesEnum, StateError> {
///         env.data_source.increment_counter("quota").await?;
///         Ok(StatesEnum::Succeeded)
///     }
/// }
/// ```
#[async_trait]
pub trait State: Send + Sync + 'static {
    /// The state this implementation handles
    const ID: StatesEnum;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError>;
}

/// Type-erased state interface used by the registry and engine
#[async_trait]
pub trait AnyState: Send + Sync {
    fn id(&self) -> StatesEnum;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError>;
}

/// Wrapper to implement AnyState for any State
pub(crate) struct StateWrapper<S: State> {
    pub(crate) inner: S,
}

#[async_trait]
impl<S: State> AnyState for StateWrapper<S> {
    fn id(&self) -> StatesEnum {
        S::ID
    }

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        self.inner.execute(ctx, env).await
    }
}
