//! Message dispatch
//!
//! Turns one queue message into one [`MessageDisposition`] and applies it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::start_state::start_state_for;
use super::DispatchError;
use crate::collaborators::{
    DataSourceError, OperationRecord, OperationStatus, QueueMessage, QueueReader, QueueWriter,
};
use crate::engine::{RunOutcome, StateMachineEngine};
use crate::model::{CommandRequest, FailureInfo, StateContext, StatesEnum, WorkerMessage};
use crate::reliability::{RetryBudget, StatusCode, WorkerError};
use crate::state::StateEnv;

/// What to do with a message after running it
#[derive(Debug, Clone)]
pub enum MessageDisposition {
    /// Terminal state reached; delete the message
    Complete { terminal: StatesEnum },

    /// Re-enqueue the context as `resume` after `delay`, then delete
    Retry {
        delay: Duration,
        context: StateContext,
        error: WorkerError,
    },

    /// Write to the dead-letter queue, then delete
    ///
    /// `context` is `None` when the body could not be decoded.
    DeadLetter {
        context: Option<StateContext>,
        error: WorkerError,
    },

    /// Shutdown interrupted the run; re-enqueue without consuming an attempt
    Release { context: StateContext },
}

impl MessageDisposition {
    /// Stable name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "complete",
            Self::Retry { .. } => "retry",
            Self::DeadLetter { .. } => "dead_letter",
            Self::Release { .. } => "release",
        }
    }
}

/// Queue message dispatcher
///
/// Decodes the message, picks the start state for fresh commands, runs the
/// engine, records the durable operation outcome and decides the message's
/// disposition. Only the [`RunOutcome`] drives the disposition.
#[derive(Clone)]
pub struct MessageDispatcher {
    engine: StateMachineEngine,
    env: StateEnv,
    reader: Arc<dyn QueueReader>,
    dead_letter: Arc<dyn QueueWriter>,
}

impl MessageDispatcher {
    /// Retries and releases are written through `env.queue_writer`
    pub fn new(
        engine: StateMachineEngine,
        env: StateEnv,
        reader: Arc<dyn QueueReader>,
        dead_letter: Arc<dyn QueueWriter>,
    ) -> Self {
        Self {
            engine,
            env,
            reader,
            dead_letter,
        }
    }

    pub fn engine(&self) -> &StateMachineEngine {
        &self.engine
    }

    /// Dispatch a message and apply its disposition to the queues
    pub async fn process(
        &self,
        message: &QueueMessage,
        cancellation: CancellationToken,
    ) -> Result<MessageDisposition, DispatchError> {
        let disposition = self.dispatch(message, cancellation).await;

        match &disposition {
            MessageDisposition::Complete { .. } => {}
            MessageDisposition::Retry { delay, context, .. } => {
                let body = WorkerMessage::Resume(context.clone()).to_json()?;
                self.env.queue_writer.add_message(body, Some(*delay)).await?;
            }
            MessageDisposition::DeadLetter { context, .. } => {
                let body = match context {
                    Some(context) => WorkerMessage::Resume(context.clone()).to_json()?,
                    None => message.body.clone(),
                };
                self.dead_letter.add_message(body, None).await?;
            }
            MessageDisposition::Release { context } => {
                let body = WorkerMessage::Resume(context.clone()).to_json()?;
                self.env.queue_writer.add_message(body, None).await?;
            }
        }

        self.reader.delete_message(message).await?;
        debug!(message_id = %message.id, disposition = disposition.name(), "message settled");
        Ok(disposition)
    }

    /// Run a message and decide its disposition without touching the queues
    pub async fn dispatch(
        &self,
        message: &QueueMessage,
        cancellation: CancellationToken,
    ) -> MessageDisposition {
        let mut ctx = match WorkerMessage::from_json(&message.body) {
            Ok(WorkerMessage::Command(request)) => self.start(request, message),
            Ok(WorkerMessage::Resume(ctx)) => ctx,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "malformed message body");
                let disposition = MessageDisposition::DeadLetter {
                    context: None,
                    error: WorkerError::fatal(
                        StatusCode::MalformedContext,
                        format!("malformed message body: {e}"),
                    ),
                };
                self.env.metrics.record_outcome(None, disposition.name());
                return disposition;
            }
        };

        // Deliveries of this body that never settled still consumed attempts
        ctx.attempt = ctx
            .attempt
            .saturating_add(message.dequeue_count.saturating_sub(1));

        let span = info_span!(
            "dispatch",
            operation_id = %ctx.operation_id,
            command = %ctx.command,
            resource_id = %ctx.resource_id,
            attempt = ctx.attempt,
            dequeue_count = message.dequeue_count,
        );

        let command = ctx.command;
        let disposition = async {
            if ctx.current_state == StatesEnum::Failed {
                debug!("context already failed, dead-lettering");
                let error = failure_error(&ctx);
                return self.dead_letter(ctx, error).await;
            }

            if ctx.is_terminal() {
                debug!(terminal = %ctx.current_state, "context already terminal, replaying outcome");
                return self.complete(ctx).await;
            }

            let classifier = self.engine.classifier();
            let budget = RetryBudget::from_context(&ctx);
            if let Some(error) = classifier
                .check_attempts(budget, ctx.current_state)
                .or_else(|| classifier.check_deadline(budget, ctx.current_state))
            {
                fail_context(&mut ctx, &error);
                return self.dead_letter(ctx, error).await;
            }

            let env = self.env.clone().with_cancellation(cancellation);
            match self.engine.run(&mut ctx, &env).await {
                RunOutcome::Completed { .. } => self.complete(ctx).await,
                RunOutcome::Retry(error) => self.retry(ctx, error).await,
                RunOutcome::Failed(error) => self.dead_letter(ctx, error).await,
                RunOutcome::Cancelled { resume_state } => {
                    info!(%resume_state, "released for another worker");
                    MessageDisposition::Release { context: ctx }
                }
            }
        }
        .instrument(span)
        .await;

        self.env.metrics.record_outcome(Some(command), disposition.name());
        disposition
    }

    /// Build a fresh context; on an unsupported command, a failed one
    ///
    /// Without a caller-supplied id the operation id is derived from the
    /// queue message id, so every delivery of the message is one operation.
    fn start(&self, request: CommandRequest, message: &QueueMessage) -> StateContext {
        let operation_id = request
            .operation_id
            .unwrap_or_else(|| operation_id_for(message));

        let (start, rejection) = match start_state_for(request.command, request.sub_state) {
            Ok(start) => (start, None),
            Err(e) => (StatesEnum::Failed, Some(e)),
        };

        let mut ctx = StateContext::new(operation_id, request.command, request.resource_id, start)
            .with_payload(request.payload);
        ctx.sub_state = request.sub_state;

        if let Some(e) = rejection {
            warn!(%operation_id, command = %ctx.command, error = %e, "rejected command");
            ctx.fail(FailureInfo {
                failed_state: None,
                status_code: StatusCode::UnsupportedCommand,
                message: e.to_string(),
            });
        }
        ctx
    }

    async fn complete(&self, ctx: StateContext) -> MessageDisposition {
        let terminal = ctx.current_state;
        let status = match terminal {
            StatesEnum::Failed => OperationStatus::Failed,
            StatesEnum::Terminated => OperationStatus::Terminated,
            _ => OperationStatus::Succeeded,
        };

        if let Err(e) = self.record(&ctx, status).await {
            error!(error = %e, "failed to record operation outcome");
            return self.retry_record(ctx, e);
        }

        info!(%terminal, "operation completed");
        MessageDisposition::Complete { terminal }
    }

    async fn retry(&self, mut ctx: StateContext, error: WorkerError) -> MessageDisposition {
        ctx.attempt += 1;
        if error.status_code == StatusCode::EntityNotFound {
            ctx.entity_not_found_retries += 1;
        }
        ctx.updated_at = Utc::now();

        if let Err(e) = self.record(&ctx, OperationStatus::InProgress).await {
            warn!(error = %e, "failed to record operation progress");
        }

        let delay = error.retry_after.unwrap_or(Duration::ZERO);
        info!(
            resume_state = %ctx.current_state,
            next_attempt = ctx.attempt,
            delay_ms = delay.as_millis() as u64,
            status_code = %error.status_code,
            "operation will be retried"
        );
        MessageDisposition::Retry {
            delay,
            context: ctx,
            error,
        }
    }

    async fn dead_letter(&self, ctx: StateContext, error: WorkerError) -> MessageDisposition {
        if let Err(e) = self.record(&ctx, OperationStatus::Failed).await {
            error!(error = %e, "failed to record operation failure");
            return self.retry_record(ctx, e);
        }

        error!(
            failed_state = ?error.failed_state,
            status_code = %error.status_code,
            error = %error.message,
            "operation failed"
        );
        MessageDisposition::DeadLetter {
            context: Some(ctx),
            error,
        }
    }

    /// Keep a terminal context on the queue until its record is written
    ///
    /// The attempt counter is left alone; the replay runs no state.
    fn retry_record(&self, ctx: StateContext, e: DataSourceError) -> MessageDisposition {
        let delay = self
            .engine
            .classifier()
            .config()
            .backoff
            .delay_for_attempt(ctx.attempt);
        MessageDisposition::Retry {
            delay,
            error: WorkerError::retryable(StatusCode::DataSourceUnavailable, e.to_string(), delay),
            context: ctx,
        }
    }

    async fn record(
        &self,
        ctx: &StateContext,
        status: OperationStatus,
    ) -> Result<(), DataSourceError> {
        let failure = ctx.failure.as_ref();
        self.env
            .operations
            .upsert_operation(OperationRecord {
                operation_id: ctx.operation_id,
                resource_id: ctx.resource_id.clone(),
                command: ctx.command,
                status,
                current_state: ctx.current_state,
                failed_state: failure.and_then(|f| f.failed_state),
                status_code: failure.map(|f| f.status_code),
                message: failure.map(|f| f.message.clone()),
                attempts: ctx.attempt,
                updated_at: Utc::now(),
            })
            .await
    }
}

/// Namespace for operation ids derived from queue message ids
const MESSAGE_NAMESPACE: Uuid = Uuid::from_u128(0x5c1e_7a0d_92b4_4f6e_8d3a_1b7c_e04f_6a21);

fn operation_id_for(message: &QueueMessage) -> Uuid {
    Uuid::new_v5(&MESSAGE_NAMESPACE, message.id.as_bytes())
}

/// The recorded failure of a context already moved to `Failed`
fn failure_error(ctx: &StateContext) -> WorkerError {
    match &ctx.failure {
        Some(failure) => WorkerError {
            failed_state: failure.failed_state,
            status_code: failure.status_code,
            message: failure.message.clone(),
            retry_after: None,
            retryable: false,
        },
        None => WorkerError::fatal(StatusCode::InternalError, "failed without a reason"),
    }
}

fn fail_context(ctx: &mut StateContext, error: &WorkerError) {
    ctx.fail(FailureInfo {
        failed_state: error.failed_state,
        status_code: error.status_code,
        message: error.message.clone(),
    });
}
