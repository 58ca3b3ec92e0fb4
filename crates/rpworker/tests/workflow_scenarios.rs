//! End-to-end workflow scenarios against the in-memory collaborators
//!
//! Run with: cargo test -p rpworker --test workflow_scenarios

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rpworker::collaborators::{
    InMemoryCollaborators, NotificationKind, OperationRecordDataSource, OperationStatus,
    PartnerError, ProvisioningState, QueueMessage, QueueReader, QueueWriter,
    ResourceEntityDataSource,
};
use rpworker::dispatcher::{MessageDispatcher, MessageDisposition};
use rpworker::engine::StateMachineEngine;
use rpworker::model::{
    keys, CommandRequest, RpWorkerQueueCommand, StateContext, StatesEnum, SubState, WorkerMessage,
};
use rpworker::reliability::{BackoffPolicy, ClassifierConfig, ErrorClassifier, StatusCode};
use rpworker::state::{State, StateEnv, StateError, StateRegistry};
use rpworker::states::standard_registry;
use rpworker::worker::{PollerConfig, QueueListener, QueueListenerConfig};

const VISIBILITY: Duration = Duration::from_secs(30);

fn dispatcher_with(
    fakes: &InMemoryCollaborators,
    registry: StateRegistry,
    config: ClassifierConfig,
) -> MessageDispatcher {
    let engine = StateMachineEngine::new(Arc::new(registry), ErrorClassifier::new(config));
    MessageDispatcher::new(
        engine,
        fakes.env(),
        fakes.queue.clone(),
        fakes.dead_letter.clone(),
    )
}

fn dispatcher(fakes: &InMemoryCollaborators) -> MessageDispatcher {
    dispatcher_with(fakes, standard_registry(), ClassifierConfig::default())
}

fn create_request(resource_id: &str) -> CommandRequest {
    CommandRequest::new(RpWorkerQueueCommand::CreateResource, resource_id)
        .with_operation_id(Uuid::now_v7())
        .with_value(keys::PUBLISHER_ID, "contoso")
        .with_value(keys::OFFER_ID, "contoso-saas")
        .with_value(keys::PLAN_ID, "gold")
        .with_value(keys::USER_EMAIL, "owner@example.com")
        .with_value(keys::ORGANIZATION_ID, "org-42")
}

async fn enqueue(fakes: &InMemoryCollaborators, request: CommandRequest) {
    let body = WorkerMessage::Command(request).to_json().unwrap();
    fakes.queue.add_message(body, None).await.unwrap();
}

async fn next_message(fakes: &InMemoryCollaborators) -> QueueMessage {
    let mut messages = fakes.queue.receive(1, VISIBILITY).await.unwrap();
    assert_eq!(messages.len(), 1, "expected one visible message");
    messages.remove(0)
}

async fn deliver_next(
    fakes: &InMemoryCollaborators,
    dispatcher: &MessageDispatcher,
) -> MessageDisposition {
    let message = next_message(fakes).await;
    dispatcher
        .process(&message, CancellationToken::new())
        .await
        .unwrap()
}

fn resumed(body: &str) -> StateContext {
    match WorkerMessage::from_json(body).unwrap() {
        WorkerMessage::Resume(ctx) => ctx,
        other => panic!("expected resume, got {other:?}"),
    }
}

// =============================================================================
// Create
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_create_resource_runs_full_flow() {
    let fakes = InMemoryCollaborators::new();
    let request = create_request("res-create");
    let operation_id = request.operation_id.unwrap();
    enqueue(&fakes, request).await;

    let disposition = deliver_next(&fakes, &dispatcher(&fakes)).await;
    assert!(matches!(
        disposition,
        MessageDisposition::Complete {
            terminal: StatesEnum::Succeeded
        }
    ));
    assert!(fakes.queue.is_empty());
    assert!(fakes.dead_letter.is_empty());

    let subscriptions = fakes.marketplace.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].plan_id, "gold");

    let entities = fakes
        .data_source
        .list_entities_by_resource_id("res-create")
        .await
        .unwrap();
    assert_eq!(entities.len(), 1);
    let entity = &entities[0];
    assert_eq!(entity.provisioning_state, ProvisioningState::Succeeded);
    assert_eq!(
        entity.saas_subscription_id.as_deref(),
        Some(subscriptions[0].id.as_str())
    );

    let account_id = entity.partner_account_id.clone().unwrap();
    let account = fakes.partner.account(&account_id).unwrap();
    assert_eq!(account.linked_organizations, vec!["org-42".to_string()]);

    let notifications = fakes.partner.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_id, operation_id);
    assert_eq!(notifications[0].kind, NotificationKind::ResourceCreated);
    assert_eq!(notifications[0].details["resourceEntityId"], entity.id.as_str());

    let record = fakes
        .data_source
        .get_operation(operation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, OperationStatus::Succeeded);
    assert_eq!(record.current_state, StatesEnum::Succeeded);
    assert_eq!(record.attempts, 1);
}

#[test_log::test(tokio::test)]
async fn test_engine_leaves_entity_id_in_payload() {
    let fakes = InMemoryCollaborators::new();
    let request = create_request("res-payload");
    let mut ctx = StateContext::new(
        request.operation_id.unwrap(),
        request.command,
        request.resource_id.clone(),
        StatesEnum::CreateSaaS,
    )
    .with_payload(request.payload);

    let engine = StateMachineEngine::new(
        Arc::new(standard_registry()),
        ErrorClassifier::default(),
    );
    let outcome = engine.run(&mut ctx, &fakes.env()).await;

    assert_eq!(
        outcome,
        rpworker::RunOutcome::Completed {
            terminal: StatesEnum::Succeeded
        }
    );
    let entity_id: String = ctx.require(keys::RESOURCE_ENTITY_ID).unwrap();
    let entity = fakes.data_source.get_entity(&entity_id).await.unwrap();
    assert!(entity.is_some());
    assert!(ctx.contains(keys::SAAS_SUBSCRIPTION_ID));
    assert!(ctx.contains(keys::PARTNER_ACCOUNT_ID));
}

#[test_log::test(tokio::test)]
async fn test_redelivered_create_does_not_duplicate() {
    let fakes = InMemoryCollaborators::new();
    let request = create_request("res-replay");
    let dispatcher = dispatcher(&fakes);

    // Same command delivered twice, e.g. after a lost delete
    enqueue(&fakes, request.clone()).await;
    deliver_next(&fakes, &dispatcher).await;
    enqueue(&fakes, request).await;
    let disposition = deliver_next(&fakes, &dispatcher).await;

    assert!(matches!(
        disposition,
        MessageDisposition::Complete {
            terminal: StatesEnum::Succeeded
        }
    ));
    assert_eq!(fakes.marketplace.call_count("create_saas_subscription"), 1);
    assert_eq!(fakes.marketplace.subscriptions().len(), 1);
    assert_eq!(fakes.data_source.entity_count(), 1);
    assert_eq!(fakes.partner.call_count("sign_up"), 1);
    assert_eq!(fakes.partner.call_count("link_organization"), 1);
    assert_eq!(fakes.partner.accounts().len(), 1);
    assert_eq!(fakes.partner.notifications().len(), 1);
}

// =============================================================================
// Failures
// =============================================================================

/// Custom state that fails with an error no classifier rule knows
#[derive(Debug, Default)]
struct ExplodingState;

#[async_trait]
impl State for ExplodingState {
    const ID: StatesEnum = StatesEnum::CustomState1;

    async fn execute(
        &self,
        _ctx: &mut StateContext,
        _env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        Err(anyhow::anyhow!("disk on fire").into())
    }
}

#[test_log::test(tokio::test)]
async fn test_unclassified_error_is_dead_lettered() {
    let fakes = InMemoryCollaborators::new();
    let mut registry = standard_registry();
    registry.register::<ExplodingState>();
    let dispatcher = dispatcher_with(&fakes, registry, ClassifierConfig::default());

    let operation_id = Uuid::now_v7();
    enqueue(
        &fakes,
        CommandRequest::new(RpWorkerQueueCommand::CustomCommand, "res-custom")
            .with_operation_id(operation_id)
            .with_sub_state(SubState::Custom(StatesEnum::CustomState1)),
    )
    .await;

    let disposition = deliver_next(&fakes, &dispatcher).await;
    let MessageDisposition::DeadLetter { error, .. } = disposition else {
        panic!("expected dead letter, got {disposition:?}");
    };
    assert_eq!(error.status_code, StatusCode::InternalError);
    assert!(!error.retryable);

    assert!(fakes.queue.is_empty());
    let dead = resumed(&fakes.dead_letter.bodies()[0]);
    assert_eq!(dead.current_state, StatesEnum::Failed);

    let record = fakes
        .data_source
        .get_operation(operation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, OperationStatus::Failed);
    assert_eq!(record.failed_state, Some(StatesEnum::CustomState1));
    assert_eq!(record.status_code, Some(StatusCode::InternalError));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_entity_not_found_waits_then_succeeds() {
    let fakes = InMemoryCollaborators::new();
    fakes
        .partner
        .fail_next("get_account", PartnerError::entity_not_found("partner account"));
    let request = create_request("res-eventual");
    let operation_id = request.operation_id.unwrap();
    enqueue(&fakes, request).await;
    let dispatcher = dispatcher(&fakes);

    let disposition = deliver_next(&fakes, &dispatcher).await;
    let MessageDisposition::Retry { delay, context, error } = disposition else {
        panic!("expected retry, got {disposition:?}");
    };
    assert_eq!(delay, Duration::from_secs(60));
    assert_eq!(error.status_code, StatusCode::EntityNotFound);
    assert_eq!(context.current_state, StatesEnum::WaitForPartnerActivation);
    assert_eq!(context.attempt, 2);
    assert_eq!(context.entity_not_found_retries, 1);

    let record = fakes
        .data_source
        .get_operation(operation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, OperationStatus::InProgress);

    // Hidden for the fixed wait
    assert_eq!(fakes.queue.len(), 1);
    assert_eq!(fakes.queue.visible_len(), 0);
    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(fakes.queue.visible_len(), 0);
    tokio::time::advance(Duration::from_secs(1)).await;

    let disposition = deliver_next(&fakes, &dispatcher).await;
    assert!(matches!(
        disposition,
        MessageDisposition::Complete {
            terminal: StatesEnum::Succeeded
        }
    ));

    // The earlier states were not repeated
    assert_eq!(fakes.marketplace.call_count("create_saas_subscription"), 1);
    assert_eq!(fakes.partner.call_count("sign_up"), 1);
    assert_eq!(fakes.data_source.entity_count(), 1);

    let record = fakes
        .data_source
        .get_operation(operation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, OperationStatus::Succeeded);
    assert_eq!(record.attempts, 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_entity_not_found_retries_are_bounded() {
    let fakes = InMemoryCollaborators::new();
    for _ in 0..3 {
        fakes
            .partner
            .fail_next("get_account", PartnerError::entity_not_found("partner account"));
    }
    enqueue(&fakes, create_request("res-missing")).await;
    let dispatcher = dispatcher(&fakes);

    for expected_retries in 1..=2 {
        let disposition = deliver_next(&fakes, &dispatcher).await;
        let MessageDisposition::Retry { delay, context, .. } = disposition else {
            panic!("expected retry, got {disposition:?}");
        };
        assert_eq!(delay, Duration::from_secs(60));
        assert_eq!(context.entity_not_found_retries, expected_retries);
        tokio::time::advance(delay).await;
    }

    let disposition = deliver_next(&fakes, &dispatcher).await;
    let MessageDisposition::DeadLetter { error, .. } = disposition else {
        panic!("expected dead letter, got {disposition:?}");
    };
    assert_eq!(error.status_code, StatusCode::EntityNotFound);
    assert_eq!(error.failed_state, Some(StatesEnum::WaitForPartnerActivation));
    assert_eq!(fakes.partner.call_count("get_account"), 3);
    assert_eq!(fakes.dead_letter.len(), 1);
    assert!(fakes.queue.is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_transient_errors_exhaust_attempts() {
    let fakes = InMemoryCollaborators::new();
    for _ in 0..3 {
        fakes.partner.fail_next(
            "notify",
            PartnerError::Http {
                status: 503,
                message: "maintenance".to_string(),
            },
        );
    }
    let config = ClassifierConfig::default()
        .with_max_attempts(3)
        .with_backoff(BackoffPolicy::fixed(Duration::from_secs(1)));
    let dispatcher = dispatcher_with(&fakes, standard_registry(), config);

    let operation_id = Uuid::now_v7();
    enqueue(
        &fakes,
        CommandRequest::new(RpWorkerQueueCommand::NotifyPartner, "res-flaky")
            .with_operation_id(operation_id),
    )
    .await;

    for attempt in 1..=2 {
        let disposition = deliver_next(&fakes, &dispatcher).await;
        let MessageDisposition::Retry { delay, context, error } = disposition else {
            panic!("expected retry on attempt {attempt}, got {disposition:?}");
        };
        assert_eq!(error.status_code, StatusCode::PartnerUnavailable);
        assert_eq!(context.attempt, attempt + 1);
        tokio::time::advance(delay).await;
    }

    let disposition = deliver_next(&fakes, &dispatcher).await;
    let MessageDisposition::DeadLetter { error, .. } = disposition else {
        panic!("expected dead letter, got {disposition:?}");
    };
    assert_eq!(error.status_code, StatusCode::RetriesExhausted);

    let record = fakes
        .data_source
        .get_operation(operation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, OperationStatus::Failed);
    assert_eq!(record.status_code, Some(StatusCode::RetriesExhausted));
    assert_eq!(record.failed_state, Some(StatesEnum::NotifyPartner));
    assert_eq!(record.attempts, 3);
}

// =============================================================================
// Delete
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_delete_after_create_cleans_up_and_notifies() {
    let fakes = InMemoryCollaborators::new();
    let dispatcher = dispatcher(&fakes);

    enqueue(&fakes, create_request("res-gone")).await;
    deliver_next(&fakes, &dispatcher).await;
    let account_id = fakes.partner.accounts()[0].id.clone();

    let delete_id = Uuid::now_v7();
    enqueue(
        &fakes,
        CommandRequest::new(RpWorkerQueueCommand::DeleteResource, "res-gone")
            .with_operation_id(delete_id),
    )
    .await;
    let disposition = deliver_next(&fakes, &dispatcher).await;
    assert!(matches!(
        disposition,
        MessageDisposition::Complete {
            terminal: StatesEnum::Succeeded
        }
    ));

    assert!(fakes.marketplace.subscriptions().is_empty());
    assert_eq!(fakes.data_source.entity_count(), 0);
    let account = fakes.partner.account(&account_id).unwrap();
    assert!(account.linked_organizations.is_empty());

    // Follow-up notification travels as its own command
    let follow_up = next_message(&fakes).await;
    let WorkerMessage::Command(notify) = WorkerMessage::from_json(&follow_up.body).unwrap() else {
        panic!("expected a follow-up command");
    };
    assert_eq!(notify.command, RpWorkerQueueCommand::NotifyPartner);

    dispatcher
        .process(&follow_up, CancellationToken::new())
        .await
        .unwrap();
    let deleted: Vec<_> = fakes
        .partner
        .notifications()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::ResourceDeleted)
        .collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].notification_id, delete_id);
    assert_eq!(deleted[0].partner_account_id.as_deref(), Some(account_id.as_str()));
    assert!(fakes.queue.is_empty());
}

// =============================================================================
// Listener
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_listener_drains_mixed_commands() {
    let fakes = InMemoryCollaborators::new();
    for i in 0..4 {
        enqueue(&fakes, create_request(&format!("res-listen-{i}"))).await;
    }
    enqueue(&fakes, CommandRequest::new(RpWorkerQueueCommand::NotifyPartner, "res-ping")).await;

    let config = QueueListenerConfig::new()
        .with_worker_id("scenario-worker")
        .with_max_concurrency(3)
        .with_poller(
            PollerConfig::new()
                .with_min_interval(Duration::from_millis(5))
                .with_max_interval(Duration::from_millis(25)),
        )
        .with_visibility_timeout(VISIBILITY);
    let listener = QueueListener::new(dispatcher(&fakes), fakes.queue.clone(), config);
    tokio_test::assert_ok!(listener.start());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !fakes.queue.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio_test::assert_ok!(listener.shutdown().await);

    assert!(fakes.queue.is_empty());
    assert!(fakes.dead_letter.is_empty());
    assert_eq!(fakes.data_source.entity_count(), 4);
    assert_eq!(fakes.partner.notifications().len(), 5);
    assert_eq!(fakes.data_source.operation_count(), 5);
}
