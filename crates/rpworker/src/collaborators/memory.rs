//! In-memory collaborators
//!
//! These are primarily for testing and local runs. They keep everything in
//! process memory and mimic the semantics of the real services closely
//! enough to exercise retries: queue visibility timeouts, etag conflicts and
//! partner-side eventual consistency via scripted failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use super::data_source::{
    DataSourceError, OperationRecord, OperationRecordDataSource, ResourceEntity,
    ResourceEntityDataSource,
};
use super::partner::{
    MarketplaceClient, PartnerAccount, PartnerAccountStatus, PartnerClient, PartnerError,
    PartnerNotification, SaasCreateRequest, SaasSubscription, SaasSubscriptionStatus,
    SignupRequest, SsoConfiguration,
};
use super::queue::{QueueError, QueueMessage, QueueReader, QueueWriter};
use crate::state::StateEnv;

// =============================================================================
// Queue
// =============================================================================

struct StoredMessage {
    id: String,
    pop_receipt: String,
    body: String,
    dequeue_count: u32,
    inserted_at: chrono::DateTime<Utc>,
    visible_at: Instant,
}

/// In-memory queue with visibility timeouts
///
/// Visibility uses `tokio::time::Instant`, so tests running with a paused
/// clock can move delayed messages into view with `tokio::time::advance`.
///
/// # Example
///
/// ```
/// use rpworker::collaborators::InMemoryQueue;
///
/// let queue = InMemoryQueue::new();
/// assert!(queue.is_empty());
/// ```
#[derive(Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<StoredMessage>>,
    unavailable: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`QueueError::Unavailable`] until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of messages, visible or not
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages a `receive` would currently return
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.visible_at <= now)
            .count()
    }

    /// Bodies of all messages in insertion order
    pub fn bodies(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.body.clone()).collect()
    }

    /// Time until the earliest hidden message becomes visible
    pub fn next_visible_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .map(|m| m.visible_at.saturating_duration_since(now))
            .min()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory queue disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueReader for InMemoryQueue {
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.check_available()?;

        let now = Instant::now();
        let mut messages = self.messages.lock();
        let mut received = vec![];

        for message in messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }

            if message.visible_at <= now {
                message.visible_at = now + visibility_timeout;
                message.pop_receipt = Uuid::now_v7().to_string();
                message.dequeue_count += 1;

                received.push(QueueMessage {
                    id: message.id.clone(),
                    pop_receipt: message.pop_receipt.clone(),
                    body: message.body.clone(),
                    dequeue_count: message.dequeue_count,
                    inserted_at: message.inserted_at,
                });
            }
        }

        Ok(received)
    }

    async fn delete_message(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.check_available()?;

        let mut messages = self.messages.lock();
        let position = messages
            .iter()
            .position(|m| m.id == message.id && m.pop_receipt == message.pop_receipt)
            .ok_or_else(|| QueueError::MessageNotFound(message.id.clone()))?;
        messages.remove(position);
        Ok(())
    }
}

#[async_trait]
impl QueueWriter for InMemoryQueue {
    async fn add_message(
        &self,
        content: String,
        visibility_delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        self.check_available()?;

        let id = Uuid::now_v7().to_string();
        self.messages.lock().push(StoredMessage {
            pop_receipt: id.clone(),
            id,
            body: content,
            dequeue_count: 0,
            inserted_at: Utc::now(),
            visible_at: Instant::now() + visibility_delay.unwrap_or(Duration::ZERO),
        });
        Ok(())
    }
}

// =============================================================================
// Data source
// =============================================================================

/// In-memory resource entity and operation record store
///
/// Every write assigns a fresh etag; updates carrying a stale etag fail with
/// [`DataSourceError::ConcurrencyConflict`].
#[derive(Default)]
pub struct InMemoryDataSource {
    entities: RwLock<HashMap<String, ResourceEntity>>,
    counters: RwLock<HashMap<String, u64>>,
    operations: RwLock<HashMap<Uuid, OperationRecord>>,
    unavailable_calls: AtomicU32,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `calls` calls with [`DataSourceError::Unavailable`]
    pub fn fail_next_calls(&self, calls: u32) {
        self.unavailable_calls.store(calls, Ordering::SeqCst);
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.read().len()
    }

    fn check_available(&self) -> Result<(), DataSourceError> {
        let injected = self
            .unavailable_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DataSourceError::Unavailable(
                "injected data source outage".to_string(),
            ));
        }
        Ok(())
    }
}

fn new_etag() -> String {
    Uuid::now_v7().to_string()
}

#[async_trait]
impl ResourceEntityDataSource for InMemoryDataSource {
    async fn add_entity(
        &self,
        mut entity: ResourceEntity,
    ) -> Result<ResourceEntity, DataSourceError> {
        self.check_available()?;

        let mut entities = self.entities.write();
        if entities.contains_key(&entity.id) {
            return Err(DataSourceError::AlreadyExists(entity.id));
        }

        entity.etag = Some(new_etag());
        entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<ResourceEntity>, DataSourceError> {
        self.check_available()?;
        Ok(self.entities.read().get(id).cloned())
    }

    async fn list_entities_by_resource_id(
        &self,
        resource_id: &str,
    ) -> Result<Vec<ResourceEntity>, DataSourceError> {
        self.check_available()?;

        let entities = self.entities.read();
        let mut matching: Vec<_> = entities
            .values()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(matching)
    }

    async fn update_entity(
        &self,
        mut entity: ResourceEntity,
    ) -> Result<ResourceEntity, DataSourceError> {
        self.check_available()?;

        let mut entities = self.entities.write();
        let stored = entities
            .get_mut(&entity.id)
            .ok_or_else(|| DataSourceError::NotFound(entity.id.clone()))?;

        if stored.etag != entity.etag {
            return Err(DataSourceError::ConcurrencyConflict { id: entity.id });
        }

        entity.etag = Some(new_etag());
        *stored = entity.clone();
        Ok(entity)
    }

    async fn delete_entity(&self, id: &str) -> Result<bool, DataSourceError> {
        self.check_available()?;
        Ok(self.entities.write().remove(id).is_some())
    }

    async fn increment_counter(&self, name: &str) -> Result<u64, DataSourceError> {
        self.check_available()?;

        let mut counters = self.counters.write();
        let counter = counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn get_counter(&self, name: &str) -> Result<u64, DataSourceError> {
        self.check_available()?;
        Ok(self.counters.read().get(name).copied().unwrap_or(0))
    }
}

#[async_trait]
impl OperationRecordDataSource for InMemoryDataSource {
    async fn upsert_operation(&self, record: OperationRecord) -> Result<(), DataSourceError> {
        self.check_available()?;
        self.operations.write().insert(record.operation_id, record);
        Ok(())
    }

    async fn get_operation(
        &self,
        operation_id: Uuid,
    ) -> Result<Option<OperationRecord>, DataSourceError> {
        self.check_available()?;
        Ok(self.operations.read().get(&operation_id).cloned())
    }
}

// =============================================================================
// Scripted failures shared by the partner fakes
// =============================================================================

#[derive(Default)]
struct CallScript {
    failures: Mutex<HashMap<&'static str, VecDeque<PartnerError>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl CallScript {
    fn push_failure(&self, operation: &'static str, error: PartnerError) {
        self.failures
            .lock()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Count the call and pop a scripted failure for it, if any
    fn enter(&self, operation: &'static str) -> Result<(), PartnerError> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;

        match self
            .failures
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }
}

// =============================================================================
// Marketplace
// =============================================================================

/// In-memory marketplace
///
/// Operation names for [`fail_next`](Self::fail_next) and
/// [`call_count`](Self::call_count) are the trait method names, e.g.
/// `"create_saas_subscription"`.
#[derive(Default)]
pub struct InMemoryMarketplace {
    subscriptions: RwLock<HashMap<String, SaasSubscription>>,
    next_id: AtomicU64,
    script: CallScript,
}

impl InMemoryMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: PartnerError) {
        self.script.push_failure(operation, error);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.script.call_count(operation)
    }

    pub fn subscriptions(&self) -> Vec<SaasSubscription> {
        self.subscriptions.read().values().cloned().collect()
    }
}

#[async_trait]
impl MarketplaceClient for InMemoryMarketplace {
    async fn find_saas_subscription(
        &self,
        name: &str,
    ) -> Result<Option<SaasSubscription>, PartnerError> {
        self.script.enter("find_saas_subscription")?;
        Ok(self
            .subscriptions
            .read()
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn create_saas_subscription(
        &self,
        request: &SaasCreateRequest,
    ) -> Result<SaasSubscription, PartnerError> {
        self.script.enter("create_saas_subscription")?;

        let id = format!("saas-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let subscription = SaasSubscription {
            id: id.clone(),
            name: request.name.clone(),
            offer_id: request.offer_id.clone(),
            plan_id: request.plan_id.clone(),
            status: SaasSubscriptionStatus::PendingFulfillmentStart,
        };
        self.subscriptions.write().insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn activate_saas_subscription(
        &self,
        subscription_id: &str,
        plan_id: &str,
    ) -> Result<SaasSubscription, PartnerError> {
        self.script.enter("activate_saas_subscription")?;

        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions.get_mut(subscription_id).ok_or_else(|| {
            PartnerError::entity_not_found(format!("saas subscription {subscription_id}"))
        })?;
        subscription.plan_id = plan_id.to_string();
        subscription.status = SaasSubscriptionStatus::Subscribed;
        Ok(subscription.clone())
    }

    async fn delete_saas_subscription(&self, subscription_id: &str) -> Result<(), PartnerError> {
        self.script.enter("delete_saas_subscription")?;

        self.subscriptions
            .write()
            .remove(subscription_id)
            .map(|_| ())
            .ok_or_else(|| {
                PartnerError::entity_not_found(format!("saas subscription {subscription_id}"))
            })
    }
}

// =============================================================================
// Partner
// =============================================================================

/// In-memory partner API
///
/// Accounts are created `Active` unless [`with_pending_activation`] is set,
/// in which case they stay `Pending` until [`activate`](Self::activate).
/// Notifications are deduplicated on `notification_id` the way partners do.
///
/// [`with_pending_activation`]: Self::with_pending_activation
#[derive(Default)]
pub struct InMemoryPartner {
    accounts: RwLock<HashMap<String, PartnerAccount>>,
    sso: RwLock<HashMap<String, SsoConfiguration>>,
    properties: RwLock<HashMap<String, serde_json::Value>>,
    notifications: RwLock<Vec<PartnerNotification>>,
    next_id: AtomicU64,
    pending_activation: bool,
    script: CallScript,
}

impl InMemoryPartner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending_activation(mut self) -> Self {
        self.pending_activation = true;
        self
    }

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: PartnerError) {
        self.script.push_failure(operation, error);
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.script.call_count(operation)
    }

    /// Simulate the partner's activation callback
    pub fn activate(&self, account_id: &str) -> bool {
        match self.accounts.write().get_mut(account_id) {
            Some(account) => {
                account.status = PartnerAccountStatus::Active;
                true
            }
            None => false,
        }
    }

    pub fn accounts(&self) -> Vec<PartnerAccount> {
        self.accounts.read().values().cloned().collect()
    }

    pub fn account(&self, account_id: &str) -> Option<PartnerAccount> {
        self.accounts.read().get(account_id).cloned()
    }

    pub fn sso_configuration(&self, account_id: &str) -> Option<SsoConfiguration> {
        self.sso.read().get(account_id).cloned()
    }

    pub fn account_properties(&self, account_id: &str) -> Option<serde_json::Value> {
        self.properties.read().get(account_id).cloned()
    }

    pub fn notifications(&self) -> Vec<PartnerNotification> {
        self.notifications.read().clone()
    }

    fn with_account<T>(
        &self,
        account_id: &str,
        f: impl FnOnce(&mut PartnerAccount) -> T,
    ) -> Result<T, PartnerError> {
        let mut accounts = self.accounts.write();
        match accounts.get_mut(account_id) {
            Some(account) if account.status != PartnerAccountStatus::Deleted => Ok(f(account)),
            _ => Err(PartnerError::entity_not_found(format!(
                "partner account {account_id}"
            ))),
        }
    }
}

#[async_trait]
impl PartnerClient for InMemoryPartner {
    async fn find_account(
        &self,
        resource_id: &str,
    ) -> Result<Option<PartnerAccount>, PartnerError> {
        self.script.enter("find_account")?;
        Ok(self
            .accounts
            .read()
            .values()
            .find(|a| a.resource_id == resource_id && a.status != PartnerAccountStatus::Deleted)
            .cloned())
    }

    async fn get_account(&self, account_id: &str) -> Result<PartnerAccount, PartnerError> {
        self.script.enter("get_account")?;
        self.with_account(account_id, |account| account.clone())
    }

    async fn sign_up(&self, request: &SignupRequest) -> Result<PartnerAccount, PartnerError> {
        self.script.enter("sign_up")?;

        let id = format!("acct-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let account = PartnerAccount {
            id: id.clone(),
            resource_id: request.resource_id.clone(),
            status: if self.pending_activation {
                PartnerAccountStatus::Pending
            } else {
                PartnerAccountStatus::Active
            },
            linked_organizations: vec![],
        };
        self.accounts.write().insert(id, account.clone());
        Ok(account)
    }

    async fn link_organization(
        &self,
        account_id: &str,
        organization_id: &str,
    ) -> Result<(), PartnerError> {
        self.script.enter("link_organization")?;
        self.with_account(account_id, |account| {
            if !account
                .linked_organizations
                .iter()
                .any(|o| o == organization_id)
            {
                account.linked_organizations.push(organization_id.to_string());
            }
        })
    }

    async fn unlink_organization(
        &self,
        account_id: &str,
        organization_id: &str,
    ) -> Result<(), PartnerError> {
        self.script.enter("unlink_organization")?;
        self.with_account(account_id, |account| {
            account.linked_organizations.retain(|o| o != organization_id);
        })
    }

    async fn configure_sso(
        &self,
        account_id: &str,
        configuration: &SsoConfiguration,
    ) -> Result<(), PartnerError> {
        self.script.enter("configure_sso")?;
        self.with_account(account_id, |_| ())?;
        self.sso
            .write()
            .insert(account_id.to_string(), configuration.clone());
        Ok(())
    }

    async fn update_account(
        &self,
        account_id: &str,
        properties: &serde_json::Value,
    ) -> Result<(), PartnerError> {
        self.script.enter("update_account")?;
        self.with_account(account_id, |_| ())?;
        self.properties
            .write()
            .insert(account_id.to_string(), properties.clone());
        Ok(())
    }

    async fn notify(&self, notification: &PartnerNotification) -> Result<(), PartnerError> {
        self.script.enter("notify")?;

        let mut notifications = self.notifications.write();
        if !notifications
            .iter()
            .any(|n| n.notification_id == notification.notification_id)
        {
            notifications.push(notification.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// One of every in-memory collaborator, wired together
///
/// # Example
///
/// ```
/// use rpworker::collaborators::InMemoryCollaborators;
///
/// let fakes = InMemoryCollaborators::new();
/// let env = fakes.env();
/// assert!(!env.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryCollaborators {
    pub data_source: Arc<InMemoryDataSource>,
    pub marketplace: Arc<InMemoryMarketplace>,
    pub partner: Arc<InMemoryPartner>,

    /// Work queue; also receives follow-up commands
    pub queue: Arc<InMemoryQueue>,

    pub dead_letter: Arc<InMemoryQueue>,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partner(mut self, partner: InMemoryPartner) -> Self {
        self.partner = Arc::new(partner);
        self
    }

    /// State environment backed by these collaborators
    pub fn env(&self) -> StateEnv {
        StateEnv::new(
            self.data_source.clone(),
            self.data_source.clone(),
            self.marketplace.clone(),
            self.partner.clone(),
            self.queue.clone(),
        )
    }
}
