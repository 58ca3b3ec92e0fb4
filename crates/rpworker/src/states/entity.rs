//! Resource entity states

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::{claim, is_superseded, required_input, RESOURCE_ENTITY_COUNTER};
use crate::collaborators::{DataSourceError, NotificationKind, ProvisioningState, ResourceEntity};
use crate::model::{keys, CommandRequest, RpWorkerQueueCommand, StateContext, StatesEnum, WorkerMessage};
use crate::state::{State, StateEnv, StateError};

/// Persist the resource entity for a new resource
///
/// Reuses an entity this operation already wrote, takes over an entity left
/// by an older operation, and terminates when a newer operation owns it.
#[derive(Debug, Default)]
pub struct AddResourceEntityState;

#[async_trait]
impl State for AddResourceEntityState {
    const ID: StatesEnum = StatesEnum::AddResourceEntity;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let entities = env
            .data_source
            .list_entities_by_resource_id(&ctx.resource_id)
            .await?;

        if entities.iter().any(|e| is_superseded(ctx, e)) {
            info!("resource owned by a newer operation, terminating create");
            return Ok(StatesEnum::Terminated);
        }

        let saas_subscription_id: Option<String> = ctx.get(keys::SAAS_SUBSCRIPTION_ID)?;

        let entity = match entities.into_iter().last() {
            Some(existing) if existing.last_operation_id == ctx.operation_id => {
                debug!(entity_id = %existing.id, "resource entity already written");
                existing
            }
            Some(mut older) => {
                claim(ctx, &mut older);
                older.provisioning_state = ProvisioningState::Provisioning;
                older.saas_subscription_id = saas_subscription_id;
                let updated = env.data_source.update_entity(older).await?;
                info!(entity_id = %updated.id, "took over resource entity from older operation");
                updated
            }
            None => {
                let entity = ResourceEntity {
                    id: Uuid::now_v7().to_string(),
                    resource_id: ctx.resource_id.clone(),
                    provisioning_state: ProvisioningState::Provisioning,
                    saas_subscription_id,
                    partner_account_id: None,
                    last_operation_id: ctx.operation_id,
                    last_operation_started_at: ctx.created_at,
                    properties: ctx.get(keys::RESOURCE_PROPERTIES)?.unwrap_or(Value::Null),
                    etag: None,
                    created_at: Utc::now(),
                };
                let added = env.data_source.add_entity(entity).await?;
                let total = env
                    .data_source
                    .increment_counter(RESOURCE_ENTITY_COUNTER)
                    .await?;
                info!(entity_id = %added.id, total, "added resource entity");
                added
            }
        };

        ctx.set(keys::RESOURCE_ENTITY_ID, &entity.id)?;
        Ok(StatesEnum::PartnerSignup)
    }
}

/// Apply new properties to the resource entity and the partner account
#[derive(Debug, Default)]
pub struct UpdateResourceState;

#[async_trait]
impl State for UpdateResourceState {
    const ID: StatesEnum = StatesEnum::UpdateResource;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let properties: Value = required_input(ctx, keys::RESOURCE_PROPERTIES)?;

        let entities = env
            .data_source
            .list_entities_by_resource_id(&ctx.resource_id)
            .await?;

        if entities.iter().any(|e| is_superseded(ctx, e)) {
            info!("resource owned by a newer operation, terminating update");
            return Ok(StatesEnum::Terminated);
        }

        let mut entity = entities
            .into_iter()
            .last()
            .ok_or_else(|| DataSourceError::NotFound(ctx.resource_id.clone()))?;

        if entity.last_operation_id == ctx.operation_id && entity.properties == properties {
            debug!(entity_id = %entity.id, "resource entity already updated");
        } else {
            claim(ctx, &mut entity);
            entity.properties = properties.clone();
            entity = env.data_source.update_entity(entity).await?;
            info!(entity_id = %entity.id, "updated resource entity");
        }

        if let Some(account_id) = &entity.partner_account_id {
            env.partner.update_account(account_id, &properties).await?;
            ctx.set(keys::PARTNER_ACCOUNT_ID, account_id)?;
        }

        ctx.set(keys::RESOURCE_ENTITY_ID, &entity.id)?;
        Ok(StatesEnum::NotifyPartner)
    }
}

/// Remove the resource entity and post the deletion notice
///
/// The notice goes out as a separate `NotifyPartner` command carrying this
/// operation's id as its notification id, so a replay cannot notify twice.
#[derive(Debug, Default)]
pub struct DeleteResourceEntityState;

#[async_trait]
impl State for DeleteResourceEntityState {
    const ID: StatesEnum = StatesEnum::DeleteResourceEntity;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let entities = env
            .data_source
            .list_entities_by_resource_id(&ctx.resource_id)
            .await?;

        if entities.iter().any(|e| is_superseded(ctx, e)) {
            info!("resource owned by a newer operation, terminating delete");
            return Ok(StatesEnum::Terminated);
        }

        let mut partner_account_id: Option<String> = ctx.get(keys::PARTNER_ACCOUNT_ID)?;
        for entity in entities {
            if partner_account_id.is_none() {
                partner_account_id = entity.partner_account_id.clone();
            }
            if env.data_source.delete_entity(&entity.id).await? {
                info!(entity_id = %entity.id, "deleted resource entity");
            }
        }

        let mut follow_up = CommandRequest::new(RpWorkerQueueCommand::NotifyPartner, &ctx.resource_id)
            .with_value(keys::NOTIFICATION_ID, ctx.operation_id.to_string())
            .with_value(
                keys::NOTIFICATION_KIND,
                serde_json::to_value(NotificationKind::ResourceDeleted)
                    .map_err(anyhow::Error::from)?,
            );
        if let Some(account_id) = partner_account_id {
            follow_up = follow_up.with_value(keys::PARTNER_ACCOUNT_ID, account_id);
        }

        let body = WorkerMessage::Command(follow_up)
            .to_json()
            .map_err(anyhow::Error::from)?;
        env.queue_writer.add_message(body, None).await?;
        debug!("posted deletion notice");

        Ok(StatesEnum::Succeeded)
    }
}
