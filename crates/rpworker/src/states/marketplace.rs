//! Marketplace SaaS subscription states

use async_trait::async_trait;
use tracing::{debug, info};

use super::{claim, is_superseded, required_input, saas_subscription_name};
use crate::collaborators::{ProvisioningState, SaasCreateRequest, SaasSubscriptionStatus};
use crate::model::{keys, StateContext, StatesEnum};
use crate::state::{State, StateEnv, StateError};

/// Create (or find) the marketplace SaaS subscription
#[derive(Debug, Default)]
pub struct CreateSaasState;

#[async_trait]
impl State for CreateSaasState {
    const ID: StatesEnum = StatesEnum::CreateSaaS;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        if ctx.contains(keys::SAAS_SUBSCRIPTION_ID) {
            return Ok(StatesEnum::ActivateSaaS);
        }

        let offer_id: String = required_input(ctx, keys::OFFER_ID)?;
        let plan_id: String = required_input(ctx, keys::PLAN_ID)?;
        let publisher_id: String = required_input(ctx, keys::PUBLISHER_ID)?;

        let name = match ctx.get::<String>(keys::SAAS_SUBSCRIPTION_NAME)? {
            Some(name) => name,
            None => saas_subscription_name(&ctx.resource_id),
        };

        let subscription = match env.marketplace.find_saas_subscription(&name).await? {
            Some(existing) => {
                debug!(subscription_id = %existing.id, "saas subscription already exists");
                existing
            }
            None => {
                let request = SaasCreateRequest {
                    name: name.clone(),
                    resource_id: ctx.resource_id.clone(),
                    publisher_id,
                    offer_id,
                    plan_id,
                    beneficiary_tenant_id: ctx.get(keys::BENEFICIARY_TENANT_ID)?,
                };
                let created = env.marketplace.create_saas_subscription(&request).await?;
                info!(subscription_id = %created.id, "created saas subscription");
                created
            }
        };

        ctx.set(keys::SAAS_SUBSCRIPTION_NAME, &name)?;
        ctx.set(keys::SAAS_SUBSCRIPTION_ID, &subscription.id)?;
        Ok(StatesEnum::ActivateSaaS)
    }
}

/// Activate the subscription on the requested plan
#[derive(Debug, Default)]
pub struct ActivateSaasState;

#[async_trait]
impl State for ActivateSaasState {
    const ID: StatesEnum = StatesEnum::ActivateSaaS;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let subscription_id: String = ctx.require(keys::SAAS_SUBSCRIPTION_ID)?;
        let plan_id: String = required_input(ctx, keys::PLAN_ID)?;

        if let Some(name) = ctx.get::<String>(keys::SAAS_SUBSCRIPTION_NAME)? {
            let current = env.marketplace.find_saas_subscription(&name).await?;
            if let Some(subscription) = current {
                if subscription.status == SaasSubscriptionStatus::Subscribed
                    && subscription.plan_id == plan_id
                {
                    debug!(%subscription_id, "saas subscription already active");
                    return Ok(StatesEnum::AddResourceEntity);
                }
            }
        }

        env.marketplace
            .activate_saas_subscription(&subscription_id, &plan_id)
            .await?;
        info!(%subscription_id, %plan_id, "activated saas subscription");
        Ok(StatesEnum::AddResourceEntity)
    }
}

/// Delete the SaaS subscription; a missing subscription counts as deleted
#[derive(Debug, Default)]
pub struct DeleteSaasState;

#[async_trait]
impl State for DeleteSaasState {
    const ID: StatesEnum = StatesEnum::DeleteSaaS;

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

        let mut subscription_id: Option<String> = ctx.get(keys::SAAS_SUBSCRIPTION_ID)?;

        for mut entity in entities {
            if subscription_id.is_none() {
                subscription_id = entity.saas_subscription_id.clone();
            }
            if entity.last_operation_id != ctx.operation_id {
                claim(ctx, &mut entity);
                entity.provisioning_state = ProvisioningState::Deleting;
                env.data_source.update_entity(entity).await?;
            }
        }

        if subscription_id.is_none() {
            let name = ctx
                .get::<String>(keys::SAAS_SUBSCRIPTION_NAME)?
                .unwrap_or_else(|| saas_subscription_name(&ctx.resource_id));
            subscription_id = env
                .marketplace
                .find_saas_subscription(&name)
                .await?
                .map(|s| s.id);
        }

        match subscription_id {
            Some(id) => match env.marketplace.delete_saas_subscription(&id).await {
                Ok(()) => info!(subscription_id = %id, "deleted saas subscription"),
                Err(e) if e.is_entity_not_found() => {
                    debug!(subscription_id = %id, "saas subscription already deleted")
                }
                Err(e) => return Err(e.into()),
            },
            None => debug!("no saas subscription to delete"),
        }

        Ok(StatesEnum::UnlinkOrg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        InMemoryCollaborators, PartnerError, ResourceEntity, ResourceEntityDataSource,
    };
    use crate::model::RpWorkerQueueCommand;
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    const RESOURCE: &str = "/subscriptions/s1/resourceGroups/rg/providers/Partner.Org/orgs/o1";

    fn create_context() -> StateContext {
        let mut ctx = StateContext::new(
            Uuid::now_v7(),
            RpWorkerQueueCommand::CreateResource,
            RESOURCE,
            StatesEnum::CreateSaaS,
        );
        ctx.set(keys::OFFER_ID, "offer").unwrap();
        ctx.set(keys::PLAN_ID, "gold").unwrap();
        ctx.set(keys::PUBLISHER_ID, "contoso").unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_create_saas_is_idempotent() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();

        let mut first = create_context();
        let next = CreateSaasState.execute(&mut first, &env).await.unwrap();
        assert_eq!(next, StatesEnum::ActivateSaaS);

        // A replay with a context that lost its payload finds the subscription by name
        let mut replay = create_context();
        CreateSaasState.execute(&mut replay, &env).await.unwrap();

        assert_eq!(fakes.marketplace.subscriptions().len(), 1);
        assert_eq!(fakes.marketplace.call_count("create_saas_subscription"), 1);
        assert_eq!(
            first.get::<String>(keys::SAAS_SUBSCRIPTION_ID).unwrap(),
            replay.get::<String>(keys::SAAS_SUBSCRIPTION_ID).unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_saas_requires_plan() {
        let env = InMemoryCollaborators::new().env();
        let mut ctx = create_context();
        ctx.payload.remove(keys::PLAN_ID);

        let result = CreateSaasState.execute(&mut ctx, &env).await;
        assert!(matches!(result, Err(StateError::Validation(_))));
    }

    #[tokio::test]
    async fn test_activate_skips_active_subscription() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();
        let mut ctx = create_context();

        CreateSaasState.execute(&mut ctx, &env).await.unwrap();
        assert_eq!(
            ActivateSaasState.execute(&mut ctx, &env).await.unwrap(),
            StatesEnum::AddResourceEntity
        );
        ActivateSaasState.execute(&mut ctx, &env).await.unwrap();

        assert_eq!(fakes.marketplace.call_count("activate_saas_subscription"), 1);
    }

    #[tokio::test]
    async fn test_delete_saas_tolerates_missing_subscription() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();

        let mut ctx = StateContext::new(
            Uuid::now_v7(),
            RpWorkerQueueCommand::DeleteResource,
            RESOURCE,
            StatesEnum::DeleteSaaS,
        );
        ctx.set(keys::SAAS_SUBSCRIPTION_ID, "saas-gone").unwrap();

        let next = DeleteSaasState.execute(&mut ctx, &env).await.unwrap();
        assert_eq!(next, StatesEnum::UnlinkOrg);
        assert_eq!(fakes.marketplace.call_count("delete_saas_subscription"), 1);
    }

    #[tokio::test]
    async fn test_delete_saas_propagates_other_errors() {
        let fakes = InMemoryCollaborators::new();
        fakes.marketplace.fail_next(
            "delete_saas_subscription",
            PartnerError::MarketplaceArm {
                status: 503,
                message: "busy".to_string(),
            },
        );
        let env = fakes.env();

        let mut ctx = StateContext::new(
            Uuid::now_v7(),
            RpWorkerQueueCommand::DeleteResource,
            RESOURCE,
            StatesEnum::DeleteSaaS,
        );
        ctx.set(keys::SAAS_SUBSCRIPTION_ID, "saas-1").unwrap();

        let result = DeleteSaasState.execute(&mut ctx, &env).await;
        assert!(matches!(result, Err(StateError::Partner(_))));
    }

    #[tokio::test]
    async fn test_delete_superseded_by_newer_operation() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();

        let ctx_created = Utc::now();
        fakes
            .data_source
            .add_entity(ResourceEntity {
                id: "e1".to_string(),
                resource_id: RESOURCE.to_string(),
                provisioning_state: ProvisioningState::Succeeded,
                saas_subscription_id: Some("saas-1".to_string()),
                partner_account_id: None,
                last_operation_id: Uuid::now_v7(),
                last_operation_started_at: ctx_created + ChronoDuration::minutes(5),
                properties: serde_json::Value::Null,
                etag: None,
                created_at: ctx_created,
            })
            .await
            .unwrap();

        let mut ctx = StateContext::new(
            Uuid::now_v7(),
            RpWorkerQueueCommand::DeleteResource,
            RESOURCE,
            StatesEnum::DeleteSaaS,
        );
        ctx.created_at = ctx_created;

        let next = DeleteSaasState.execute(&mut ctx, &env).await.unwrap();
        assert_eq!(next, StatesEnum::Terminated);
        assert_eq!(fakes.marketplace.call_count("delete_saas_subscription"), 0);
    }
}
