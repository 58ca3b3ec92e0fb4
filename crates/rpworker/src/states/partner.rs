//! Partner account, organization, SSO and notification states

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::required_input;
use crate::collaborators::{
    NotificationKind, PartnerAccountStatus, PartnerError, PartnerNotification, ProvisioningState,
    SignupRequest, SsoConfiguration,
};
use crate::model::{keys, RpWorkerQueueCommand, StateContext, StatesEnum};
use crate::state::{State, StateEnv, StateError};

/// Sign the resource up with the partner, reusing an existing account
#[derive(Debug, Default)]
pub struct PartnerSignupState;

#[async_trait]
impl State for PartnerSignupState {
    const ID: StatesEnum = StatesEnum::PartnerSignup;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        if ctx.contains(keys::PARTNER_ACCOUNT_ID) {
            return Ok(StatesEnum::WaitForPartnerActivation);
        }

        let account = match env.partner.find_account(&ctx.resource_id).await? {
            Some(existing) => {
                debug!(account_id = %existing.id, "partner account already exists");
                existing
            }
            None => {
                let request = SignupRequest {
                    resource_id: ctx.resource_id.clone(),
                    user_email: required_input(ctx, keys::USER_EMAIL)?,
                    saas_subscription_id: ctx.get(keys::SAAS_SUBSCRIPTION_ID)?,
                    plan_id: ctx.get(keys::PLAN_ID)?,
                };
                let account = env.partner.sign_up(&request).await?;
                info!(account_id = %account.id, "signed up partner account");
                account
            }
        };

        if let Some(entity_id) = ctx.get::<String>(keys::RESOURCE_ENTITY_ID)? {
            if let Some(mut entity) = env.data_source.get_entity(&entity_id).await? {
                if entity.partner_account_id.as_deref() != Some(account.id.as_str()) {
                    entity.partner_account_id = Some(account.id.clone());
                    env.data_source.update_entity(entity).await?;
                }
            }
        }

        ctx.set(keys::PARTNER_ACCOUNT_ID, &account.id)?;
        Ok(StatesEnum::WaitForPartnerActivation)
    }
}

/// Wait for the partner to activate the account
///
/// Partners activate asynchronously. A pending account is reported as
/// [`StateError::AwaitingCallback`] and an account the partner has not
/// propagated yet as `EntityNotFound`; both are retried.
#[derive(Debug, Default)]
pub struct WaitForPartnerActivationState;

#[async_trait]
impl State for WaitForPartnerActivationState {
    const ID: StatesEnum = StatesEnum::WaitForPartnerActivation;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let account_id: String = ctx.require(keys::PARTNER_ACCOUNT_ID)?;
        let account = env.partner.get_account(&account_id).await?;

        match account.status {
            PartnerAccountStatus::Active => Ok(StatesEnum::LinkOrg),
            PartnerAccountStatus::Pending => Err(StateError::AwaitingCallback(format!(
                "partner account {account_id} not active yet"
            ))),
            PartnerAccountStatus::Deleted => Err(StateError::validation(format!(
                "partner account {account_id} was deleted"
            ))),
        }
    }
}

/// Link the customer organization to the partner account
#[derive(Debug, Default)]
pub struct LinkOrgState;

#[async_trait]
impl State for LinkOrgState {
    const ID: StatesEnum = StatesEnum::LinkOrg;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let organization_id: String = required_input(ctx, keys::ORGANIZATION_ID)?;
        let account_id = account_for(ctx, env).await?;

        let account = env.partner.get_account(&account_id).await?;
        if account.linked_organizations.contains(&organization_id) {
            debug!(%account_id, %organization_id, "organization already linked");
        } else {
            env.partner
                .link_organization(&account_id, &organization_id)
                .await?;
            info!(%account_id, %organization_id, "linked organization");
        }

        if let Some(entity_id) = ctx.get::<String>(keys::RESOURCE_ENTITY_ID)? {
            if let Some(mut entity) = env.data_source.get_entity(&entity_id).await? {
                if entity.provisioning_state != ProvisioningState::Succeeded {
                    entity.provisioning_state = ProvisioningState::Succeeded;
                    env.data_source.update_entity(entity).await?;
                }
            }
        }

        if ctx.contains(keys::SSO_CONFIGURATION) {
            Ok(StatesEnum::ConfigureSso)
        } else {
            Ok(StatesEnum::NotifyPartner)
        }
    }
}

/// Unlink organizations before the resource goes away
///
/// Unlinks the organization named in the payload, or every linked
/// organization when none is named. A missing account counts as unlinked.
#[derive(Debug, Default)]
pub struct UnlinkOrgState;

#[async_trait]
impl State for UnlinkOrgState {
    const ID: StatesEnum = StatesEnum::UnlinkOrg;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let mut account_id: Option<String> = ctx.get(keys::PARTNER_ACCOUNT_ID)?;
        if account_id.is_none() {
            account_id = env
                .data_source
                .list_entities_by_resource_id(&ctx.resource_id)
                .await?
                .into_iter()
                .find_map(|e| e.partner_account_id);
        }
        if account_id.is_none() {
            account_id = env
                .partner
                .find_account(&ctx.resource_id)
                .await?
                .map(|a| a.id);
        }

        let Some(account_id) = account_id else {
            debug!("no partner account, nothing to unlink");
            return Ok(StatesEnum::DeleteResourceEntity);
        };

        let account = match env.partner.get_account(&account_id).await {
            Ok(account) => account,
            Err(e) if e.is_entity_not_found() => {
                debug!(%account_id, "partner account already gone");
                return Ok(StatesEnum::DeleteResourceEntity);
            }
            Err(e) => return Err(e.into()),
        };

        let targets: Vec<String> = match ctx.get::<String>(keys::ORGANIZATION_ID)? {
            Some(organization_id) => account
                .linked_organizations
                .iter()
                .filter(|o| **o == organization_id)
                .cloned()
                .collect(),
            None => account.linked_organizations.clone(),
        };

        for organization_id in targets {
            env.partner
                .unlink_organization(&account_id, &organization_id)
                .await?;
            info!(%account_id, %organization_id, "unlinked organization");
        }

        ctx.set(keys::PARTNER_ACCOUNT_ID, &account_id)?;
        Ok(StatesEnum::DeleteResourceEntity)
    }
}

/// Push the SSO configuration to the partner account
#[derive(Debug, Default)]
pub struct ConfigureSsoState;

#[async_trait]
impl State for ConfigureSsoState {
    const ID: StatesEnum = StatesEnum::ConfigureSso;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let configuration: SsoConfiguration = required_input(ctx, keys::SSO_CONFIGURATION)?;
        let account_id = account_for(ctx, env).await?;

        env.partner
            .configure_sso(&account_id, &configuration)
            .await?;
        info!(%account_id, enterprise_app_id = %configuration.enterprise_app_id, "configured sso");

        Ok(StatesEnum::NotifyPartner)
    }
}

/// Tell the partner about the finished operation
///
/// Partners deduplicate on the notification id, which is the operation id
/// unless the payload names another.
#[derive(Debug, Default)]
pub struct NotifyPartnerState;

#[async_trait]
impl State for NotifyPartnerState {
    const ID: StatesEnum = StatesEnum::NotifyPartner;

    async fn execute(
        &self,
        ctx: &mut StateContext,
        env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        let notification_id = ctx
            .get::<Uuid>(keys::NOTIFICATION_ID)?
            .unwrap_or(ctx.operation_id);
        let kind = match ctx.get::<NotificationKind>(keys::NOTIFICATION_KIND)? {
            Some(kind) => kind,
            None => default_notification_kind(ctx.command),
        };

        let entity_id: Option<String> = ctx.get(keys::RESOURCE_ENTITY_ID)?;

        let notification = PartnerNotification {
            notification_id,
            resource_id: ctx.resource_id.clone(),
            partner_account_id: ctx.get(keys::PARTNER_ACCOUNT_ID)?,
            kind,
            details: serde_json::json!({
                "command": ctx.command,
                "resourceEntityId": entity_id,
            }),
        };

        env.partner.notify(&notification).await?;
        info!(%notification_id, ?kind, "notified partner");
        Ok(StatesEnum::Succeeded)
    }
}

fn default_notification_kind(command: RpWorkerQueueCommand) -> NotificationKind {
    match command {
        RpWorkerQueueCommand::CreateResource => NotificationKind::ResourceCreated,
        RpWorkerQueueCommand::DeleteResource => NotificationKind::ResourceDeleted,
        RpWorkerQueueCommand::UpdateResource => NotificationKind::ResourceUpdated,
        RpWorkerQueueCommand::ConfigureSso => NotificationKind::SsoConfigured,
        RpWorkerQueueCommand::NotifyPartner | RpWorkerQueueCommand::CustomCommand => {
            NotificationKind::Custom
        }
    }
}

/// Partner account for the resource, from the payload or by lookup
async fn account_for(ctx: &mut StateContext, env: &StateEnv) -> Result<String, StateError> {
    if let Some(account_id) = ctx.get::<String>(keys::PARTNER_ACCOUNT_ID)? {
        return Ok(account_id);
    }

    let account = env
        .partner
        .find_account(&ctx.resource_id)
        .await?
        .ok_or_else(|| {
            PartnerError::entity_not_found(format!("partner account for {}", ctx.resource_id))
        })?;
    ctx.set(keys::PARTNER_ACCOUNT_ID, &account.id)?;
    Ok(account.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryCollaborators, InMemoryPartner, PartnerClient};

    const RESOURCE: &str = "res-partner-tests";

    fn context(command: RpWorkerQueueCommand, start: StatesEnum) -> StateContext {
        StateContext::new(Uuid::now_v7(), command, RESOURCE, start)
    }

    async fn signed_up(fakes: &InMemoryCollaborators) -> String {
        fakes
            .partner
            .sign_up(&SignupRequest {
                resource_id: RESOURCE.to_string(),
                user_email: "admin@contoso.com".to_string(),
                saas_subscription_id: None,
                plan_id: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_signup_reuses_existing_account() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();
        let existing = signed_up(&fakes).await;

        let mut ctx = context(RpWorkerQueueCommand::CreateResource, StatesEnum::PartnerSignup);
        let next = PartnerSignupState.execute(&mut ctx, &env).await.unwrap();

        assert_eq!(next, StatesEnum::WaitForPartnerActivation);
        assert_eq!(ctx.require::<String>(keys::PARTNER_ACCOUNT_ID).unwrap(), existing);
        assert_eq!(fakes.partner.call_count("sign_up"), 1);
    }

    #[tokio::test]
    async fn test_signup_requires_email() {
        let env = InMemoryCollaborators::new().env();
        let mut ctx = context(RpWorkerQueueCommand::CreateResource, StatesEnum::PartnerSignup);

        let result = PartnerSignupState.execute(&mut ctx, &env).await;
        assert!(matches!(result, Err(StateError::Validation(_))));
    }

    #[tokio::test]
    async fn test_wait_for_pending_account() {
        let fakes = InMemoryCollaborators::new().with_partner(InMemoryPartner::new().with_pending_activation());
        let env = fakes.env();
        let account_id = signed_up(&fakes).await;

        let mut ctx = context(
            RpWorkerQueueCommand::CreateResource,
            StatesEnum::WaitForPartnerActivation,
        );
        ctx.set(keys::PARTNER_ACCOUNT_ID, &account_id).unwrap();

        let result = WaitForPartnerActivationState.execute(&mut ctx, &env).await;
        assert!(matches!(result, Err(StateError::AwaitingCallback(_))));

        fakes.partner.activate(&account_id);
        let next = WaitForPartnerActivationState
            .execute(&mut ctx, &env)
            .await
            .unwrap();
        assert_eq!(next, StatesEnum::LinkOrg);
    }

    #[tokio::test]
    async fn test_link_org_once() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();
        let account_id = signed_up(&fakes).await;

        let mut ctx = context(RpWorkerQueueCommand::CreateResource, StatesEnum::LinkOrg);
        ctx.set(keys::ORGANIZATION_ID, "org-1").unwrap();

        assert_eq!(
            LinkOrgState.execute(&mut ctx, &env).await.unwrap(),
            StatesEnum::NotifyPartner
        );
        LinkOrgState.execute(&mut ctx, &env).await.unwrap();

        assert_eq!(fakes.partner.call_count("link_organization"), 1);
        assert_eq!(
            fakes.partner.account(&account_id).unwrap().linked_organizations,
            vec!["org-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_link_org_routes_to_sso() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();
        signed_up(&fakes).await;

        let mut ctx = context(RpWorkerQueueCommand::CreateResource, StatesEnum::LinkOrg);
        ctx.set(keys::ORGANIZATION_ID, "org-1").unwrap();
        ctx.set(
            keys::SSO_CONFIGURATION,
            SsoConfiguration {
                enterprise_app_id: "app".to_string(),
                tenant_id: "tenant".to_string(),
                enabled: true,
            },
        )
        .unwrap();

        assert_eq!(
            LinkOrgState.execute(&mut ctx, &env).await.unwrap(),
            StatesEnum::ConfigureSso
        );
        assert_eq!(
            ConfigureSsoState.execute(&mut ctx, &env).await.unwrap(),
            StatesEnum::NotifyPartner
        );

        let account_id: String = ctx.require(keys::PARTNER_ACCOUNT_ID).unwrap();
        assert!(fakes.partner.sso_configuration(&account_id).unwrap().enabled);
    }

    #[tokio::test]
    async fn test_configure_sso_without_account_is_entity_not_found() {
        let env = InMemoryCollaborators::new().env();
        let mut ctx = context(RpWorkerQueueCommand::ConfigureSso, StatesEnum::ConfigureSso);
        ctx.set(
            keys::SSO_CONFIGURATION,
            serde_json::json!({"enterprise_app_id": "app", "tenant_id": "t"}),
        )
        .unwrap();

        let result = ConfigureSsoState.execute(&mut ctx, &env).await;
        assert!(matches!(
            result,
            Err(StateError::Partner(ref e)) if e.is_entity_not_found()
        ));
    }

    #[tokio::test]
    async fn test_unlink_all_organizations() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();
        let account_id = signed_up(&fakes).await;
        fakes.partner.link_organization(&account_id, "org-1").await.unwrap();
        fakes.partner.link_organization(&account_id, "org-2").await.unwrap();

        let mut ctx = context(RpWorkerQueueCommand::DeleteResource, StatesEnum::UnlinkOrg);
        let next = UnlinkOrgState.execute(&mut ctx, &env).await.unwrap();

        assert_eq!(next, StatesEnum::DeleteResourceEntity);
        assert!(fakes
            .partner
            .account(&account_id)
            .unwrap()
            .linked_organizations
            .is_empty());
    }

    #[tokio::test]
    async fn test_unlink_without_account() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();

        let mut ctx = context(RpWorkerQueueCommand::DeleteResource, StatesEnum::UnlinkOrg);
        let next = UnlinkOrgState.execute(&mut ctx, &env).await.unwrap();

        assert_eq!(next, StatesEnum::DeleteResourceEntity);
        assert_eq!(fakes.partner.call_count("unlink_organization"), 0);
    }

    #[tokio::test]
    async fn test_notify_uses_operation_id() {
        let fakes = InMemoryCollaborators::new();
        let env = fakes.env();

        let mut ctx = context(RpWorkerQueueCommand::UpdateResource, StatesEnum::NotifyPartner);
        NotifyPartnerState.execute(&mut ctx, &env).await.unwrap();
        NotifyPartnerState.execute(&mut ctx, &env).await.unwrap();

        let notifications = fakes.partner.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].notification_id, ctx.operation_id);
        assert_eq!(notifications[0].kind, NotificationKind::ResourceUpdated);
    }
}
