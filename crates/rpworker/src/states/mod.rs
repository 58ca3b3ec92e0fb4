//! Partner-integration states
//!
//! Standard flows:
//!
//! ```text
//! CreateResource  CreateSaaS -> ActivateSaaS -> AddResourceEntity -> PartnerSignup
//!                 -> WaitForPartnerActivation -> LinkOrg -> [ConfigureSSO] -> NotifyPartner
//! DeleteResource  DeleteSaaS -> UnlinkOrg -> DeleteResourceEntity (posts NotifyPartner)
//! UpdateResource  UpdateResource -> NotifyPartner
//! ConfigureSSO    ConfigureSSO -> NotifyPartner
//! NotifyPartner   NotifyPartner
//! ```
//!
//! Every state checks before it acts, so re-running it after a crash or a
//! retry finds its earlier side effects instead of repeating them. States
//! that touch the resource entity end the operation as `Terminated` when a
//! newer operation already owns it.

mod entity;
mod marker;
mod marketplace;
mod partner;

pub use entity::{AddResourceEntityState, DeleteResourceEntityState, UpdateResourceState};
pub use marker::MarkerState;
pub use marketplace::{ActivateSaasState, CreateSaasState, DeleteSaasState};
pub use partner::{
    ConfigureSsoState, LinkOrgState, NotifyPartnerState, PartnerSignupState, UnlinkOrgState,
    WaitForPartnerActivationState,
};

use serde::de::DeserializeOwned;

use crate::collaborators::ResourceEntity;
use crate::model::StateContext;
use crate::state::{StateError, StateRegistry};

/// Counter incremented once per newly created resource entity
pub const RESOURCE_ENTITY_COUNTER: &str = "resource_entities";

/// Registry with every built-in state
///
/// `CustomState1..3` are left for the host to register.
pub fn standard_registry() -> StateRegistry {
    let mut registry = StateRegistry::new();
    registry.register::<CreateSaasState>();
    registry.register::<ActivateSaasState>();
    registry.register::<DeleteSaasState>();
    registry.register::<AddResourceEntityState>();
    registry.register::<UpdateResourceState>();
    registry.register::<DeleteResourceEntityState>();
    registry.register::<PartnerSignupState>();
    registry.register::<WaitForPartnerActivationState>();
    registry.register::<LinkOrgState>();
    registry.register::<UnlinkOrgState>();
    registry.register::<ConfigureSsoState>();
    registry.register::<NotifyPartnerState>();
    registry
}

/// Read a value the caller had to supply with the command
fn required_input<T: DeserializeOwned>(ctx: &StateContext, key: &str) -> Result<T, StateError> {
    ctx.get(key)?
        .ok_or_else(|| StateError::validation(format!("{key} is required")))
}

/// Whether a newer operation has taken over `entity`
fn is_superseded(ctx: &StateContext, entity: &ResourceEntity) -> bool {
    entity.last_operation_id != ctx.operation_id
        && entity.last_operation_started_at > ctx.created_at
}

/// Record this operation as the entity's owner
fn claim(ctx: &StateContext, entity: &mut ResourceEntity) {
    entity.last_operation_id = ctx.operation_id;
    entity.last_operation_started_at = ctx.created_at;
}

/// Deterministic marketplace subscription name for a resource
fn saas_subscription_name(resource_id: &str) -> String {
    let name: String = resource_id
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("rp-{}", name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatesEnum;

    #[test]
    fn test_standard_registry_covers_builtin_states() {
        let registry = standard_registry();

        for state in StatesEnum::ALL {
            let expected = !state.is_terminal() && !state.is_custom();
            assert_eq!(registry.contains(state), expected, "{state}");
            if expected {
                assert_eq!(registry.resolve(state).unwrap().id(), state);
            }
        }
    }

    #[test]
    fn test_saas_subscription_name_is_stable() {
        let name = saas_subscription_name("/subscriptions/S1/resourceGroups/rg/orgs/o1");
        assert_eq!(name, "rp-subscriptions-s1-resourcegroups-rg-orgs-o1");
        assert_eq!(
            name,
            saas_subscription_name("/subscriptions/S1/resourceGroups/rg/orgs/o1")
        );
    }
}
