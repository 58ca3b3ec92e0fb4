//! Start state lookup for fresh commands

use crate::model::{
    MarketplaceStatesEnum, PartnerStatesEnum, RpWorkerQueueCommand, StatesEnum, SubState,
};

use super::DispatchError;

/// First state for a command and optional sub-state
///
/// | Command        | Sub-state                         | Start                 |
/// |----------------|-----------------------------------|-----------------------|
/// | CreateResource | none / Marketplace(CreateSaaS)    | CreateSaaS            |
/// | CreateResource | Marketplace(ActivateSaaS)         | ActivateSaaS          |
/// | CreateResource | Partner(PartnerSignup)            | PartnerSignup         |
/// | CreateResource | Partner(LinkOrg)                  | LinkOrg               |
/// | DeleteResource | none / Marketplace(DeleteSaaS)    | DeleteSaaS            |
/// | DeleteResource | Partner(UnlinkOrg)                | UnlinkOrg             |
/// | NotifyPartner  | none / Partner(NotifyPartner)     | NotifyPartner         |
/// | UpdateResource | none                              | UpdateResource        |
/// | ConfigureSSO   | none / Partner(ConfigureSSO)      | ConfigureSSO          |
/// | CustomCommand  | Custom(CustomStateN)              | CustomStateN          |
///
/// Every other combination is rejected.
pub fn start_state_for(
    command: RpWorkerQueueCommand,
    sub_state: Option<SubState>,
) -> Result<StatesEnum, DispatchError> {
    use MarketplaceStatesEnum as M;
    use PartnerStatesEnum as P;
    use RpWorkerQueueCommand as C;

    let start = match (command, sub_state) {
        (C::CreateResource, None | Some(SubState::Marketplace(M::CreateSaaS))) => {
            StatesEnum::CreateSaaS
        }
        (C::CreateResource, Some(SubState::Marketplace(M::ActivateSaaS))) => {
            StatesEnum::ActivateSaaS
        }
        (C::CreateResource, Some(SubState::Partner(P::PartnerSignup))) => StatesEnum::PartnerSignup,
        (C::CreateResource, Some(SubState::Partner(P::LinkOrg))) => StatesEnum::LinkOrg,

        (C::DeleteResource, None | Some(SubState::Marketplace(M::DeleteSaaS))) => {
            StatesEnum::DeleteSaaS
        }
        (C::DeleteResource, Some(SubState::Partner(P::UnlinkOrg))) => StatesEnum::UnlinkOrg,

        (C::NotifyPartner, None | Some(SubState::Partner(P::NotifyPartner))) => {
            StatesEnum::NotifyPartner
        }

        (C::UpdateResource, None) => StatesEnum::UpdateResource,

        (C::ConfigureSso, None | Some(SubState::Partner(P::ConfigureSso))) => {
            StatesEnum::ConfigureSso
        }

        (C::CustomCommand, Some(SubState::Custom(state))) if state.is_custom() => state,

        _ => return Err(DispatchError::UnsupportedCommand { command, sub_state }),
    };

    Ok(start)
}
