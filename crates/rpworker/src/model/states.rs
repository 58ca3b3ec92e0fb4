//! State and command vocabularies

use serde::{Deserialize, Serialize};

/// Every state a provisioning workflow can be in
///
/// Non-terminal states each map to one registered [`State`](crate::state::State)
/// implementation. `Succeeded`, `Failed` and `Terminated` are terminal markers:
/// the engine stops as soon as one is reached and never resolves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatesEnum {
    // Marketplace (SaaS subscription) steps
    CreateSaaS,
    ActivateSaaS,
    DeleteSaaS,

    // Resource entity steps
    AddResourceEntity,
    UpdateResource,
    DeleteResourceEntity,

    // Partner steps
    PartnerSignup,
    WaitForPartnerActivation,
    LinkOrg,
    UnlinkOrg,
    #[serde(rename = "ConfigureSSO")]
    ConfigureSso,
    NotifyPartner,

    // Host-defined states for `CustomCommand`
    CustomState1,
    CustomState2,
    CustomState3,

    // Terminal
    Succeeded,
    Failed,
    Terminated,
}

impl StatesEnum {
    /// All states, in declaration order
    pub const ALL: [StatesEnum; 18] = [
        Self::CreateSaaS,
        Self::ActivateSaaS,
        Self::DeleteSaaS,
        Self::AddResourceEntity,
        Self::UpdateResource,
        Self::DeleteResourceEntity,
        Self::PartnerSignup,
        Self::WaitForPartnerActivation,
        Self::LinkOrg,
        Self::UnlinkOrg,
        Self::ConfigureSso,
        Self::NotifyPartner,
        Self::CustomState1,
        Self::CustomState2,
        Self::CustomState3,
        Self::Succeeded,
        Self::Failed,
        Self::Terminated,
    ];

    /// Whether the state ends the workflow
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Terminated)
    }

    /// Whether the state is reserved for host-defined behavior
    pub fn is_custom(self) -> bool {
        matches!(
            self,
            Self::CustomState1 | Self::CustomState2 | Self::CustomState3
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateSaaS => "CreateSaaS",
            Self::ActivateSaaS => "ActivateSaaS",
            Self::DeleteSaaS => "DeleteSaaS",
            Self::AddResourceEntity => "AddResourceEntity",
            Self::UpdateResource => "UpdateResource",
            Self::DeleteResourceEntity => "DeleteResourceEntity",
            Self::PartnerSignup => "PartnerSignup",
            Self::WaitForPartnerActivation => "WaitForPartnerActivation",
            Self::LinkOrg => "LinkOrg",
            Self::UnlinkOrg => "UnlinkOrg",
            Self::ConfigureSso => "ConfigureSSO",
            Self::NotifyPartner => "NotifyPartner",
            Self::CustomState1 => "CustomState1",
            Self::CustomState2 => "CustomState2",
            Self::CustomState3 => "CustomState3",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Terminated => "Terminated",
        }
    }
}

impl std::fmt::Display for StatesEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command carried by a queue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpWorkerQueueCommand {
    CreateResource,
    DeleteResource,
    NotifyPartner,
    UpdateResource,
    #[serde(rename = "ConfigureSSO")]
    ConfigureSso,
    CustomCommand,
}

impl std::fmt::Display for RpWorkerQueueCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreateResource => "CreateResource",
            Self::DeleteResource => "DeleteResource",
            Self::NotifyPartner => "NotifyPartner",
            Self::UpdateResource => "UpdateResource",
            Self::ConfigureSso => "ConfigureSSO",
            Self::CustomCommand => "CustomCommand",
        };
        f.write_str(name)
    }
}

/// Marketplace-scoped entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketplaceStatesEnum {
    CreateSaaS,
    ActivateSaaS,
    DeleteSaaS,
}

impl From<MarketplaceStatesEnum> for StatesEnum {
    fn from(state: MarketplaceStatesEnum) -> Self {
        match state {
            MarketplaceStatesEnum::CreateSaaS => StatesEnum::CreateSaaS,
            MarketplaceStatesEnum::ActivateSaaS => StatesEnum::ActivateSaaS,
            MarketplaceStatesEnum::DeleteSaaS => StatesEnum::DeleteSaaS,
        }
    }
}

/// Partner-scoped entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartnerStatesEnum {
    PartnerSignup,
    LinkOrg,
    UnlinkOrg,
    #[serde(rename = "ConfigureSSO")]
    ConfigureSso,
    NotifyPartner,
}

impl From<PartnerStatesEnum> for StatesEnum {
    fn from(state: PartnerStatesEnum) -> Self {
        match state {
            PartnerStatesEnum::PartnerSignup => StatesEnum::PartnerSignup,
            PartnerStatesEnum::LinkOrg => StatesEnum::LinkOrg,
            PartnerStatesEnum::UnlinkOrg => StatesEnum::UnlinkOrg,
            PartnerStatesEnum::ConfigureSso => StatesEnum::ConfigureSso,
            PartnerStatesEnum::NotifyPartner => StatesEnum::NotifyPartner,
        }
    }
}

/// Optional refinement of a command selecting where a fresh workflow starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum SubState {
    Marketplace(MarketplaceStatesEnum),
    Partner(PartnerStatesEnum),
    Custom(StatesEnum),
}
