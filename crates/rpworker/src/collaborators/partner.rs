//! Marketplace and partner API abstractions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tag partner APIs put in error bodies for missing entities
pub const ENTITY_NOT_FOUND: &str = "EntityNotFound";

/// Error type for marketplace and partner calls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PartnerError {
    /// Entity does not exist (yet); partners are eventually consistent
    #[error("EntityNotFound: {entity}")]
    EntityNotFound { entity: String },

    /// Marketplace resource-manager request failed
    #[error("marketplace ARM request failed with status {status}: {message}")]
    MarketplaceArm { status: u16, message: String },

    /// Marketplace billing/fulfillment request failed
    #[error("marketplace billing request failed with status {status}: {message}")]
    MarketplaceBilling { status: u16, message: String },

    /// Partner API returned an error status
    #[error("partner request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("partner request timed out")]
    Timeout,

    #[error("partner connection failed: {0}")]
    Connection(String),
}

impl PartnerError {
    pub fn entity_not_found(entity: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity: entity.into(),
        }
    }

    /// HTTP status of the failed call, when one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::EntityNotFound { .. } => Some(404),
            Self::MarketplaceArm { status, .. }
            | Self::MarketplaceBilling { status, .. }
            | Self::Http { status, .. } => Some(*status),
            Self::Timeout | Self::Connection(_) => None,
        }
    }

    /// Whether the partner reported the entity as missing
    ///
    /// Covers both the typed variant and 404 responses tagged with
    /// [`ENTITY_NOT_FOUND`] in their body.
    pub fn is_entity_not_found(&self) -> bool {
        match self {
            Self::EntityNotFound { .. } => true,
            Self::MarketplaceArm { status, message }
            | Self::MarketplaceBilling { status, message }
            | Self::Http { status, message } => {
                *status == 404 && message.contains(ENTITY_NOT_FOUND)
            }
            Self::Timeout | Self::Connection(_) => false,
        }
    }
}

/// Status of a SaaS subscription in the marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SaasSubscriptionStatus {
    PendingFulfillmentStart,
    Subscribed,
    Suspended,
    Unsubscribed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaasSubscription {
    pub id: String,
    pub name: String,
    pub offer_id: String,
    pub plan_id: String,
    pub status: SaasSubscriptionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaasCreateRequest {
    /// Deterministic name derived from the resource; used for lookups
    pub name: String,
    pub resource_id: String,
    pub publisher_id: String,
    pub offer_id: String,
    pub plan_id: String,
    pub beneficiary_tenant_id: Option<String>,
}

/// Marketplace SaaS lifecycle
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    /// Look up a subscription by its deterministic name
    async fn find_saas_subscription(
        &self,
        name: &str,
    ) -> Result<Option<SaasSubscription>, PartnerError>;

    async fn create_saas_subscription(
        &self,
        request: &SaasCreateRequest,
    ) -> Result<SaasSubscription, PartnerError>;

    async fn activate_saas_subscription(
        &self,
        subscription_id: &str,
        plan_id: &str,
    ) -> Result<SaasSubscription, PartnerError>;

    async fn delete_saas_subscription(&self, subscription_id: &str) -> Result<(), PartnerError>;
}

/// Partner account lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerAccountStatus {
    Pending,
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerAccount {
    pub id: String,
    pub resource_id: String,
    pub status: PartnerAccountStatus,
    #[serde(default)]
    pub linked_organizations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupRequest {
    pub resource_id: String,
    pub user_email: String,
    pub saas_subscription_id: Option<String>,
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsoConfiguration {
    pub enterprise_app_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Lifecycle event sent to the partner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ResourceCreated,
    ResourceUpdated,
    ResourceDeleted,
    SsoConfigured,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerNotification {
    /// Partners deduplicate on this id; it is the operation id
    pub notification_id: Uuid,
    pub resource_id: String,
    pub partner_account_id: Option<String>,
    pub kind: NotificationKind,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Partner organization and account APIs
#[async_trait]
pub trait PartnerClient: Send + Sync {
    /// Look up the account created for a resource
    async fn find_account(&self, resource_id: &str)
        -> Result<Option<PartnerAccount>, PartnerError>;

    /// Fetch an account by id; `EntityNotFound` until the partner has propagated it
    async fn get_account(&self, account_id: &str) -> Result<PartnerAccount, PartnerError>;

    async fn sign_up(&self, request: &SignupRequest) -> Result<PartnerAccount, PartnerError>;

    async fn link_organization(
        &self,
        account_id: &str,
        organization_id: &str,
    ) -> Result<(), PartnerError>;

    async fn unlink_organization(
        &self,
        account_id: &str,
        organization_id: &str,
    ) -> Result<(), PartnerError>;

    async fn configure_sso(
        &self,
        account_id: &str,
        configuration: &SsoConfiguration,
    ) -> Result<(), PartnerError>;

    async fn update_account(
        &self,
        account_id: &str,
        properties: &serde_json::Value,
    ) -> Result<(), PartnerError>;

    async fn notify(&self, notification: &PartnerNotification) -> Result<(), PartnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_not_found_detection() {
        assert!(PartnerError::entity_not_found("account").is_entity_not_found());

        let tagged = PartnerError::MarketplaceArm {
            status: 404,
            message: "{\"code\":\"EntityNotFound\"}".to_string(),
        };
        assert!(tagged.is_entity_not_found());

        let plain_404 = PartnerError::Http {
            status: 404,
            message: "route not found".to_string(),
        };
        assert!(!plain_404.is_entity_not_found());

        let wrong_status = PartnerError::MarketplaceBilling {
            status: 400,
            message: "EntityNotFound".to_string(),
        };
        assert!(!wrong_status.is_entity_not_found());
    }

    #[test]
    fn test_status() {
        assert_eq!(PartnerError::Timeout.status(), None);
        assert_eq!(PartnerError::entity_not_found("x").status(), Some(404));
        assert_eq!(
            PartnerError::Http {
                status: 503,
                message: String::new()
            }
            .status(),
            Some(503)
        );
    }

    #[test]
    fn test_display_carries_tag() {
        let error = PartnerError::entity_not_found("partner account acct-1");
        assert_eq!(error.to_string(), "EntityNotFound: partner account acct-1");
    }
}
