use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entities::organizations::{OrganizationEntity, UpdateOrganizationBilling};

/// Keyed record store for organizations with partial-patch update
/// semantics: `update_billing` applies only the supplied fields in a
/// single atomic write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn find_by_id(&self, org_id: Uuid) -> Result<Option<OrganizationEntity>>;

    async fn find_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<OrganizationEntity>>;

    async fn find_by_stripe_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<OrganizationEntity>>;

    /// Persisted immediately so a retried checkout never creates a
    /// duplicate provider customer.
    async fn set_stripe_customer_id(&self, org_id: Uuid, customer_id: &str) -> Result<()>;

    async fn update_billing(&self, org_id: Uuid, patch: UpdateOrganizationBilling) -> Result<()>;
}
