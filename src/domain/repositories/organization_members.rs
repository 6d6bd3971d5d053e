use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrganizationMemberRepository: Send + Sync {
    async fn count_active_members(&self, org_id: Uuid) -> Result<i64>;
}
