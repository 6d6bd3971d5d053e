use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::{
        entities::organizations::{OrganizationEntity, UpdateOrganizationBilling},
        repositories::organizations::OrganizationRepository,
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::organizations},
};

pub struct OrganizationPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl OrganizationPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl OrganizationRepository for OrganizationPostgres {
    async fn find_by_id(&self, org_id: Uuid) -> Result<Option<OrganizationEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = organizations::table
            .find(org_id)
            .select(OrganizationEntity::as_select())
            .first::<OrganizationEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<OrganizationEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = organizations::table
            .filter(organizations::stripe_customer_id.eq(customer_id))
            .select(OrganizationEntity::as_select())
            .first::<OrganizationEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_stripe_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<OrganizationEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = organizations::table
            .filter(organizations::stripe_subscription_id.eq(subscription_id))
            .select(OrganizationEntity::as_select())
            .first::<OrganizationEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn set_stripe_customer_id(&self, org_id: Uuid, customer_id: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        diesel::update(organizations::table.find(org_id))
            .set((
                organizations::stripe_customer_id.eq(customer_id),
                organizations::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn update_billing(&self, org_id: Uuid, patch: UpdateOrganizationBilling) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // Single UPDATE; fields the patch leaves as None keep their
        // stored values.
        diesel::update(organizations::table.find(org_id))
            .set((&patch, organizations::updated_at.eq(diesel::dsl::now)))
            .execute(&mut conn)?;

        Ok(())
    }
}
