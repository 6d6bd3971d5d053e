use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::repositories::organization_members::OrganizationMemberRepository,
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::organization_members},
};

pub struct OrganizationMemberPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl OrganizationMemberPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl OrganizationMemberRepository for OrganizationMemberPostgres {
    async fn count_active_members(&self, org_id: Uuid) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let count = organization_members::table
            .filter(organization_members::org_id.eq(org_id))
            .filter(organization_members::status.eq("active"))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count)
    }
}
