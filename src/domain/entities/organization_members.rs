use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::organization_members;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = organization_members)]
pub struct OrganizationMemberEntity {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
