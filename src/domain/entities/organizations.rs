use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::organizations;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = organizations)]
pub struct OrganizationEntity {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub plan_key: Option<String>,
    pub billing_interval: Option<String>,
    pub subscription_status: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub seats_limit: Option<i32>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial patch applied in one atomic UPDATE. `None` fields are left
/// untouched by diesel's changeset semantics.
///
/// `current_period_end` is deliberately a single-level `Option`: a
/// reconciliation that could not determine the new period end omits
/// the field, so a previously stored value can never be nulled out by
/// a stale or partial provider snapshot.
#[derive(Debug, Clone, Default, PartialEq, AsChangeset)]
#[diesel(table_name = organizations)]
pub struct UpdateOrganizationBilling {
    pub plan_key: Option<String>,
    pub billing_interval: Option<String>,
    pub subscription_status: Option<String>,
    pub trial_ends_at: Option<Option<DateTime<Utc>>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub seats_limit: Option<Option<i32>>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}
