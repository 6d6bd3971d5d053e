use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::enums::{
    billing_intervals::BillingInterval, plan_keys::PlanKey,
    subscription_statuses::SubscriptionStatus,
};

/// Static price catalog mapping (plan, interval) pairs to provider
/// price ids and back. Built once at startup from configuration and
/// injected into the billing use case; O(1) lookup in both directions.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    price_by_plan: HashMap<(PlanKey, BillingInterval), String>,
    plan_by_price: HashMap<String, (PlanKey, BillingInterval)>,
}

impl PriceCatalog {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (PlanKey, BillingInterval, String)>,
    {
        let mut price_by_plan = HashMap::new();
        let mut plan_by_price = HashMap::new();
        for (plan, interval, price_id) in entries {
            price_by_plan.insert((plan, interval), price_id.clone());
            plan_by_price.insert(price_id, (plan, interval));
        }
        Self {
            price_by_plan,
            plan_by_price,
        }
    }

    pub fn price_id(&self, plan: PlanKey, interval: BillingInterval) -> Option<&str> {
        self.price_by_plan
            .get(&(plan, interval))
            .map(String::as_str)
    }

    pub fn plan_for_price(&self, price_id: &str) -> Option<(PlanKey, BillingInterval)> {
        self.plan_by_price.get(price_id).copied()
    }
}

/// Billing state surfaced to the frontend, derived from the
/// organization record with no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct BillingStateDto {
    pub org_id: Uuid,
    pub plan_key: Option<PlanKey>,
    pub billing_interval: Option<BillingInterval>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub seats_limit: Option<i32>,
    pub allowed: bool,
    pub is_trial: bool,
    pub trial_days_left: i64,
    pub billing_required: bool,
}

/// Canonical reconciled state returned by the checkout-session sync.
#[derive(Debug, Clone, Serialize)]
pub struct BillingSyncResult {
    pub org_id: Uuid,
    pub plan_key: PlanKey,
    pub interval: BillingInterval,
    pub subscription_status: SubscriptionStatus,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub seats_limit: Option<i32>,
}

/// Seat availability report for an organization.
#[derive(Debug, Clone, Serialize)]
pub struct SeatAvailability {
    pub org_id: Uuid,
    pub seats_limit: Option<i32>,
    pub active_members: i64,
    pub available: bool,
}
