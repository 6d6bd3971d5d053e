pub mod billing_intervals;
pub mod plan_keys;
pub mod subscription_statuses;
