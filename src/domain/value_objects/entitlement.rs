use chrono::{DateTime, Utc};

use super::enums::subscription_statuses::SubscriptionStatus;

/// Single source of truth for access gating. Both the billing status
/// read path and the subscription guard call this; nothing else may
/// re-derive the rule.
pub fn is_allowed_at(
    status: Option<SubscriptionStatus>,
    trial_ends_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match status {
        Some(SubscriptionStatus::Active) => true,
        Some(SubscriptionStatus::Trialing) => match trial_ends_at {
            Some(end) => end > now,
            None => false,
        },
        _ => false,
    }
}

pub fn is_allowed(
    status: Option<SubscriptionStatus>,
    trial_ends_at: Option<DateTime<Utc>>,
) -> bool {
    is_allowed_at(status, trial_ends_at, Utc::now())
}

/// Whole days left in trial, ceiling, floored at zero.
pub fn trial_days_left_at(trial_ends_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let Some(end) = trial_ends_at else {
        return 0;
    };
    let ms = end.signed_duration_since(now).num_milliseconds();
    if ms <= 0 {
        return 0;
    }
    const DAY_MS: i64 = 1000 * 60 * 60 * 24;
    (ms + DAY_MS - 1) / DAY_MS
}

pub fn trial_days_left(trial_ends_at: Option<DateTime<Utc>>) -> i64 {
    trial_days_left_at(trial_ends_at, Utc::now())
}
