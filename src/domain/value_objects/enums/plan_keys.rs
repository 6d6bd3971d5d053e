use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Canonical plan vocabulary. Billing sync and seat enforcement both
/// key off this enum; there is no second tier table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanKey {
    Trial,
    Solo,
    Team5,
    Team10,
    Enterprise,
}

impl Display for PlanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = match self {
            PlanKey::Trial => "trial",
            PlanKey::Solo => "solo",
            PlanKey::Team5 => "team_5",
            PlanKey::Team10 => "team_10",
            PlanKey::Enterprise => "enterprise",
        };
        write!(f, "{}", key)
    }
}

impl PlanKey {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "trial" => Some(PlanKey::Trial),
            "solo" => Some(PlanKey::Solo),
            "team_5" => Some(PlanKey::Team5),
            "team_10" => Some(PlanKey::Team10),
            "enterprise" => Some(PlanKey::Enterprise),
            _ => None,
        }
    }

    /// Seats included in the plan. `None` means unlimited.
    pub fn seats_limit(&self) -> Option<i32> {
        match self {
            PlanKey::Trial => Some(1),
            PlanKey::Solo => Some(1),
            PlanKey::Team5 => Some(5),
            PlanKey::Team10 => Some(10),
            PlanKey::Enterprise => None,
        }
    }

    /// Trial is assigned automatically and enterprise is negotiated
    /// out-of-band; neither goes through checkout.
    pub fn is_purchasable(&self) -> bool {
        matches!(self, PlanKey::Solo | PlanKey::Team5 | PlanKey::Team10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_key_round_trips_through_strings() {
        for plan in [
            PlanKey::Trial,
            PlanKey::Solo,
            PlanKey::Team5,
            PlanKey::Team10,
            PlanKey::Enterprise,
        ] {
            assert_eq!(PlanKey::from_str(&plan.to_string()), Some(plan));
        }
        assert_eq!(PlanKey::from_str("business"), None);
    }

    #[test]
    fn enterprise_is_unlimited_and_others_have_positive_seats() {
        assert_eq!(PlanKey::Enterprise.seats_limit(), None);
        for plan in [PlanKey::Trial, PlanKey::Solo, PlanKey::Team5, PlanKey::Team10] {
            assert!(plan.seats_limit().unwrap() > 0);
        }
        assert_eq!(PlanKey::Team5.seats_limit(), Some(5));
        assert_eq!(PlanKey::Team10.seats_limit(), Some(10));
    }

    #[test]
    fn only_paid_self_serve_plans_are_purchasable() {
        assert!(PlanKey::Solo.is_purchasable());
        assert!(PlanKey::Team5.is_purchasable());
        assert!(PlanKey::Team10.is_purchasable());
        assert!(!PlanKey::Trial.is_purchasable());
        assert!(!PlanKey::Enterprise.is_purchasable());
    }
}
