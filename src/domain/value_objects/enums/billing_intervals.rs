use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Annual,
}

impl Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let interval = match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Annual => "annual",
        };
        write!(f, "{}", interval)
    }
}

impl BillingInterval {
    /// Anything that is not explicitly "annual" bills monthly.
    pub fn from_str(value: &str) -> Self {
        match value {
            "annual" => BillingInterval::Annual,
            _ => BillingInterval::Monthly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interval_defaults_to_monthly() {
        assert_eq!(BillingInterval::from_str("annual"), BillingInterval::Annual);
        assert_eq!(BillingInterval::from_str("monthly"), BillingInterval::Monthly);
        assert_eq!(BillingInterval::from_str("weekly"), BillingInterval::Monthly);
    }
}
