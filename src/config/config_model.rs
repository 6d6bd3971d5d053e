use crate::domain::value_objects::{
    billing::PriceCatalog,
    enums::{billing_intervals::BillingInterval, plan_keys::PlanKey},
};

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub database: Database,
    pub auth: Auth,
    pub stripe: Stripe,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Auth {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
    pub price_solo_monthly: String,
    pub price_solo_annual: String,
    pub price_team_5_monthly: String,
    pub price_team_5_annual: String,
    pub price_team_10_monthly: String,
    pub price_team_10_annual: String,
}

impl Stripe {
    pub fn price_catalog(&self) -> PriceCatalog {
        PriceCatalog::from_entries([
            (
                PlanKey::Solo,
                BillingInterval::Monthly,
                self.price_solo_monthly.clone(),
            ),
            (
                PlanKey::Solo,
                BillingInterval::Annual,
                self.price_solo_annual.clone(),
            ),
            (
                PlanKey::Team5,
                BillingInterval::Monthly,
                self.price_team_5_monthly.clone(),
            ),
            (
                PlanKey::Team5,
                BillingInterval::Annual,
                self.price_team_5_annual.clone(),
            ),
            (
                PlanKey::Team10,
                BillingInterval::Monthly,
                self.price_team_10_monthly.clone(),
            ),
            (
                PlanKey::Team10,
                BillingInterval::Annual,
                self.price_team_10_annual.clone(),
            ),
        ])
    }
}
