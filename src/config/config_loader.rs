use anyhow::Result;

use super::config_model::{Auth, Database, DotEnvyConfig, Server, Stripe};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: std::env::var("SERVER_PORT")
            .expect("SERVER_PORT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let auth = Auth {
        jwt_secret: std::env::var("JWT_SECRET").expect("JWT_SECRET is invalid"),
    };

    let stripe = Stripe {
        secret_key: std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY is invalid"),
        webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
            .expect("STRIPE_WEBHOOK_SECRET is invalid"),
        success_url: std::env::var("CHECKOUT_SUCCESS_URL")
            .expect("CHECKOUT_SUCCESS_URL is invalid"),
        cancel_url: std::env::var("CHECKOUT_CANCEL_URL").expect("CHECKOUT_CANCEL_URL is invalid"),
        portal_return_url: std::env::var("PORTAL_RETURN_URL")
            .expect("PORTAL_RETURN_URL is invalid"),
        price_solo_monthly: std::env::var("STRIPE_PRICE_SOLO_MONTHLY")
            .expect("STRIPE_PRICE_SOLO_MONTHLY is invalid"),
        price_solo_annual: std::env::var("STRIPE_PRICE_SOLO_ANNUAL")
            .expect("STRIPE_PRICE_SOLO_ANNUAL is invalid"),
        price_team_5_monthly: std::env::var("STRIPE_PRICE_TEAM_5_MONTHLY")
            .expect("STRIPE_PRICE_TEAM_5_MONTHLY is invalid"),
        price_team_5_annual: std::env::var("STRIPE_PRICE_TEAM_5_ANNUAL")
            .expect("STRIPE_PRICE_TEAM_5_ANNUAL is invalid"),
        price_team_10_monthly: std::env::var("STRIPE_PRICE_TEAM_10_MONTHLY")
            .expect("STRIPE_PRICE_TEAM_10_MONTHLY is invalid"),
        price_team_10_annual: std::env::var("STRIPE_PRICE_TEAM_10_ANNUAL")
            .expect("STRIPE_PRICE_TEAM_10_ANNUAL is invalid"),
    };

    Ok(DotEnvyConfig {
        server,
        database,
        auth,
        stripe,
    })
}
