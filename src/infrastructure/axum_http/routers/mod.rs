pub mod billing;
pub mod seats;
pub mod stripe_webhook;
