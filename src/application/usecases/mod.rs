pub mod billing;
pub mod seats;
