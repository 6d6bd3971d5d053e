pub mod billing;
pub mod entitlement;
pub mod enums;
