pub mod organization_members;
pub mod organizations;
