pub mod isolation;
pub mod permissions;

pub use isolation::{ApiRestrictions, FileSystemIsolation, NetworkIsolation, PolicyViolation};
pub use permissions::{has_any_permission, PermissionCheck, PermissionManager};
