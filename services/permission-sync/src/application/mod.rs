//! 应用层

pub mod facade;

pub use facade::{PermissionCheckResult, PermissionFacade, WarmReport};
