//! 权限领域模块

pub mod permission;
pub mod resolver;
pub mod role;
pub mod snapshot;
pub mod store;

pub use permission::{Action, Module, Permission, PermissionMap};
pub use resolver::{PermissionOverrides, PermissionResolver};
pub use role::{Role, RoleDefaults, RoleFlags};
pub use snapshot::{PermissionSnapshot, PermissionState};
pub use store::{ChangeCallback, PermissionStore, StoreListenerHandle};
