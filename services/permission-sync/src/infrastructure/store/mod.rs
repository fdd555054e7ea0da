//! 权限存储实现

pub mod in_memory;

pub use in_memory::{InMemoryPermissionStore, PermissionFixture, PrincipalFixture};
