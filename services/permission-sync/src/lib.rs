//! Permission Sync Library
//!
//! 权限解析与实时同步缓存：
//! - `domain`: 权限、角色、解析器、存储接口
//! - `infrastructure`: 按主体的版本化缓存、订阅复用、内存存储
//! - `application`: 对外门面（同步/异步检查、订阅生命周期）

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::{PermissionCheckResult, PermissionFacade, WarmReport};
pub use domain::{
    Action, ChangeCallback, Module, Permission, PermissionMap, PermissionOverrides,
    PermissionResolver, PermissionSnapshot, PermissionState, PermissionStore, Role, RoleDefaults,
    RoleFlags, StoreListenerHandle,
};
pub use error::AccessError;
pub use infrastructure::cache::{CacheStats, PermissionCache, PermissionCacheConfig};
pub use infrastructure::store::{InMemoryPermissionStore, PermissionFixture};
pub use infrastructure::subscription::{SubscriptionHandle, SubscriptionMultiplexer};
