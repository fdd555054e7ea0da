//! 权限缓存模块
//!
//! - PermissionCache: 按主体缓存解析结果（Singleflight + 版本号防止旧结果覆盖新结果）
//! - loader: 从存储读取角色默认权限与覆盖并解析

pub mod loader;
pub mod permission_cache;

pub use permission_cache::{CacheStats, PermissionCache, PermissionCacheConfig};
