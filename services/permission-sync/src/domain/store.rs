//! 权限存储接口
//!
//! 权限数据的权威来源（远端文档库），以及按主体的变更通知

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use org_common::PrincipalId;
use org_errors::AppResult;
use uuid::Uuid;

use super::permission::PermissionMap;
use super::resolver::PermissionOverrides;
use super::role::Role;

/// 变更回调，只作为失效信号，不携带数据
pub type ChangeCallback = Arc<dyn Fn(&PrincipalId) + Send + Sync>;

/// 存储侧监听器句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreListenerHandle(pub Uuid);

impl fmt::Display for StoreListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 权限存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// 查询主体当前的角色
    async fn fetch_role(&self, principal_id: &PrincipalId) -> AppResult<Role>;

    /// 查询角色默认权限；存储不认识的角色返回 None
    async fn fetch_role_defaults(&self, role: &Role) -> AppResult<Option<PermissionMap>>;

    /// 查询主体的显式授予/撤销
    async fn fetch_overrides(&self, principal_id: &PrincipalId) -> AppResult<PermissionOverrides>;

    /// 注册变更监听；主体的角色或覆盖变化时调用 `callback`
    ///
    /// 实现可以在本调用返回前同步触发一次回调
    fn subscribe(
        &self,
        principal_id: &PrincipalId,
        callback: ChangeCallback,
    ) -> AppResult<StoreListenerHandle>;

    /// 注销变更监听
    fn unsubscribe(&self, handle: &StoreListenerHandle) -> AppResult<()>;
}
