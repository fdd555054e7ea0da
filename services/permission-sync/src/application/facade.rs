//! 权限门面
//!
//! 对外暴露的唯一入口：同步检查走缓存快照（失败即拒绝），
//! 异步检查总是等待权威解析

use std::sync::Arc;

use futures::future::join_all;
use org_common::PrincipalId;
use org_config::PermissionSyncConfig;
use org_errors::{AppError, AppResult};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{
    Action, ChangeCallback, Module, Permission, PermissionMap, PermissionSnapshot,
    PermissionState, PermissionStore, Role, RoleFlags,
};
use crate::infrastructure::cache::{CacheStats, PermissionCache, PermissionCacheConfig};
use crate::infrastructure::subscription::{SubscriptionHandle, SubscriptionMultiplexer};

/// 单项检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PermissionCheckResult {
    pub permission: Permission,
    pub allowed: bool,
}

/// 预热结果
#[derive(Debug, Default)]
pub struct WarmReport {
    pub loaded: Vec<PrincipalId>,
    pub failed: Vec<(PrincipalId, AppError)>,
}

impl WarmReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 权限门面
#[derive(Clone)]
pub struct PermissionFacade {
    cache: PermissionCache,
    multiplexer: SubscriptionMultiplexer,
}

impl PermissionFacade {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self::with_config(store, PermissionCacheConfig::default())
    }

    pub fn from_config(store: Arc<dyn PermissionStore>, config: &PermissionSyncConfig) -> Self {
        Self::with_config(store, PermissionCacheConfig::from(config))
    }

    pub fn with_config(store: Arc<dyn PermissionStore>, config: PermissionCacheConfig) -> Self {
        let cache = PermissionCache::new(Arc::clone(&store), config);
        let multiplexer = SubscriptionMultiplexer::new(store, cache.clone());
        Self { cache, multiplexer }
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.multiplexer
    }

    // ========== 同步检查 ==========

    /// 基于最近一次完成的解析判断
    ///
    /// 从未加载过时返回 false，并在后台发起加载；快照过期时返回旧值并在后台刷新。
    /// 解析失败后保持拒绝，不再自动重试
    pub fn has_permission(
        &self,
        principal_id: &PrincipalId,
        module: Module,
        action: Action,
    ) -> bool {
        self.cache
            .read_through(principal_id)
            .is_some_and(|snapshot| snapshot.allows(module, action))
    }

    /// 任一满足即为 true；空列表为 false
    pub fn has_any_permission(&self, principal_id: &PrincipalId, checks: &[Permission]) -> bool {
        let permissions = self.permissions(principal_id);
        checks.iter().any(|permission| permissions.contains(permission))
    }

    /// 全部满足才为 true；空列表为 true
    pub fn has_all_permissions(&self, principal_id: &PrincipalId, checks: &[Permission]) -> bool {
        let permissions = self.permissions(principal_id);
        checks.iter().all(|permission| permissions.contains(permission))
    }

    /// 当前缓存的权限映射（可能已过期）；未加载时为空映射
    pub fn permissions(&self, principal_id: &PrincipalId) -> PermissionMap {
        self.cache
            .read_through(principal_id)
            .map(|snapshot| snapshot.permissions.clone())
            .unwrap_or_default()
    }

    pub fn role(&self, principal_id: &PrincipalId) -> Option<Role> {
        self.cache
            .peek(principal_id)
            .map(|snapshot| snapshot.role.clone())
    }

    /// 角色标记只看角色标签，不看权限映射
    pub fn role_flags(&self, principal_id: &PrincipalId) -> RoleFlags {
        self.cache
            .peek(principal_id)
            .map(|snapshot| snapshot.role_flags())
            .unwrap_or_default()
    }

    pub fn is_admin(&self, principal_id: &PrincipalId) -> bool {
        self.role_flags(principal_id).is_admin
    }

    pub fn is_secretary(&self, principal_id: &PrincipalId) -> bool {
        self.role_flags(principal_id).is_secretary
    }

    pub fn is_leader(&self, principal_id: &PrincipalId) -> bool {
        self.role_flags(principal_id).is_leader
    }

    pub fn is_member(&self, principal_id: &PrincipalId) -> bool {
        self.role_flags(principal_id).is_member
    }

    pub fn is_professional(&self, principal_id: &PrincipalId) -> bool {
        self.role_flags(principal_id).is_professional
    }

    /// 是否有进行中的解析
    pub fn is_loading(&self, principal_id: &PrincipalId) -> bool {
        self.cache.is_loading(principal_id)
    }

    pub fn state(&self, principal_id: &PrincipalId) -> PermissionState {
        self.cache.state(principal_id)
    }

    pub fn last_error(&self, principal_id: &PrincipalId) -> Option<AppError> {
        self.cache.last_error(principal_id)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ========== 异步检查 ==========

    /// 权威检查：总是等待（或加入）一次不过期的解析，失败向调用方返回错误
    pub async fn check_permission(
        &self,
        principal_id: &PrincipalId,
        module: Module,
        action: Action,
    ) -> AppResult<bool> {
        let snapshot = self.cache.get_or_load(principal_id).await?;
        Ok(snapshot.allows(module, action))
    }

    /// 一次权威解析回答多项检查，结果顺序与输入一致
    pub async fn batch_check(
        &self,
        principal_id: &PrincipalId,
        checks: &[Permission],
    ) -> AppResult<Vec<PermissionCheckResult>> {
        let snapshot = self.cache.get_or_load(principal_id).await?;
        Ok(checks
            .iter()
            .map(|permission| PermissionCheckResult {
                permission: *permission,
                allowed: snapshot.permissions.contains(permission),
            })
            .collect())
    }

    /// 失效后重新解析；解析期间 `is_loading` 为 true
    pub async fn refresh_permissions(
        &self,
        principal_id: &PrincipalId,
    ) -> AppResult<Arc<PermissionSnapshot>> {
        self.cache.invalidate(principal_id);
        self.cache.get_or_load(principal_id).await.inspect_err(|e| {
            warn!(
                principal_id = %principal_id,
                error = %e,
                "Permission refresh failed"
            );
        })
    }

    /// 批量预加载
    pub async fn warm(&self, principal_ids: &[PrincipalId]) -> WarmReport {
        info!(
            "Starting permission cache warming for {} principals",
            principal_ids.len()
        );

        let results = join_all(principal_ids.iter().map(|principal_id| async move {
            (principal_id, self.cache.get_or_load(principal_id).await)
        }))
        .await;

        let mut report = WarmReport::default();
        for (principal_id, result) in results {
            match result {
                Ok(_) => report.loaded.push(principal_id.clone()),
                Err(e) => {
                    warn!(
                        principal_id = %principal_id,
                        error = %e,
                        "Failed to warm permissions"
                    );
                    report.failed.push((principal_id.clone(), e));
                }
            }
        }

        info!(
            "Permission cache warming completed: {} success, {} errors",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    // ========== 生命周期 ==========

    /// 挂接订阅方，并在后台开始加载
    pub fn subscribe(
        &self,
        principal_id: &PrincipalId,
        on_change: ChangeCallback,
    ) -> SubscriptionHandle {
        let handle = self.multiplexer.subscribe(principal_id, on_change);
        self.cache.prefetch(principal_id);
        handle
    }

    /// 解除订阅方；重复解除返回 false
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.multiplexer.unsubscribe(handle)
    }
}
