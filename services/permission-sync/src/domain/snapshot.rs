//! 解析结果快照

use chrono::{DateTime, Utc};
use org_common::PrincipalId;
use serde::Serialize;

use super::permission::{Action, Module, PermissionMap};
use super::role::{Role, RoleFlags};

/// 一次完成的权限解析
///
/// 以 `Arc` 共享给读者，创建后不再修改；刷新时整体替换
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionSnapshot {
    pub principal_id: PrincipalId,
    pub role: Role,
    pub permissions: PermissionMap,
    /// 发起解析时缓存条目的版本号
    pub version: u64,
    pub resolved_at: DateTime<Utc>,
}

impl PermissionSnapshot {
    pub fn new(
        principal_id: PrincipalId,
        role: Role,
        permissions: PermissionMap,
        version: u64,
    ) -> Self {
        Self {
            principal_id,
            role,
            permissions,
            version,
            resolved_at: Utc::now(),
        }
    }

    pub fn allows(&self, module: Module, action: Action) -> bool {
        self.permissions.allows(module, action)
    }

    pub fn role_flags(&self) -> RoleFlags {
        self.role.flags()
    }
}

/// 单个主体在缓存中的状态
///
/// `Unloaded -> Loading -> Loaded <-> Stale -> Loading -> Loaded`，
/// 条目被驱逐后为 `Detached`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PermissionState {
    Detached,
    Unloaded,
    Loading,
    Loaded,
    Stale,
}

impl PermissionState {
    pub fn is_loading(&self) -> bool {
        matches!(self, PermissionState::Loading)
    }
}
