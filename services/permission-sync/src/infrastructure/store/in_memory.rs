//! 内存权限存储
//!
//! 测试与本地开发用；修改数据后同步触发对应主体的变更回调

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use org_common::PrincipalId;
use org_errors::{AppError, AppResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    ChangeCallback, Permission, PermissionMap, PermissionOverrides, PermissionStore, Role,
    RoleDefaults, StoreListenerHandle,
};
use crate::error::AccessError;

/// JSON 夹具
///
/// ```json
/// {
///   "role_defaults": { "coach": { "events": ["view"] } },
///   "principals": {
///     "u1": { "role": "member", "grants": ["finance:view"], "revokes": [] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionFixture {
    /// 追加或覆盖内置角色默认权限
    #[serde(default)]
    pub role_defaults: HashMap<Role, PermissionMap>,
    #[serde(default)]
    pub principals: HashMap<PrincipalId, PrincipalFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalFixture {
    pub role: Role,
    #[serde(flatten)]
    pub overrides: PermissionOverrides,
}

impl PermissionFixture {
    pub fn from_json(json: &str) -> AppResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| AppError::validation(format!("Invalid permission fixture: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::validation(format!(
                "Failed to read permission fixture {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }
}

#[derive(Default)]
struct StoreData {
    roles: HashMap<PrincipalId, Role>,
    role_defaults: HashMap<Role, PermissionMap>,
    overrides: HashMap<PrincipalId, PermissionOverrides>,
}

struct Listener {
    principal_id: PrincipalId,
    callback: ChangeCallback,
}

/// 内存权限存储
pub struct InMemoryPermissionStore {
    data: RwLock<StoreData>,
    listeners: Mutex<HashMap<StoreListenerHandle, Listener>>,
    latency: Option<Duration>,
    role_reads: AtomicUsize,
    override_reads: AtomicUsize,
}

impl Default for InMemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPermissionStore {
    /// 预置内置角色默认权限，不含任何主体
    pub fn new() -> Self {
        Self::with_role_defaults(RoleDefaults::builtin())
    }

    pub fn with_role_defaults(defaults: RoleDefaults) -> Self {
        let role_defaults = defaults
            .roles()
            .filter_map(|role| defaults.get(role).map(|map| (role.clone(), map.clone())))
            .collect();

        Self {
            data: RwLock::new(StoreData {
                role_defaults,
                ..Default::default()
            }),
            listeners: Mutex::new(HashMap::new()),
            latency: None,
            role_reads: AtomicUsize::new(0),
            override_reads: AtomicUsize::new(0),
        }
    }

    pub fn from_fixture(fixture: PermissionFixture) -> Self {
        let store = Self::new();
        {
            let mut data = store.data.write();
            data.role_defaults.extend(fixture.role_defaults);
            for (principal_id, principal) in fixture.principals {
                data.roles.insert(principal_id.clone(), principal.role);
                data.overrides.insert(principal_id, principal.overrides);
            }
        }
        store
    }

    /// 每次读取前等待固定时长，模拟远端延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_role(&self, principal_id: &PrincipalId, role: Role) {
        self.data.write().roles.insert(principal_id.clone(), role);
        self.notify(principal_id);
    }

    /// 修改角色默认权限，通知所有属于该角色的主体
    pub fn set_role_defaults(&self, role: Role, permissions: PermissionMap) {
        let affected: Vec<PrincipalId> = {
            let mut data = self.data.write();
            data.role_defaults.insert(role.clone(), permissions);
            data.roles
                .iter()
                .filter(|(_, r)| **r == role)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for principal_id in &affected {
            self.notify(principal_id);
        }
    }

    /// 显式授予；同时移除同一权限的撤销
    pub fn grant(&self, principal_id: &PrincipalId, permission: Permission) {
        {
            let mut data = self.data.write();
            let overrides = data.overrides.entry(principal_id.clone()).or_default();
            overrides.revokes.retain(|p| *p != permission);
            if !overrides.grants.contains(&permission) {
                overrides.grants.push(permission);
            }
        }
        self.notify(principal_id);
    }

    /// 显式撤销；同时移除同一权限的授予
    pub fn revoke(&self, principal_id: &PrincipalId, permission: Permission) {
        {
            let mut data = self.data.write();
            let overrides = data.overrides.entry(principal_id.clone()).or_default();
            overrides.grants.retain(|p| *p != permission);
            if !overrides.revokes.contains(&permission) {
                overrides.revokes.push(permission);
            }
        }
        self.notify(principal_id);
    }

    /// 触发主体的变更回调，返回调用数
    pub fn notify(&self, principal_id: &PrincipalId) -> usize {
        let callbacks: Vec<ChangeCallback> = self
            .listeners
            .lock()
            .values()
            .filter(|listener| &listener.principal_id == principal_id)
            .map(|listener| listener.callback.clone())
            .collect();

        debug!(
            principal_id = %principal_id,
            listeners = callbacks.len(),
            "In-memory store change"
        );
        for callback in &callbacks {
            callback(principal_id);
        }
        callbacks.len()
    }

    pub fn role_reads(&self) -> usize {
        self.role_reads.load(Ordering::SeqCst)
    }

    pub fn override_reads(&self) -> usize {
        self.override_reads.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn principals(&self) -> Vec<PrincipalId> {
        let mut ids: Vec<PrincipalId> = self.data.read().roles.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn fetch_role(&self, principal_id: &PrincipalId) -> AppResult<Role> {
        self.simulate_latency().await;
        self.role_reads.fetch_add(1, Ordering::SeqCst);
        self.data
            .read()
            .roles
            .get(principal_id)
            .cloned()
            .ok_or_else(|| AccessError::PrincipalNotFound(principal_id.clone()).into())
    }

    async fn fetch_role_defaults(&self, role: &Role) -> AppResult<Option<PermissionMap>> {
        self.simulate_latency().await;
        Ok(self.data.read().role_defaults.get(role).cloned())
    }

    async fn fetch_overrides(&self, principal_id: &PrincipalId) -> AppResult<PermissionOverrides> {
        self.simulate_latency().await;
        self.override_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .data
            .read()
            .overrides
            .get(principal_id)
            .cloned()
            .unwrap_or_default())
    }

    fn subscribe(
        &self,
        principal_id: &PrincipalId,
        callback: ChangeCallback,
    ) -> AppResult<StoreListenerHandle> {
        let handle = StoreListenerHandle(Uuid::now_v7());
        self.listeners.lock().insert(
            handle.clone(),
            Listener {
                principal_id: principal_id.clone(),
                callback,
            },
        );
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &StoreListenerHandle) -> AppResult<()> {
        self.listeners
            .lock()
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| AccessError::ListenerNotFound(handle.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Module};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unknown_principal_is_not_found() {
        let store = InMemoryPermissionStore::new();
        let err = store
            .fetch_role(&PrincipalId::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_grant_then_revoke_keeps_one_side() {
        let store = InMemoryPermissionStore::new();
        let p = PrincipalId::new("u1");
        let finance_view = Permission::new(Module::Finance, Action::View);

        store.grant(&p, finance_view);
        store.revoke(&p, finance_view);

        let overrides = store.fetch_overrides(&p).await.unwrap();
        assert!(overrides.grants.is_empty());
        assert_eq!(overrides.revokes, vec![finance_view]);
        assert_eq!(store.override_reads(), 1);
    }

    #[test]
    fn test_edits_notify_only_that_principal() {
        let store = InMemoryPermissionStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handle = store
            .subscribe(
                &PrincipalId::new("u1"),
                Arc::new(move |_: &PrincipalId| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        store.set_role(&PrincipalId::new("u1"), Role::Leader);
        store.set_role(&PrincipalId::new("u2"), Role::Leader);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        store.unsubscribe(&handle).unwrap();
        assert_eq!(store.listener_count(), 0);
        assert!(store.unsubscribe(&handle).is_err());
    }

    #[tokio::test]
    async fn test_fixture_loading() {
        let fixture = PermissionFixture::from_json(
            r#"{
                "role_defaults": { "coach": { "events": ["view", "create"] } },
                "principals": {
                    "u1": { "role": "coach", "grants": ["finance:view"] },
                    "u2": { "role": "member" }
                }
            }"#,
        )
        .unwrap();
        let store = InMemoryPermissionStore::from_fixture(fixture);

        let coach = Role::from("coach");
        assert_eq!(store.fetch_role(&PrincipalId::new("u1")).await.unwrap(), coach);
        let defaults = store.fetch_role_defaults(&coach).await.unwrap().unwrap();
        assert!(defaults.allows(Module::Events, Action::Create));
        let overrides = store.fetch_overrides(&PrincipalId::new("u1")).await.unwrap();
        assert_eq!(
            overrides.grants,
            vec![Permission::new(Module::Finance, Action::View)]
        );
        assert_eq!(store.principals().len(), 2);
    }

    #[test]
    fn test_invalid_fixture_is_validation_error() {
        let err = PermissionFixture::from_json("{\"principals\": 3}").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
