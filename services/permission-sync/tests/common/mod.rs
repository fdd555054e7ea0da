//! 集成测试共用工具

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use org_common::{PrincipalId, RetryConfig};
use org_errors::AppResult;
use parking_lot::Mutex;
use permission_sync::{
    ChangeCallback, InMemoryPermissionStore, PermissionCacheConfig, PermissionMap,
    PermissionOverrides, PermissionStore, Role, StoreListenerHandle,
};
use tokio::sync::{mpsc, oneshot};

pub fn test_config(grace_period: Duration) -> PermissionCacheConfig {
    PermissionCacheConfig {
        grace_period,
        load_timeout: Duration::from_secs(2),
        retry: RetryConfig::disabled(),
    }
}

/// 宽限期足够长，测试期间条目不会被驱逐
pub fn retaining_config() -> PermissionCacheConfig {
    test_config(Duration::from_secs(60))
}

pub fn member_store(principal_id: &PrincipalId) -> Arc<InMemoryPermissionStore> {
    let store = Arc::new(InMemoryPermissionStore::new());
    store.set_role(principal_id, Role::Member);
    store
}

/// 记录调用次数的回调
pub fn counting_callback() -> (ChangeCallback, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let callback: ChangeCallback = Arc::new(move |_: &PrincipalId| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (callback, calls)
}

/// 可控制完成时机的存储
///
/// `fetch_overrides` 先读取数据，通过 `reached` 报告调用序号，
/// 再等待队列中的下一个闸门；队列为空时直接返回
pub struct GatedStore {
    inner: Arc<InMemoryPermissionStore>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    calls: AtomicUsize,
    reached: mpsc::UnboundedSender<usize>,
}

impl GatedStore {
    pub fn new(inner: Arc<InMemoryPermissionStore>) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        let (reached, reached_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            inner,
            gates: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            reached,
        });
        (store, reached_rx)
    }

    /// 让下一次 `fetch_overrides` 停在闸门处
    pub fn gate_next(&self) -> oneshot::Sender<()> {
        let (open, gate) = oneshot::channel();
        self.gates.lock().push_back(gate);
        open
    }
}

#[async_trait]
impl PermissionStore for GatedStore {
    async fn fetch_role(&self, principal_id: &PrincipalId) -> AppResult<Role> {
        self.inner.fetch_role(principal_id).await
    }

    async fn fetch_role_defaults(&self, role: &Role) -> AppResult<Option<PermissionMap>> {
        self.inner.fetch_role_defaults(role).await
    }

    async fn fetch_overrides(&self, principal_id: &PrincipalId) -> AppResult<PermissionOverrides> {
        let overrides = self.inner.fetch_overrides(principal_id).await?;
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().pop_front();
        let _ = self.reached.send(call);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(overrides)
    }

    fn subscribe(
        &self,
        principal_id: &PrincipalId,
        callback: ChangeCallback,
    ) -> AppResult<StoreListenerHandle> {
        self.inner.subscribe(principal_id, callback)
    }

    fn unsubscribe(&self, handle: &StoreListenerHandle) -> AppResult<()> {
        self.inner.unsubscribe(handle)
    }
}
