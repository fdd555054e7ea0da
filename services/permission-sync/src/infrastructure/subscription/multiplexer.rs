//! 订阅复用器
//!
//! 每个主体最多一个存储监听器；存储变更先失效缓存，再依次通知该主体的全部订阅方

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use metrics::{counter, gauge};
use org_common::PrincipalId;
use org_telemetry::names;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{ChangeCallback, PermissionStore, StoreListenerHandle};
use crate::infrastructure::cache::PermissionCache;

/// 单个订阅方的句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: Uuid,
    pub principal_id: PrincipalId,
}

enum StoreListener {
    Closed,
    /// 正在向存储注册（在锁外调用存储）
    Opening,
    Open(StoreListenerHandle),
    /// 注册失败，下一次订阅时重试
    Failed,
}

struct Registration {
    /// 每次为主体新建登记都分配新 id，用来识别已被拆除的旧登记
    id: u64,
    /// 按订阅顺序
    listeners: Vec<(Uuid, ChangeCallback)>,
    store_listener: StoreListener,
}

struct MultiplexerInner {
    store: Arc<dyn PermissionStore>,
    cache: PermissionCache,
    registrations: Mutex<HashMap<PrincipalId, Registration>>,
    next_registration: AtomicU64,
}

/// 订阅复用器
///
/// 只负责存活与扇出，不持有权限映射
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    inner: Arc<MultiplexerInner>,
}

impl SubscriptionMultiplexer {
    pub fn new(store: Arc<dyn PermissionStore>, cache: PermissionCache) -> Self {
        Self {
            inner: Arc::new(MultiplexerInner {
                store,
                cache,
                registrations: Mutex::new(HashMap::new()),
                next_registration: AtomicU64::new(1),
            }),
        }
    }

    /// 注册订阅方
    ///
    /// 主体的第一个订阅方会打开唯一的存储监听器；监听器打开失败只记录日志，
    /// 订阅方仍然登记，下次订阅时重试
    pub fn subscribe(
        &self,
        principal_id: &PrincipalId,
        on_change: ChangeCallback,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle {
            id: Uuid::now_v7(),
            principal_id: principal_id.clone(),
        };

        let open_as = {
            let mut registrations = self.inner.registrations.lock();
            let registration = registrations
                .entry(principal_id.clone())
                .or_insert_with(|| Registration {
                    id: self.inner.next_registration.fetch_add(1, Ordering::Relaxed),
                    listeners: Vec::new(),
                    store_listener: StoreListener::Closed,
                });
            registration.listeners.push((handle.id, on_change));

            match registration.store_listener {
                StoreListener::Closed | StoreListener::Failed => {
                    registration.store_listener = StoreListener::Opening;
                    Some(registration.id)
                }
                StoreListener::Opening | StoreListener::Open(_) => None,
            }
        };

        self.inner.cache.retain(principal_id);

        if let Some(registration_id) = open_as {
            Arc::clone(&self.inner).open_store_listener(principal_id, registration_id);
        }

        debug!(
            principal_id = %principal_id,
            subscription_id = %handle.id,
            "Subscriber attached"
        );
        handle
    }

    /// 移除订阅方
    ///
    /// 最后一个订阅方离开时拆除存储监听器，并通知缓存订阅数归零。
    /// 重复注销返回 false
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let to_close = {
            let mut registrations = self.inner.registrations.lock();
            let Some(registration) = registrations.get_mut(&handle.principal_id) else {
                return false;
            };
            let before = registration.listeners.len();
            registration.listeners.retain(|(id, _)| *id != handle.id);
            if registration.listeners.len() == before {
                return false;
            }

            if registration.listeners.is_empty() {
                registrations
                    .remove(&handle.principal_id)
                    .map(|registration| registration.store_listener)
            } else {
                None
            }
        };

        if let Some(StoreListener::Open(store_handle)) = to_close {
            self.inner.close_store_listener(&handle.principal_id, &store_handle);
        }

        self.inner.cache.release(&handle.principal_id);
        debug!(
            principal_id = %handle.principal_id,
            subscription_id = %handle.id,
            "Subscriber detached"
        );
        true
    }

    /// 处理一次存储变更通知：先失效缓存，再逐个调用订阅方回调
    pub fn dispatch_change(&self, principal_id: &PrincipalId) -> usize {
        self.inner.dispatch_change(principal_id)
    }

    pub fn subscriber_count(&self, principal_id: &PrincipalId) -> usize {
        self.inner
            .registrations
            .lock()
            .get(principal_id)
            .map_or(0, |registration| registration.listeners.len())
    }

    /// 主体是否有已打开的存储监听器
    pub fn is_listening(&self, principal_id: &PrincipalId) -> bool {
        self.inner
            .registrations
            .lock()
            .get(principal_id)
            .is_some_and(|registration| {
                matches!(registration.store_listener, StoreListener::Open(_))
            })
    }
}

impl MultiplexerInner {
    fn open_store_listener(self: Arc<Self>, principal_id: &PrincipalId, registration_id: u64) {
        let weak: Weak<MultiplexerInner> = Arc::downgrade(&self);
        let callback: ChangeCallback = Arc::new(move |changed: &PrincipalId| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch_change(changed);
            }
        });

        // 存储可能在 subscribe 返回前同步回调，不能持锁调用
        let result = self.store.subscribe(principal_id, callback);

        let mut registrations = self.registrations.lock();
        let current = registrations
            .get_mut(principal_id)
            .filter(|registration| registration.id == registration_id);

        match (result, current) {
            (Ok(store_handle), Some(registration)) => {
                registration.store_listener = StoreListener::Open(store_handle.clone());
                drop(registrations);
                gauge!(names::ACTIVE_LISTENERS).increment(1.0);
                info!(
                    principal_id = %principal_id,
                    listener = %store_handle,
                    "Store change listener opened"
                );
            }
            (Ok(store_handle), None) => {
                // 打开期间最后一个订阅方已经离开
                drop(registrations);
                gauge!(names::ACTIVE_LISTENERS).increment(1.0);
                self.close_store_listener(principal_id, &store_handle);
            }
            (Err(e), current) => {
                if let Some(registration) = current {
                    registration.store_listener = StoreListener::Failed;
                }
                drop(registrations);
                warn!(
                    principal_id = %principal_id,
                    error = %e,
                    "Failed to open store change listener"
                );
            }
        }
    }

    fn close_store_listener(
        &self,
        principal_id: &PrincipalId,
        store_handle: &StoreListenerHandle,
    ) {
        gauge!(names::ACTIVE_LISTENERS).decrement(1.0);
        match self.store.unsubscribe(store_handle) {
            Ok(()) => info!(
                principal_id = %principal_id,
                listener = %store_handle,
                "Store change listener closed"
            ),
            Err(e) => warn!(
                principal_id = %principal_id,
                listener = %store_handle,
                error = %e,
                "Failed to close store change listener"
            ),
        }
    }

    fn dispatch_change(&self, principal_id: &PrincipalId) -> usize {
        self.cache.invalidate(principal_id);

        let listeners: Vec<ChangeCallback> = self
            .registrations
            .lock()
            .get(principal_id)
            .map(|registration| {
                registration
                    .listeners
                    .iter()
                    .map(|(_, callback)| Arc::clone(callback))
                    .collect()
            })
            .unwrap_or_default();

        counter!(names::CHANGE_NOTIFICATIONS).increment(1);
        debug!(
            principal_id = %principal_id,
            listeners = listeners.len(),
            "Dispatching permission change"
        );

        for callback in &listeners {
            if catch_unwind(AssertUnwindSafe(|| callback(principal_id))).is_err() {
                error!(principal_id = %principal_id, "Permission change listener panicked");
            }
        }
        listeners.len()
    }
}
