//! 按主体的权限缓存
//!
//! - 同一主体同时只有一个有效的进行中解析，并发调用方等待同一结果（Singleflight）
//! - `invalidate` 只递增版本号并标记过期，不主动重新加载
//! - 解析完成时只有发起时的版本仍是当前版本才会提交，旧解析结果被丢弃
//! - 快照以 `Arc` 整体替换，读者不会看到半更新的映射
//! - 没有订阅者的条目在解析结束后经过宽限期被驱逐；进行中解析的条目不会被宽限期驱逐
//! - 解析失败后同步读取不再发起后台解析，直到失效、重新订阅或显式刷新

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, histogram};
use org_common::{PrincipalId, RetryConfig};
use org_config::PermissionSyncConfig;
use org_errors::{AppError, AppResult};
use org_telemetry::names;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::loader::load_permissions;
use crate::domain::{PermissionSnapshot, PermissionState, PermissionStore};
use crate::error::AccessError;

type LoadOutcome = AppResult<Arc<PermissionSnapshot>>;
type SharedLoad = Shared<BoxFuture<'static, LoadOutcome>>;

/// 权限缓存配置
#[derive(Debug, Clone)]
pub struct PermissionCacheConfig {
    /// 条目空闲（无订阅者、无进行中解析）到驱逐前的宽限期
    pub grace_period: Duration,
    /// 单次解析超时
    pub load_timeout: Duration,
    /// 存储读取重试
    pub retry: RetryConfig,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            load_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

impl From<&PermissionSyncConfig> for PermissionCacheConfig {
    fn from(config: &PermissionSyncConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            load_timeout: config.load_timeout(),
            retry: RetryConfig::from_millis(
                config.retry_max_attempts,
                config.retry_initial_delay_ms,
                config.retry_max_delay_ms,
            ),
        }
    }
}

/// 缓存统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub failures: u64,
    pub discarded: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    failures: AtomicU64,
    discarded: AtomicU64,
    evictions: AtomicU64,
}

struct InFlight {
    version: u64,
    load: SharedLoad,
}

struct CacheEntry {
    /// 最近一次成功提交的解析
    snapshot: Option<Arc<PermissionSnapshot>>,
    version: u64,
    stale: bool,
    in_flight: Option<InFlight>,
    subscribers: usize,
    /// 每次订阅数变化或解析结束都递增，用于取消过期的驱逐任务
    eviction_epoch: u64,
    /// 当前版本最近一次解析的失败；失效和重新订阅时清空
    last_error: Option<AppError>,
}

impl CacheEntry {
    fn new(version: u64) -> Self {
        Self {
            snapshot: None,
            version,
            stale: false,
            in_flight: None,
            subscribers: 0,
            eviction_epoch: 0,
            last_error: None,
        }
    }

    fn fresh_snapshot(&self) -> Option<&Arc<PermissionSnapshot>> {
        if self.stale {
            None
        } else {
            self.snapshot.as_ref()
        }
    }

    fn current_load(&self) -> Option<&SharedLoad> {
        self.in_flight
            .as_ref()
            .filter(|in_flight| in_flight.version == self.version)
            .map(|in_flight| &in_flight.load)
    }

    /// 同步读取是否应在后台发起解析
    fn wants_background_load(&self) -> bool {
        self.fresh_snapshot().is_none()
            && self.current_load().is_none()
            && self.last_error.is_none()
    }

    /// 没有订阅者也没有进行中解析时，开启新的驱逐周期
    fn idle_epoch(&mut self) -> Option<u64> {
        if self.subscribers > 0 || self.in_flight.is_some() {
            return None;
        }
        self.eviction_epoch += 1;
        Some(self.eviction_epoch)
    }

    fn finish_in_flight(&mut self, version: u64) {
        if self
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.version == version)
        {
            self.in_flight = None;
        }
    }

    fn state(&self) -> PermissionState {
        if self.in_flight.is_some() {
            return PermissionState::Loading;
        }
        match (&self.snapshot, self.stale) {
            (None, _) => PermissionState::Unloaded,
            (Some(_), true) => PermissionState::Stale,
            (Some(_), false) => PermissionState::Loaded,
        }
    }
}

struct CacheInner {
    store: Arc<dyn PermissionStore>,
    config: PermissionCacheConfig,
    entries: RwLock<HashMap<PrincipalId, CacheEntry>>,
    /// 全局单调递增，条目被驱逐重建后版本号也不会重复
    versions: AtomicU64,
    counters: Counters,
}

/// 权限缓存
///
/// 需要在 Tokio 运行时中使用：解析在独立任务中执行，
/// 即使所有等待方都被取消，解析也会完成并提交
#[derive(Clone)]
pub struct PermissionCache {
    inner: Arc<CacheInner>,
}

impl PermissionCache {
    pub fn new(store: Arc<dyn PermissionStore>, config: PermissionCacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                config,
                entries: RwLock::new(HashMap::new()),
                versions: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PermissionCacheConfig {
        &self.inner.config
    }

    /// 获取权限快照
    ///
    /// 有未过期的快照直接返回；否则加入当前版本的进行中解析，没有则发起一个
    pub async fn get_or_load(&self, principal_id: &PrincipalId) -> LoadOutcome {
        let load = {
            let mut entries = self.inner.entries.write();
            let entry = entries
                .entry(principal_id.clone())
                .or_insert_with(|| CacheEntry::new(self.inner.next_version()));

            if let Some(snapshot) = entry.fresh_snapshot() {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                counter!(names::CACHE_HITS).increment(1);
                return Ok(Arc::clone(snapshot));
            }

            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            counter!(names::CACHE_MISSES).increment(1);

            match entry.current_load() {
                Some(load) => load.clone(),
                None => self.start_load(principal_id, entry),
            }
        };

        load.await
    }

    /// 没有新鲜快照、没有进行中解析、当前版本也没有失败时，在后台发起一次解析
    ///
    /// 不等待结果；当前线程不在 Tokio 运行时中时什么也不做
    pub fn prefetch(&self, principal_id: &PrincipalId) -> bool {
        let wants_load = self
            .inner
            .entries
            .read()
            .get(principal_id)
            .is_none_or(CacheEntry::wants_background_load);
        wants_load && self.prefetch_locked(principal_id)
    }

    /// 同步读取最近一次完成的解析（可能已过期），按需在后台发起解析
    ///
    /// 条目新鲜或已有解析时只取读锁
    pub fn read_through(&self, principal_id: &PrincipalId) -> Option<Arc<PermissionSnapshot>> {
        let (snapshot, wants_load) = match self.inner.entries.read().get(principal_id) {
            Some(entry) => (entry.snapshot.clone(), entry.wants_background_load()),
            None => (None, true),
        };
        if wants_load {
            self.prefetch_locked(principal_id);
        }
        snapshot
    }

    fn prefetch_locked(&self, principal_id: &PrincipalId) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(principal_id = %principal_id, "No runtime available, skipping prefetch");
            return false;
        }

        let mut entries = self.inner.entries.write();
        let entry = entries
            .entry(principal_id.clone())
            .or_insert_with(|| CacheEntry::new(self.inner.next_version()));
        if !entry.wants_background_load() {
            return false;
        }
        self.start_load(principal_id, entry);
        true
    }

    fn start_load(&self, principal_id: &PrincipalId, entry: &mut CacheEntry) -> SharedLoad {
        let version = entry.version;
        let load = Arc::clone(&self.inner).spawn_load(principal_id.clone(), version);
        entry.in_flight = Some(InFlight {
            version,
            load: load.clone(),
        });
        load
    }

    /// 标记过期并递增版本号，不主动重新加载
    ///
    /// 返回是否存在对应条目
    pub fn invalidate(&self, principal_id: &PrincipalId) -> bool {
        let mut entries = self.inner.entries.write();
        let Some(entry) = entries.get_mut(principal_id) else {
            return false;
        };
        entry.version = self.inner.next_version();
        entry.stale = true;
        entry.last_error = None;
        debug!(
            principal_id = %principal_id,
            version = entry.version,
            "Permission cache entry invalidated"
        );
        true
    }

    /// 同步读取最近一次完成的解析（可能已过期），无 I/O
    pub fn peek(&self, principal_id: &PrincipalId) -> Option<Arc<PermissionSnapshot>> {
        self.inner
            .entries
            .read()
            .get(principal_id)
            .and_then(|entry| entry.snapshot.clone())
    }

    pub fn state(&self, principal_id: &PrincipalId) -> PermissionState {
        self.inner
            .entries
            .read()
            .get(principal_id)
            .map_or(PermissionState::Detached, CacheEntry::state)
    }

    pub fn is_loading(&self, principal_id: &PrincipalId) -> bool {
        self.state(principal_id).is_loading()
    }

    pub fn version(&self, principal_id: &PrincipalId) -> Option<u64> {
        self.inner
            .entries
            .read()
            .get(principal_id)
            .map(|entry| entry.version)
    }

    /// 当前版本最近一次失败（成功提交、失效或重新订阅后清空）
    pub fn last_error(&self, principal_id: &PrincipalId) -> Option<AppError> {
        self.inner
            .entries
            .read()
            .get(principal_id)
            .and_then(|entry| entry.last_error.clone())
    }

    pub fn subscriber_count(&self, principal_id: &PrincipalId) -> usize {
        self.inner
            .entries
            .read()
            .get(principal_id)
            .map_or(0, |entry| entry.subscribers)
    }

    /// 订阅数 +1，并取消待执行的驱逐
    pub fn retain(&self, principal_id: &PrincipalId) -> usize {
        let mut entries = self.inner.entries.write();
        let entry = entries
            .entry(principal_id.clone())
            .or_insert_with(|| CacheEntry::new(self.inner.next_version()));
        entry.subscribers += 1;
        entry.eviction_epoch += 1;
        entry.last_error = None;
        entry.subscribers
    }

    /// 订阅数 -1；归零时在宽限期后驱逐条目
    ///
    /// 仍有解析进行中时，等解析结束再开始计时
    pub fn release(&self, principal_id: &PrincipalId) -> usize {
        let epoch = {
            let mut entries = self.inner.entries.write();
            let Some(entry) = entries.get_mut(principal_id) else {
                return 0;
            };
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers > 0 {
                return entry.subscribers;
            }
            entry.idle_epoch()
        };

        if let Some(epoch) = epoch {
            self.inner.schedule_eviction(principal_id.clone(), epoch);
        }
        0
    }

    /// 立即驱逐
    ///
    /// 进行中的解析结果不会再提交，之后的读取会发起新的解析
    pub fn evict(&self, principal_id: &PrincipalId) -> bool {
        let removed = self.inner.entries.write().remove(principal_id).is_some();
        if removed {
            self.inner.record_eviction(principal_id);
        }
        removed
    }

    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            entries: self.len(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
        }
    }
}

impl CacheInner {
    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn schedule_eviction(self: &Arc<Self>, principal_id: PrincipalId, epoch: u64) {
        let grace = self.config.grace_period;
        if grace.is_zero() {
            self.evict_if_idle(&principal_id, epoch);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner: Weak<CacheInner> = Arc::downgrade(self);
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.evict_if_idle(&principal_id, epoch);
                    }
                });
            }
            Err(_) => {
                debug!(
                    principal_id = %principal_id,
                    "No runtime to wait out the grace period, evicting now"
                );
                self.evict_if_idle(&principal_id, epoch);
            }
        }
    }

    fn spawn_load(self: Arc<Self>, principal_id: PrincipalId, version: u64) -> SharedLoad {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        counter!(names::LOADS_STARTED).increment(1);
        debug!(principal_id = %principal_id, version, "Starting permission resolution");

        let task = tokio::spawn(self.resolve_and_commit(principal_id, version));
        async move {
            task.await.unwrap_or_else(|e| {
                Err(AppError::internal(format!(
                    "Permission load task aborted: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared()
    }

    async fn resolve_and_commit(
        self: Arc<Self>,
        principal_id: PrincipalId,
        version: u64,
    ) -> LoadOutcome {
        let started = Instant::now();
        let timeout = self.config.load_timeout;

        let result = match tokio::time::timeout(
            timeout,
            load_permissions(self.store.as_ref(), &principal_id, &self.config.retry),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AccessError::LoadTimeout {
                principal_id: principal_id.clone(),
                timeout_ms: timeout.as_millis(),
            }
            .into()),
        };
        histogram!(names::LOAD_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let (outcome, idle_epoch) = match result {
            Ok((role, permissions)) => {
                let snapshot = Arc::new(PermissionSnapshot::new(
                    principal_id.clone(),
                    role,
                    permissions,
                    version,
                ));
                let idle_epoch = self.commit(&principal_id, version, &snapshot);
                (Ok(snapshot), idle_epoch)
            }
            Err(e) => {
                let idle_epoch = self.record_failure(&principal_id, version, &e);
                (Err(e), idle_epoch)
            }
        };

        if let Some(epoch) = idle_epoch {
            self.schedule_eviction(principal_id, epoch);
        }
        outcome
    }

    /// 提交解析结果；条目因此变为空闲时返回驱逐周期
    fn commit(
        &self,
        principal_id: &PrincipalId,
        version: u64,
        snapshot: &Arc<PermissionSnapshot>,
    ) -> Option<u64> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(principal_id) else {
            self.record_discard();
            debug!(
                principal_id = %principal_id,
                version,
                "Entry evicted before resolution completed, dropping result"
            );
            return None;
        };

        entry.finish_in_flight(version);
        if entry.version != version {
            self.record_discard();
            debug!(
                principal_id = %principal_id,
                version,
                current_version = entry.version,
                "Discarding superseded permission resolution"
            );
            return entry.idle_epoch();
        }

        entry.snapshot = Some(Arc::clone(snapshot));
        entry.stale = false;
        entry.last_error = None;
        debug!(
            principal_id = %principal_id,
            version,
            permissions = snapshot.permissions.len(),
            "Permission snapshot committed"
        );
        entry.idle_epoch()
    }

    fn record_discard(&self) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        counter!(names::LOADS_DISCARDED).increment(1);
    }

    fn record_failure(
        &self,
        principal_id: &PrincipalId,
        version: u64,
        error: &AppError,
    ) -> Option<u64> {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        counter!(names::LOADS_FAILED, "kind" => error.kind()).increment(1);
        warn!(
            principal_id = %principal_id,
            version,
            error = %error,
            "Permission resolution failed"
        );

        let mut entries = self.entries.write();
        let entry = entries.get_mut(principal_id)?;
        entry.finish_in_flight(version);
        if entry.version == version {
            entry.last_error = Some(error.clone());
        }
        entry.idle_epoch()
    }

    fn evict_if_idle(&self, principal_id: &PrincipalId, epoch: u64) -> bool {
        let mut entries = self.entries.write();
        let idle = entries
            .get(principal_id)
            .is_some_and(|entry| {
                entry.subscribers == 0
                    && entry.in_flight.is_none()
                    && entry.eviction_epoch == epoch
            });
        if idle {
            entries.remove(principal_id);
            drop(entries);
            self.record_eviction(principal_id);
        }
        idle
    }

    fn record_eviction(&self, principal_id: &PrincipalId) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        counter!(names::EVICTIONS).increment(1);
        debug!(principal_id = %principal_id, "Permission cache entry evicted");
    }
}
