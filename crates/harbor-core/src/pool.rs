//! Warm sandbox pool for reducing cold-start latency.
//!
//! A [`WarmPool`] keeps pre-created, running sandboxes of one template so an
//! agent can be handed a sandbox without waiting for creation.
//!
//! # Architecture
//!
//! The pool tracks two sets under one lock: `available` sandboxes, handed out
//! oldest first, and `allocated` sandboxes currently bound to an agent. A
//! background maintenance task keeps `available` topped up to `min_size`,
//! and every acquire that drops `available` below the replenish threshold
//! spawns a one-off replenish.
//!
//! # Example
//!
//! ```ignore
//! use harbor_core::{PoolManager, PoolConfig};
//!
//! let pool = pools.create_pool("basic-agent", 2, 10).await?;
//!
//! // Non-blocking: None when the pool is empty
//! if let Some(sandbox) = pool.acquire("agent-1").await {
//!     let id = sandbox.lock().await.id();
//!     // ... use the sandbox ...
//!     pool.release(id).await;
//! }
//!
//! pool.stop().await;
//! ```

use crate::error::{CoreError, Result};
use crate::manager::Provisioner;
use crate::sandbox::{SandboxId, SharedSandbox};
use crate::types::SandboxStatus;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a warm pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of ready sandboxes the pool tries to keep.
    /// Default: 2
    pub min_size: usize,

    /// Ceiling for available plus allocated sandboxes.
    /// Default: 10
    pub max_size: usize,

    /// An acquire that leaves fewer than this many available sandboxes
    /// triggers an immediate single-sandbox replenish.
    /// Default: 1
    pub replenish_threshold: usize,

    /// Interval between maintenance rounds.
    /// Default: 10 seconds
    pub maintenance_interval: Duration,

    /// Wait after a maintenance round in which a creation failed.
    /// Default: 5 seconds
    pub retry_backoff: Duration,

    /// How long `stop()` waits for the maintenance task before aborting it.
    /// Default: 2 seconds
    pub join_timeout: Duration,

    /// Maximum number of sandbox creations in flight.
    /// Default: 2
    pub max_concurrent_creates: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            replenish_threshold: 1,
            maintenance_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(5),
            join_timeout: Duration::from_secs(2),
            max_concurrent_creates: 2,
        }
    }
}

impl PoolConfig {
    /// Validate the pool sizing.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CoreError::InvalidConfig("pool max_size must be > 0".into()));
        }
        if self.min_size > self.max_size {
            return Err(CoreError::InvalidConfig(format!(
                "pool min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.max_concurrent_creates == 0 {
            return Err(CoreError::InvalidConfig(
                "pool max_concurrent_creates must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub template: String,
    pub available: usize,
    pub allocated: usize,
    pub total: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Acquires served from the pool.
    pub warm_hits: u64,
    /// Acquires that found the pool empty.
    pub misses: u64,
    /// Sandboxes created by the pool.
    pub created: u64,
    /// Sandboxes terminated by the pool.
    pub destroyed: u64,
}

impl PoolStats {
    /// Warm hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.warm_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.warm_hits as f64 / total as f64) * 100.0
        }
    }
}

/// Lifetime counters. All atomic, readable without the pool lock.
#[derive(Debug, Default)]
struct Counters {
    warm_hits: AtomicU64,
    misses: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Pool Implementation
// ============================================================================

#[derive(Default)]
struct Slots {
    available: VecDeque<(SandboxId, SharedSandbox)>,
    allocated: HashMap<SandboxId, SharedSandbox>,
}

impl Slots {
    fn total(&self) -> usize {
        self.available.len() + self.allocated.len()
    }
}

/// State shared between the pool handle, its maintenance task and the
/// replenish tasks.
struct PoolInner {
    template: String,
    config: PoolConfig,
    provisioner: Provisioner,
    slots: Mutex<Slots>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    create_permits: Arc<Semaphore>,
    counters: Counters,
}

/// A pool of pre-created sandboxes of one template.
///
/// # Thread Safety
///
/// All methods take `&self`; share the pool as `Arc<WarmPool>`. The pool lock
/// is never held across sandbox creation or termination, and sandbox locks
/// are only taken after the pool lock is released.
pub struct WarmPool {
    inner: Arc<PoolInner>,
    maintenance_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WarmPool {
    /// Create a pool for `template`. Nothing is created until
    /// [`start()`](Self::start).
    pub(crate) fn new(
        template: impl Into<String>,
        config: PoolConfig,
        provisioner: Provisioner,
    ) -> Result<Self> {
        config.validate()?;
        let template = template.into();
        tracing::info!(
            template = %template,
            min_size = config.min_size,
            max_size = config.max_size,
            "Creating warm pool"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(Slots::default()),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
                create_permits: Arc::new(Semaphore::new(config.max_concurrent_creates)),
                counters: Counters::default(),
                template,
                config,
                provisioner,
            }),
            maintenance_handle: Mutex::new(None),
        })
    }

    /// Populate the pool up to `min_size` and start the maintenance task.
    ///
    /// Starting a running or stopped pool logs a warning and does nothing.
    /// A creation failure during population is logged; the maintenance task
    /// retries later.
    pub async fn start(&self) {
        let mut handle = self.maintenance_handle.lock().await;
        if handle.is_some() || self.inner.shutdown.load(Ordering::Relaxed) {
            tracing::warn!(template = %self.inner.template, "Warm pool already started");
            return;
        }

        let start = Instant::now();
        let mut created = 0;
        while self.inner.available().await < self.inner.config.min_size {
            match self.inner.create_one().await {
                Ok(true) => created += 1,
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(
                        template = %self.inner.template,
                        error = %e,
                        "Failed to populate warm pool"
                    );
                    break;
                }
            }
        }
        tracing::info!(
            template = %self.inner.template,
            created,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Warm pool populated"
        );

        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(inner.maintenance_loop()));
    }

    /// Stop the pool.
    ///
    /// This:
    /// 1. Signals the maintenance task to stop
    /// 2. Waits up to `join_timeout` for it, aborting it after that
    /// 3. Terminates every available sandbox
    ///
    /// Allocated sandboxes belong to their agents and are left alone. A
    /// stopped pool cannot be started again.
    pub async fn stop(&self) {
        let inner = &self.inner;
        tracing::info!(template = %inner.template, "Stopping warm pool");

        inner.shutdown.store(true, Ordering::Relaxed);
        inner.shutdown_notify.notify_one();

        if let Some(mut handle) = self.maintenance_handle.lock().await.take() {
            tracing::debug!(template = %inner.template, "Waiting for maintenance task");
            match tokio::time::timeout(inner.config.join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(template = %inner.template, error = ?e, "Maintenance task panicked");
                }
                Err(_) => {
                    tracing::warn!(template = %inner.template, "Maintenance task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let drained: Vec<(SandboxId, SharedSandbox)> = {
            let mut slots = inner.slots.lock().await;
            std::mem::take(&mut slots.available).into_iter().collect()
        };

        let count = drained.len();
        for (_, sandbox) in drained {
            sandbox.lock().await.terminate().await;
            Counters::bump(&inner.counters.destroyed);
        }

        let stats = self.get_stats().await;
        tracing::info!(
            template = %inner.template,
            destroyed = count,
            warm_hits = stats.warm_hits,
            misses = stats.misses,
            hit_rate = format!("{:.1}%", stats.hit_rate()),
            "Warm pool stopped"
        );
    }

    /// Take the oldest ready sandbox and bind it to `agent_id`.
    ///
    /// Never waits for creation: returns `None` when no sandbox is
    /// available. An acquire that leaves fewer than `replenish_threshold`
    /// sandboxes available triggers a background replenish.
    pub async fn acquire(&self, agent_id: &str) -> Option<SharedSandbox> {
        let inner = &self.inner;
        let (id, sandbox, remaining) = {
            let mut slots = inner.slots.lock().await;
            let Some((id, sandbox)) = slots.available.pop_front() else {
                drop(slots);
                Counters::bump(&inner.counters.misses);
                tracing::info!(template = %inner.template, "Warm pool empty");
                return None;
            };
            slots.allocated.insert(id, Arc::clone(&sandbox));
            (id, sandbox, slots.available.len())
        };

        sandbox.lock().await.bind_agent(agent_id);
        Counters::bump(&inner.counters.warm_hits);
        tracing::info!(
            sandbox_id = %id,
            agent_id,
            template = %inner.template,
            remaining,
            "Acquired sandbox from warm pool"
        );

        if remaining < inner.config.replenish_threshold {
            tokio::spawn(Arc::clone(inner).replenish_one());
        }

        Some(sandbox)
    }

    /// Return an allocated sandbox to the pool.
    ///
    /// The agent binding and session context are cleared. The sandbox goes
    /// back to `available` if there is room below `max_size`; otherwise it
    /// is terminated. A paused or hibernated sandbox is resumed first and
    /// terminated if that fails. Unknown IDs are ignored.
    pub async fn release(&self, sandbox_id: SandboxId) {
        let Some(sandbox) = self.inner.slots.lock().await.allocated.remove(&sandbox_id) else {
            tracing::debug!(sandbox_id = %sandbox_id, template = %self.inner.template, "Release of unknown sandbox ignored");
            return;
        };
        self.inner.put_back(sandbox_id, sandbox).await;
    }

    /// Take in a running sandbox of this pool's template that the pool did
    /// not create, e.g. one cold-created while the pool was empty.
    ///
    /// Follows the same rules as [`release`](Self::release). Returns whether
    /// the sandbox was kept.
    pub async fn adopt(&self, sandbox: SharedSandbox) -> bool {
        let (id, template) = {
            let guard = sandbox.lock().await;
            (guard.id(), guard.template_name().to_string())
        };
        if template != self.inner.template {
            tracing::warn!(
                sandbox_id = %id,
                template = %template,
                pool = %self.inner.template,
                "Refusing sandbox of another template"
            );
            return false;
        }
        self.inner.put_back(id, sandbox).await
    }

    /// Drop an allocated sandbox from the pool's books without touching it.
    ///
    /// For sandboxes that ended outside the pool, e.g. terminated by an
    /// expiry sweep. Returns whether the sandbox was allocated here.
    pub async fn forget(&self, sandbox_id: SandboxId) -> bool {
        let forgotten = self
            .inner
            .slots
            .lock()
            .await
            .allocated
            .remove(&sandbox_id)
            .is_some();
        if forgotten {
            tracing::debug!(sandbox_id = %sandbox_id, template = %self.inner.template, "Forgot allocated sandbox");
        }
        forgotten
    }

    /// Whether a sandbox is currently allocated from this pool.
    pub async fn is_allocated(&self, sandbox_id: SandboxId) -> bool {
        self.inner.slots.lock().await.allocated.contains_key(&sandbox_id)
    }

    /// Current pool statistics.
    pub async fn get_stats(&self) -> PoolStats {
        let inner = &self.inner;
        let (available, allocated) = {
            let slots = inner.slots.lock().await;
            (slots.available.len(), slots.allocated.len())
        };
        PoolStats {
            template: inner.template.clone(),
            available,
            allocated,
            total: available + allocated,
            min_size: inner.config.min_size,
            max_size: inner.config.max_size,
            warm_hits: Counters::get(&inner.counters.warm_hits),
            misses: Counters::get(&inner.counters.misses),
            created: Counters::get(&inner.counters.created),
            destroyed: Counters::get(&inner.counters.destroyed),
        }
    }

    /// Template this pool serves.
    pub fn template(&self) -> &str {
        &self.inner.template
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check if the maintenance task is running.
    pub async fn is_running(&self) -> bool {
        self.maintenance_handle.lock().await.is_some()
            && !self.inner.shutdown.load(Ordering::Relaxed)
    }
}

impl PoolInner {
    async fn available(&self) -> usize {
        self.slots.lock().await.available.len()
    }

    /// Create one sandbox and add it to `available`.
    ///
    /// Returns `Ok(false)` when the pool stopped or filled up while the
    /// sandbox was being created; the surplus sandbox is terminated.
    async fn create_one(&self) -> Result<bool> {
        if self.shutdown.load(Ordering::Relaxed) {
            tracing::trace!(template = %self.template, "Skipping sandbox creation due to shutdown");
            return Ok(false);
        }

        tracing::debug!(template = %self.template, "Creating sandbox for pool");
        let mut sandbox = self.provisioner.provision(None, &self.template, None).await?;
        Counters::bump(&self.counters.created);
        let id = sandbox.id();

        let mut slots = self.slots.lock().await;
        if self.shutdown.load(Ordering::Relaxed) || slots.total() >= self.config.max_size {
            drop(slots);
            tracing::debug!(sandbox_id = %id, template = %self.template, "Pool stopped or full, terminating new sandbox");
            sandbox.terminate().await;
            Counters::bump(&self.counters.destroyed);
            return Ok(false);
        }
        slots
            .available
            .push_back((id, Arc::new(Mutex::new(sandbox))));
        let available = slots.available.len();
        drop(slots);

        tracing::debug!(sandbox_id = %id, template = %self.template, available, "Added sandbox to pool");
        Ok(true)
    }

    /// Put a sandbox that is no longer allocated back into `available`, or
    /// terminate it if it cannot be reused or there is no room.
    async fn put_back(&self, id: SandboxId, sandbox: SharedSandbox) -> bool {
        let reusable = {
            let mut guard = sandbox.lock().await;
            guard.reset_for_pool();
            match guard.status() {
                SandboxStatus::Running => true,
                SandboxStatus::Paused | SandboxStatus::Hibernated => guard.resume().await,
                _ => false,
            }
        };

        let kept = reusable && {
            let mut slots = self.slots.lock().await;
            if !self.shutdown.load(Ordering::Relaxed)
                && slots.available.len() < self.config.max_size
            {
                slots.available.push_back((id, Arc::clone(&sandbox)));
                true
            } else {
                false
            }
        };

        if kept {
            tracing::info!(sandbox_id = %id, template = %self.template, "Sandbox returned to pool");
        } else {
            if sandbox.lock().await.terminate().await {
                Counters::bump(&self.counters.destroyed);
            }
            tracing::info!(sandbox_id = %id, template = %self.template, "Sandbox not reusable or pool full, terminated");
        }
        kept
    }

    /// Create a single sandbox if the pool is still below `min_size`.
    async fn replenish_one(self: Arc<Self>) {
        let Ok(_permit) = Arc::clone(&self.create_permits).try_acquire_owned() else {
            tracing::trace!(template = %self.template, "Create permits exhausted, skipping replenish");
            return;
        };
        if self.available().await >= self.config.min_size {
            return;
        }
        if let Err(e) = self.create_one().await {
            tracing::warn!(template = %self.template, error = %e, "Replenish failed");
        }
    }

    /// Background maintenance loop.
    ///
    /// Runs until shutdown is signaled, topping the pool up every
    /// `maintenance_interval` and backing off after failed rounds.
    async fn maintenance_loop(self: Arc<Self>) {
        tracing::debug!(template = %self.template, "Maintenance loop started");
        let mut delay = self.config.maintenance_interval;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_notify.notified() => {
                    tracing::debug!(template = %self.template, "Maintenance loop received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(delay) => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let failures = self.top_up().await;
            delay = if failures > 0 {
                tracing::warn!(
                    template = %self.template,
                    failures,
                    backoff_ms = self.config.retry_backoff.as_millis() as u64,
                    "Pool maintenance round had failures, backing off"
                );
                self.config.retry_backoff
            } else {
                self.config.maintenance_interval
            };
        }

        tracing::debug!(template = %self.template, "Maintenance loop exited");
    }

    /// One maintenance round. Returns the number of failed creations.
    async fn top_up(self: &Arc<Self>) -> usize {
        let (available, total) = {
            let slots = self.slots.lock().await;
            (slots.available.len(), slots.total())
        };
        if available >= self.config.min_size {
            return 0;
        }

        let needed = (self.config.min_size - available)
            .min(self.config.max_size.saturating_sub(total));
        if needed == 0 {
            return 0;
        }
        tracing::debug!(
            template = %self.template,
            available,
            target = self.config.min_size,
            needed,
            "Pool below target, filling"
        );

        // Dropping a JoinHandle detaches its task, so an aborted maintenance
        // loop leaves in-flight creations to finish. `create_one` terminates
        // them once it sees the shutdown flag.
        let handles: Vec<JoinHandle<Result<bool>>> = (0..needed)
            .map(|_| {
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let _permit = Arc::clone(&inner.create_permits).acquire_owned().await;
                    inner.create_one().await
                })
            })
            .collect();

        let mut failures = 0;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(template = %self.template, error = %e, "Failed to create sandbox for pool");
                    failures += 1;
                }
                Err(e) => {
                    tracing::error!(template = %self.template, error = ?e, "Pool creation task panicked");
                    failures += 1;
                }
            }
        }
        failures
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendRequest, Backends, IsolationBackend};
    use crate::manager::{ManagerConfig, SandboxManager};
    use crate::types::IsolationLevel;
    use async_trait::async_trait;
    use crate::storage::MemoryBlobStore;
    use crate::template::TemplateLibrary;

    fn provisioner(store: Arc<MemoryBlobStore>) -> Provisioner {
        provisioner_with(store, Backends::default())
    }

    fn provisioner_with(store: Arc<MemoryBlobStore>, backends: Backends) -> Provisioner {
        SandboxManager::new(
            ManagerConfig::default(),
            Arc::new(TemplateLibrary::builtin()),
            store,
            backends,
        )
        .provisioner()
        .clone()
    }

    /// Process backend whose set-up takes a while.
    #[derive(Default)]
    struct SlowBackend {
        inits: AtomicU64,
        releases: AtomicU64,
    }

    #[async_trait]
    impl IsolationBackend for SlowBackend {
        fn level(&self) -> IsolationLevel {
            IsolationLevel::Process
        }

        async fn init(&self, _request: &BackendRequest) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn release(&self, _sandbox_id: SandboxId) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sizing with a maintenance loop that never fires during a test.
    fn quiet(min_size: usize, max_size: usize) -> PoolConfig {
        PoolConfig {
            min_size,
            max_size,
            maintenance_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    fn pool(config: PoolConfig, store: Arc<MemoryBlobStore>) -> WarmPool {
        WarmPool::new("default", config, provisioner(store)).unwrap()
    }

    async fn wait_for<F>(pool: &WarmPool, mut done: F) -> PoolStats
    where
        F: FnMut(&PoolStats) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = pool.get_stats().await;
            if done(&stats) || Instant::now() > deadline {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size, 2);
        assert_eq!(config.max_size, 10);
        assert_eq!(config.replenish_threshold, 1);
        assert_eq!(config.maintenance_interval, Duration::from_secs(10));
        assert_eq!(config.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.join_timeout, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_rejects_bad_sizes() {
        assert!(quiet(3, 2).validate().is_err());
        assert!(quiet(0, 0).validate().is_err());
        assert!(quiet(0, 1).validate().is_ok());
    }

    #[test]
    fn test_pool_stats_hit_rate() {
        let mut stats = PoolStats {
            template: "default".into(),
            available: 0,
            allocated: 0,
            total: 0,
            min_size: 0,
            max_size: 1,
            warm_hits: 0,
            misses: 0,
            created: 0,
            destroyed: 0,
        };
        assert_eq!(stats.hit_rate(), 0.0);

        stats.warm_hits = 3;
        stats.misses = 1;
        assert!((stats.hit_rate() - 75.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_start_populates_min_size() {
        let pool = pool(quiet(3, 10), Arc::new(MemoryBlobStore::new()));
        assert_eq!(pool.get_stats().await.available, 0);

        pool.start().await;
        assert!(pool.is_running().await);
        let stats = pool.get_stats().await;
        assert_eq!(stats.available, 3);
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.created, 3);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_acquire_until_empty() {
        let store = Arc::new(MemoryBlobStore::new());
        let pool = pool(quiet(3, 10), Arc::clone(&store));
        pool.start().await;
        // Replenishment will fail from here on.
        store.set_fail_writes(true);

        let mut ids = Vec::new();
        for (i, expected_left) in [2, 1, 0].into_iter().enumerate() {
            let sandbox = pool.acquire(&format!("agent-{i}")).await.unwrap();
            let guard = sandbox.lock().await;
            assert_eq!(guard.agent_id(), Some(format!("agent-{i}").as_str()));
            assert_eq!(guard.status(), SandboxStatus::Running);
            ids.push(guard.id());
            assert_eq!(pool.get_stats().await.available, expected_left);
        }
        ids.sort_by_key(|id| id.as_uuid());
        ids.dedup();
        assert_eq!(ids.len(), 3);

        assert!(pool.acquire("agent-3").await.is_none());
        let stats = pool.get_stats().await;
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.warm_hits, 3);
        assert_eq!(stats.misses, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_no_replenish_at_threshold() {
        let pool = pool(quiet(2, 10), Arc::new(MemoryBlobStore::new()));
        pool.start().await;

        pool.acquire("agent").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = pool.get_stats().await;
        assert_eq!(stats.available, 1);
        assert_eq!(stats.created, 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_replenish_after_emptying() {
        let pool = pool(quiet(1, 5), Arc::new(MemoryBlobStore::new()));
        pool.start().await;

        pool.acquire("agent").await.unwrap();
        let stats = wait_for(&pool, |s| s.available == 1).await;
        assert_eq!(stats.available, 1);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.created, 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_maintenance_loop_tops_up() {
        let config = PoolConfig {
            replenish_threshold: 0,
            maintenance_interval: Duration::from_millis(20),
            ..quiet(2, 10)
        };
        let pool = pool(config, Arc::new(MemoryBlobStore::new()));
        pool.start().await;

        pool.acquire("a").await.unwrap();
        pool.acquire("b").await.unwrap();
        let stats = wait_for(&pool, |s| s.available == 2).await;
        assert_eq!(stats.available, 2);
        assert_eq!(stats.allocated, 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_total_never_exceeds_max() {
        let config = PoolConfig {
            maintenance_interval: Duration::from_millis(20),
            ..quiet(3, 4)
        };
        let pool = pool(config, Arc::new(MemoryBlobStore::new()));
        pool.start().await;

        for agent in ["a", "b", "c"] {
            pool.acquire(agent).await.unwrap();
            assert!(pool.get_stats().await.total <= 4);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = pool.get_stats().await;
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.total, 4);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_release_returns_clean_sandbox() {
        let pool = pool(quiet(1, 5), Arc::new(MemoryBlobStore::new()));
        pool.start().await;

        let sandbox = pool.acquire("agent").await.unwrap();
        let id = {
            let mut guard = sandbox.lock().await;
            guard.set_session_context(Some(serde_json::json!({"step": 1})));
            guard.id()
        };
        wait_for(&pool, |s| s.available == 1).await;

        pool.release(id).await;
        assert!(!pool.is_allocated(id).await);
        let stats = pool.get_stats().await;
        assert_eq!(stats.available, 2);
        assert_eq!(stats.allocated, 0);

        let guard = sandbox.lock().await;
        assert_eq!(guard.agent_id(), None);
        assert!(guard.runtime().session_context.is_none());
        assert_eq!(guard.status(), SandboxStatus::Running);
        drop(guard);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_release_resumes_hibernated_sandbox() {
        let pool = pool(quiet(0, 5), Arc::new(MemoryBlobStore::new()));
        let sandbox = pool
            .inner
            .provisioner
            .provision(None, "default", None)
            .await
            .unwrap();
        assert!(pool.adopt(Arc::new(Mutex::new(sandbox))).await);

        let shared = pool.acquire("agent").await.unwrap();
        let id = {
            let mut guard = shared.lock().await;
            assert!(guard.hibernate().await);
            guard.id()
        };

        pool.release(id).await;
        assert_eq!(shared.lock().await.status(), SandboxStatus::Running);
        assert_eq!(pool.get_stats().await.available, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_release_into_full_pool_terminates() {
        let store = Arc::new(MemoryBlobStore::new());
        let pool = pool(quiet(1, 2), Arc::clone(&store));
        pool.start().await;

        let sandbox = pool.acquire("agent").await.unwrap();
        let id = sandbox.lock().await.id();
        wait_for(&pool, |s| s.available == 1).await;

        let cold = pool
            .inner
            .provisioner
            .provision(Some("other".into()), "default", None)
            .await
            .unwrap();
        assert!(pool.adopt(Arc::new(Mutex::new(cold))).await);
        assert_eq!(pool.get_stats().await.available, 2);

        pool.release(id).await;
        assert_eq!(sandbox.lock().await.status(), SandboxStatus::Terminated);
        let stats = pool.get_stats().await;
        assert_eq!(stats.available, 2);
        assert_eq!(stats.allocated, 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_adopt_rejects_other_template() {
        let pool = pool(quiet(0, 5), Arc::new(MemoryBlobStore::new()));
        let other = pool
            .inner
            .provisioner
            .provision(None, "basic-agent", None)
            .await
            .unwrap();
        assert!(!pool.adopt(Arc::new(Mutex::new(other))).await);
        assert_eq!(pool.get_stats().await.available, 0);
    }

    #[tokio::test]
    async fn test_release_unknown_is_noop() {
        let pool = pool(quiet(1, 5), Arc::new(MemoryBlobStore::new()));
        pool.start().await;
        pool.release(SandboxId::new()).await;
        assert_eq!(pool.get_stats().await.available, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_terminates_available() {
        let pool = pool(quiet(2, 5), Arc::new(MemoryBlobStore::new()));
        pool.start().await;
        let allocated = pool.acquire("agent").await.unwrap();

        let stopped = Instant::now();
        pool.stop().await;
        assert!(stopped.elapsed() < Duration::from_secs(2));
        assert!(!pool.is_running().await);

        let stats = pool.get_stats().await;
        assert_eq!(stats.available, 0);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(allocated.lock().await.status(), SandboxStatus::Running);

        pool.start().await;
        assert_eq!(pool.get_stats().await.available, 0);
    }

    #[tokio::test]
    async fn test_stop_timeout_still_releases_in_flight_creation() {
        let backend = Arc::new(SlowBackend::default());
        let config = PoolConfig {
            replenish_threshold: 0,
            maintenance_interval: Duration::from_millis(20),
            join_timeout: Duration::from_millis(100),
            ..quiet(1, 2)
        };
        let pool = WarmPool::new(
            "default",
            config,
            provisioner_with(
                Arc::new(MemoryBlobStore::new()),
                Backends::default().with_backend(backend.clone()),
            ),
        )
        .unwrap();
        pool.start().await;
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);

        // The maintenance loop starts creating a replacement.
        let allocated = pool.acquire("agent").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Times out and aborts the loop mid-creation.
        pool.stop().await;

        let deadline = Instant::now() + Duration::from_secs(3);
        while backend.releases.load(Ordering::SeqCst) < 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(backend.inits.load(Ordering::SeqCst), 2);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        assert_eq!(pool.get_stats().await.available, 0);
        assert_eq!(allocated.lock().await.status(), SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_template_leaves_pool_empty() {
        let pool = WarmPool::new(
            "no-such-template",
            quiet(2, 5),
            provisioner(Arc::new(MemoryBlobStore::new())),
        )
        .unwrap();
        pool.start().await;
        let stats = pool.get_stats().await;
        assert_eq!(stats.available, 0);
        assert_eq!(stats.created, 0);
        pool.stop().await;
    }
}
