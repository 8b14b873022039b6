//! Registry of warm pools, one per template.

use crate::error::{CoreError, Result};
use crate::manager::{Provisioner, SandboxManager};
use crate::pool::{PoolConfig, PoolStats, WarmPool};
use crate::sandbox::{SandboxId, SharedSandbox};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owns the warm pools of a runtime.
///
/// Pools create sandboxes through the same path as the [`SandboxManager`]
/// they were built from, so pooled and cold-created sandboxes of a template
/// are configured identically.
pub struct PoolManager {
    pools: RwLock<HashMap<String, Arc<WarmPool>>>,
    provisioner: Provisioner,
    defaults: PoolConfig,
}

impl PoolManager {
    /// Create an empty pool manager creating sandboxes like `manager`.
    pub fn new(manager: &SandboxManager) -> Self {
        Self::with_defaults(manager, PoolConfig::default())
    }

    /// Like [`new`](Self::new), with the timing and concurrency settings
    /// that `create_pool` fills in around the requested sizes.
    pub fn with_defaults(manager: &SandboxManager, defaults: PoolConfig) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            provisioner: manager.provisioner().clone(),
            defaults,
        }
    }

    /// Create and start a pool for `template`, or return the existing one.
    ///
    /// # Errors
    ///
    /// - `TemplateNotFound` if the catalog has no such template
    /// - `InvalidConfig` if `min_size > max_size` or `max_size == 0`
    pub async fn create_pool(
        &self,
        template: &str,
        min_size: usize,
        max_size: usize,
    ) -> Result<Arc<WarmPool>> {
        let config = PoolConfig {
            min_size,
            max_size,
            ..self.defaults.clone()
        };
        self.create_pool_with(template, config).await
    }

    /// [`create_pool`](Self::create_pool) with a full configuration.
    ///
    /// If a pool for `template` already exists it is returned as is and
    /// `config` is ignored.
    pub async fn create_pool_with(&self, template: &str, config: PoolConfig) -> Result<Arc<WarmPool>> {
        if let Some(pool) = self.get_pool(template).await {
            return Ok(pool);
        }
        if self.provisioner.catalog().get_template(template).is_none() {
            return Err(CoreError::TemplateNotFound(template.to_string()));
        }

        let pool = {
            let mut pools = self.pools.write().await;
            if let Some(existing) = pools.get(template) {
                return Ok(Arc::clone(existing));
            }
            let pool = Arc::new(WarmPool::new(template, config, self.provisioner.clone())?);
            pools.insert(template.to_string(), Arc::clone(&pool));
            pool
        };

        pool.start().await;
        Ok(pool)
    }

    /// Get the pool for a template.
    pub async fn get_pool(&self, template: &str) -> Option<Arc<WarmPool>> {
        self.pools.read().await.get(template).cloned()
    }

    /// Acquire from the pool for `template`. `None` if there is no such pool
    /// or it is empty.
    pub async fn acquire_sandbox(&self, template: &str, agent_id: &str) -> Option<SharedSandbox> {
        let pool = self.get_pool(template).await?;
        pool.acquire(agent_id).await
    }

    /// Release a sandbox to the pool for `template`. No-op if there is no
    /// such pool.
    pub async fn release_sandbox(&self, template: &str, sandbox_id: SandboxId) {
        match self.get_pool(template).await {
            Some(pool) => pool.release(sandbox_id).await,
            None => {
                tracing::debug!(sandbox_id = %sandbox_id, template, "No pool for release");
            }
        }
    }

    /// The pool a sandbox is currently allocated from, if any.
    pub async fn find_allocating(&self, sandbox_id: SandboxId) -> Option<Arc<WarmPool>> {
        let pools: Vec<Arc<WarmPool>> = self.pools.read().await.values().cloned().collect();
        for pool in pools {
            if pool.is_allocated(sandbox_id).await {
                return Some(pool);
            }
        }
        None
    }

    /// Statistics of every pool, sorted by template.
    pub async fn get_all_stats(&self) -> Vec<PoolStats> {
        let pools: Vec<Arc<WarmPool>> = self.pools.read().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(pools.len());
        for pool in pools {
            stats.push(pool.get_stats().await);
        }
        stats.sort_by(|a, b| a.template.cmp(&b.template));
        stats
    }

    /// Stop every pool concurrently and forget them.
    pub async fn shutdown_all(&self) {
        let pools: Vec<Arc<WarmPool>> = {
            let mut pools = self.pools.write().await;
            std::mem::take(&mut *pools).into_values().collect()
        };
        tracing::info!(count = pools.len(), "Shutting down warm pools");
        futures::future::join_all(pools.iter().map(|pool| pool.stop())).await;
    }

    /// Number of pools.
    pub async fn count(&self) -> usize {
        self.pools.read().await.len()
    }
}
