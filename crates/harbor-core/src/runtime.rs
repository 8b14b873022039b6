//! Runtime context tying the sandbox manager and the warm pools together.

use crate::error::{CoreError, Result};
use crate::manager::SandboxManager;
use crate::pools::PoolManager;
use crate::sandbox::{SandboxId, SharedSandbox};
use serde::Serialize;
use std::sync::Arc;

/// How a sandbox was obtained by [`Runtime::allocate`].
#[derive(Debug, Clone)]
pub enum Allocation {
    /// Taken from a warm pool.
    Warm(SharedSandbox),
    /// Created on demand.
    Cold(SharedSandbox),
}

impl Allocation {
    /// The allocated sandbox.
    pub fn sandbox(&self) -> &SharedSandbox {
        match self {
            Self::Warm(sandbox) | Self::Cold(sandbox) => sandbox,
        }
    }

    /// Consume the allocation, returning the sandbox.
    pub fn into_sandbox(self) -> SharedSandbox {
        match self {
            Self::Warm(sandbox) | Self::Cold(sandbox) => sandbox,
        }
    }

    pub fn is_warm(&self) -> bool {
        matches!(self, Self::Warm(_))
    }
}

/// Result of one periodic sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Idle sandboxes hibernated.
    pub hibernated: usize,
    /// Expired sandboxes terminated.
    pub terminated: usize,
    /// Terminated or failed sandboxes dropped from the registry.
    pub pruned: usize,
}

/// Application context: one sandbox manager and its warm pools.
///
/// Every sandbox handed to an agent is registered with the manager, whether
/// it came from a pool or was created on demand, so sweeps see all of them.
pub struct Runtime {
    manager: Arc<SandboxManager>,
    pools: Arc<PoolManager>,
}

impl Runtime {
    /// Wrap a manager and pools built from it.
    pub fn new(manager: Arc<SandboxManager>, pools: Arc<PoolManager>) -> Self {
        Self { manager, pools }
    }

    /// Build a runtime whose pools use default settings.
    pub fn from_manager(manager: SandboxManager) -> Self {
        let pools = PoolManager::new(&manager);
        Self::new(Arc::new(manager), Arc::new(pools))
    }

    pub fn manager(&self) -> &Arc<SandboxManager> {
        &self.manager
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    /// Get a running sandbox of `template` for an agent.
    ///
    /// Tries the template's warm pool first and falls back to creating one
    /// with the template's own isolation level.
    ///
    /// # Errors
    ///
    /// Whatever [`SandboxManager::create_sandbox`] returns on the cold path,
    /// or `CapacityReached` if the manager cannot take a pooled sandbox.
    pub async fn allocate(&self, agent_id: &str, template: &str) -> Result<Allocation> {
        if let Some(sandbox) = self.pools.acquire_sandbox(template, agent_id).await {
            return match self.manager.register(Arc::clone(&sandbox)).await {
                Ok(_) => Ok(Allocation::Warm(sandbox)),
                Err((e, sandbox)) => {
                    let id = sandbox.lock().await.id();
                    self.pools.release_sandbox(template, id).await;
                    Err(e)
                }
            };
        }

        let level = self
            .manager
            .catalog()
            .get_template(template)
            .ok_or_else(|| CoreError::TemplateNotFound(template.to_string()))?
            .isolation_level;
        tracing::debug!(agent_id, template, "No warm sandbox, creating on demand");
        let sandbox = self.manager.create_sandbox(agent_id, template, level).await?;
        Ok(Allocation::Cold(sandbox))
    }

    /// Give a sandbox back.
    ///
    /// The sandbox is unregistered. If its template has a pool it is handed
    /// to the pool, which keeps or terminates it; otherwise it is terminated.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the sandbox is neither registered nor allocated
    /// from a pool.
    pub async fn release(&self, sandbox_id: SandboxId) -> Result<()> {
        let Some(sandbox) = self.manager.unregister(sandbox_id).await else {
            // Already pruned by a sweep, but its pool may still count it.
            let pool = self
                .pools
                .find_allocating(sandbox_id)
                .await
                .ok_or(CoreError::NotFound(sandbox_id))?;
            pool.release(sandbox_id).await;
            return Ok(());
        };
        let template = sandbox.lock().await.template_name().to_string();

        match self.pools.get_pool(&template).await {
            Some(pool) if pool.is_allocated(sandbox_id).await => pool.release(sandbox_id).await,
            Some(pool) => {
                pool.adopt(sandbox).await;
            }
            None => {
                sandbox.lock().await.terminate().await;
            }
        }
        Ok(())
    }

    /// Hibernate idle sandboxes, terminate expired ones and prune the dead.
    ///
    /// Pruned sandboxes that were allocated from a pool are dropped from
    /// that pool too, freeing their slot.
    pub async fn sweep(&self) -> SweepReport {
        let hibernated = self.manager.cleanup_idle_sandboxes().await;
        let terminated = self.manager.cleanup_expired_sandboxes().await;

        let dead = self.manager.drain_terminated().await;
        for (id, sandbox) in &dead {
            let template = sandbox.lock().await.template_name().to_string();
            if let Some(pool) = self.pools.get_pool(&template).await {
                pool.forget(*id).await;
            }
        }

        let report = SweepReport {
            hibernated,
            terminated,
            pruned: dead.len(),
        };
        tracing::debug!(
            hibernated = report.hibernated,
            terminated = report.terminated,
            pruned = report.pruned,
            "Sweep complete"
        );
        report
    }

    /// Stop all pools, then terminate every registered sandbox.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down runtime");
        self.pools.shutdown_all().await;
        self.manager.destroy_all().await;
    }
}
