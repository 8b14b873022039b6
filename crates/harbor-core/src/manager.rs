//! Sandbox manager for lifecycle management of multiple sandboxes.

use crate::backend::Backends;
use crate::config::SandboxConfig;
use crate::error::{CoreError, Result};
use crate::sandbox::{Sandbox, SandboxId, SandboxInfo, SharedSandbox};
use crate::storage::BlobStore;
use crate::template::TemplateCatalog;
use crate::types::{IsolationLevel, SandboxStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Configuration for SandboxManager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Domain appended to sandbox hostnames (default: `sandbox.local`).
    pub hostname_domain: String,
    /// Maximum number of concurrent sandboxes (default: 100, 0 = unlimited).
    pub max_sandboxes: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hostname_domain: "sandbox.local".into(),
            max_sandboxes: 100,
        }
    }
}

impl ManagerConfig {
    /// Create a new manager configuration.
    pub fn new(hostname_domain: impl Into<String>) -> Self {
        Self {
            hostname_domain: hostname_domain.into(),
            ..Default::default()
        }
    }

    /// Set the sandbox limit (0 = unlimited).
    pub fn max_sandboxes(mut self, max: usize) -> Self {
        self.max_sandboxes = max;
        self
    }
}

/// Builds and brings up sandboxes from templates.
///
/// Shared by the manager and every warm pool so both create sandboxes the
/// same way.
#[derive(Clone)]
pub(crate) struct Provisioner {
    catalog: Arc<dyn TemplateCatalog>,
    store: Arc<dyn BlobStore>,
    backends: Backends,
    hostname_domain: String,
}

impl Provisioner {
    pub(crate) fn catalog(&self) -> &dyn TemplateCatalog {
        self.catalog.as_ref()
    }

    /// Construct a `Creating` sandbox from a template.
    ///
    /// `isolation_level` overrides the template's level when set.
    pub(crate) fn build(
        &self,
        agent_id: Option<String>,
        template_name: &str,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<Sandbox> {
        let template = self
            .catalog
            .get_template(template_name)
            .ok_or_else(|| CoreError::TemplateNotFound(template_name.to_string()))?;

        let mut config = SandboxConfig::from_template(&template);
        if let Some(level) = isolation_level {
            config.isolation_level = level;
        }
        config.validate()?;

        Ok(Sandbox::new(
            agent_id,
            template_name,
            config,
            &self.hostname_domain,
            &self.backends,
            Arc::clone(&self.store),
        ))
    }

    /// Build a sandbox and run `create()` on it.
    pub(crate) async fn provision(
        &self,
        agent_id: Option<String>,
        template_name: &str,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<Sandbox> {
        let mut sandbox = self.build(agent_id, template_name, isolation_level)?;
        if !sandbox.create().await {
            return Err(CoreError::CreationFailed {
                template: template_name.to_string(),
                reason: sandbox
                    .last_error()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(sandbox)
    }
}

/// Manages multiple sandbox instances.
///
/// The SandboxManager provides a high-level API for creating, looking up,
/// sweeping and destroying sandboxes. It maintains a registry of live
/// sandboxes keyed by ID.
///
/// # Thread Safety
///
/// The registry is behind an async RwLock and each sandbox behind its own
/// mutex. Registry locks are never held while a sandbox operation runs, so a
/// slow sandbox does not stall lookups of the others.
pub struct SandboxManager {
    sandboxes: Arc<RwLock<HashMap<SandboxId, SharedSandbox>>>,
    provisioner: Provisioner,
    config: ManagerConfig,
}

impl SandboxManager {
    /// Create a new sandbox manager.
    pub fn new(
        config: ManagerConfig,
        catalog: Arc<dyn TemplateCatalog>,
        store: Arc<dyn BlobStore>,
        backends: Backends,
    ) -> Self {
        tracing::info!(
            hostname_domain = %config.hostname_domain,
            max_sandboxes = config.max_sandboxes,
            "Creating sandbox manager"
        );
        Self {
            sandboxes: Arc::new(RwLock::new(HashMap::new())),
            provisioner: Provisioner {
                catalog,
                store,
                backends,
                hostname_domain: config.hostname_domain.clone(),
            },
            config,
        }
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Template catalog sandboxes are created from.
    pub fn catalog(&self) -> &dyn TemplateCatalog {
        self.provisioner.catalog()
    }

    pub(crate) fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    fn at_capacity(&self, current: usize) -> bool {
        self.config.max_sandboxes > 0 && current >= self.config.max_sandboxes
    }

    /// Create, bring up and register a sandbox for an agent.
    ///
    /// The sandbox is configured from `template_name`, with `isolation_level`
    /// taking precedence over the template's own level.
    ///
    /// # Errors
    ///
    /// - `TemplateNotFound` if the catalog has no such template
    /// - `CapacityReached` if the max_sandboxes limit is reached
    /// - `CreationFailed` if the sandbox did not come up; nothing is
    ///   registered in that case
    pub async fn create_sandbox(
        &self,
        agent_id: &str,
        template_name: &str,
        isolation_level: IsolationLevel,
    ) -> Result<SharedSandbox> {
        if self.at_capacity(self.sandboxes.read().await.len()) {
            return Err(CoreError::CapacityReached(self.config.max_sandboxes));
        }

        let mut sandbox = self
            .provisioner
            .provision(Some(agent_id.to_string()), template_name, Some(isolation_level))
            .await?;
        let id = sandbox.id();

        let mut sandboxes = self.sandboxes.write().await;
        // Re-check: other creations may have filled the registry meanwhile.
        if self.at_capacity(sandboxes.len()) {
            drop(sandboxes);
            sandbox.terminate().await;
            return Err(CoreError::CapacityReached(self.config.max_sandboxes));
        }
        let shared = Arc::new(Mutex::new(sandbox));
        sandboxes.insert(id, Arc::clone(&shared));

        tracing::info!(sandbox_id = %id, agent_id, template = template_name, "Sandbox registered");
        Ok(shared)
    }

    /// Register an externally-created sandbox.
    ///
    /// This is used to register sandboxes acquired from a warm pool.
    ///
    /// # Returns
    ///
    /// On success: The ID of the registered sandbox.
    /// On failure: A tuple of (error, sandbox) so caller can clean up.
    pub async fn register(
        &self,
        sandbox: SharedSandbox,
    ) -> std::result::Result<SandboxId, (CoreError, SharedSandbox)> {
        let id = sandbox.lock().await.id();

        let mut sandboxes = self.sandboxes.write().await;
        if self.at_capacity(sandboxes.len()) {
            return Err((CoreError::CapacityReached(self.config.max_sandboxes), sandbox));
        }
        sandboxes.insert(id, sandbox);

        tracing::info!(sandbox_id = %id, "Registered external sandbox");
        Ok(id)
    }

    /// Stop tracking a sandbox without touching it.
    pub async fn unregister(&self, id: SandboxId) -> Option<SharedSandbox> {
        let removed = self.sandboxes.write().await.remove(&id);
        if removed.is_some() {
            tracing::debug!(sandbox_id = %id, "Sandbox unregistered");
        }
        removed
    }

    /// Look up a sandbox by ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the sandbox is not registered.
    pub async fn get_sandbox(&self, id: SandboxId) -> Result<SharedSandbox> {
        self.sandboxes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound(id))
    }

    /// Check if a sandbox exists.
    pub async fn exists(&self, id: SandboxId) -> bool {
        self.sandboxes.read().await.contains_key(&id)
    }

    /// Info for every registered sandbox, optionally filtered by status.
    ///
    /// Sorted by creation time. Waits for sandboxes that are mid-operation.
    pub async fn list_sandboxes(&self, status: Option<SandboxStatus>) -> Vec<SandboxInfo> {
        let mut infos = Vec::new();
        for sandbox in self.snapshot().await {
            let info = sandbox.lock().await.get_info();
            if status.map_or(true, |s| s == info.status) {
                infos.push(info);
            }
        }
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// Hibernate every running sandbox that has been idle past its timeout.
    ///
    /// Sandboxes locked by a caller are in use and skipped until the next
    /// sweep. Returns the number of sandboxes hibernated.
    pub async fn cleanup_idle_sandboxes(&self) -> usize {
        let mut hibernated = 0;
        for sandbox in self.snapshot().await {
            let Ok(mut sandbox) = sandbox.try_lock() else {
                tracing::trace!("Skipping busy sandbox in idle sweep");
                continue;
            };
            if sandbox.status() == SandboxStatus::Running && sandbox.check_idle() {
                tracing::info!(sandbox_id = %sandbox.id(), "Hibernating idle sandbox");
                if sandbox.hibernate().await {
                    hibernated += 1;
                }
            }
        }
        if hibernated > 0 {
            tracing::info!(count = hibernated, "Idle sweep complete");
        }
        hibernated
    }

    /// Terminate every sandbox that has outlived its maximum lifetime.
    ///
    /// Terminated sandboxes stay registered until [`prune_terminated`].
    /// Returns the number of sandboxes actually terminated.
    ///
    /// [`prune_terminated`]: Self::prune_terminated
    pub async fn cleanup_expired_sandboxes(&self) -> usize {
        let mut terminated = 0;
        for sandbox in self.snapshot().await {
            let Ok(mut sandbox) = sandbox.try_lock() else {
                tracing::trace!("Skipping busy sandbox in expiry sweep");
                continue;
            };
            if !sandbox.status().is_terminal() && sandbox.check_expired() {
                tracing::info!(sandbox_id = %sandbox.id(), "Terminating expired sandbox");
                if sandbox.terminate().await {
                    terminated += 1;
                }
            }
        }
        if terminated > 0 {
            tracing::info!(count = terminated, "Expiry sweep complete");
        }
        terminated
    }

    /// Drop `Terminated` and `Failed` sandboxes from the registry.
    pub async fn prune_terminated(&self) -> usize {
        self.drain_terminated().await.len()
    }

    /// Unregister `Terminated` and `Failed` sandboxes and hand them back.
    pub(crate) async fn drain_terminated(&self) -> Vec<(SandboxId, SharedSandbox)> {
        let mut dead = Vec::new();
        for (id, sandbox) in self.sandboxes.read().await.iter() {
            if let Ok(sandbox) = sandbox.try_lock() {
                if sandbox.status().is_terminal() {
                    dead.push(*id);
                }
            }
        }

        let mut sandboxes = self.sandboxes.write().await;
        let drained: Vec<(SandboxId, SharedSandbox)> = dead
            .into_iter()
            .filter_map(|id| sandboxes.remove(&id).map(|sandbox| (id, sandbox)))
            .collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Pruned terminated sandboxes");
        }
        drained
    }

    /// Terminate and unregister a sandbox.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the sandbox does not exist.
    pub async fn remove(&self, id: SandboxId) -> Result<()> {
        let sandbox = self.unregister(id).await.ok_or(CoreError::NotFound(id))?;
        sandbox.lock().await.terminate().await;
        tracing::info!(sandbox_id = %id, "Sandbox removed");
        Ok(())
    }

    /// Terminate all sandboxes.
    ///
    /// This is typically called during shutdown.
    pub async fn destroy_all(&self) {
        let sandboxes: Vec<SharedSandbox> = {
            let mut registry = self.sandboxes.write().await;
            std::mem::take(&mut *registry).into_values().collect()
        };

        let count = sandboxes.len();
        tracing::info!(count, "Destroying all sandboxes");
        for sandbox in sandboxes {
            sandbox.lock().await.terminate().await;
        }
        tracing::info!(count, "All sandboxes destroyed");
    }

    /// List all sandbox IDs.
    pub async fn list(&self) -> Vec<SandboxId> {
        self.sandboxes.read().await.keys().copied().collect()
    }

    /// Get the number of registered sandboxes.
    pub async fn count(&self) -> usize {
        self.sandboxes.read().await.len()
    }

    async fn snapshot(&self) -> Vec<SharedSandbox> {
        self.sandboxes.read().await.values().cloned().collect()
    }
}
