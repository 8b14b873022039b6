//! The daemon: a runtime plus its sweep loop.

use crate::config::DaemonConfig;
use harbor_core::{
    Backends, FsBlobStore, ManagerConfig, PoolConfig, PoolManager, Runtime, SandboxManager,
    SweepReport, TemplateLibrary,
};
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

/// Runtime driven by a [`DaemonConfig`].
pub struct Daemon {
    runtime: Runtime,
    config: DaemonConfig,
}

impl Daemon {
    /// Build the runtime: built-in templates, filesystem blob store and the
    /// default isolation backends.
    pub fn new(config: DaemonConfig) -> Self {
        let manager = SandboxManager::new(
            ManagerConfig::new(config.hostname_domain.clone()).max_sandboxes(config.max_sandboxes),
            Arc::new(TemplateLibrary::builtin()),
            Arc::new(FsBlobStore::new(&config.storage_root)),
            Backends::default(),
        );
        let pools = PoolManager::with_defaults(
            &manager,
            PoolConfig {
                maintenance_interval: config.pool_interval,
                ..Default::default()
            },
        );

        Self {
            runtime: Runtime::new(Arc::new(manager), Arc::new(pools)),
            config,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Create and start every configured pool.
    ///
    /// # Errors
    ///
    /// Fails on the first pool whose template is unknown or whose sizes are
    /// invalid.
    pub async fn start_pools(&self) -> harbor_core::Result<()> {
        for spec in &self.config.pools {
            let pool = self
                .runtime
                .pools()
                .create_pool(&spec.template, spec.min_size, spec.max_size)
                .await?;
            let stats = pool.get_stats().await;
            tracing::info!(
                template = %spec.template,
                available = stats.available,
                min_size = spec.min_size,
                max_size = spec.max_size,
                "Warm pool ready"
            );
        }
        Ok(())
    }

    /// Sweep every `sweep_interval` until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        tokio::pin!(shutdown);

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "Daemon ready"
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Received shutdown signal");
                    break;
                }

                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        let report = self.runtime.sweep().await;
        if report != SweepReport::default() {
            tracing::info!(
                hibernated = report.hibernated,
                terminated = report.terminated,
                pruned = report.pruned,
                "Sweep reclaimed sandboxes"
            );
        }

        for stats in self.runtime.pools().get_all_stats().await {
            tracing::debug!(
                template = %stats.template,
                available = stats.available,
                allocated = stats.allocated,
                hit_rate = format!("{:.1}%", stats.hit_rate()),
                "Pool status"
            );
        }
    }

    /// Stop every pool and terminate every registered sandbox.
    pub async fn shutdown(&self) {
        self.runtime.shutdown().await;
        tracing::info!("Daemon shutdown complete");
    }
}
