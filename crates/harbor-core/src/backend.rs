//! Isolation backends.
//!
//! A sandbox delegates the actual isolation mechanism to an
//! [`IsolationBackend`]. The backend is chosen once, from its isolation level,
//! when the sandbox is constructed and then stored on the sandbox.
//!
//! The built-in backends do not drive real processes, containers or VMs. They
//! check that a request makes sense for their level and record the set-up;
//! real drivers plug in by implementing the trait.

use crate::error::CoreError;
use crate::sandbox::SandboxId;
use crate::types::{IsolationLevel, NetworkConfig, ResourceLimits};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Minimum memory a VM guest can boot with, in GB (128 MiB).
const VM_MIN_MEMORY_GB: f64 = 0.125;

/// What a backend needs to know to set up a sandbox.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Sandbox being initialised.
    pub sandbox_id: SandboxId,
    /// Stable hostname of the sandbox.
    pub hostname: String,
    /// Resource limits to enforce.
    pub resource_limits: ResourceLimits,
    /// Network policy to enforce.
    pub network: NetworkConfig,
}

/// Isolation mechanism behind a sandbox.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Isolation level this backend provides.
    fn level(&self) -> IsolationLevel;

    /// Set up isolation for a new sandbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot host the sandbox; the sandbox
    /// then ends up `Failed`.
    async fn init(&self, request: &BackendRequest) -> Result<(), CoreError>;

    /// Release whatever `init` acquired. Called on terminate.
    async fn release(&self, sandbox_id: SandboxId) -> Result<(), CoreError> {
        tracing::trace!(sandbox_id = %sandbox_id, level = %self.level(), "Nothing to release");
        Ok(())
    }
}

/// Process-level isolation.
#[derive(Debug, Default)]
pub struct ProcessBackend;

#[async_trait]
impl IsolationBackend for ProcessBackend {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::Process
    }

    async fn init(&self, request: &BackendRequest) -> Result<(), CoreError> {
        tracing::debug!(
            sandbox_id = %request.sandbox_id,
            max_processes = request.resource_limits.max_processes,
            "Setting up process isolation"
        );
        Ok(())
    }
}

/// Container-level isolation.
#[derive(Debug, Default)]
pub struct ContainerBackend;

#[async_trait]
impl IsolationBackend for ContainerBackend {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::Container
    }

    async fn init(&self, request: &BackendRequest) -> Result<(), CoreError> {
        if request.network.expose_ports.contains(&0) {
            return Err(CoreError::Backend {
                level: self.level(),
                message: "cannot expose port 0".into(),
            });
        }
        tracing::debug!(
            sandbox_id = %request.sandbox_id,
            hostname = %request.hostname,
            ports = ?request.network.expose_ports,
            "Setting up container isolation"
        );
        Ok(())
    }
}

/// VM-level isolation.
#[derive(Debug, Default)]
pub struct VmBackend;

#[async_trait]
impl IsolationBackend for VmBackend {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::Vm
    }

    async fn init(&self, request: &BackendRequest) -> Result<(), CoreError> {
        let limits = &request.resource_limits;
        if limits.cpu_cores < 1.0 {
            return Err(CoreError::Backend {
                level: self.level(),
                message: format!("VM needs at least one vCPU, got {}", limits.cpu_cores),
            });
        }
        if limits.memory_gb < VM_MIN_MEMORY_GB {
            return Err(CoreError::Backend {
                level: self.level(),
                message: format!("VM needs at least 128 MiB, got {} GB", limits.memory_gb),
            });
        }
        tracing::debug!(
            sandbox_id = %request.sandbox_id,
            vcpus = limits.cpu_cores.floor() as u32,
            memory_gb = limits.memory_gb,
            "Setting up VM isolation"
        );
        Ok(())
    }
}

/// One backend per isolation level.
#[derive(Clone)]
pub struct Backends {
    process: Arc<dyn IsolationBackend>,
    container: Arc<dyn IsolationBackend>,
    vm: Arc<dyn IsolationBackend>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            process: Arc::new(ProcessBackend),
            container: Arc::new(ContainerBackend),
            vm: Arc::new(VmBackend),
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

impl Backends {
    /// Replace the backend for the level it reports.
    pub fn with_backend(mut self, backend: Arc<dyn IsolationBackend>) -> Self {
        match backend.level() {
            IsolationLevel::Process => self.process = backend,
            IsolationLevel::Container => self.container = backend,
            IsolationLevel::Vm => self.vm = backend,
        }
        self
    }

    /// Backend for an isolation level.
    pub fn for_level(&self, level: IsolationLevel) -> Arc<dyn IsolationBackend> {
        match level {
            IsolationLevel::Process => Arc::clone(&self.process),
            IsolationLevel::Container => Arc::clone(&self.container),
            IsolationLevel::Vm => Arc::clone(&self.vm),
        }
    }
}
