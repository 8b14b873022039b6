//! # harbor-core
//!
//! Sandbox lifecycle and warm-pool orchestration for Harbor agent sandboxes.
//!
//! This crate creates, tracks and reclaims isolated execution environments
//! for agents, and keeps pools of ready sandboxes per template so agents do
//! not wait for creation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Runtime                           │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  PoolManager    │────▶│  WarmPool per template   │   │
//! │  │  - create_pool  │     │  available | allocated   │   │
//! │  │  - acquire      │     │  + maintenance task      │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │ register                 │ provision         │
//! │           ▼                          ▼                   │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ SandboxManager  │────▶│  HashMap<SandboxId,      │   │
//! │  │ - create        │     │        SharedSandbox>    │   │
//! │  │ - sweeps        │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Sandbox      │────▶│  IsolationBackend        │   │
//! │  │  state machine  │     │  (process/container/vm)  │   │
//! │  │                 │────▶│  BlobStore               │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use harbor_core::{
//!     Backends, FsBlobStore, ManagerConfig, Runtime, SandboxManager, TemplateLibrary,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> harbor_core::Result<()> {
//! let manager = SandboxManager::new(
//!     ManagerConfig::default(),
//!     Arc::new(TemplateLibrary::builtin()),
//!     Arc::new(FsBlobStore::new("/tmp/harbor/sandboxes")),
//!     Backends::default(),
//! );
//! let runtime = Runtime::from_manager(manager);
//!
//! // Keep two basic-agent sandboxes ready
//! runtime.pools().create_pool("basic-agent", 2, 10).await?;
//!
//! // Warm if the pool has one, cold otherwise
//! let allocation = runtime.allocate("agent-1", "basic-agent").await?;
//! let id = allocation.sandbox().lock().await.id();
//!
//! // Periodically: hibernate idle, terminate expired
//! let report = runtime.sweep().await;
//!
//! runtime.release(id).await?;
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Sandbox Lifecycle**: Create, pause, resume, hibernate and terminate
//! - **Persistent State**: Config, state and snapshots in a blob store
//! - **Templates**: Predefined and custom sandbox configurations
//! - **Warm Pooling**: Pre-created sandboxes per template, replenished in the background
//! - **Sweeps**: Idle sandboxes hibernated, expired ones terminated

mod backend;
mod config;
mod error;
mod manager;
mod pool;
mod pools;
mod runtime;
mod sandbox;
mod storage;
mod template;
mod types;

pub use backend::{
    BackendRequest, Backends, ContainerBackend, IsolationBackend, ProcessBackend, VmBackend,
};
pub use config::{SandboxConfig, SandboxConfigBuilder};
pub use error::{CoreError, Result};
pub use manager::{ManagerConfig, SandboxManager};
pub use pool::{PoolConfig, PoolStats, WarmPool};
pub use pools::PoolManager;
pub use runtime::{Allocation, Runtime, SweepReport};
pub use sandbox::{RuntimeState, Sandbox, SandboxId, SandboxInfo, SharedSandbox};
pub use storage::{BlobKind, BlobStore, FsBlobStore, MemoryBlobStore};
pub use template::{Template, TemplateCatalog, TemplateCategory, TemplateLibrary};
pub use types::{
    IsolationLevel, LifecyclePolicy, NetworkConfig, PersistentStorage, ResourceLimits,
    SandboxStatus, SnapshotPolicy,
};
