//! Sandbox type - one isolated execution context and its lifecycle.

use crate::backend::{BackendRequest, Backends, IsolationBackend};
use crate::config::SandboxConfig;
use crate::error::CoreError;
use crate::storage::{BlobKind, BlobStore};
use crate::types::{
    IsolationLevel, LifecyclePolicy, NetworkConfig, PersistentStorage, ResourceLimits,
    SandboxStatus,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A sandbox shared between its owner and the registries tracking it.
///
/// The mutex serialises lifecycle operations on one sandbox; two callers
/// never transition the same sandbox concurrently.
pub type SharedSandbox = Arc<Mutex<Sandbox>>;

/// Unique identifier for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(Uuid);

impl SandboxId {
    /// Create a new random sandbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SandboxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// State carried across pause/hibernate and resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    /// Environment variables.
    pub environment_vars: BTreeMap<String, String>,
    /// Installed tools.
    pub installed_tools: Vec<String>,
    /// Opaque session context of the bound agent.
    pub session_context: Option<serde_json::Value>,
}

/// Point-in-time view of a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub sandbox_id: SandboxId,
    pub agent_id: Option<String>,
    pub status: SandboxStatus,
    pub hostname: String,
    pub isolation_level: IsolationLevel,
    pub template_name: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub resource_limits: ResourceLimits,
    pub storage_path: String,
    pub is_idle: bool,
    pub is_expired: bool,
}

/// On-disk form of the state blob.
#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    status: SandboxStatus,
    last_active: DateTime<Utc>,
    session_context: Option<serde_json::Value>,
    #[serde(default)]
    environment_vars: BTreeMap<String, String>,
    #[serde(default)]
    installed_tools: Vec<String>,
}

/// On-disk form of the config blob.
#[derive(Debug, Serialize)]
struct ConfigRecord<'a> {
    sandbox_id: SandboxId,
    agent_id: Option<&'a str>,
    template_name: &'a str,
    isolation_level: IsolationLevel,
    hostname: &'a str,
    created_at: DateTime<Utc>,
    resource_limits: &'a ResourceLimits,
    network_config: &'a NetworkConfig,
    lifecycle: &'a LifecyclePolicy,
}

/// One isolated execution context for an agent.
///
/// A sandbox starts out `Creating` and is brought up with [`create`].
/// Lifecycle operations return `false` instead of failing when the sandbox is
/// not in an eligible state or when storage/backend work fails; the reason
/// for the last failure is available from [`last_error`].
///
/// [`create`]: Sandbox::create
/// [`last_error`]: Sandbox::last_error
pub struct Sandbox {
    id: SandboxId,
    agent_id: Option<String>,
    template_name: String,
    isolation_level: IsolationLevel,
    hostname: String,
    status: SandboxStatus,
    resource_limits: ResourceLimits,
    network: NetworkConfig,
    storage: PersistentStorage,
    lifecycle: LifecyclePolicy,
    runtime: RuntimeState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    last_error: Option<String>,
    backend: Arc<dyn IsolationBackend>,
    store: Arc<dyn BlobStore>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("agent_id", &self.agent_id)
            .field("template_name", &self.template_name)
            .field("isolation_level", &self.isolation_level)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Construct a sandbox in the `Creating` state.
    ///
    /// The isolation backend is picked from `backends` by the configured
    /// isolation level and kept for the sandbox's whole life. Nothing is
    /// written and no backend is called until [`create`](Self::create).
    pub fn new(
        agent_id: Option<String>,
        template_name: impl Into<String>,
        config: SandboxConfig,
        hostname_domain: &str,
        backends: &Backends,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        let id = SandboxId::new();
        let hostname = format!("{}.{}", id.as_uuid().simple(), hostname_domain);
        let now = Utc::now();

        let mut network = config.network;
        network.stable_hostname = Some(hostname.clone());

        Self {
            id,
            agent_id,
            template_name: template_name.into(),
            isolation_level: config.isolation_level,
            hostname,
            status: SandboxStatus::Creating,
            resource_limits: config.resource_limits,
            network,
            storage: PersistentStorage {
                path: store.location(id),
                snapshot: config.snapshot,
            },
            lifecycle: config.lifecycle,
            runtime: RuntimeState {
                environment_vars: config.environment_vars,
                installed_tools: config.installed_tools,
                session_context: None,
            },
            created_at: now,
            updated_at: now,
            last_active: now,
            last_error: None,
            backend: backends.for_level(config.isolation_level),
            store,
        }
    }

    /// Bring the sandbox up.
    ///
    /// This will:
    /// 1. Allocate the storage namespace
    /// 2. Persist the initial configuration
    /// 3. Initialise the isolation backend
    ///
    /// Returns `true` with status `Running`, or `false` with status `Failed`.
    /// Only valid from `Creating`; any other state returns `false` untouched.
    pub async fn create(&mut self) -> bool {
        if self.status != SandboxStatus::Creating {
            tracing::warn!(sandbox_id = %self.id, status = %self.status, "create() on a sandbox that is not creating");
            return false;
        }

        let start = std::time::Instant::now();
        tracing::info!(
            sandbox_id = %self.id,
            template = %self.template_name,
            isolation = %self.isolation_level,
            hostname = %self.hostname,
            "Creating sandbox"
        );

        match self.provision().await {
            Ok(()) => {
                self.status = SandboxStatus::Running;
                self.update_activity();
                tracing::info!(
                    sandbox_id = %self.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Sandbox ready"
                );
                true
            }
            Err(e) => {
                tracing::error!(sandbox_id = %self.id, error = %e, "Sandbox creation failed");
                self.status = SandboxStatus::Failed;
                self.updated_at = self.now();
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    async fn provision(&self) -> Result<(), CoreError> {
        tracing::debug!(sandbox_id = %self.id, path = %self.storage.path.display(), "Preparing storage");
        self.store.prepare(self.id).await?;
        self.store
            .write(self.id, BlobKind::Config, self.config_blob()?)
            .await?;

        tracing::debug!(sandbox_id = %self.id, level = %self.isolation_level, "Initialising backend");
        self.backend.init(&self.backend_request()).await
    }

    /// Pause the sandbox. Only valid from `Running`.
    pub async fn pause(&mut self) -> bool {
        if self.status != SandboxStatus::Running {
            tracing::debug!(sandbox_id = %self.id, status = %self.status, "Pause ignored");
            return false;
        }

        if let Err(e) = self.save_state(SandboxStatus::Paused).await {
            self.record_failure("pause", e);
            return false;
        }

        self.status = SandboxStatus::Paused;
        self.updated_at = self.now();
        tracing::info!(sandbox_id = %self.id, "Sandbox paused");
        true
    }

    /// Resume a paused or hibernated sandbox.
    ///
    /// Restores environment, tools and session context from the state blob
    /// when one exists. If the blob cannot be read the sandbox keeps its
    /// previous status and `false` is returned.
    pub async fn resume(&mut self) -> bool {
        let previous = self.status;
        if !matches!(previous, SandboxStatus::Paused | SandboxStatus::Hibernated) {
            tracing::debug!(sandbox_id = %self.id, status = %self.status, "Resume ignored");
            return false;
        }

        tracing::info!(sandbox_id = %self.id, from = %previous, "Resuming sandbox");
        self.status = SandboxStatus::Resuming;

        if let Err(e) = self.restore_state().await {
            self.status = previous;
            self.record_failure("resume", e);
            return false;
        }

        self.status = SandboxStatus::Running;
        self.update_activity();
        true
    }

    /// Hibernate the sandbox: persist full state, snapshot it if the policy
    /// says so, and release compute.
    ///
    /// Valid from `Creating`, `Running`, `Paused` and `Resuming`. A snapshot
    /// that fails to write is logged; the hibernation itself still happens.
    pub async fn hibernate(&mut self) -> bool {
        if !matches!(
            self.status,
            SandboxStatus::Creating
                | SandboxStatus::Running
                | SandboxStatus::Paused
                | SandboxStatus::Resuming
        ) {
            tracing::debug!(sandbox_id = %self.id, status = %self.status, "Hibernate ignored");
            return false;
        }

        let state = match self.state_blob(SandboxStatus::Hibernated) {
            Ok(state) => state,
            Err(e) => {
                self.record_failure("hibernate", e);
                return false;
            }
        };
        if let Err(e) = self
            .store
            .write(self.id, BlobKind::State, state.clone())
            .await
        {
            self.record_failure("hibernate", e);
            return false;
        }

        if self.storage.snapshot.enabled {
            match self.write_snapshot(state).await {
                Ok(name) => tracing::info!(sandbox_id = %self.id, snapshot = %name, "Created snapshot"),
                Err(e) => tracing::warn!(sandbox_id = %self.id, error = %e, "Snapshot failed"),
            }
        }

        self.status = SandboxStatus::Hibernated;
        self.updated_at = self.now();
        tracing::info!(sandbox_id = %self.id, "Sandbox hibernated");
        true
    }

    /// Terminate the sandbox.
    ///
    /// Persists the final state and releases backend resources. Failures in
    /// either step are logged and do not stop the termination. Calling this
    /// on a `Terminated` or `Failed` sandbox is a no-op that returns `false`.
    pub async fn terminate(&mut self) -> bool {
        if self.status.is_terminal() {
            tracing::debug!(sandbox_id = %self.id, status = %self.status, "Terminate ignored");
            return false;
        }

        tracing::info!(sandbox_id = %self.id, "Terminating sandbox");
        self.status = SandboxStatus::Terminating;

        if let Err(e) = self.save_state(SandboxStatus::Terminated).await {
            tracing::warn!(sandbox_id = %self.id, error = %e, "Failed to persist final state");
        }
        if let Err(e) = self.backend.release(self.id).await {
            tracing::warn!(sandbox_id = %self.id, error = %e, "Backend release failed");
        }

        self.status = SandboxStatus::Terminated;
        self.updated_at = self.now();
        tracing::info!(sandbox_id = %self.id, "Sandbox terminated");
        true
    }

    /// Whether the sandbox has been inactive longer than its idle timeout.
    pub fn check_idle(&self) -> bool {
        self.check_idle_at(Utc::now())
    }

    /// [`check_idle`](Self::check_idle) against a given clock reading.
    pub fn check_idle_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_active > Duration::minutes(i64::from(self.lifecycle.idle_timeout_minutes))
    }

    /// Whether the sandbox has outlived its maximum lifetime.
    pub fn check_expired(&self) -> bool {
        self.check_expired_at(Utc::now())
    }

    /// [`check_expired`](Self::check_expired) against a given clock reading.
    pub fn check_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::hours(i64::from(self.lifecycle.max_lifetime_hours))
    }

    /// Record activity.
    pub fn update_activity(&mut self) {
        let now = self.now();
        self.last_active = now;
        self.updated_at = now;
    }

    /// Bind the sandbox to an agent.
    pub fn bind_agent(&mut self, agent_id: impl Into<String>) {
        self.agent_id = Some(agent_id.into());
        self.update_activity();
    }

    /// Unbind the agent and drop its session, ready for reuse from a pool.
    pub fn reset_for_pool(&mut self) {
        self.agent_id = None;
        self.runtime.session_context = None;
        self.update_activity();
    }

    /// Replace the session context.
    pub fn set_session_context(&mut self, context: Option<serde_json::Value>) {
        self.runtime.session_context = context;
        self.update_activity();
    }

    /// Names of the snapshots written for this sandbox.
    pub async fn snapshots(&self) -> Result<Vec<String>, CoreError> {
        self.store.list_snapshots(self.id).await
    }

    /// Snapshot of the sandbox's identity, status and activity.
    pub fn get_info(&self) -> SandboxInfo {
        let now = Utc::now();
        SandboxInfo {
            sandbox_id: self.id,
            agent_id: self.agent_id.clone(),
            status: self.status,
            hostname: self.hostname.clone(),
            isolation_level: self.isolation_level,
            template_name: self.template_name.clone(),
            created_at: self.created_at,
            last_active: self.last_active,
            resource_limits: self.resource_limits.clone(),
            storage_path: self.storage.path.display().to_string(),
            is_idle: self.check_idle_at(now),
            is_expired: self.check_expired_at(now),
        }
    }

    /// Get the sandbox ID.
    pub fn id(&self) -> SandboxId {
        self.id
    }

    /// Get the bound agent, if any.
    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Get the current status.
    pub fn status(&self) -> SandboxStatus {
        self.status
    }

    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.resource_limits
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn storage(&self) -> &PersistentStorage {
        &self.storage
    }

    pub fn lifecycle(&self) -> &LifecyclePolicy {
        &self.lifecycle
    }

    /// Environment, tools and session context.
    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    /// Mutable access to the runtime state. Does not count as activity.
    pub fn runtime_mut(&mut self) -> &mut RuntimeState {
        &mut self.runtime
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    /// Why the last failed operation failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // Never earlier than creation, so activity timestamps stay ordered even
    // if the wall clock steps back.
    fn now(&self) -> DateTime<Utc> {
        Utc::now().max(self.created_at)
    }

    fn record_failure(&mut self, op: &str, error: CoreError) {
        tracing::warn!(sandbox_id = %self.id, op, error = %error, "Sandbox operation failed");
        self.last_error = Some(error.to_string());
    }

    fn backend_request(&self) -> BackendRequest {
        BackendRequest {
            sandbox_id: self.id,
            hostname: self.hostname.clone(),
            resource_limits: self.resource_limits.clone(),
            network: self.network.clone(),
        }
    }

    fn config_blob(&self) -> Result<Bytes, CoreError> {
        let record = ConfigRecord {
            sandbox_id: self.id,
            agent_id: self.agent_id.as_deref(),
            template_name: &self.template_name,
            isolation_level: self.isolation_level,
            hostname: &self.hostname,
            created_at: self.created_at,
            resource_limits: &self.resource_limits,
            network_config: &self.network,
            lifecycle: &self.lifecycle,
        };
        Ok(Bytes::from(serde_json::to_vec_pretty(&record)?))
    }

    fn state_blob(&self, status: SandboxStatus) -> Result<Bytes, CoreError> {
        let record = StateRecord {
            status,
            last_active: self.last_active,
            session_context: self.runtime.session_context.clone(),
            environment_vars: self.runtime.environment_vars.clone(),
            installed_tools: self.runtime.installed_tools.clone(),
        };
        Ok(Bytes::from(serde_json::to_vec_pretty(&record)?))
    }

    async fn save_state(&self, status: SandboxStatus) -> Result<(), CoreError> {
        let blob = self.state_blob(status)?;
        self.store.write(self.id, BlobKind::State, blob).await
    }

    async fn restore_state(&mut self) -> Result<(), CoreError> {
        let Some(blob) = self.store.read(self.id, BlobKind::State).await? else {
            tracing::debug!(sandbox_id = %self.id, "No saved state, keeping in-memory state");
            return Ok(());
        };
        let record: StateRecord = serde_json::from_slice(&blob)?;
        self.runtime = RuntimeState {
            environment_vars: record.environment_vars,
            installed_tools: record.installed_tools,
            session_context: record.session_context,
        };
        tracing::debug!(sandbox_id = %self.id, "State restored");
        Ok(())
    }

    async fn write_snapshot(&self, state: Bytes) -> Result<String, CoreError> {
        let base = format!("snapshot_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let existing = self.store.list_snapshots(self.id).await?;
        let mut name = base.clone();
        let mut n = 1;
        while existing.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        self.store
            .write(self.id, BlobKind::Snapshot(name.clone()), state)
            .await?;
        Ok(name)
    }

    /// Move the clock readings back, as if the sandbox had been created
    /// `created_ago` and last used `active_ago`.
    #[cfg(test)]
    pub(crate) fn backdate(&mut self, created_ago: Duration, active_ago: Duration) {
        let now = Utc::now();
        self.created_at = now - created_ago;
        self.last_active = now - active_ago;
        self.updated_at = self.last_active.max(self.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct Refusing;

    #[async_trait]
    impl IsolationBackend for Refusing {
        fn level(&self) -> IsolationLevel {
            IsolationLevel::Process
        }

        async fn init(&self, _request: &BackendRequest) -> Result<(), CoreError> {
            Err(CoreError::Backend {
                level: IsolationLevel::Process,
                message: "backend unavailable".into(),
            })
        }
    }

    fn sandbox_with(store: Arc<MemoryBlobStore>, config: SandboxConfig) -> Sandbox {
        Sandbox::new(
            Some("agent-1".into()),
            "default",
            config,
            "sandbox.local",
            &Backends::default(),
            store,
        )
    }

    fn sandbox() -> Sandbox {
        sandbox_with(Arc::new(MemoryBlobStore::new()), SandboxConfig::default())
    }

    async fn running() -> Sandbox {
        let mut sb = sandbox();
        assert!(sb.create().await);
        sb
    }

    #[test]
    fn test_sandbox_id_display() {
        let id = SandboxId::new();
        let s = format!("{}", id);
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn test_sandbox_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id: SandboxId = uuid.into();
        assert_eq!(format!("{}", id), format!("{}", uuid));
    }

    #[test]
    fn test_new_sandbox_identity() {
        let sb = sandbox();
        assert_eq!(sb.status(), SandboxStatus::Creating);
        assert_eq!(
            sb.hostname(),
            format!("{}.sandbox.local", sb.id().as_uuid().simple())
        );
        assert_eq!(sb.network().stable_hostname.as_deref(), Some(sb.hostname()));
        assert!(sb.created_at() <= sb.updated_at());
        assert!(sb.last_active() >= sb.created_at());
    }

    #[tokio::test]
    async fn test_create_runs() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut sb = sandbox_with(store.clone(), SandboxConfig::default());
        assert!(sb.create().await);
        assert_eq!(sb.status(), SandboxStatus::Running);
        assert!(store.read(sb.id(), BlobKind::Config).await.unwrap().is_some());
        assert!(sb.last_error().is_none());
    }

    #[tokio::test]
    async fn test_create_twice_is_rejected() {
        let mut sb = running().await;
        assert!(!sb.create().await);
        assert_eq!(sb.status(), SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_create_fails_on_storage_error() {
        let store = Arc::new(MemoryBlobStore::new());
        store.set_fail_writes(true);
        let mut sb = sandbox_with(store, SandboxConfig::default());
        assert!(!sb.create().await);
        assert_eq!(sb.status(), SandboxStatus::Failed);
        assert!(sb.last_error().is_some());
    }

    #[tokio::test]
    async fn test_create_fails_on_backend_error() {
        let backends = Backends::default().with_backend(Arc::new(Refusing));
        let mut sb = Sandbox::new(
            None,
            "default",
            SandboxConfig::default(),
            "sandbox.local",
            &backends,
            Arc::new(MemoryBlobStore::new()),
        );
        assert!(!sb.create().await);
        assert_eq!(sb.status(), SandboxStatus::Failed);
        assert!(sb.last_error().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_pause_only_from_running() {
        let mut sb = sandbox();
        assert!(!sb.pause().await);
        assert_eq!(sb.status(), SandboxStatus::Creating);

        assert!(sb.create().await);
        assert!(sb.pause().await);
        assert_eq!(sb.status(), SandboxStatus::Paused);

        assert!(!sb.pause().await);
        assert_eq!(sb.status(), SandboxStatus::Paused);

        assert!(sb.hibernate().await);
        assert!(!sb.pause().await);
        assert_eq!(sb.status(), SandboxStatus::Hibernated);

        sb.terminate().await;
        assert!(!sb.pause().await);
        assert_eq!(sb.status(), SandboxStatus::Terminated);
    }

    #[tokio::test]
    async fn test_pause_keeps_status_when_storage_fails() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut sb = sandbox_with(store.clone(), SandboxConfig::default());
        assert!(sb.create().await);
        store.set_fail_writes(true);
        assert!(!sb.pause().await);
        assert_eq!(sb.status(), SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_resume_only_from_paused_or_hibernated() {
        let mut sb = sandbox();
        assert!(!sb.resume().await);

        assert!(sb.create().await);
        assert!(!sb.resume().await);
        assert_eq!(sb.status(), SandboxStatus::Running);

        assert!(sb.pause().await);
        let before = Utc::now();
        assert!(sb.resume().await);
        assert_eq!(sb.status(), SandboxStatus::Running);
        assert!(sb.last_active() >= before);

        assert!(sb.hibernate().await);
        let before = Utc::now();
        assert!(sb.resume().await);
        assert_eq!(sb.status(), SandboxStatus::Running);
        assert!(sb.last_active() >= before);

        sb.terminate().await;
        assert!(!sb.resume().await);
        assert_eq!(sb.status(), SandboxStatus::Terminated);
    }

    #[tokio::test]
    async fn test_resume_with_corrupt_state_keeps_previous_status() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut sb = sandbox_with(store.clone(), SandboxConfig::default());
        assert!(sb.create().await);
        assert!(sb.pause().await);

        store
            .write(sb.id(), BlobKind::State, Bytes::from_static(b"not json"))
            .await
            .unwrap();
        assert!(!sb.resume().await);
        assert_eq!(sb.status(), SandboxStatus::Paused);
        assert!(sb.last_error().is_some());
    }

    #[tokio::test]
    async fn test_hibernate_resume_round_trip() {
        let mut sb = running().await;
        sb.runtime_mut()
            .environment_vars
            .insert("TASK".into(), "crawl".into());
        sb.runtime_mut().installed_tools.push("ripgrep".into());
        sb.set_session_context(Some(json!({"step": 3})));
        let before = sb.runtime().clone();

        assert!(sb.hibernate().await);
        // Changes made while asleep are not part of the persisted state.
        sb.runtime_mut().installed_tools.clear();
        sb.runtime_mut().session_context = None;

        assert!(sb.resume().await);
        assert_eq!(sb.runtime(), &before);
    }

    #[tokio::test]
    async fn test_hibernate_rejected_when_hibernated_or_terminal() {
        let mut sb = running().await;
        assert!(sb.hibernate().await);
        assert!(!sb.hibernate().await);
        sb.terminate().await;
        assert!(!sb.hibernate().await);
        assert_eq!(sb.status(), SandboxStatus::Terminated);
    }

    #[tokio::test]
    async fn test_hibernate_writes_snapshot_when_enabled() {
        let config = SandboxConfig::builder().snapshots(true).build().unwrap();
        let mut sb = sandbox_with(Arc::new(MemoryBlobStore::new()), config);
        assert!(sb.create().await);
        assert!(sb.hibernate().await);
        assert!(sb.resume().await);
        assert!(sb.hibernate().await);

        let snapshots = sb.snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().all(|s| s.starts_with("snapshot_")));
    }

    #[tokio::test]
    async fn test_hibernate_without_snapshot_policy() {
        let mut sb = running().await;
        assert!(sb.hibernate().await);
        assert!(sb.snapshots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut sb = running().await;
        assert!(sb.terminate().await);
        assert_eq!(sb.status(), SandboxStatus::Terminated);
        assert!(!sb.terminate().await);
        assert_eq!(sb.status(), SandboxStatus::Terminated);
    }

    #[tokio::test]
    async fn test_terminate_survives_storage_failure() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut sb = sandbox_with(store.clone(), SandboxConfig::default());
        assert!(sb.create().await);
        store.set_fail_writes(true);
        assert!(sb.terminate().await);
        assert_eq!(sb.status(), SandboxStatus::Terminated);
    }

    #[tokio::test]
    async fn test_terminate_failed_sandbox_is_noop() {
        let store = Arc::new(MemoryBlobStore::new());
        store.set_fail_writes(true);
        let mut sb = sandbox_with(store, SandboxConfig::default());
        assert!(!sb.create().await);
        assert!(!sb.terminate().await);
        assert_eq!(sb.status(), SandboxStatus::Failed);
    }

    #[test]
    fn test_check_idle_boundary() {
        let config = SandboxConfig::builder().idle_timeout_minutes(30).build().unwrap();
        let sb = sandbox_with(Arc::new(MemoryBlobStore::new()), config);
        let last = sb.last_active();

        assert!(!sb.check_idle_at(last + Duration::minutes(30) - Duration::seconds(1)));
        assert!(!sb.check_idle_at(last + Duration::minutes(30)));
        assert!(sb.check_idle_at(last + Duration::minutes(30) + Duration::seconds(1)));
    }

    #[test]
    fn test_check_expired_boundary() {
        let config = SandboxConfig::builder().max_lifetime_hours(2).build().unwrap();
        let sb = sandbox_with(Arc::new(MemoryBlobStore::new()), config);
        let created = sb.created_at();

        assert!(!sb.check_expired_at(created + Duration::hours(2)));
        assert!(sb.check_expired_at(created + Duration::hours(2) + Duration::seconds(1)));
    }

    #[test]
    fn test_backdate_makes_idle_and_expired() {
        let mut sb = sandbox();
        assert!(!sb.check_idle());
        assert!(!sb.check_expired());
        sb.backdate(Duration::hours(25), Duration::minutes(31));
        assert!(sb.check_idle());
        assert!(sb.check_expired());
    }

    #[tokio::test]
    async fn test_bind_and_reset() {
        let mut sb = running().await;
        sb.set_session_context(Some(json!({"k": "v"})));
        sb.bind_agent("agent-2");
        assert_eq!(sb.agent_id(), Some("agent-2"));

        sb.reset_for_pool();
        assert!(sb.agent_id().is_none());
        assert!(sb.runtime().session_context.is_none());
        assert_eq!(sb.status(), SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_get_info() {
        let sb = running().await;
        let info = sb.get_info();
        assert_eq!(info.sandbox_id, sb.id());
        assert_eq!(info.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(info.status, SandboxStatus::Running);
        assert_eq!(info.isolation_level, IsolationLevel::Process);
        assert_eq!(info.storage_path, format!("memory/{}", sb.id()));
        assert!(!info.is_idle);
        assert!(!info.is_expired);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "running");
    }
}
