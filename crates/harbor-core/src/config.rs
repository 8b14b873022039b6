//! Sandbox configuration types.

use crate::error::CoreError;
use crate::template::Template;
use crate::types::{IsolationLevel, LifecyclePolicy, NetworkConfig, ResourceLimits, SnapshotPolicy};
use std::collections::BTreeMap;

/// Configuration for creating a sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    /// Isolation mechanism (default: process).
    pub isolation_level: IsolationLevel,
    /// Resource limits.
    pub resource_limits: ResourceLimits,
    /// Network policy.
    pub network: NetworkConfig,
    /// Environment variables seeded into the runtime state.
    pub environment_vars: BTreeMap<String, String>,
    /// Tools considered installed at creation.
    pub installed_tools: Vec<String>,
    /// Idle/lifetime policy.
    pub lifecycle: LifecyclePolicy,
    /// Snapshot policy.
    pub snapshot: SnapshotPolicy,
}

impl SandboxConfig {
    /// Create a new config builder.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Derive a configuration from a template.
    ///
    /// Applies the template's resource limits, network policy, environment,
    /// tool list, lifecycle and snapshot policy.
    pub fn from_template(template: &Template) -> Self {
        Self {
            isolation_level: template.isolation_level,
            resource_limits: template.resource_limits.clone(),
            network: template.network_config.clone(),
            environment_vars: template.environment_vars.clone(),
            installed_tools: template.pre_installed_tools.clone(),
            lifecycle: LifecyclePolicy {
                idle_timeout_minutes: template.idle_timeout_minutes,
                max_lifetime_hours: template.max_lifetime_hours,
                auto_resume: template.auto_resume,
            },
            snapshot: SnapshotPolicy {
                enabled: template.snapshot_enabled,
                interval_minutes: template.snapshot_interval_minutes,
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        let limits = &self.resource_limits;
        if limits.cpu_cores <= 0.0 {
            return Err(CoreError::InvalidConfig("cpu_cores must be > 0".into()));
        }
        if limits.memory_gb <= 0.0 {
            return Err(CoreError::InvalidConfig("memory_gb must be > 0".into()));
        }
        if limits.storage_gb <= 0.0 {
            return Err(CoreError::InvalidConfig("storage_gb must be > 0".into()));
        }
        if limits.max_processes == 0 {
            return Err(CoreError::InvalidConfig("max_processes must be > 0".into()));
        }
        if matches!(limits.network_bandwidth_mbps, Some(bw) if bw <= 0.0) {
            return Err(CoreError::InvalidConfig(
                "network_bandwidth_mbps must be > 0 when set".into(),
            ));
        }
        if self.lifecycle.idle_timeout_minutes == 0 {
            return Err(CoreError::InvalidConfig(
                "idle_timeout_minutes must be > 0".into(),
            ));
        }
        if self.lifecycle.max_lifetime_hours == 0 {
            return Err(CoreError::InvalidConfig(
                "max_lifetime_hours must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for SandboxConfig.
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Set the isolation level.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.config.isolation_level = level;
        self
    }

    /// Set CPU cores.
    pub fn cpu_cores(mut self, cores: f64) -> Self {
        self.config.resource_limits.cpu_cores = cores;
        self
    }

    /// Set memory in GB.
    pub fn memory_gb(mut self, gb: f64) -> Self {
        self.config.resource_limits.memory_gb = gb;
        self
    }

    /// Replace all resource limits.
    pub fn resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.resource_limits = limits;
        self
    }

    /// Set the network policy.
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.config.network = network;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.environment_vars.insert(key.into(), value.into());
        self
    }

    /// Add an installed tool.
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.config.installed_tools.push(tool.into());
        self
    }

    /// Set the idle timeout in minutes.
    pub fn idle_timeout_minutes(mut self, minutes: u32) -> Self {
        self.config.lifecycle.idle_timeout_minutes = minutes;
        self
    }

    /// Set the maximum lifetime in hours.
    pub fn max_lifetime_hours(mut self, hours: u32) -> Self {
        self.config.lifecycle.max_lifetime_hours = hours;
        self
    }

    /// Enable or disable snapshots on hibernate.
    pub fn snapshots(mut self, enabled: bool) -> Self {
        self.config.snapshot.enabled = enabled;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<SandboxConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateLibrary;
    use crate::TemplateCatalog;

    #[test]
    fn test_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.isolation_level, IsolationLevel::Process);
        assert_eq!(config.resource_limits.memory_gb, 2.0);
        assert_eq!(config.lifecycle.idle_timeout_minutes, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_cpu() {
        let result = SandboxConfig::builder().cpu_cores(0.0).build();
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_zero_bandwidth() {
        let limits = ResourceLimits {
            network_bandwidth_mbps: Some(0.0),
            ..Default::default()
        };
        let result = SandboxConfig::builder().resource_limits(limits).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_idle_timeout() {
        let result = SandboxConfig::builder().idle_timeout_minutes(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_success() {
        let config = SandboxConfig::builder()
            .isolation_level(IsolationLevel::Vm)
            .cpu_cores(2.0)
            .memory_gb(4.0)
            .env("LOG_LEVEL", "debug")
            .tool("python3")
            .snapshots(true)
            .build()
            .expect("should build successfully");

        assert_eq!(config.isolation_level, IsolationLevel::Vm);
        assert_eq!(config.resource_limits.cpu_cores, 2.0);
        assert_eq!(config.environment_vars["LOG_LEVEL"], "debug");
        assert_eq!(config.installed_tools, vec!["python3".to_string()]);
        assert!(config.snapshot.enabled);
    }

    #[test]
    fn test_from_template_applies_everything() {
        let template = TemplateLibrary::builtin()
            .get_template("code-executor")
            .expect("builtin template");
        let config = SandboxConfig::from_template(&template);

        assert_eq!(config.isolation_level, IsolationLevel::Container);
        assert_eq!(config.resource_limits, template.resource_limits);
        assert_eq!(config.network, template.network_config);
        assert_eq!(config.environment_vars, template.environment_vars);
        assert_eq!(config.installed_tools, template.pre_installed_tools);
        assert_eq!(config.lifecycle.idle_timeout_minutes, 15);
        assert_eq!(config.lifecycle.max_lifetime_hours, 12);
        assert!(!config.lifecycle.auto_resume);
        assert!(config.snapshot.enabled);
        assert_eq!(config.snapshot.interval_minutes, 30);
    }
}
