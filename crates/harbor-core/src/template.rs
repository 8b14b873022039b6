//! Template catalog.
//!
//! Templates are named, immutable configuration bundles. The pool and the
//! manager only ever look them up through [`TemplateCatalog`], so callers can
//! plug in their own catalog; [`TemplateLibrary`] is the built-in one.

use crate::types::{IsolationLevel, NetworkConfig, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// Template categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    /// General purpose
    Basic,
    /// Untrusted code execution
    CodeExecutor,
    /// Data analysis
    DataAnalyst,
    /// Browser automation
    WebNavigator,
    /// User supplied
    Custom,
}

/// Template for creating agent sandboxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub category: TemplateCategory,
    pub description: String,
    pub isolation_level: IsolationLevel,
    pub resource_limits: ResourceLimits,
    pub network_config: NetworkConfig,
    pub environment_vars: BTreeMap<String, String>,
    pub pre_installed_tools: Vec<String>,
    pub idle_timeout_minutes: u32,
    pub max_lifetime_hours: u32,
    pub auto_resume: bool,
    pub snapshot_enabled: bool,
    pub snapshot_interval_minutes: u32,
}

impl Template {
    /// A custom template with default limits and lifecycle policy.
    pub fn custom(name: impl Into<String>, isolation_level: IsolationLevel) -> Self {
        Self {
            name: name.into(),
            category: TemplateCategory::Custom,
            description: String::new(),
            isolation_level,
            resource_limits: ResourceLimits::default(),
            network_config: NetworkConfig::default(),
            environment_vars: BTreeMap::new(),
            pre_installed_tools: Vec::new(),
            idle_timeout_minutes: 30,
            max_lifetime_hours: 24,
            auto_resume: true,
            snapshot_enabled: false,
            snapshot_interval_minutes: 60,
        }
    }
}

/// Source of templates keyed by name.
pub trait TemplateCatalog: Send + Sync {
    /// Look up a template by name.
    fn get_template(&self, name: &str) -> Option<Template>;

    /// All templates, sorted by name.
    fn list_templates(&self) -> Vec<Template>;

    /// Add a template, replacing any existing one with the same name.
    ///
    /// Sandboxes and pools created afterwards see the new definition;
    /// existing sandboxes keep the configuration they were built with.
    fn register_template(&self, template: Template);
}

/// Built-in templates plus custom ones, registered at construction or later.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    templates: RwLock<HashMap<String, Template>>,
}

impl TemplateLibrary {
    /// An empty library.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The predefined templates: `default`, `basic-agent`, `code-executor`,
    /// `data-analyst` and `web-navigator`.
    pub fn builtin() -> Self {
        [
            default_template(),
            basic_agent(),
            code_executor(),
            data_analyst(),
            web_navigator(),
        ]
        .into_iter()
        .fold(Self::empty(), Self::with_template)
    }

    /// Register a template, replacing any existing one with the same name.
    pub fn with_template(mut self, template: Template) -> Self {
        self.templates
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(template.name.clone(), template);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Template>> {
        self.templates.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TemplateCatalog for TemplateLibrary {
    fn get_template(&self, name: &str) -> Option<Template> {
        self.read().get(name).cloned()
    }

    fn list_templates(&self) -> Vec<Template> {
        let mut templates: Vec<Template> = self.read().values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        templates
    }

    fn register_template(&self, template: Template) {
        tracing::info!(template = %template.name, "Registering template");
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(template.name.clone(), template);
    }
}

fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_template() -> Template {
    Template {
        description: "Default sandbox with stock limits".into(),
        category: TemplateCategory::Basic,
        ..Template::custom("default", IsolationLevel::Process)
    }
}

fn basic_agent() -> Template {
    Template {
        name: "basic-agent".into(),
        category: TemplateCategory::Basic,
        description: "Basic agent environment for general purpose tasks".into(),
        isolation_level: IsolationLevel::Process,
        resource_limits: ResourceLimits {
            cpu_cores: 1.0,
            memory_gb: 2.0,
            storage_gb: 5.0,
            max_processes: 50,
            network_bandwidth_mbps: None,
        },
        network_config: NetworkConfig {
            isolated: false,
            allowed_egress: strings(&["*"]),
            ..Default::default()
        },
        environment_vars: env(&[("AGENT_TYPE", "basic"), ("LOG_LEVEL", "INFO")]),
        pre_installed_tools: strings(&["python3", "pip"]),
        idle_timeout_minutes: 30,
        max_lifetime_hours: 24,
        auto_resume: true,
        snapshot_enabled: false,
        snapshot_interval_minutes: 60,
    }
}

fn code_executor() -> Template {
    Template {
        name: "code-executor".into(),
        category: TemplateCategory::CodeExecutor,
        description: "Secure sandbox for executing untrusted code".into(),
        isolation_level: IsolationLevel::Container,
        resource_limits: ResourceLimits {
            cpu_cores: 2.0,
            memory_gb: 4.0,
            storage_gb: 10.0,
            max_processes: 100,
            network_bandwidth_mbps: Some(100.0),
        },
        network_config: NetworkConfig {
            isolated: true,
            allowed_egress: strings(&["*.pypi.org", "*.npmjs.org", "github.com"]),
            ..Default::default()
        },
        environment_vars: env(&[
            ("AGENT_TYPE", "code_executor"),
            ("PYTHON_VERSION", "3.11"),
            ("NODE_VERSION", "20"),
        ]),
        pre_installed_tools: strings(&["python3", "pip", "node", "npm", "git"]),
        // Resource-heavy workloads get reclaimed sooner.
        idle_timeout_minutes: 15,
        max_lifetime_hours: 12,
        auto_resume: false,
        snapshot_enabled: true,
        snapshot_interval_minutes: 30,
    }
}

fn data_analyst() -> Template {
    Template {
        name: "data-analyst".into(),
        category: TemplateCategory::DataAnalyst,
        description: "Environment for data analysis and visualization".into(),
        isolation_level: IsolationLevel::Process,
        resource_limits: ResourceLimits {
            cpu_cores: 4.0,
            memory_gb: 8.0,
            storage_gb: 50.0,
            max_processes: 200,
            network_bandwidth_mbps: None,
        },
        network_config: NetworkConfig {
            isolated: false,
            allowed_egress: strings(&["*"]),
            ..Default::default()
        },
        environment_vars: env(&[("AGENT_TYPE", "data_analyst"), ("JUPYTER_ENABLE", "true")]),
        pre_installed_tools: strings(&[
            "python3",
            "pip",
            "jupyter",
            "pandas",
            "numpy",
            "matplotlib",
            "seaborn",
        ]),
        idle_timeout_minutes: 60,
        max_lifetime_hours: 24,
        auto_resume: true,
        snapshot_enabled: true,
        snapshot_interval_minutes: 60,
    }
}

fn web_navigator() -> Template {
    Template {
        name: "web-navigator".into(),
        category: TemplateCategory::WebNavigator,
        description: "Sandbox with browser automation capabilities".into(),
        isolation_level: IsolationLevel::Container,
        resource_limits: ResourceLimits {
            cpu_cores: 2.0,
            memory_gb: 4.0,
            storage_gb: 20.0,
            max_processes: 150,
            network_bandwidth_mbps: None,
        },
        network_config: NetworkConfig {
            isolated: true,
            allowed_egress: strings(&["*"]),
            expose_ports: vec![4444],
            ..Default::default()
        },
        environment_vars: env(&[("AGENT_TYPE", "web_navigator"), ("DISPLAY", ":99")]),
        pre_installed_tools: strings(&[
            "python3",
            "pip",
            "playwright",
            "selenium",
            "chromium",
            "firefox",
        ]),
        idle_timeout_minutes: 20,
        max_lifetime_hours: 8,
        auto_resume: true,
        snapshot_enabled: false,
        snapshot_interval_minutes: 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_builtin_names() {
        let library = TemplateLibrary::builtin();
        let names: Vec<String> = library.list_templates().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "basic-agent",
                "code-executor",
                "data-analyst",
                "default",
                "web-navigator"
            ]
        );
    }

    #[test]
    fn test_unknown_template() {
        assert!(TemplateLibrary::builtin().get_template("nope").is_none());
    }

    #[test]
    fn test_custom_template_shadows_builtin() {
        let custom = Template {
            idle_timeout_minutes: 5,
            ..Template::custom("basic-agent", IsolationLevel::Vm)
        };
        let library = TemplateLibrary::builtin().with_template(custom);
        let found = library.get_template("basic-agent").unwrap();
        assert_eq!(found.isolation_level, IsolationLevel::Vm);
        assert_eq!(found.idle_timeout_minutes, 5);
        assert_eq!(found.category, TemplateCategory::Custom);
    }

    #[test]
    fn test_register_through_shared_catalog() {
        let catalog: Arc<dyn TemplateCatalog> = Arc::new(TemplateLibrary::builtin());
        assert!(catalog.get_template("gpu-job").is_none());

        catalog.register_template(Template::custom("gpu-job", IsolationLevel::Vm));
        let found = catalog.get_template("gpu-job").unwrap();
        assert_eq!(found.isolation_level, IsolationLevel::Vm);
        assert_eq!(catalog.list_templates().len(), 6);
    }

    #[test]
    fn test_web_navigator_exposes_selenium() {
        let t = TemplateLibrary::builtin().get_template("web-navigator").unwrap();
        assert_eq!(t.network_config.expose_ports, vec![4444]);
        assert_eq!(t.max_lifetime_hours, 8);
    }
}
