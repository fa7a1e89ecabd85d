//! Configuration loading, validation, and management for Halyard.
//!
//! Loads configuration from `halyard.toml` (or `$HALYARD_CONFIG`) with
//! environment variable overrides. The graph-shaped parts of the config
//! (containers, filters, routing rules) stay as plain data; validation
//! rejects shapes the runtime could not resolve, such as passive containers
//! that contain themselves.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Prefix that marks a chat line as a command
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Whether permission checks consult the grant table
    #[serde(default)]
    pub use_auth: bool,

    /// Where grants are loaded from and written back to
    #[serde(default = "default_auth_path")]
    pub auth_path: PathBuf,

    /// Capacity of every actor's inbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Filter interposition
    #[serde(default)]
    pub filters: FilterConfig,

    /// Routing table and containers
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Agent instances by name
    #[serde(default)]
    pub agent_instances: BTreeMap<String, InstanceConfig>,

    /// Module instances by name
    #[serde(default)]
    pub module_instances: BTreeMap<String, InstanceConfig>,

    /// Filter instances by name
    #[serde(default)]
    pub filter_instances: BTreeMap<String, InstanceConfig>,
}

fn default_command_prefix() -> String {
    "!".into()
}
fn default_auth_path() -> PathBuf {
    PathBuf::from("permissions.json")
}
fn default_mailbox_capacity() -> usize {
    1024
}

/// `inbound[dest]` filters apply whenever anything targets `dest`;
/// `outbound[src]` filters apply whenever `src` sends anywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub inbound: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub outbound: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Ordered rules matched against a message's origin; first match wins
    #[serde(default)]
    pub table: Vec<RouteRule>,

    /// Named groups of destinations
    #[serde(default)]
    pub containers: HashMap<String, ContainerConfig>,
}

/// A single routing rule.
///
/// Accepts either a table `{ pattern = "...", destinations = [...] }` or the
/// compact pair form `["pattern", ["dest", ...]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRouteRule")]
pub struct RouteRule {
    pub pattern: String,
    pub destinations: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRouteRule {
    Table {
        pattern: String,
        destinations: Vec<String>,
    },
    Pair(String, Vec<String>),
}

impl From<RawRouteRule> for RouteRule {
    fn from(raw: RawRouteRule) -> Self {
        match raw {
            RawRouteRule::Table {
                pattern,
                destinations,
            }
            | RawRouteRule::Pair(pattern, destinations) => Self {
                pattern,
                destinations,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Member RIs
    #[serde(default)]
    pub contains: Vec<String>,

    /// Plugin descriptor of an active container; passive when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,
}

impl ContainerConfig {
    /// Active containers are live actors doing their own fan-out.
    pub fn is_active(&self) -> bool {
        self.using.is_some()
    }
}

/// Per-instance configuration: which plugin to build plus its settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Plugin descriptor, `package:Class`
    pub of: String,

    /// Everything else; `out` and `contents` are read by the runtime, the
    /// rest belongs to the plugin
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl InstanceConfig {
    pub fn new(of: impl Into<String>) -> Self {
        Self {
            of: of.into(),
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Fallback destinations for a bare `send`.
    pub fn out(&self) -> Option<Vec<String>> {
        string_list(&self.settings, "out")
    }

    /// Container membership.
    pub fn contents(&self) -> Vec<String> {
        string_list(&self.settings, "contents").unwrap_or_default()
    }
}

/// Read a list of strings out of a settings map.
pub fn string_list(
    settings: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<Vec<String>> {
    settings.get(key)?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

/// Compile a pattern the way routing rules and permission grants use it:
/// anchored at the start of the subject, open at the end.
pub fn compile_pattern(pattern: &str) -> Result<regex_lite::Regex, regex_lite::Error> {
    regex_lite::Regex::new(&format!("^(?:{pattern})"))
}

impl BotConfig {
    /// Load configuration from `$HALYARD_CONFIG` or `./halyard.toml`.
    ///
    /// Environment overrides:
    /// - `HALYARD_COMMAND_PREFIX`
    /// - `HALYARD_USE_AUTH` (`1`/`true` to enable)
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path())?;

        if let Ok(prefix) = std::env::var("HALYARD_COMMAND_PREFIX") {
            config.command_prefix = prefix;
        }

        if let Ok(flag) = std::env::var("HALYARD_USE_AUTH") {
            config.use_auth = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Path used by [`BotConfig::load`].
    pub fn default_path() -> PathBuf {
        std::env::var("HALYARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("halyard.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "mailbox_capacity must be > 0".into(),
            ));
        }

        for rule in &self.routing.table {
            compile_pattern(&rule.pattern).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "routing pattern '{}' does not compile: {e}",
                    rule.pattern
                ))
            })?;
        }

        let descriptors = self
            .agent_instances
            .values()
            .chain(self.module_instances.values())
            .chain(self.filter_instances.values())
            .map(|inst| inst.of.as_str())
            .chain(self.routing.containers.values().filter_map(|c| c.using.as_deref()));
        for of in descriptors {
            if of.matches(':').count() != 1 {
                return Err(ConfigError::ValidationError(format!(
                    "invalid plugin descriptor '{of}', must contain exactly one ':'"
                )));
            }
        }

        if let Some(cycle) = self.routing.find_container_cycle() {
            return Err(ConfigError::ContainerCycle(cycle.join(" -> ")));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl RoutingConfig {
    /// Find a passive container that (transitively) contains itself.
    ///
    /// Returns the offending path, first and last element equal. Active
    /// containers are leaves here: they fan out at delivery time, one hop at
    /// a time, and are never expanded inline.
    pub fn find_container_cycle(&self) -> Option<Vec<String>> {
        let mut done: Vec<&str> = Vec::new();
        let mut names: Vec<&String> = self.containers.keys().collect();
        names.sort();
        for name in names {
            let mut trail = Vec::new();
            if let Some(cycle) = self.visit(name, &mut trail, &mut done) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        trail: &mut Vec<&'a str>,
        done: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        let container = self.containers.get(name).filter(|c| !c.is_active())?;
        if let Some(pos) = trail.iter().position(|n| *n == name) {
            let mut cycle: Vec<String> = trail[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if done.contains(&name) {
            return None;
        }

        trail.push(name);
        for member in &container.contains {
            let member_name = member.split('/').next().unwrap_or(member);
            if let Some(cycle) = self.visit(member_name, trail, done) {
                return Some(cycle);
            }
        }
        trail.pop();
        done.push(name);
        None
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            use_auth: false,
            auth_path: default_auth_path(),
            mailbox_capacity: default_mailbox_capacity(),
            filters: FilterConfig::default(),
            routing: RoutingConfig::default(),
            agent_instances: BTreeMap::new(),
            module_instances: BTreeMap::new(),
            filter_instances: BTreeMap::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Passive container cycle: {0}")]
    ContainerCycle(String),
}
