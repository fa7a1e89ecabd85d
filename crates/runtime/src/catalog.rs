//! Plugin catalog: descriptors (`package:Class`) to constructors.
//!
//! Discovery is static: a host registers the plugin types it ships with and
//! the runtime instantiates them by descriptor from configuration.

use std::collections::HashMap;

use futures::future::BoxFuture;

use halyard_config::InstanceConfig;
use halyard_core::{Error, Result, VersionRequirement};

use crate::actor::{Actor, Capability, Filter};
use crate::runtime::Runtime;

/// A plugin type that can be built from instance settings.
pub trait Plugin: Sized + Send + 'static {
    /// Oldest core version this plugin works with (inclusive).
    const MINIMUM_CORE: Option<&'static str> = None;
    /// First core version this plugin no longer works with (exclusive).
    const MAXIMUM_CORE: Option<&'static str> = None;

    fn from_config(settings: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self>;

    fn requirement() -> VersionRequirement {
        VersionRequirement::new(Self::MINIMUM_CORE, Self::MAXIMUM_CORE)
    }
}

type Build = for<'a> fn(&'a Runtime, String, InstanceConfig) -> BoxFuture<'a, Result<()>>;

pub(crate) struct CatalogEntry {
    pub capability: Capability,
    pub requirement: VersionRequirement,
    pub build: Build,
}

/// Registered plugin types by descriptor.
#[derive(Default)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("descriptors", &self.descriptors())
            .finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module<P: Plugin + Actor>(&mut self, descriptor: &str) -> &mut Self {
        self.insert(descriptor, Capability::Module, P::requirement(), build_module::<P>)
    }

    pub fn register_agent<P: Plugin + Actor>(&mut self, descriptor: &str) -> &mut Self {
        self.insert(descriptor, Capability::Agent, P::requirement(), build_agent::<P>)
    }

    pub fn register_filter<P: Plugin + Filter>(&mut self, descriptor: &str) -> &mut Self {
        self.insert(descriptor, Capability::Filter, P::requirement(), build_filter::<P>)
    }

    fn insert(
        &mut self,
        descriptor: &str,
        capability: Capability,
        requirement: VersionRequirement,
        build: Build,
    ) -> &mut Self {
        self.entries.insert(
            descriptor.to_string(),
            CatalogEntry {
                capability,
                requirement,
                build,
            },
        );
        self
    }

    /// Sorted registered descriptors.
    pub fn descriptors(&self) -> Vec<&str> {
        let mut descriptors: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        descriptors.sort();
        descriptors
    }

    pub fn capability(&self, descriptor: &str) -> Option<Capability> {
        self.entries.get(descriptor).map(|e| e.capability)
    }

    pub fn requirement(&self, descriptor: &str) -> Option<&VersionRequirement> {
        self.entries.get(descriptor).map(|e| &e.requirement)
    }

    pub(crate) fn resolve(&self, descriptor: &str) -> Result<&CatalogEntry> {
        if descriptor.matches(':').count() != 1 {
            return Err(Error::InvalidDescriptor(descriptor.to_string()));
        }
        self.entries
            .get(descriptor)
            .ok_or_else(|| Error::UnknownPlugin(descriptor.to_string()))
    }
}

fn construct<P: Plugin>(name: &str, inst: &InstanceConfig) -> Result<P> {
    P::from_config(&inst.settings).map_err(|e| Error::Lifecycle {
        actor: name.to_string(),
        reason: format!("cannot construct '{}': {e:#}", inst.of),
    })
}

fn build_module<P: Plugin + Actor>(
    runtime: &Runtime,
    name: String,
    inst: InstanceConfig,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let plugin = construct::<P>(&name, &inst)?;
        runtime.add_module_with(name, plugin, inst.settings).await
    })
}

fn build_agent<P: Plugin + Actor>(
    runtime: &Runtime,
    name: String,
    inst: InstanceConfig,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let plugin = construct::<P>(&name, &inst)?;
        runtime.add_agent_with(name, plugin, inst.settings).await
    })
}

fn build_filter<P: Plugin + Filter>(
    runtime: &Runtime,
    name: String,
    inst: InstanceConfig,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let plugin = construct::<P>(&name, &inst)?;
        runtime.add_filter_with(name, plugin, inst.settings).await
    })
}
