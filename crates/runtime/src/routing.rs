//! Destination resolution: routing rules, passive containers and filter
//! paths.
//!
//! All of this is plain data built from configuration. Resolution never
//! touches an actor; it only turns logical names into concrete RIs.

use std::collections::HashMap;

use regex_lite::Regex;

use halyard_config::{FilterConfig, RoutingConfig, compile_pattern};
use halyard_core::ri;

use crate::actor::Capability;
use crate::registry::Registry;

/// Reserved container name meaning "every registered module".
pub const DEFAULT_CONTAINER: &str = "default";

#[derive(Debug, Default)]
pub(crate) struct Topology {
    inbound: HashMap<String, Vec<String>>,
    outbound: HashMap<String, Vec<String>>,
    table: Vec<(Regex, Vec<String>)>,
    /// Passive containers only; active ones are registered actors
    containers: HashMap<String, Vec<String>>,
}

impl Topology {
    pub fn new(filters: &FilterConfig, routing: &RoutingConfig) -> Self {
        let mut topology = Self::default();
        topology.set_filters(filters);
        topology.set_routing(routing);
        topology
    }

    pub fn set_filters(&mut self, filters: &FilterConfig) {
        self.inbound = filters.inbound.clone();
        self.outbound = filters.outbound.clone();
    }

    pub fn set_routing(&mut self, routing: &RoutingConfig) {
        self.table = routing
            .table
            .iter()
            .filter_map(|rule| match compile_pattern(&rule.pattern) {
                Ok(re) => Some((re, rule.destinations.clone())),
                Err(e) => {
                    tracing::warn!(pattern = %rule.pattern, error = %e, "Skipping routing rule");
                    None
                }
            })
            .collect();

        self.containers = routing
            .containers
            .iter()
            .filter(|(_, c)| !c.is_active())
            .map(|(name, c)| (name.clone(), c.contains.clone()))
            .collect();
    }

    /// Destinations of the first rule whose pattern matches `origin`.
    pub fn route(&self, origin: &str) -> Option<Vec<String>> {
        self.table
            .iter()
            .find(|(re, _)| re.is_match(origin))
            .map(|(_, dests)| dests.clone())
    }

    /// Filter RIs a message from `sender` to `dest` must transit, in order:
    /// the sender's outbound filters, then the destination's inbound ones.
    pub fn filter_path(&self, sender: &str, dest: &str) -> Vec<String> {
        let outbound = self.outbound.get(sender).into_iter().flatten();
        let inbound = self.inbound.get(ri::name(dest)).into_iter().flatten();
        outbound.chain(inbound).cloned().collect()
    }

    /// Expand a destination into concrete RIs.
    ///
    /// A registered actor always wins. Passive containers are inlined
    /// recursively with the sub-address carried onto every member; a
    /// container reached again along the same branch is logged and skipped.
    /// Anything else is returned as-is and reported at delivery.
    pub fn expand(&self, dest: &str, registry: &Registry) -> Vec<String> {
        let mut out = Vec::new();
        let mut trail = Vec::new();
        self.expand_into(dest, registry, &mut trail, &mut out);
        out
    }

    fn expand_into(
        &self,
        dest: &str,
        registry: &Registry,
        trail: &mut Vec<String>,
        out: &mut Vec<String>,
    ) {
        let (name, whom) = ri::split(dest);

        if registry.contains(name) {
            out.push(dest.to_string());
            return;
        }

        if let Some(members) = self.containers.get(name) {
            if trail.iter().any(|seen| seen == name) {
                tracing::warn!(container = name, trail = ?trail, "Container cycle, skipping branch");
                return;
            }
            trail.push(name.to_string());
            for member in members {
                self.expand_into(&ri::join(member, whom), registry, trail, out);
            }
            trail.pop();
            return;
        }

        if name == DEFAULT_CONTAINER {
            out.extend(
                registry
                    .names(Some(Capability::Module))
                    .iter()
                    .map(|module| ri::join(module, whom)),
            );
            return;
        }

        out.push(dest.to_string());
    }
}
