//! Core version and plugin compatibility bounds.
//!
//! Plugins may declare the oldest core they work with and, optionally, the
//! first core version they no longer support. The check runs before a plugin
//! is instantiated so an incompatible plugin is rejected with a diagnostic
//! instead of failing unpredictably later.

use std::cmp::Ordering;
use std::fmt;

use crate::error::Error;

/// Version of the running core.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A dotted numeric version such as `0.2` or `1.4.0`.
///
/// Missing components compare as zero, so `0.2 == 0.2.0`.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u64>,
}

impl Version {
    pub fn parse(text: &str) -> Option<Self> {
        let parts = text
            .trim()
            .split('.')
            .map(|p| p.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(Self { parts })
    }

    /// The running core version.
    pub fn current() -> Self {
        Self::parse(CORE_VERSION).unwrap_or(Self { parts: vec![0] })
    }

    fn component(&self, idx: usize) -> u64 {
        self.parts.get(idx).copied().unwrap_or(0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        write!(f, "{}", text.join("."))
    }
}

/// Core versions a plugin declares itself compatible with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRequirement {
    /// Oldest supported core version (inclusive)
    pub minimum: Option<String>,
    /// First unsupported core version (exclusive)
    pub maximum: Option<String>,
}

impl VersionRequirement {
    pub fn new(minimum: Option<&str>, maximum: Option<&str>) -> Self {
        Self {
            minimum: minimum.map(str::to_string),
            maximum: maximum.map(str::to_string),
        }
    }

    /// Check the requirement against a running core version.
    ///
    /// A plugin without a minimum is loaded anyway, with a warning.
    pub fn check(&self, plugin: &str, running: &Version) -> Result<(), Error> {
        let Some(minimum) = self.minimum.as_deref() else {
            tracing::warn!(
                plugin,
                "Plugin does not define a minimum core version, trying to load anyway"
            );
            return Ok(());
        };

        let reject = |bound: &'static str, required: &str| Error::VersionIncompatibility {
            plugin: plugin.to_string(),
            bound,
            required: required.to_string(),
            running: running.to_string(),
        };

        let min = Version::parse(minimum).ok_or_else(|| reject("minimum", minimum))?;
        if *running < min {
            return Err(reject("minimum", minimum));
        }

        if let Some(maximum) = self.maximum.as_deref() {
            let max = Version::parse(maximum).ok_or_else(|| reject("maximum", maximum))?;
            if *running >= max {
                return Err(reject("maximum", maximum));
            }
        }

        Ok(())
    }
}
