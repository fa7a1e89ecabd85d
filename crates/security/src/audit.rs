//! Audit logging: structured record of permission decisions.
//!
//! Every grant, revocation and denial is recorded so an operator can see
//! who asked for what, and from where.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How many entries an in-memory logger keeps before dropping the oldest.
const DEFAULT_RETAINED: usize = 1024;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Identity the decision was about
    pub identity: String,
    /// Resource RI the decision was about
    pub resource: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable permission events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    PermissionGranted { permission: String },
    PermissionRevoked { permission: String },
    PermissionDenied { permission: String },
    PermissionsLoaded { count: usize },
    PermissionsStored { count: usize },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger that keeps recent entries in memory and forwards each one
/// to its sinks.
pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    retained: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retained: DEFAULT_RETAINED,
            sinks,
        }
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        identity: &str,
        resource: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            identity: identity.into(),
            resource: resource.into(),
            outcome,
            details,
        };

        for sink in &self.sinks {
            sink.record(&entry);
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.retained {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Get all retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Get entries with the given outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            identity = %entry.identity,
            resource = %entry.resource,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}
