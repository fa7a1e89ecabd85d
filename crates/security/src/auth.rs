//! Permission grant table.
//!
//! A grant is a triple `(resource-pattern, identity-pattern, permission)`.
//! Resource and permission patterns are regexes anchored at the start of
//! the subject; the identity pattern is either an exact identity or `*`.
//! A lone `*` is a wildcard in every slot.
//!
//! While disabled the table is frozen: grants and revocations are ignored
//! and every check answers with the caller's default.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use regex_lite::Regex;

use halyard_config::compile_pattern;

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};

/// Pattern matching anything, in any slot.
pub const ANY_IDENTITY: &str = "*";

/// One stored grant with its patterns compiled once.
#[derive(Debug, Clone)]
pub struct Grant {
    pub resource: String,
    pub identity: String,
    pub permission: String,
    resource_re: Option<Regex>,
    permission_re: Option<Regex>,
}

impl Grant {
    fn new(resource: &str, identity: &str, permission: &str) -> Self {
        Self {
            resource: resource.to_string(),
            identity: identity.to_string(),
            permission: permission.to_string(),
            resource_re: compile_or_warn(resource),
            permission_re: compile_or_warn(permission),
        }
    }

    fn is(&self, resource: &str, identity: &str, permission: &str) -> bool {
        self.resource == resource && self.identity == identity && self.permission == permission
    }

    fn matches(&self, resource: &str, identity: &str, permission: &str) -> bool {
        pattern_matches(&self.resource_re, &self.resource, resource)
            && (self.identity == identity || self.identity == ANY_IDENTITY)
            && pattern_matches(&self.permission_re, &self.permission, permission)
    }

    fn triple(&self) -> (String, String, String) {
        (
            self.resource.clone(),
            self.identity.clone(),
            self.permission.clone(),
        )
    }
}

// A lone `*` matches anything. A pattern that does not compile only
// matches itself literally.
fn compile_or_warn(pattern: &str) -> Option<Regex> {
    let pattern = if pattern == ANY_IDENTITY { ".*" } else { pattern };
    match compile_pattern(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Grant pattern is not a valid regex, matching literally");
            None
        }
    }
}

fn pattern_matches(re: &Option<Regex>, raw: &str, subject: &str) -> bool {
    match re {
        Some(re) => re.is_match(subject),
        None => raw == subject,
    }
}

#[derive(Debug, Default)]
struct AuthState {
    enabled: bool,
    grants: Vec<Grant>,
    path: Option<PathBuf>,
}

/// The permission grant table consulted by permission guards.
#[derive(Debug, Default)]
pub struct Auth {
    state: RwLock<AuthState>,
    audit: AuditLogger,
}

impl Auth {
    /// A disabled table with no grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// An enabled in-memory table holding the given grants.
    pub fn with_grants<I, S>(grants: I) -> Self
    where
        I: IntoIterator<Item = (S, S, S)>,
        S: AsRef<str>,
    {
        let auth = Self::new();
        {
            let mut state = auth.state.write();
            state.enabled = true;
            for (r, i, p) in grants {
                let (r, i, p) = (r.as_ref(), i.as_ref(), p.as_ref());
                if !state.grants.iter().any(|g| g.is(r, i, p)) {
                    state.grants.push(Grant::new(r, i, p));
                }
            }
        }
        auth
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.write().enabled = enabled;
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Add a grant. Returns whether the table changed.
    pub fn grant(&self, resource: &str, identity: &str, permission: &str) -> bool {
        let mut state = self.state.write();
        if !state.enabled || state.grants.iter().any(|g| g.is(resource, identity, permission)) {
            return false;
        }
        state.grants.push(Grant::new(resource, identity, permission));
        drop(state);

        self.audit.log(
            AuditEvent::PermissionGranted {
                permission: permission.into(),
            },
            identity,
            resource,
            AuditOutcome::Success,
            None,
        );
        true
    }

    /// Remove the exact grant. Returns whether the table changed.
    pub fn revoke(&self, resource: &str, identity: &str, permission: &str) -> bool {
        let mut state = self.state.write();
        if !state.enabled {
            return false;
        }
        let Some(pos) = state
            .grants
            .iter()
            .position(|g| g.is(resource, identity, permission))
        else {
            drop(state);
            tracing::warn!(resource, identity, permission, "Revocation failed: no such grant");
            return false;
        };
        state.grants.remove(pos);
        drop(state);

        self.audit.log(
            AuditEvent::PermissionRevoked {
                permission: permission.into(),
            },
            identity,
            resource,
            AuditOutcome::Success,
            None,
        );
        true
    }

    /// Whether `identity` holds `permission` on `resource`.
    ///
    /// The first matching grant decides; when the table is disabled the
    /// answer is `default` regardless of what is stored.
    pub fn has_permission(
        &self,
        resource: &str,
        identity: &str,
        permission: &str,
        default: bool,
    ) -> bool {
        let state = self.state.read();
        if !state.enabled {
            return default;
        }
        state
            .grants
            .iter()
            .any(|g| g.matches(resource, identity, permission))
    }

    /// Record a refused check in the audit log.
    pub fn record_denial(&self, resource: &str, identity: &str, permission: &str) {
        self.audit.log(
            AuditEvent::PermissionDenied {
                permission: permission.into(),
            },
            identity,
            resource,
            AuditOutcome::Denied,
            None,
        );
    }

    /// Snapshot of the stored grants, in order.
    pub fn grants(&self) -> Vec<(String, String, String)> {
        self.state.read().grants.iter().map(Grant::triple).collect()
    }

    /// Whether grants are backed by a file.
    pub fn is_persistent(&self) -> bool {
        self.state.read().path.is_some()
    }

    /// Load grants from a JSON list of `[resource, identity, permission]`
    /// triples and enable the table.
    ///
    /// A missing file yields an empty, enabled table. A malformed file also
    /// leaves the table enabled and empty, so everything is denied rather
    /// than silently permitted.
    pub fn load_perms(&self, path: &Path) -> Result<usize, AuthError> {
        let mut state = self.state.write();
        state.path = Some(path.to_path_buf());
        state.enabled = true;
        state.grants.clear();

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No permission file at {}, starting empty", path.display());
                return Ok(0);
            }
            Err(e) => {
                return Err(AuthError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let triples: Vec<(String, String, String)> =
            serde_json::from_str(&content).map_err(|e| AuthError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;

        for (r, i, p) in &triples {
            if !state.grants.iter().any(|g| g.is(r, i, p)) {
                state.grants.push(Grant::new(r, i, p));
            }
        }
        let count = state.grants.len();
        drop(state);

        self.audit.log(
            AuditEvent::PermissionsLoaded { count },
            "",
            &path.display().to_string(),
            AuditOutcome::Success,
            None,
        );
        Ok(count)
    }

    /// Write grants back to the file they were loaded from.
    pub fn write_perms(&self) -> Result<(), AuthError> {
        let (path, triples) = {
            let state = self.state.read();
            let path = state.path.clone().ok_or(AuthError::NotPersistent)?;
            let triples: Vec<(String, String, String)> =
                state.grants.iter().map(Grant::triple).collect();
            (path, triples)
        };

        let json = serde_json::to_string_pretty(&triples).map_err(|e| AuthError::Parse {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| AuthError::Io {
            path: path.clone(),
            source: e,
        })?;

        self.audit.log(
            AuditEvent::PermissionsStored {
                count: triples.len(),
            },
            "",
            &path.display().to_string(),
            AuditOutcome::Success,
            None,
        );
        Ok(())
    }
}

/// Errors loading or storing grants.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Permission file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Permission file {path} is not a list of triples: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Permissions were not loaded from a file")]
    NotPersistent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> Auth {
        Auth::with_grants(Vec::<(&str, &str, &str)>::new())
    }

    #[test]
    fn grants_are_triple_scoped() {
        let auth = enabled();
        assert!(auth.grant("chan1", "alice", "ADMIN"));

        assert!(auth.has_permission("chan1", "alice", "ADMIN", false));
        assert!(!auth.has_permission("chan1", "bob", "ADMIN", false));
        assert!(!auth.has_permission("chan1", "alice", "VOICE", false));
        assert!(!auth.has_permission("chan2", "alice", "ADMIN", false));
    }

    #[test]
    fn lone_star_is_a_wildcard_in_every_slot() {
        let auth = enabled();
        auth.grant("*", "root", "*");
        auth.grant("irc/#ops", "*", "VOICE");

        assert!(auth.has_permission("anything/at-all", "root", "ADMIN", false));
        assert!(auth.has_permission("irc/#ops", "mallory", "VOICE", false));
        assert!(!auth.has_permission("irc/#ops", "mallory", "ADMIN", false));
        assert!(!auth.has_permission("console", "mallory", "ADMIN", false));
    }

    #[test]
    fn disabled_table_answers_default() {
        let auth = Auth::with_grants([("chan1", "alice", "ADMIN")]);
        auth.set_enabled(false);

        assert!(auth.has_permission("chan1", "bob", "ADMIN", true));
        assert!(!auth.has_permission("chan1", "alice", "ADMIN", false));
    }

    #[test]
    fn disabled_table_is_frozen() {
        let auth = Auth::new();
        assert!(!auth.grant("chan1", "alice", "ADMIN"));
        assert!(!auth.revoke("chan1", "alice", "ADMIN"));
        assert!(auth.grants().is_empty());
    }

    #[test]
    fn grant_and_revoke_report_changes() {
        let auth = enabled();
        assert!(auth.grant("r", "i", "p"));
        assert!(!auth.grant("r", "i", "p"));
        assert_eq!(auth.grants().len(), 1);

        assert!(auth.revoke("r", "i", "p"));
        assert!(!auth.revoke("r", "i", "p"));
        assert!(!auth.has_permission("r", "i", "p", true));
    }

    #[test]
    fn wildcard_identity_and_regex_patterns() {
        let auth = enabled();
        auth.grant("irc/#.*", "*", "VOICE|KICK");

        assert!(auth.has_permission("irc/#rust", "anyone", "VOICE", false));
        assert!(auth.has_permission("irc/#rust", "", "KICK", false));
        assert!(!auth.has_permission("slack/#rust", "anyone", "VOICE", false));
        assert!(!auth.has_permission("irc/#rust", "anyone", "BAN", false));
    }

    #[test]
    fn identity_is_not_a_regex() {
        let auth = enabled();
        auth.grant(".*", "al.*", "P");
        assert!(!auth.has_permission("x", "alice", "P", false));
        assert!(auth.has_permission("x", "al.*", "P", false));
    }

    #[test]
    fn invalid_pattern_matches_literally() {
        let auth = enabled();
        auth.grant("chan(", "alice", "P");
        assert!(auth.has_permission("chan(", "alice", "P", false));
        assert!(!auth.has_permission("chan", "alice", "P", false));
    }

    #[test]
    fn grants_are_audited() {
        let auth = enabled();
        auth.grant("r", "alice", "P");
        auth.record_denial("r", "bob", "P");

        assert_eq!(auth.audit().count(), 2);
        let denied = auth.audit().entries_by_outcome(&AuditOutcome::Denied);
        assert_eq!(denied[0].identity, "bob");
    }

    #[test]
    fn load_and_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        std::fs::write(&path, r#"[["chan1", "alice", "ADMIN"], ["chan1", "alice", "ADMIN"]]"#)
            .unwrap();

        let auth = Auth::new();
        assert_eq!(auth.load_perms(&path).unwrap(), 1);
        assert!(auth.is_enabled());
        assert!(auth.is_persistent());

        auth.grant(".*", "*", "HELP");
        auth.write_perms().unwrap();

        let reloaded = Auth::new();
        assert_eq!(reloaded.load_perms(&path).unwrap(), 2);
        assert!(reloaded.has_permission("anywhere", "bob", "HELP", false));
    }

    #[test]
    fn missing_file_enables_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Auth::new();
        assert_eq!(auth.load_perms(&dir.path().join("none.json")).unwrap(), 0);
        assert!(auth.is_enabled());
        assert!(!auth.has_permission("r", "i", "p", true));
    }

    #[test]
    fn malformed_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        std::fs::write(&path, r#"[["only", "two"]]"#).unwrap();

        let auth = Auth::new();
        assert!(matches!(auth.load_perms(&path), Err(AuthError::Parse { .. })));
        assert!(auth.is_enabled());
        assert!(!auth.has_permission("only", "two", "x", true));
    }

    #[test]
    fn write_without_file_is_an_error() {
        assert!(matches!(enabled().write_perms(), Err(AuthError::NotPersistent)));
    }
}
