//! Security module for Halyard: permission grants and audit logging.
//!
//! Provides:
//! - **Auth**: the `(resource, identity, permission)` grant table consulted
//!   by permission guards, with JSON persistence
//! - **Audit logging**: structured record of grants, revocations and denials

pub mod audit;
pub mod auth;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use auth::{ANY_IDENTITY, Auth, AuthError, Grant};
