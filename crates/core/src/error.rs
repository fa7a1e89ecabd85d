//! Error types for the Halyard runtime.
//!
//! Uses `thiserror` for ergonomic error definitions. Delivery failures have
//! their own enum because `send_to` reports them per destination instead of
//! failing the whole fan-out.

use thiserror::Error;

/// The top-level error type for all Halyard operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A message lacks an addressing field required by the operation.
    /// Always a caller bug.
    #[error("Malformed message {uuid}: missing {field}")]
    MalformedMessage { uuid: String, field: &'static str },

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// A handler returned an error or panicked. Logged and reported as an
    /// event; the actor keeps running.
    #[error("Handler failure in '{actor}': {reason}")]
    HandlerFailure { actor: String, reason: String },

    /// An actor tried to wait synchronously on its own domain.
    #[error("Synchronous send from '{actor}' to itself would deadlock")]
    SyncSelfDeadlock { actor: String },

    #[error(
        "Rejecting load of '{plugin}': requires {bound} core version '{required}' (running '{running}')"
    )]
    VersionIncompatibility {
        plugin: String,
        bound: &'static str,
        required: String,
        running: String,
    },

    #[error("An actor named '{0}' is already registered")]
    DuplicateActor(String),

    #[error("No plugin registered for descriptor '{0}'")]
    UnknownPlugin(String),

    #[error("Invalid plugin descriptor '{0}', must contain exactly one ':'")]
    InvalidDescriptor(String),

    #[error("Lifecycle error for '{actor}': {reason}")]
    Lifecycle { actor: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single delivery did not reach its destination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Unknown module/agent: {0}")]
    UnknownDestination(String),

    #[error("Mailbox of '{0}' is full")]
    MailboxFull(String),

    #[error("Actor '{0}' is no longer running")]
    ActorStopped(String),
}

impl DeliveryError {
    /// Name of the actor the delivery was aimed at.
    pub fn destination(&self) -> &str {
        match self {
            Self::UnknownDestination(name)
            | Self::MailboxFull(name)
            | Self::ActorStopped(name) => name,
        }
    }
}
