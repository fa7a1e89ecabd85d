//! The addressed message envelope.
//!
//! Agent receives text → builds a `Message` → runtime routes it → modules
//! handle it and may `reply`, which copies the message with a new body.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ri;

/// Type tag of an ordinary message.
pub const DEFAULT_KIND: &str = "simple";

/// Type tag answered by the built-in help handler.
pub const HELP_KIND: &str = "help";

/// A single addressed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID, assigned at construction and kept by replies
    pub uuid: Uuid,

    /// Arbitrary payload, usually a string or a list
    #[serde(default)]
    pub body: serde_json::Value,

    /// Tag selecting a specialized handler on the receiver
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,

    /// Free-form sender label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Authenticated identity of the sender, when the agent can provide one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// RI of the original sender; set once by the first relaying actor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// RI of the current hop; rewritten at every send
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Open extension bag
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub misc: serde_json::Map<String, serde_json::Value>,

    /// Whether the sender is waiting synchronously for replies
    #[serde(default)]
    pub sync: bool,
}

fn default_kind() -> String {
    DEFAULT_KIND.into()
}

impl Message {
    /// Create a new message of type `simple`.
    pub fn new(body: impl Into<serde_json::Value>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            body: body.into(),
            kind: default_kind(),
            author: None,
            identity: None,
            origin: None,
            target: None,
            misc: serde_json::Map::new(),
            sync: false,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_misc(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.misc.insert(key.into(), value.into());
        self
    }

    /// Copy of this message carrying a different body. Everything else,
    /// including the uuid, is preserved.
    pub fn with_body(&self, body: impl Into<serde_json::Value>) -> Self {
        Self {
            body: body.into(),
            ..self.clone()
        }
    }

    /// Copy of this message under a fresh uuid, for an actor that passes it
    /// on and waits for the answers itself.
    pub fn relayed(&self) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// The body as text, if it is a string.
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_str()
    }

    /// Origin RI, treating an empty string as unset.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref().filter(|o| !o.is_empty())
    }

    /// Target RI, treating an empty string as unset.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().filter(|t| !t.is_empty())
    }

    /// Sub-address of the current hop: the target after its first `/`.
    pub fn whom(&self) -> &str {
        self.target().map(|t| ri::split(t).1).unwrap_or("")
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message(uuid={}, type={}, body={}, author={:?}, identity={:?}, origin={:?}, target={:?}, sync={})",
            self.uuid,
            self.kind,
            self.body,
            self.author,
            self.identity,
            self.origin,
            self.target,
            self.sync
        )
    }
}
