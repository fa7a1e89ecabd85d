//! Built-in modules for Halyard.
//!
//! Modules are the internal half of a bot: they receive messages routed to
//! them by the runtime and reply, relay or act on the runtime itself.
//!
//! - [`hello::Hello`]: greets `!hello`
//! - [`help::Help`]: merges the help topics of every other module
//! - [`permissions::PermissionManager`]: `!grant` / `!revoke`
//! - [`admin::Admin`]: `!shutdown` / `!restart`
//! - [`container::Container`]: active module and agent containers
//!
//! [`command::CommandSet`] is the command-table helper they are built on and
//! is available to third-party modules too.

pub mod admin;
pub mod command;
pub mod container;
pub mod hello;
pub mod help;
pub mod permissions;

use halyard_runtime::Catalog;

pub use command::{CommandOutcome, CommandSet, Parsed};

/// Register every built-in module under its descriptor.
pub fn register(catalog: &mut Catalog) -> &mut Catalog {
    catalog
        .register_module::<hello::Hello>("hello:Hello")
        .register_module::<help::Help>("help:Help")
        .register_module::<permissions::PermissionManager>("core:PermissionManager")
        .register_module::<admin::Admin>("core:Admin")
        .register_module::<container::Container>("container:ModuleContainer")
        .register_agent::<container::Container>("container:AgentContainer")
}
