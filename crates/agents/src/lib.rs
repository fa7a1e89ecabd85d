//! Built-in agents for Halyard.
//!
//! Agents bridge an external protocol into the runtime: they turn incoming
//! traffic into messages with `dispatch` and deliver replies back out.
//!
//! - [`console::Console`]: interactive terminal chat (stdin/stdout)

pub mod console;

use halyard_runtime::Catalog;

pub use console::Console;

/// Register every built-in agent under its descriptor.
pub fn register(catalog: &mut Catalog) -> &mut Catalog {
    catalog.register_agent::<Console>("console:Console")
}
