pub mod check;
pub mod run;

use std::path::Path;

use halyard_config::BotConfig;
use halyard_runtime::Catalog;

/// Every plugin this binary ships with.
pub fn builtin_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    halyard_modules::register(&mut catalog);
    halyard_agents::register(&mut catalog);
    catalog
}

/// Load (and validate) the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<BotConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => BotConfig::load_from(path),
        None => BotConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}
