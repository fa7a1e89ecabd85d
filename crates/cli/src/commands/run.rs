//! `halyard run`: start the bot and block until it is told to stop.

use std::path::PathBuf;

use tracing::info;

use halyard_runtime::Runtime;

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let catalog = super::builtin_catalog();

    println!("⛵ Halyard — starting");
    println!("   Command prefix: {}", config.command_prefix);
    println!(
        "   Auth: {}",
        if config.use_auth {
            format!("enabled ({})", config.auth_path.display())
        } else {
            "disabled".to_string()
        }
    );

    let runtime = Runtime::from_config(&config);
    let loaded = runtime.instantiate(&config, &catalog).await;
    let configured = config.agent_instances.len()
        + config.module_instances.len()
        + config.filter_instances.len()
        + config
            .routing
            .containers
            .values()
            .filter(|c| c.is_active())
            .count();

    info!(
        loaded,
        configured,
        agents = ?runtime.agents(),
        modules = ?runtime.modules(),
        filters = ?runtime.filters(),
        "Runtime ready"
    );
    if loaded < configured {
        tracing::warn!("{} instance(s) failed to load, see errors above", configured - loaded);
    }
    if runtime.agents().is_empty() {
        tracing::warn!("No agents running, nothing will reach the modules");
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            }
            info!("Interrupted");
        }
        _ = runtime.shutdown_requested() => info!("Shutdown requested"),
    }

    runtime.shutdown().await;
    println!("⛵ Halyard — stopped");
    Ok(())
}
