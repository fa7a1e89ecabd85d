//! `halyard check`: validate the config and the plugins it names.

use std::path::PathBuf;

use halyard_config::BotConfig;
use halyard_core::Version;
use halyard_runtime::{Capability, Catalog};

/// One configured instance and what the catalog says about it.
#[derive(Debug)]
pub struct Finding {
    pub name: String,
    pub descriptor: String,
    pub problem: Option<String>,
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔎 Halyard Check — Config Diagnostics");
    println!("=====================================\n");

    let config = match super::load_config(config_path.as_deref()) {
        Ok(config) => {
            println!("  ✅ Config file valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            return Err(e);
        }
    };
    println!("  ✅ Command prefix: {:?}", config.command_prefix);
    if config.use_auth {
        if config.auth_path.exists() {
            println!("  ✅ Permissions file: {}", config.auth_path.display());
        } else {
            println!(
                "  ⚠️  Permissions file {} does not exist yet, starting with no grants",
                config.auth_path.display()
            );
        }
    }

    let catalog = super::builtin_catalog();
    let findings = audit(&config, &catalog, &Version::current());

    println!();
    for finding in &findings {
        match &finding.problem {
            None => println!("  ✅ {} ({})", finding.name, finding.descriptor),
            Some(problem) => println!("  ❌ {} ({}): {problem}", finding.name, finding.descriptor),
        }
    }

    let issues = findings.iter().filter(|f| f.problem.is_some()).count();
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
        Ok(())
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
        Err(format!("{issues} configuration issue(s)").into())
    }
}

/// Resolve every configured instance against `catalog`.
pub fn audit(config: &BotConfig, catalog: &Catalog, running: &Version) -> Vec<Finding> {
    let sections = [
        (Some(Capability::Agent), &config.agent_instances),
        (Some(Capability::Module), &config.module_instances),
        (Some(Capability::Filter), &config.filter_instances),
    ];

    let mut findings = Vec::new();
    for (expected, instances) in sections {
        for (name, inst) in instances {
            findings.push(inspect(catalog, running, name, &inst.of, expected));
        }
    }

    let mut containers: Vec<_> = config
        .routing
        .containers
        .iter()
        .filter_map(|(name, c)| c.using.as_deref().map(|using| (name, using)))
        .collect();
    containers.sort();
    for (name, using) in containers {
        let mut finding = inspect(catalog, running, name, using, None);
        if finding.problem.is_none() && catalog.capability(using) == Some(Capability::Filter) {
            finding.problem = Some("a filter cannot implement a container".into());
        }
        findings.push(finding);
    }

    findings
}

fn inspect(
    catalog: &Catalog,
    running: &Version,
    name: &str,
    descriptor: &str,
    expected: Option<Capability>,
) -> Finding {
    let problem = match (catalog.capability(descriptor), catalog.requirement(descriptor)) {
        (Some(actual), Some(requirement)) => match requirement.check(descriptor, running) {
            Err(e) => Some(e.to_string()),
            Ok(()) => expected
                .filter(|expected| *expected != actual)
                .map(|expected| format!("listed as {expected} but the plugin is a {actual}")),
        },
        _ => Some(format!("no plugin registered as '{descriptor}'")),
    };

    Finding {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        problem,
    }
}
