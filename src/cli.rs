use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::error::{FleetError, Result};
use crate::factory::AgentFactory;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(version = "0.1.0")]
#[command(about = "Multi-agent trading fleet: registry, scheduler and shared resource pool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, global = true, env = "FLEET_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the fleet until SIGINT/SIGTERM
    Run,
    /// List available agent types
    Types,
    /// Validate configuration and exit
    Check,
}

/// Print every registered agent type with its description
pub fn print_agent_types(factory: &AgentFactory) {
    let types = factory.available_types();
    let width = types.iter().map(|t| t.name.len()).max().unwrap_or(0);

    println!("Available agent types:");
    for info in types {
        println!("  {:<width$}  {}", info.name, info.description, width = width);
    }
}

/// Load and validate configuration, printing a report
pub fn check_config(config_dir: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(config_dir)?;

    match config.validate() {
        Ok(()) => {
            println!("\x1b[32m✓ configuration OK\x1b[0m ({})", config_dir.display());
            println!(
                "  pool: capacity={} acquire_timeout_ms={:?}",
                config.pool.capacity, config.pool.acquire_timeout_ms
            );
            println!(
                "  engine: starvation_threshold_ms={} shutdown_timeout_ms={}",
                config.engine.starvation_threshold_ms, config.engine.shutdown_timeout_ms
            );
            println!("  agents: {}", config.agents.len());
            for decl in &config.agents {
                println!(
                    "    {} ({}){}",
                    decl.id,
                    decl.agent_type,
                    if decl.autostart { " autostart" } else { "" }
                );
            }
            Ok(config)
        }
        Err(errors) => {
            println!("\x1b[31m✗ configuration has {} problem(s)\x1b[0m", errors.len());
            for e in &errors {
                println!("  - {e}");
            }
            Err(FleetError::InvalidConfig(errors.join("; ")))
        }
    }
}
