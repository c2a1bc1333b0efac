use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleet::cli::{self, Cli, Commands};
use fleet::config::{AppConfig, LoggingConfig};
use fleet::error::{FleetError, Result};
use fleet::factory::{AgentFactory, StrategyDeps};
use fleet::registry::AgentRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        None | Some(Commands::Run) => run_fleet(&cli.config_dir).await,
        Some(Commands::Types) => {
            cli::print_agent_types(&AgentFactory::default());
            Ok(())
        }
        Some(Commands::Check) => cli::check_config(&cli.config_dir).map(|_| ()),
    }
}

async fn run_fleet(config_dir: &Path) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(problem = %e, "invalid configuration");
        }
        return Err(FleetError::InvalidConfig(errors.join("; ")));
    }

    let registry = AgentRegistry::install_global(AgentRegistry::from_config(
        &config,
        StrategyDeps::paper(),
    ))?;
    registry.start()?;
    info!(
        pool_capacity = config.pool.capacity,
        declared_agents = config.agents.len(),
        "fleet starting"
    );

    for (agent_id, response) in registry.bootstrap(&config.agents).await {
        if response.success {
            info!(agent_id = %agent_id, status = %response.status, "declared agent ready");
        } else {
            warn!(
                agent_id = %agent_id,
                error = response.error.as_deref().unwrap_or("unknown"),
                "declared agent failed"
            );
        }
    }

    let reporter = (config.status_report_secs > 0).then(|| {
        let registry = registry.clone();
        let period = Duration::from_secs(config.status_report_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("{}", registry.summary());
            }
        })
    });

    shutdown_signal().await;
    info!("shutdown requested");

    if let Some(handle) = reporter {
        handle.abort();
    }
    registry.shutdown().await?;
    info!("{}", registry.summary());
    info!("fleet stopped");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = match logging.level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,fleet={level}")));

    // rolling::daily panics if the first file can't be created
    let file_layer = logging.directory.as_deref().and_then(|dir| {
        let writable = std::fs::create_dir_all(dir).is_ok() && {
            let test_path = dir.join(".fleet_write_test");
            let ok = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&test_path)
                .is_ok();
            let _ = std::fs::remove_file(&test_path);
            ok
        };
        if !writable {
            eprintln!(
                "Warning: Could not write to log directory {}, file logging disabled",
                dir.display()
            );
            return None;
        }

        let file_appender = tracing_appender::rolling::daily(dir, "fleet.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // lives for the whole process
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let (plain_layer, json_layer) = if logging.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(file_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
