//! # flowctl
//!
//! Operator tool for the flow core: runs the health monitor as a long-lived process
//! and exposes the read-only checks and recovery actions on the command line.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use flow_core::config::ConfigManager;
use flow_core::consistency::FlowConsistencyChecker;
use flow_core::constants::FlowType;
use flow_core::health_monitor::{FlowHealthMonitor, RecoveryAction};
use flow_core::lifecycle::FlowLifecycleService;
use flow_core::logging;
use flow_core::resolver::FlowLookupResolver;
use flow_core::store::{FlowStore, PgFlowStore};

#[derive(Parser, Debug)]
#[command(name = "flowctl")]
#[command(about = "Flow orchestration core operator tool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to load (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the stuck-flow monitor until interrupted
    Monitor,

    /// Run a single monitor sweep and exit
    Tick,

    /// Report master/child drift for a flow
    Check {
        flow_id: Uuid,
    },

    /// Liveness verdict for a flow
    Health {
        flow_id: Uuid,
    },

    /// Apply a recovery action (only mark_failed is implemented)
    Recover {
        flow_id: Uuid,

        #[arg(short, long, default_value = "mark_failed")]
        action: String,

        /// Message stored on the flow instead of the generated one
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// List active master flows, newest first
    List {
        #[arg(short = 't', long)]
        flow_type: Option<FlowType>,
    },

    /// Apply the bundled migrations
    Migrate,

    /// Print the resolved configuration with secrets masked
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_structured_logging();

    let manager = match &cli.environment {
        Some(environment) => ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)?,
        None => ConfigManager::load_from_directory(cli.config_dir.clone())?,
    };

    if cli.command == Command::Config {
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        return Ok(());
    }

    let config = manager.config();
    let pg = PgFlowStore::connect(&config.database)
        .await
        .context("connecting to the flow store")?;
    if config.database.run_migrations || cli.command == Command::Migrate {
        pg.migrate().await.context("applying migrations")?;
        if cli.command == Command::Migrate {
            println!("migrations applied");
            return Ok(());
        }
    }
    let store: Arc<dyn FlowStore> = Arc::new(pg);

    match cli.command {
        Command::Monitor => {
            let monitor = Arc::new(FlowHealthMonitor::new(store, config.health_monitor.clone()));
            if !monitor.start() {
                anyhow::bail!("health monitor did not start (disabled in configuration?)");
            }
            tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
            info!("Shutdown signal received, draining health monitor");
            monitor.stop().await;
            println!("{}", serde_json::to_string_pretty(&monitor.stats())?);
        }
        Command::Tick => {
            let monitor = FlowHealthMonitor::new(store, config.health_monitor.clone());
            let report = monitor.tick().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check { flow_id } => {
            let checker = FlowConsistencyChecker::new(FlowLookupResolver::new(store));
            let report = checker.check(flow_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_consistent() {
                std::process::exit(2);
            }
        }
        Command::Health { flow_id } => {
            let monitor = FlowHealthMonitor::new(store, config.health_monitor.clone());
            let health = monitor.check_flow_health(flow_id).await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Command::Recover {
            flow_id,
            action,
            reason,
        } => {
            let action = match action.parse::<RecoveryAction>()? {
                RecoveryAction::MarkFailed { .. } => RecoveryAction::MarkFailed { reason },
                other => other,
            };
            let monitor = FlowHealthMonitor::new(store, config.health_monitor.clone());
            let outcome = monitor.recover_flow(flow_id, action).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::List { flow_type } => {
            let lifecycle = FlowLifecycleService::new(store, config.lifecycle.clone());
            for flow in lifecycle.list_active(flow_type).await? {
                println!(
                    "{}  {:<13} {:<22} {:<24} {}",
                    flow.flow_id,
                    flow.flow_type.as_str(),
                    flow.flow_status,
                    flow.current_phase.as_deref().unwrap_or("-"),
                    flow.flow_name
                );
            }
        }
        Command::Migrate | Command::Config => {}
    }

    Ok(())
}
