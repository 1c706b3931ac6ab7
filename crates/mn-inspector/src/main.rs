use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mn_inspector::app::Inspector;
use mn_inspector::config::{Config, FileConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mn-inspector")]
#[command(about = "Caches block and reward statistics for masternode networks")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "MN_INSPECTOR_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore cached snapshots and keep them refreshed until Ctrl-C
    Serve,

    /// Print network actions as JSON
    Query {
        /// Comma separated network names
        #[arg(short, long, value_delimiter = ',', required = true)]
        network: Vec<String>,

        /// Comma separated action names, or `all` / `help`
        #[arg(short, long, value_delimiter = ',', default_value = "help")]
        action: Vec<String>,
    },

    /// Print node-wide actions as JSON
    System {
        #[arg(short, long, value_delimiter = ',', default_value = "help")]
        action: Vec<String>,
    },
}

/// Install the global subscriber. `RUST_LOG` wins over the default filter.
/// Logs go to stderr; stdout is reserved for query output.
fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,mn_inspector=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr);
        registry.with(fmt_layer).init();
    } else {
        // "pretty" and anything else
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Logging first, so network validation warnings are visible
    let file = FileConfig::load(&cli.config)?;
    init_logging(&file.logging.format);
    let config = Config::from_file(file);

    let inspector = Inspector::open(config, Some(cli.config.clone())).await?;

    match cli.command {
        Commands::Serve => {
            let handle = inspector.refresher.clone().spawn();
            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
            info!("shutting down");
            if let Some(handle) = handle {
                handle.abort();
            }
        }
        Commands::Query { network, action } => {
            let reply = inspector.actions.network_actions(&network, &action).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::System { action } => {
            let reply = inspector.actions.system_actions(&action).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }
    Ok(())
}
