//! Tandem Federate -- single binary coupling a local event queue to an
//! external orchestrator.
//!
//! Usage:
//!   tandem-federate                        # Run with default config
//!   tandem-federate --config path.toml     # Run with custom config
//!   tandem-federate config                 # Print the effective config

use clap::{Parser, Subcommand};

use tandem_federate::config::FederateConfig;
use tandem_federate::{expand_tilde, Dispatcher, RangeModel};

#[derive(Parser)]
#[command(name = "tandem-federate", about = "Tandem co-simulation federate")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.tandem/config.toml")]
    config: String,

    /// Override the notify channel port
    #[arg(long)]
    notify_port: Option<u16>,

    /// Override the command channel port (0 = ephemeral)
    #[arg(long)]
    command_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the federate (default)
    Run,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_federate=info,tandem_protocol=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut cfg = FederateConfig::load_or_default(&config_path)?;
    if let Some(port) = cli.notify_port {
        cfg.channel.notify_port = port;
    }
    if let Some(port) = cli.command_port {
        cfg.channel.command_port = port;
    }

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
        Some(Commands::Run) | None => run_federate(cfg).await,
    }
}

async fn run_federate(cfg: FederateConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %cfg.channel.host,
        notify_port = cfg.channel.notify_port,
        command_port = cfg.channel.command_port,
        "starting tandem-federate"
    );

    let model = RangeModel::new(
        cfg.model.wifi_range,
        cfg.model.link_delay_ns,
        cfg.model.cell_delay_ns,
    );

    let bound = Dispatcher::bind(cfg, model).await?;
    tracing::info!(
        notify_port = bound.notify_port()?,
        "listening for the orchestrator"
    );

    let mut dispatcher = bound.handshake().await?;
    dispatcher.run().await?;

    tracing::info!("session ended");
    Ok(())
}
