mod list;
mod render;
mod watch;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hidpp::session::SessionConfig;
use list::ListCommand;
use tracing_subscriber::EnvFilter;
use watch::WatchCommand;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    color: colorchoice_clap::Color,

    #[command(subcommand)]
    command: Commands,

    /// Output plain JSON without color and interactivity
    #[arg(short, long, global = true)]
    json: bool,

    /// Log filter directives, overridden by `RUST_LOG`
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// How long to wait for the reply to a HID++ request, in milliseconds
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,

    /// How long to wait for stale reports before each request, in milliseconds
    #[arg(long, global = true, default_value_t = 1)]
    flush_timeout_ms: u64,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            flush_timeout: Duration::from_millis(self.flush_timeout_ms),
            ..SessionConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    List(ListCommand),
    Watch(WatchCommand),
}

pub async fn execute() -> Result<()> {
    let cli = Cli::parse();

    cli.color.write_global();
    init_logging(&cli.log_level)?;

    match &cli.command {
        Commands::List(cmd) => cmd.execute(&cli).await,
        Commands::Watch(cmd) => cmd.execute(&cli).await,
    }
}

fn init_logging(directives: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter `{directives}`"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
