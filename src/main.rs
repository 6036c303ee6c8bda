use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epg_timeshift::invocation::{self, DEFAULT_FORCE_DURATION_HOURS, Outcome, RunMode};

#[derive(Parser)]
#[command(name = "epg-timeshift")]
#[command(version)]
#[command(about = "Fetch an XMLTV guide, apply time-shift corrections and republish it")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Process the guide using the configuration as-is (default)
    Auto,
    /// Shift every channel by OFFSET seconds for a limited time
    ForceTimeshift {
        #[arg(allow_negative_numbers = true)]
        offset_seconds: i64,
        #[arg(default_value_t = DEFAULT_FORCE_DURATION_HOURS)]
        duration_hours: u64,
    },
    /// Set the offset for a single channel
    ChannelConfig {
        channel_id: String,
        #[arg(allow_negative_numbers = true)]
        offset_seconds: i64,
    },
    /// Print the current configuration state
    Status,
}

impl From<Command> for RunMode {
    fn from(command: Command) -> Self {
        match command {
            Command::Auto => RunMode::Auto,
            Command::ForceTimeshift {
                offset_seconds,
                duration_hours,
            } => RunMode::ForceTimeshift {
                offset_seconds,
                duration_hours,
            },
            Command::ChannelConfig {
                channel_id,
                offset_seconds,
            } => RunMode::ChannelConfig {
                channel_id,
                offset_seconds,
            },
            Command::Status => RunMode::Status,
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("epg_timeshift={level}").into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let mode: RunMode = cli.command.unwrap_or(Command::Auto).into();
    info!("Using configuration {}", cli.config.display());

    match invocation::execute(&mode, &cli.config).await? {
        Outcome::Status(report) => {
            let json = serde_json::to_string_pretty(&report).context("failed to render status")?;
            println!("{json}");
            Ok(true)
        }
        Outcome::Completed(result) => {
            info!(
                "Published {} from {} source{}",
                result.artifact.path.display(),
                result.source_role,
                if result.cache_hit { " (cached)" } else { "" }
            );
            Ok(true)
        }
        Outcome::Failed(failure) => {
            error!("{}", failure);
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);
    info!("Starting EPG Timeshift v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
