//! strapi-transfer CLI - export, import and transfer of CMS content.

mod commands;
mod options;
mod progress;
mod prompts;
mod signals;
mod summary;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use strapi_transfer::{Config, Result, TransferError};
use tracing::{debug, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use commands::CommandContext;
use options::{ExportArgs, ImportArgs, TransferArgs};
use signals::SignalHandlers;

const DEFAULT_CONFIG_FILE: &str = "strapi-transfer.yaml";

#[derive(Parser)]
#[command(name = "strapi-transfer")]
#[command(about = "Export, import and transfer CMS content between instances and archives")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file [default: strapi-transfer.yaml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory of the local instance (overrides instance.data_dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long, global = true)]
    progress: bool,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Include info diagnostics in the console and the log file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the local instance to an archive file
    Export(ExportArgs),

    /// Import an archive file into the local instance
    Import(ImportArgs),

    /// Transfer data between the local instance and a remote one
    Transfer(TransferArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    setup_logging(&cli.verbosity, &cli.log_format).map_err(TransferError::Config)?;

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.instance.data_dir = dir;
    }
    debug!("Local instance data directory: {}", config.instance.data_dir.display());

    let ctx = CommandContext {
        config,
        signals: SignalHandlers::install(),
        progress_json: cli.progress,
        output_json: cli.output_json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Export(args) => commands::export::run(&ctx, args).await,
        Commands::Import(args) => commands::import::run(&ctx, args).await,
        Commands::Transfer(args) => commands::transfer::run(&ctx, args).await,
    }
}

/// An explicit `--config` must exist; the default file is optional.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.is_file() {
                return Err(TransferError::Validation(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            let config = Config::load(path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                let config = Config::load(default)?;
                info!("Loaded configuration from {}", default.display());
                Ok(config)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> std::result::Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for the results.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().try_init().map_err(|e| e.to_string())
    } else {
        subscriber.try_init().map_err(|e| e.to_string())
    }
}
