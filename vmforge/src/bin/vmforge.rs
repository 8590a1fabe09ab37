use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vmforge::ui::{ConsoleUi, Ui};
use vmforge::{BuildConfig, Builder};

/// Build Hyper-V virtual machine images from installation ISOs
#[derive(Parser)]
#[command(name = "vmforge", version)]
struct Cli {
    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Also write logs to <LOG_DIR>/vmforge.log
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a build from a JSON configuration file
    Build {
        config: PathBuf,
        /// Pause after every step
        #[arg(long)]
        debug: bool,
        /// Delete an existing output directory first
        #[arg(long)]
        force: bool,
        /// Print the artifact as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a configuration file without building
    Validate { config: PathBuf },
}

fn load_config(path: &Path) -> Result<BuildConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = vmforge::init_logging(&cli.log_level, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Build {
            config,
            debug,
            force,
            json,
        } => {
            let mut config = load_config(&config)?;
            config.debug |= debug;
            config.force |= force;

            let builder = Arc::new(Builder::new(config)?);
            let ui = Arc::new(ConsoleUi::with_prefix(builder.config().build_name.clone()));
            for warning in builder.warnings() {
                ui.message(&format!("Warning: {}", warning));
            }

            let canceller = Arc::clone(&builder);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel();
                }
            });

            let artifact = builder.run(ui.clone()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&artifact)?);
            } else {
                ui.say(&format!("Build finished. {}", artifact));
            }
        }
        Commands::Validate { config } => {
            let builder = Builder::new(load_config(&config)?)?;
            for warning in builder.warnings() {
                println!("Warning: {}", warning);
            }
            println!("Configuration is valid");
        }
    }

    Ok(())
}
