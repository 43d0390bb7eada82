use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wee_engine::layer::FileAdapter;
use wee_engine::summary::should_use_colors;
use wee_engine::Engine;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUN_FAILURES: i32 = 1;
const EXIT_IO: i32 = 2;
const EXIT_CONFIG: i32 = 4;

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a scoring run
    Run {
        /// Override the output directory from the config
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the worker pool size from the config
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Check a run configuration without executing it
    Validate,
}

#[derive(Parser, Debug)]
#[command(name = "wee-engine")]
#[command(about = "Spatial enablement scoring engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the run configuration YAML
    #[arg(short, long, global = true, default_value = "run.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let start_time = Instant::now();

    let config = match wee_engine::config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    if let Err(errors) = wee_engine::config::validate_config(&config) {
        eprintln!("Config errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        std::process::exit(EXIT_CONFIG);
    }

    match cli.command {
        Commands::Validate => {
            println!("{} is valid", cli.config.display());
            std::process::exit(EXIT_SUCCESS);
        }
        Commands::Run { output, workers } => {
            let mut config = config;
            if let Some(output) = output {
                config.output_dir = output;
            }
            if let Some(workers) = workers {
                config.workers = Some(workers);
            }

            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted; finishing in-flight units...");
                    ctrl_c_cancel.cancel();
                }
            });

            let adapter = Arc::new(FileAdapter::new());
            let engine = match Engine::new(&config, adapter, cancel) {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("Config error: {}", e);
                    std::process::exit(EXIT_CONFIG);
                }
            };

            let summary = match engine.run().await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Run error: {}", e);
                    std::process::exit(EXIT_IO);
                }
            };

            println!("{}", summary.format_table(should_use_colors()));
            if cli.verbose {
                eprintln!("Run finished in {:.1}s", start_time.elapsed().as_secs_f64());
            }

            if summary.has_failures() {
                std::process::exit(EXIT_RUN_FAILURES);
            }
            std::process::exit(EXIT_SUCCESS);
        }
    }
}
