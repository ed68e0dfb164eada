mod commands;
pub mod engine;
mod error;
mod patcher;
mod paths;
pub mod pipeline;
pub mod project;
mod readiness;
mod settings;
mod templates;
mod tooling;
mod validation;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use commands::AppState;
pub use error::{AppError, ErrorKind, Result};
pub use pipeline::{InstanceFailurePolicy, InstanceOutcome, Orchestrator, PipelineResult};
pub use settings::LauncherSettings;

#[derive(Parser)]
#[command(name = "stack-launcher", version, about = "Build and run a local container stack")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "STACK_LAUNCHER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Launcher settings file (defaults to the per-user data directory)
    #[arg(long, global = true, env = "STACK_LAUNCHER_SETTINGS")]
    settings: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project document and its default volume directories
    Init {
        #[arg(default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        name: String,
    },
    /// Check the project configuration without touching anything
    Validate {
        #[arg(default_value = ".")]
        root: PathBuf,
    },
    /// Generate artifacts and patch instance configuration
    Build {
        #[arg(default_value = ".")]
        root: PathBuf,
    },
    /// Start the stack, restoring databases for new instances
    Run {
        #[arg(default_value = ".")]
        root: PathBuf,
        /// Keep going when an instance fails
        #[arg(long)]
        keep_going: bool,
    },
    /// Stop the stack and remove its network
    Stop {
        #[arg(default_value = ".")]
        root: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

fn load_launcher_settings(path: Option<&PathBuf>) -> Result<LauncherSettings> {
    match path {
        Some(path) => settings::load_settings_from(path),
        None => settings::load_settings(),
    }
}

fn print_result(result: &PipelineResult, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{text}"),
            Err(e) => log::error!("Failed to serialize result: {}", e),
        }
    } else {
        for outcome in &result.instances {
            let glyph = if outcome.success { "✔" } else { "✖" };
            println!("  {glyph} {}: {}", outcome.instance, outcome.message);
        }
        println!("{}", result.message);
    }
    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn execute(state: &AppState, command: Command, json: bool) -> Result<ExitCode> {
    match command {
        Command::Init { root, name } => {
            let project = commands::init_project(state, &root, &name)?;
            println!(
                "Initialized '{}' at {}",
                project.name,
                project.root_path.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { root } => {
            let result = commands::validate_project(state, &root)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.message);
            }
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Build { root } => {
            let result = commands::build_project(state, &root).await?;
            Ok(print_result(&result, json))
        }
        Command::Run { root, keep_going } => {
            let policy = if keep_going {
                InstanceFailurePolicy::Continue
            } else {
                InstanceFailurePolicy::FailFast
            };
            let result = commands::run_project(state, &root, policy).await?;
            Ok(print_result(&result, json))
        }
        Command::Stop { root } => {
            let result = commands::stop_project(state, &root).await?;
            Ok(print_result(&result, json))
        }
    }
}

#[allow(clippy::expect_used)]
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let settings = match load_launcher_settings(cli.settings.as_ref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::debug!("Container engine: {}", settings.engine);

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client");

    let quiet = cli.json;
    let sink = move |line: &str| {
        if !quiet {
            println!("{line}");
        }
    };
    let state = AppState::new(settings, Arc::new(sink), client);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to start async runtime");

    match runtime.block_on(execute(&state, cli.command, cli.json)) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
