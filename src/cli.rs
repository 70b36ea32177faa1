//! Command-line interface implementation

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::{Config, Diagnostics, Environment, KumitateError, Pipeline, pipeline};

const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;

/// Front-end asset pipeline with a live-reloading dev server
#[derive(Parser)]
#[command(name = "kumitate")]
#[command(version)]
pub struct Cli {
    /// Config file, defaults to `kumitate.toml` when present
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build once, then serve the output and rebuild on changes (default)
    Dev,
    /// Production build: no source maps, no live reload
    Build,
    /// Run a single task once in development mode
    Run {
        /// Task name, e.g. `styles` or `html`
        task: String,
    },
    /// Print the task graph as a Mermaid diagram
    Graph,
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = crate::init_logging() {
        eprintln!("Couldn't initialize logging: {e}");
    }

    match execute(cli) {
        Ok(true) => ExitCode::from(EXIT_SUCCESS),
        Ok(false) => ExitCode::from(EXIT_ERROR),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Returns whether every task that ran succeeded.
fn execute(cli: Cli) -> Result<bool, KumitateError> {
    let config = Config::load(cli.config.as_deref())?;
    let pipeline = Pipeline::new(pipeline::standard(&config))?;

    match cli.command.unwrap_or(Commands::Dev) {
        Commands::Dev => dev(pipeline, config),
        Commands::Build => {
            let diagnostics = pipeline.run(&Environment::build())?;
            summary(&diagnostics);
            Ok(diagnostics.is_success())
        }
        Commands::Run { task } => {
            let diagnostics = pipeline.run_tasks(&[task], &Environment::watch(None))?;
            summary(&diagnostics);
            Ok(diagnostics.is_success())
        }
        Commands::Graph => {
            print!("{pipeline}");
            Ok(true)
        }
    }
}

#[cfg(feature = "live")]
fn dev(pipeline: Pipeline, config: Config) -> Result<bool, KumitateError> {
    let mut session = crate::Session::new(pipeline, config);

    let diagnostics = session.start()?;
    if !diagnostics.is_success() {
        tracing::warn!("initial build had errors, fix them and save to rebuild");
    }

    session.run()?;
    Ok(true)
}

#[cfg(not(feature = "live"))]
fn dev(_: Pipeline, _: Config) -> Result<bool, KumitateError> {
    Err(anyhow::anyhow!("development mode needs the `live` feature").into())
}

fn summary(diagnostics: &Diagnostics) {
    let mut executions: Vec<_> = diagnostics.executions.values().collect();
    executions.sort_by_key(|exec| exec.start);

    for exec in executions {
        tracing::debug!(task = %exec.name, "took {:.2?}", exec.duration);
    }
}
