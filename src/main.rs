//! LapoAiTools Backend - Local Setup Tool
//!
//! Bootstraps a developer checkout of the backend and starts its development
//! server. The backend itself is never modified; every step drives its own
//! tooling as an external process.
//!
//! # Setup Flow
//!
//! 1. Ensure `.env` exists (copied from `.env.example` when missing)
//! 2. Install dependencies from `requirements.txt`
//! 3. Apply database migrations
//! 4. Ensure the admin account exists
//! 5. Start the development server on `localhost:8000`
//!
//! Steps run strictly in order. Each one blocks until its process exits.

mod config;
mod db;
mod doctor;
mod env_file;
mod error;
mod pipeline;
mod runner;
mod server;
mod steps;
mod superuser;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use config::Config;
use env_file::EnvFileOutcome;
use error::SetupError;
use pipeline::FailurePolicy;
use runner::ProcessRunner;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use steps::Step;
use tracing_subscriber::EnvFilter;

/// Local setup for the LapoAiTools backend
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Backend checkout to operate on
    #[clap(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Development server port (overrides LAPO_SETUP_SERVER_PORT)
    #[clap(long, global = true)]
    port: Option<u16>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full first-time setup: env file, dependencies, migrations, admin account, server
    Setup {
        /// Skip `pip install`
        #[clap(long)]
        skip_install: bool,

        #[clap(flatten)]
        run: RunOptions,
    },

    /// Quick start: env file, migrations, server
    Start {
        #[clap(flatten)]
        run: RunOptions,
    },

    /// Create `.env` from `.env.example` if it does not exist
    Env,

    /// Install dependencies from the requirements file
    Install,

    /// Apply pending database migrations
    Migrate,

    /// Ensure the admin account exists
    Superuser,

    /// Start the development server
    Serve,

    /// Check that a running server answers HTTP requests
    Probe {
        /// Seconds to wait for the port to open
        #[clap(long, default_value_t = 5)]
        timeout: u64,
    },

    /// Inspect the checkout and report setup problems
    Doctor {
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunOptions {
    /// Run the remaining steps even if one fails
    #[clap(long)]
    keep_going: bool,

    /// Stop after setup instead of starting the server
    #[clap(long)]
    no_serve: bool,
}

impl RunOptions {
    fn policy(&self) -> FailurePolicy {
        if self.keep_going {
            FailurePolicy::KeepGoing
        } else {
            FailurePolicy::FailFast
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Setup failed: {:#}", e);
            let code = e
                .downcast_ref::<SetupError>()
                .map(SetupError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code.clamp(1, 255) as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = Config::load(&cli.project_dir).map_err(SetupError::from)?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    tracing::debug!(project_dir = %config.project_dir.display(), "Configuration loaded");

    let runner = ProcessRunner;

    match cli.command {
        Commands::Setup { skip_install, run } => {
            println!("Setting up LapoAiTools Backend...");
            ensure_env(&config).await?;

            let steps: Vec<Step> = Step::SETUP
                .into_iter()
                .filter(|step| !(skip_install && *step == Step::InstallDependencies))
                .collect();
            let reports = pipeline::run_steps(&runner, &config, &steps, run.policy()).await?;
            let failed = report_failures(&reports);

            println!();
            println!("Setup complete.");
            println!("Admin login: {}", config.admin_username);

            if !run.no_serve {
                server::serve(&config).await?;
            }
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Commands::Start { run } => {
            println!("Starting LapoAiTools Backend...");
            ensure_env(&config).await?;

            let reports = pipeline::run_steps(&runner, &config, &Step::START, run.policy()).await?;
            let failed = report_failures(&reports);

            if !run.no_serve {
                server::serve(&config).await?;
            }
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Commands::Env => {
            ensure_env(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Install => {
            pipeline::run_steps(&runner, &config, &[Step::InstallDependencies], FailurePolicy::FailFast)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Migrate => {
            pipeline::run_steps(&runner, &config, &[Step::Migrate], FailurePolicy::FailFast)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Superuser => {
            superuser::ensure_superuser(&runner, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve => {
            server::serve(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Probe { timeout } => {
            let addr = config.probe_address();
            server::wait_until_ready(addr, Duration::from_secs(timeout)).await?;

            let url = url::Url::parse(&format!("http://{}/", addr))
                .context("Failed to build probe URL")?;
            let status = server::smoke_check(&url).await?;
            println!("Server at {} answered with HTTP {}", addr, status);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor { json } => {
            let report = doctor::run(&config).await;
            if json {
                let rendered =
                    serde_json::to_string_pretty(&report).context("Failed to render report")?;
                println!("{}", rendered);
            } else {
                println!("{}", report);
            }
            Ok(if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

async fn ensure_env(config: &Config) -> Result<(), SetupError> {
    match env_file::ensure_env_file(&config.env_path(), &config.template_path()).await? {
        EnvFileOutcome::Created => println!(
            "Created {} from {}. Review its settings before deploying.",
            config.env_file.display(),
            config.env_template.display()
        ),
        EnvFileOutcome::AlreadyPresent => {
            println!("{} already exists, leaving it unchanged.", config.env_file.display())
        }
    }
    Ok(())
}

/// Print the steps that failed under `--keep-going`. Returns whether any did.
fn report_failures(reports: &[pipeline::StepReport]) -> bool {
    let mut failed = false;
    for report in reports {
        if let pipeline::StepStatus::Failed(code) = report.status {
            eprintln!("{}", SetupError::StepFailed { step: report.step, code });
            failed = true;
        }
    }
    failed
}
