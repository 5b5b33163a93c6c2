//! Administrative account provisioning.
//!
//! The backend ships an idempotent script that creates its admin account only
//! when it does not exist yet. This module runs it and reads back what it did.

use crate::config::Config;
use crate::error::SetupError;
use crate::runner::{CommandRunner, OutputMode};
use crate::steps::Step;

/// What the provisioning script reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperuserOutcome {
    Created,
    AlreadyExists,
    /// The script succeeded but printed neither known message.
    Unrecognized,
}

/// Run the provisioning script and classify its result.
///
/// The script's stdout is captured, echoed to the console unchanged, then
/// matched against its two known messages.
///
/// # Errors
///
/// - `Spawn`: the interpreter could not be started
/// - `StepFailed`: the script exited non-zero
pub async fn ensure_superuser<R: CommandRunner>(
    runner: &R,
    config: &Config,
) -> Result<SuperuserOutcome, SetupError> {
    let spec = Step::EnsureSuperuser.command(config);
    let output = runner.run(&spec, OutputMode::Capture).await?;

    print!("{}", output.stdout);

    if !output.success() {
        return Err(SetupError::StepFailed {
            step: Step::EnsureSuperuser,
            code: output.code,
        });
    }

    let outcome = classify(&output.stdout);
    match outcome {
        SuperuserOutcome::Created => {
            tracing::info!(username = %config.admin_username, "Superuser created")
        }
        SuperuserOutcome::AlreadyExists => {
            tracing::info!(username = %config.admin_username, "Superuser already exists")
        }
        SuperuserOutcome::Unrecognized => {
            tracing::warn!("Provisioning script finished without a recognizable status line")
        }
    }
    Ok(outcome)
}

fn classify(stdout: &str) -> SuperuserOutcome {
    for line in stdout.lines() {
        if line.contains("created successfully") {
            return SuperuserOutcome::Created;
        }
        if line.contains("already exists") {
            return SuperuserOutcome::AlreadyExists;
        }
    }
    SuperuserOutcome::Unrecognized
}
