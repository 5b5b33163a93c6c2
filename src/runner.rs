//! Process execution.
//!
//! Steps are run through the [`CommandRunner`] trait so that the pipeline and
//! the superuser check can be exercised without spawning an interpreter.

use crate::error::SetupError;
use crate::steps::CommandSpec;
use std::process::Stdio;

/// How a step's standard output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Output goes straight to the console.
    Inherit,
    /// Stdout is collected and returned; stderr still goes to the console.
    Capture,
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,

    /// Captured stdout (empty in [`OutputMode::Inherit`]).
    pub stdout: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs one external process to completion.
pub trait CommandRunner {
    /// Start `spec`, block until it exits, and report how it exited.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::Spawn` only if the process could not be started.
    /// A non-zero exit is not an error at this level.
    fn run(
        &self,
        spec: &CommandSpec,
        mode: OutputMode,
    ) -> impl Future<Output = Result<StepOutput, SetupError>> + Send;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, mode: OutputMode) -> Result<StepOutput, SetupError> {
        tracing::debug!(command = %spec, dir = %spec.current_dir.display(), "Spawning");

        let mut command = spec.to_command();
        command.stdin(Stdio::inherit()).stderr(Stdio::inherit());

        let spawn_error = |source| SetupError::Spawn {
            program: spec.program.clone(),
            source,
        };

        match mode {
            OutputMode::Inherit => {
                let status = command
                    .stdout(Stdio::inherit())
                    .status()
                    .await
                    .map_err(spawn_error)?;

                Ok(StepOutput {
                    code: status.code(),
                    stdout: String::new(),
                })
            }
            OutputMode::Capture => {
                let output = command
                    .stdout(Stdio::piped())
                    .output()
                    .await
                    .map_err(spawn_error)?;

                Ok(StepOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                })
            }
        }
    }
}
