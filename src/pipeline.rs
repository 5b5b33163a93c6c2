//! Sequential step execution.
//!
//! Steps run one after another, each blocking until its process exits.
//! There is no parallelism and no retry.

use crate::config::Config;
use crate::error::SetupError;
use crate::runner::{CommandRunner, OutputMode};
use crate::steps::Step;
use crate::superuser;

/// What to do when a step exits unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failing step.
    #[default]
    FailFast,
    /// Log the failure and carry on with the next step.
    KeepGoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub step: Step,
    pub status: StepStatus,
}

/// Run `steps` in order.
///
/// # Returns
///
/// One report per step that was run. Under `KeepGoing` this is every step;
/// failures are recorded in the reports instead of being returned.
///
/// # Errors
///
/// - `StepFailed`: a step exited non-zero under `FailFast`
/// - `Spawn`: the interpreter could not be started (always fatal, since
///   every later step would fail the same way)
pub async fn run_steps<R: CommandRunner>(
    runner: &R,
    config: &Config,
    steps: &[Step],
    policy: FailurePolicy,
) -> Result<Vec<StepReport>, SetupError> {
    let mut reports = Vec::with_capacity(steps.len());

    for (index, &step) in steps.iter().enumerate() {
        println!("[{}/{}] {}...", index + 1, steps.len(), step);
        tracing::info!(%step, command = %step.command(config), "Running step");

        let status = match run_step(runner, config, step).await {
            Ok(()) => StepStatus::Succeeded,
            Err(SetupError::StepFailed { code, .. }) => StepStatus::Failed(code),
            Err(e) => return Err(e),
        };

        reports.push(StepReport { step, status });

        if let StepStatus::Failed(code) = status {
            match policy {
                FailurePolicy::FailFast => return Err(SetupError::StepFailed { step, code }),
                FailurePolicy::KeepGoing => {
                    tracing::warn!(%step, ?code, "Step failed, continuing");
                }
            }
        }
    }

    Ok(reports)
}

async fn run_step<R: CommandRunner>(
    runner: &R,
    config: &Config,
    step: Step,
) -> Result<(), SetupError> {
    if step == Step::EnsureSuperuser {
        superuser::ensure_superuser(runner, config).await?;
        return Ok(());
    }

    let output = runner.run(&step.command(config), OutputMode::Inherit).await?;
    if output.success() {
        Ok(())
    } else {
        Err(SetupError::StepFailed {
            step,
            code: output.code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StepOutput;
    use crate::steps::CommandSpec;
    use std::ffi::OsString;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records every invocation and fails the ones whose args contain `fail_on`.
    struct RecordingRunner {
        calls: Mutex<Vec<CommandSpec>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingRunner {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on,
            }
        }

        fn invoked_args(&self) -> Vec<Vec<OsString>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|spec| spec.args.clone())
                .collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        async fn run(&self, spec: &CommandSpec, _: OutputMode) -> Result<StepOutput, SetupError> {
            self.calls.lock().unwrap().push(spec.clone());

            let failed = self
                .fail_on
                .is_some_and(|needle| spec.args.iter().any(|a| a == needle));
            Ok(StepOutput {
                code: Some(if failed { 2 } else { 0 }),
                stdout: "Superuser \"aseeb\" already exists\n".to_string(),
            })
        }
    }

    fn config() -> Config {
        Config::from_iter(Path::new("."), Vec::<(String, String)>::new()).unwrap()
    }

    #[tokio::test]
    async fn runs_setup_steps_in_order() {
        let runner = RecordingRunner::new(None);

        let reports = run_steps(&runner, &config(), &Step::SETUP, FailurePolicy::FailFast)
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.status == StepStatus::Succeeded));

        let args = runner.invoked_args();
        assert_eq!(args[0][..2], [OsString::from("-m"), OsString::from("pip")]);
        assert_eq!(args[1], vec![OsString::from("manage.py"), OsString::from("migrate")]);
        assert_eq!(args[2], vec![OsString::from("ensuresuperuser.py")]);
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() {
        let runner = RecordingRunner::new(Some("migrate"));

        let err = run_steps(&runner, &config(), &Step::SETUP, FailurePolicy::FailFast)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SetupError::StepFailed {
                step: Step::Migrate,
                code: Some(2)
            }
        ));
        assert_eq!(runner.invoked_args().len(), 2);
    }

    #[tokio::test]
    async fn keep_going_runs_every_step() {
        let runner = RecordingRunner::new(Some("pip"));

        let reports = run_steps(&runner, &config(), &Step::SETUP, FailurePolicy::KeepGoing)
            .await
            .unwrap();

        assert_eq!(runner.invoked_args().len(), 3);
        assert_eq!(reports[0].status, StepStatus::Failed(Some(2)));
        assert_eq!(reports[1].status, StepStatus::Succeeded);
        assert_eq!(reports[2].status, StepStatus::Succeeded);
    }
}
