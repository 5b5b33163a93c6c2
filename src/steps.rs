//! The external setup steps and the command line each one runs.
//!
//! Every step is an opaque process. The tool only knows how to start it and
//! whether it exited successfully.

use crate::config::Config;
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

/// One external step of the setup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// `python -m pip install -r requirements.txt`
    InstallDependencies,
    /// `python manage.py migrate`
    Migrate,
    /// `python ensuresuperuser.py`
    EnsureSuperuser,
    /// `python manage.py runserver host:port`
    RunServer,
}

impl Step {
    /// Full first-time setup, minus the blocking server launch.
    pub const SETUP: [Step; 3] = [Step::InstallDependencies, Step::Migrate, Step::EnsureSuperuser];

    /// Quick start for a checkout whose dependencies are already installed.
    pub const START: [Step; 1] = [Step::Migrate];

    /// Build the command line for this step.
    pub fn command(self, config: &Config) -> CommandSpec {
        let args: Vec<OsString> = match self {
            Step::InstallDependencies => vec![
                "-m".into(),
                "pip".into(),
                "install".into(),
                "-r".into(),
                config.requirements.clone().into_os_string(),
            ],
            Step::Migrate => vec![config.manage_script.clone().into_os_string(), "migrate".into()],
            Step::EnsureSuperuser => vec![config.superuser_script.clone().into_os_string()],
            Step::RunServer => vec![
                config.manage_script.clone().into_os_string(),
                "runserver".into(),
                config.bind_address().into(),
            ],
        };

        CommandSpec {
            program: config.python.clone(),
            args,
            current_dir: config.project_dir.clone(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::InstallDependencies => "Install dependencies",
            Step::Migrate => "Apply migrations",
            Step::EnsureSuperuser => "Ensure superuser",
            Step::RunServer => "Run development server",
        };
        f.write_str(label)
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub current_dir: PathBuf,
}

impl CommandSpec {
    /// Build a `tokio` command for this invocation.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).current_dir(&self.current_dir);
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config() -> Config {
        Config::from_iter(Path::new("/srv/backend"), Vec::<(String, String)>::new()).unwrap()
    }

    #[test]
    fn commands_run_through_configured_interpreter() {
        let config = config();

        assert_eq!(
            Step::InstallDependencies.command(&config).to_string(),
            "python -m pip install -r requirements.txt"
        );
        assert_eq!(
            Step::Migrate.command(&config).to_string(),
            "python manage.py migrate"
        );
        assert_eq!(
            Step::EnsureSuperuser.command(&config).to_string(),
            "python ensuresuperuser.py"
        );
        assert_eq!(
            Step::RunServer.command(&config).to_string(),
            "python manage.py runserver 127.0.0.1:8000"
        );
    }

    #[test]
    fn commands_run_in_project_dir() {
        let spec = Step::Migrate.command(&config());
        assert_eq!(spec.current_dir, PathBuf::from("/srv/backend"));
    }

    #[test]
    fn setup_sequence_order() {
        assert_eq!(
            Step::SETUP,
            [Step::InstallDependencies, Step::Migrate, Step::EnsureSuperuser]
        );
    }
}
