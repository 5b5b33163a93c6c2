//! Error types and process exit code mapping.
//!
//! Every failure the setup tool can hit is a [`SetupError`]. The binary turns
//! it into a log line and an exit code, the same way an HTTP service would
//! turn its error type into a status code.

use crate::steps::Step;
use std::path::PathBuf;
use std::time::Duration;

/// Tool-wide error type.
///
/// # Error Categories
///
/// - **Configuration Errors**: malformed `LAPO_SETUP_*` variables
/// - **Filesystem Errors**: the env file or its template cannot be read/written
/// - **Process Errors**: an external step could not be started or exited non-zero
/// - **Server Errors**: the dev server never started accepting connections
/// - **Inspection Errors**: database or HTTP checks used by diagnostics
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] envy::Error),

    /// Filesystem operation on a known path failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `.env` is missing and there is no template to copy it from.
    #[error("Environment template not found: {}", .0.display())]
    TemplateMissing(PathBuf),

    /// The interpreter (or another program) could not be launched at all.
    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external step ran and exited unsuccessfully.
    ///
    /// `code` is `None` when the process was terminated by a signal.
    #[error("{step} failed ({})", describe_exit(*.code))]
    StepFailed { step: Step, code: Option<i32> },

    /// Something else already listens where the dev server should bind.
    #[error("Port {0} is already in use; stop the other server or pass --port")]
    PortInUse(std::net::SocketAddr),

    #[error("Server did not accept connections on {addr} within {}s", .timeout.as_secs())]
    ServerNotReady {
        addr: std::net::SocketAddr,
        timeout: Duration,
    },

    #[error("Unsupported database URL scheme: {0}")]
    UnsupportedDatabase(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl SetupError {
    /// Process exit code for this error.
    ///
    /// # Mapping
    ///
    /// - `StepFailed` → the step's own exit code (1 if killed by a signal)
    /// - `Config` → 78 (EX_CONFIG)
    /// - `TemplateMissing` / `Io` → 74 (EX_IOERR)
    /// - `Spawn` → 127, as a shell reports a missing command
    /// - `PortInUse` / `ServerNotReady` / `Http` → 69 (EX_UNAVAILABLE)
    /// - `UnsupportedDatabase` / `Database` → 70 (EX_SOFTWARE)
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::StepFailed { code, .. } => code.filter(|c| *c != 0).unwrap_or(1),
            SetupError::Config(_) => 78,
            SetupError::TemplateMissing(_) | SetupError::Io { .. } => 74,
            SetupError::Spawn { .. } => 127,
            SetupError::PortInUse(_) | SetupError::ServerNotReady { .. } | SetupError::Http(_) => {
                69
            }
            SetupError::UnsupportedDatabase(_) | SetupError::Database(_) => 70,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SetupError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_step_propagates_its_exit_code() {
        let err = SetupError::StepFailed {
            step: Step::Migrate,
            code: Some(3),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.to_string(), "Apply migrations failed (exit code 3)");
    }

    #[test]
    fn signalled_step_exits_with_one() {
        let err = SetupError::StepFailed {
            step: Step::RunServer,
            code: None,
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn missing_interpreter_looks_like_missing_command() {
        let err = SetupError::Spawn {
            program: "python".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.exit_code(), 127);
    }
}
