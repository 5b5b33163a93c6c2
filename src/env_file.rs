//! Environment file bootstrap.
//!
//! The backend reads its secrets and settings from `.env` at startup. A fresh
//! checkout only ships `.env.example`, so the first setup copies it into place.
//! An existing `.env` is never touched.

use crate::error::SetupError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// What [`ensure_env_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvFileOutcome {
    /// `.env` was missing and has been copied from the template.
    Created,
    /// `.env` already existed and was left as is.
    AlreadyPresent,
}

/// Make sure the environment file exists, copying it from the template if not.
///
/// # Behavior
///
/// - `env_path` exists: nothing is written, returns `AlreadyPresent`
/// - `env_path` missing: the template's bytes are written to `env_path`
///   unchanged, returns `Created`
///
/// The file is opened with create-new semantics, so a `.env` that appears
/// between the existence check and the write is not overwritten.
///
/// # Errors
///
/// - `TemplateMissing`: `.env` is missing and so is the template
/// - `Io`: any other read or write failure
pub async fn ensure_env_file(
    env_path: &Path,
    template_path: &Path,
) -> Result<EnvFileOutcome, SetupError> {
    if tokio::fs::try_exists(env_path)
        .await
        .map_err(|e| SetupError::io(env_path, e))?
    {
        tracing::debug!(path = %env_path.display(), "Environment file already present");
        return Ok(EnvFileOutcome::AlreadyPresent);
    }

    let contents = match tokio::fs::read(template_path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SetupError::TemplateMissing(template_path.to_path_buf()));
        }
        Err(e) => return Err(SetupError::io(template_path, e)),
    };

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(env_path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Ok(EnvFileOutcome::AlreadyPresent);
        }
        Err(e) => return Err(SetupError::io(env_path, e)),
    };

    file.write_all(&contents)
        .await
        .map_err(|e| SetupError::io(env_path, e))?;
    file.flush().await.map_err(|e| SetupError::io(env_path, e))?;

    tracing::info!(
        from = %template_path.display(),
        to = %env_path.display(),
        "Created environment file from template"
    );
    Ok(EnvFileOutcome::Created)
}

/// Parse a dotenv file into its key/value pairs, in file order.
///
/// Values are not interpolated into the process environment.
pub fn read_entries(path: &Path) -> Result<Vec<(String, String)>, SetupError> {
    let iter = dotenvy::from_path_iter(path).map_err(|e| dotenv_error(path, e))?;
    iter.map(|item| item.map_err(|e| dotenv_error(path, e)))
        .collect()
}

fn dotenv_error(path: &Path, err: dotenvy::Error) -> SetupError {
    match err {
        dotenvy::Error::Io(source) => SetupError::io(path, source),
        other => SetupError::io(
            path,
            std::io::Error::new(ErrorKind::InvalidData, other.to_string()),
        ),
    }
}

/// Keys declared in the template that the env file does not define.
pub fn missing_keys(template: &[(String, String)], env: &[(String, String)]) -> Vec<String> {
    let defined: HashSet<&str> = env.iter().map(|(key, _)| key.as_str()).collect();
    template
        .iter()
        .filter(|(key, _)| !defined.contains(key.as_str()))
        .map(|(key, _)| key.clone())
        .collect()
}

/// SHA-256 of a file's contents as lowercase hex.
pub async fn fingerprint(path: &Path) -> Result<String, SetupError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|e| SetupError::io(path, e))?;
    Ok(hex::encode(Sha256::digest(&contents)))
}
