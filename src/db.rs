//! Read-only database inspection.
//!
//! Schema changes are always applied by the framework's own migration
//! command. This module only looks at the result, for diagnostics:
//! - Locating the database from the environment file
//! - Counting applied migrations
//! - Checking that the admin account exists exactly once

use crate::error::SetupError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database file the framework uses when `DATABASE_URL` is not set.
const DEFAULT_SQLITE_FILE: &str = "db.sqlite3";

/// Where the backend keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// SQLite file, already resolved against the project directory.
    Sqlite(PathBuf),
    /// PostgreSQL connection URL.
    Postgres(String),
}

impl fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::Sqlite(path) => write!(f, "sqlite {}", path.display()),
            DatabaseTarget::Postgres(url) => match url::Url::parse(url) {
                Ok(url) => write!(
                    f,
                    "postgres {}{}",
                    url.host_str().unwrap_or("localhost"),
                    url.path()
                ),
                Err(_) => f.write_str("postgres"),
            },
        }
    }
}

/// Inspection pool for either supported backend.
pub enum InspectionPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl InspectionPool {
    pub async fn close(&self) {
        match self {
            InspectionPool::Sqlite(pool) => pool.close().await,
            InspectionPool::Postgres(pool) => pool.close().await,
        }
    }
}

/// Work out which database the backend will use.
///
/// # Resolution
///
/// - `DATABASE_URL` from the environment file, when present and non-empty
/// - otherwise `<project_dir>/db.sqlite3`
///
/// In `sqlite:///relative/path` URLs, relative paths are resolved against
/// `project_dir`; `sqlite:////abs/path` is kept as is.
///
/// # Errors
///
/// `UnsupportedDatabase` for any scheme other than sqlite or postgres, and
/// for in-memory SQLite (another process's memory cannot be inspected).
pub fn resolve_database(
    env: &[(String, String)],
    project_dir: &Path,
) -> Result<DatabaseTarget, SetupError> {
    let configured = env
        .iter()
        .find(|(key, value)| key == "DATABASE_URL" && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string());

    let Some(url) = configured else {
        return Ok(DatabaseTarget::Sqlite(project_dir.join(DEFAULT_SQLITE_FILE)));
    };

    let scheme = url.split_once("://").map(|(scheme, _)| scheme).unwrap_or("");
    match scheme {
        "postgres" | "postgresql" => {
            url::Url::parse(&url)
                .map_err(|e| SetupError::UnsupportedDatabase(format!("{} ({})", scheme, e)))?;
            Ok(DatabaseTarget::Postgres(url))
        }
        "sqlite" => {
            // sqlite:///db.sqlite3 is relative, sqlite:////abs/db.sqlite3 is absolute
            let rest = &url["sqlite://".len()..];
            let path = rest.strip_prefix('/').unwrap_or(rest);
            if path.is_empty() || path == ":memory:" {
                return Err(SetupError::UnsupportedDatabase(
                    "in-memory sqlite".to_string(),
                ));
            }
            Ok(DatabaseTarget::Sqlite(project_dir.join(path)))
        }
        other => Err(SetupError::UnsupportedDatabase(other.to_string())),
    }
}

/// Open a small inspection pool.
///
/// SQLite files are opened by path, read-only, and never created, so a
/// missing file shows up as a connection error rather than an empty database.
pub async fn connect(target: &DatabaseTarget) -> Result<InspectionPool, SetupError> {
    let pool = match target {
        DatabaseTarget::Sqlite(path) => {
            let options = SqliteConnectOptions::new()
                .filename(path)
                .read_only(true)
                .create_if_missing(false);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(5))
                .connect_with(options)
                .await?;
            InspectionPool::Sqlite(pool)
        }
        DatabaseTarget::Postgres(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await?;
            InspectionPool::Postgres(pool)
        }
    };
    Ok(pool)
}

/// Number of rows in the framework's migration ledger.
pub async fn applied_migrations(pool: &InspectionPool) -> Result<i64, SetupError> {
    const QUERY: &str = "SELECT COUNT(*) FROM django_migrations";

    let count = match pool {
        InspectionPool::Sqlite(pool) => {
            sqlx::query_scalar::<_, i64>(QUERY).fetch_one(pool).await?
        }
        InspectionPool::Postgres(pool) => {
            sqlx::query_scalar::<_, i64>(QUERY).fetch_one(pool).await?
        }
    };
    Ok(count)
}

/// Number of superuser accounts with the given username.
///
/// After provisioning this should be exactly one.
pub async fn superuser_count(pool: &InspectionPool, username: &str) -> Result<i64, SetupError> {
    let count = match pool {
        InspectionPool::Sqlite(pool) => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM auth_user WHERE username = ? AND is_superuser",
            )
            .bind(username)
            .fetch_one(pool)
            .await?
        }
        InspectionPool::Postgres(pool) => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM auth_user WHERE username = $1 AND is_superuser",
            )
            .bind(username)
            .fetch_one(pool)
            .await?
        }
    };
    Ok(count)
}
