//! Setup diagnostics.
//!
//! `doctor` inspects a checkout without changing it and reports what a
//! developer usually has to chase by hand: missing settings, unconfigured
//! media storage, an unmigrated database, a missing admin account, or a
//! port that is already taken.

use crate::config::Config;
use crate::db;
use crate::env_file;
use crate::server;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Media storage settings the backend reads from its environment file.
const CLOUDINARY_KEYS: [&str; 3] = [
    "CLOUDINARY_CLOUD_NAME",
    "CLOUDINARY_API_KEY",
    "CLOUDINARY_API_SECRET",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub generated_at: DateTime<Utc>,
    pub checks: Vec<Check>,
}

impl DoctorReport {
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "SETUP DIAGNOSTICS")?;
        writeln!(f, "{}", "=".repeat(50))?;
        for check in &self.checks {
            let mark = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Warn => "!",
                CheckStatus::Fail => "✗",
            };
            writeln!(f, "{} {:<22} {}", mark, check.name, check.detail)?;
        }
        write!(f, "{}", "=".repeat(50))
    }
}

/// Show only the last four characters of a secret.
pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        return "NOT SET".to_string();
    }
    let tail: String = value
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", tail)
}

/// Run every check against the checkout described by `config`.
///
/// Individual check failures are recorded in the report, never returned.
pub async fn run(config: &Config) -> DoctorReport {
    let mut checks = Vec::new();
    let env_path = config.env_path();
    let template_path = config.template_path();

    let template = env_file::read_entries(&template_path).ok();
    let env = match env_file::read_entries(&env_path) {
        Ok(entries) => {
            checks.push(Check::new(
                "environment file",
                CheckStatus::Pass,
                env_path.display().to_string(),
            ));
            Some(entries)
        }
        Err(e) => {
            checks.push(Check::new(
                "environment file",
                CheckStatus::Fail,
                format!("{} (run `lapo-setup env`)", e),
            ));
            None
        }
    };

    if let (Some(template), Some(env)) = (&template, &env) {
        let missing = env_file::missing_keys(template, env);
        checks.push(if missing.is_empty() {
            Check::new("template keys", CheckStatus::Pass, "all template keys defined")
        } else {
            Check::new(
                "template keys",
                CheckStatus::Warn,
                format!("missing: {}", missing.join(", ")),
            )
        });

        if let (Ok(env_hash), Ok(template_hash)) = (
            env_file::fingerprint(&env_path).await,
            env_file::fingerprint(&template_path).await,
        ) {
            if env_hash == template_hash {
                checks.push(Check::new(
                    "customised",
                    CheckStatus::Warn,
                    "environment file is still an unedited copy of the template",
                ));
            }
        }
    }

    let env = env.unwrap_or_default();
    checks.push(cloudinary_check(&env));

    for (name, path) in [
        ("requirements", &config.requirements),
        ("manage script", &config.manage_script),
        ("superuser script", &config.superuser_script),
    ] {
        let path = config.resolve(path);
        checks.push(if path.is_file() {
            Check::new(name, CheckStatus::Pass, path.display().to_string())
        } else {
            Check::new(name, CheckStatus::Fail, format!("{} not found", path.display()))
        });
    }

    checks.extend(database_checks(config, &env).await);

    let addr = config.probe_address();
    checks.push(if server::port_in_use(addr).await {
        Check::new(
            "server port",
            CheckStatus::Warn,
            format!("{} is already in use", addr),
        )
    } else {
        Check::new("server port", CheckStatus::Pass, format!("{} is free", addr))
    });

    DoctorReport {
        generated_at: Utc::now(),
        checks,
    }
}

fn cloudinary_check(env: &[(String, String)]) -> Check {
    let lookup = |key: &str| {
        env.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default()
    };

    let cloud_name = lookup(CLOUDINARY_KEYS[0]);
    let api_key = lookup(CLOUDINARY_KEYS[1]);
    let api_secret = lookup(CLOUDINARY_KEYS[2]);

    let detail = format!(
        "cloud={} key={} secret={}",
        if cloud_name.is_empty() { "NOT SET" } else { cloud_name.as_str() },
        if api_key.is_empty() { "NOT SET" } else { api_key.as_str() },
        mask_secret(&api_secret),
    );

    let configured = [&cloud_name, &api_key, &api_secret]
        .iter()
        .all(|v| !v.is_empty());
    if configured {
        Check::new("cloudinary", CheckStatus::Pass, detail)
    } else {
        // Media falls back to local storage without these
        Check::new("cloudinary", CheckStatus::Warn, detail)
    }
}

async fn database_checks(config: &Config, env: &[(String, String)]) -> Vec<Check> {
    let target = match db::resolve_database(env, &config.project_dir) {
        Ok(target) => target,
        Err(e) => return vec![Check::new("database", CheckStatus::Fail, e.to_string())],
    };

    let pool = match db::connect(&target).await {
        Ok(pool) => pool,
        Err(e) => {
            return vec![Check::new(
                "database",
                CheckStatus::Fail,
                format!("{}: {} (run `lapo-setup migrate`)", target, e),
            )];
        }
    };

    let mut checks = Vec::new();
    match db::applied_migrations(&pool).await {
        Ok(count) => checks.push(Check::new(
            "database",
            CheckStatus::Pass,
            format!("{}: {} migrations applied", target, count),
        )),
        Err(e) => checks.push(Check::new(
            "database",
            CheckStatus::Fail,
            format!("no migration ledger: {}", e),
        )),
    }

    checks.push(match db::superuser_count(&pool, &config.admin_username).await {
        Ok(1) => Check::new(
            "superuser",
            CheckStatus::Pass,
            format!("\"{}\" exists", config.admin_username),
        ),
        Ok(0) => Check::new(
            "superuser",
            CheckStatus::Fail,
            format!(
                "\"{}\" missing (run `lapo-setup superuser`)",
                config.admin_username
            ),
        ),
        Ok(n) => Check::new(
            "superuser",
            CheckStatus::Warn,
            format!("{} accounts named \"{}\"", n, config.admin_username),
        ),
        Err(e) => Check::new("superuser", CheckStatus::Fail, e.to_string()),
    });

    pool.close().await;
    checks
}
