//! Setup tool configuration.
//!
//! Configuration is read from `LAPO_SETUP_*` environment variables using the
//! `envy` crate. The same variables may also be placed in the project's own
//! `.env` file. Only the prefixed entries are read from it; the backend's
//! settings in that file never reach this process or the steps it runs.

use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Prefix shared by every setup variable (`LAPO_SETUP_SERVER_PORT`, ...).
pub const ENV_PREFIX: &str = "LAPO_SETUP_";

/// Setup configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `LAPO_SETUP_PYTHON`: interpreter used for every step, defaults to `python`
/// - `LAPO_SETUP_ENV_FILE` / `LAPO_SETUP_ENV_TEMPLATE`: `.env` and `.env.example`
/// - `LAPO_SETUP_REQUIREMENTS`: dependency manifest, defaults to `requirements.txt`
/// - `LAPO_SETUP_MANAGE_SCRIPT`: framework entry point, defaults to `manage.py`
/// - `LAPO_SETUP_SUPERUSER_SCRIPT`: provisioning script, defaults to `ensuresuperuser.py`
/// - `LAPO_SETUP_SERVER_HOST` / `LAPO_SETUP_SERVER_PORT`: dev server bind, `127.0.0.1:8000`
/// - `LAPO_SETUP_ADMIN_USERNAME`: account the provisioning script ensures, `aseeb`
/// - `LAPO_SETUP_READY_TIMEOUT_SECS`: how long to wait for the server port, `30`
///
/// All file paths are relative to `project_dir` unless absolute.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend checkout the tool operates on. Set from the command line.
    #[serde(skip)]
    pub project_dir: PathBuf,

    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,

    #[serde(default = "default_env_template")]
    pub env_template: PathBuf,

    #[serde(default = "default_requirements")]
    pub requirements: PathBuf,

    #[serde(default = "default_manage_script")]
    pub manage_script: PathBuf,

    #[serde(default = "default_superuser_script")]
    pub superuser_script: PathBuf,

    #[serde(default = "default_host")]
    pub server_host: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_admin_username")]
    pub admin_username: String,

    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

fn default_python() -> String {
    "python".to_string()
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_env_template() -> PathBuf {
    PathBuf::from(".env.example")
}

fn default_requirements() -> PathBuf {
    PathBuf::from("requirements.txt")
}

fn default_manage_script() -> PathBuf {
    PathBuf::from("manage.py")
}

fn default_superuser_script() -> PathBuf {
    PathBuf::from("ensuresuperuser.py")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// The dev server port the backend has always been served on.
fn default_port() -> u16 {
    8000
}

fn default_admin_username() -> String {
    "aseeb".to_string()
}

fn default_ready_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration for the backend checkout at `project_dir`.
    ///
    /// `LAPO_SETUP_*` entries of the project's `.env` (if it exists yet) are
    /// merged under the process environment, so variables set in the shell
    /// win. The process environment itself is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed into its
    /// expected type (e.g. a non-numeric `LAPO_SETUP_SERVER_PORT`).
    pub fn load(project_dir: &Path) -> Result<Self, envy::Error> {
        let mut vars: HashMap<String, String> = dotenv_setup_vars(&project_dir.join(".env"));
        vars.extend(std::env::vars());
        Self::from_iter(project_dir, vars)
    }

    /// Deserialize configuration from an explicit set of variables.
    pub fn from_iter<I>(project_dir: &Path, vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = envy::prefixed(ENV_PREFIX).from_iter::<_, Config>(vars)?;
        config.project_dir = project_dir.to_path_buf();
        Ok(config)
    }

    /// Resolve a configured path against the project directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn env_path(&self) -> PathBuf {
        self.resolve(&self.env_file)
    }

    pub fn template_path(&self) -> PathBuf {
        self.resolve(&self.env_template)
    }

    /// `host:port` passed to the framework's `runserver` command.
    ///
    /// IPv6 literals are bracketed (`[::1]:8000`).
    pub fn bind_address(&self) -> String {
        match self.host_ip() {
            Some(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.server_port),
            _ => format!("{}:{}", self.server_host, self.server_port),
        }
    }

    /// Socket address the readiness probe connects to.
    ///
    /// Wildcard hosts and hostnames are probed through loopback.
    pub fn probe_address(&self) -> SocketAddr {
        let ip = match self.host_ip() {
            Some(IpAddr::V4(ip)) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(IpAddr::V6(ip)) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            Some(ip) => ip,
            None => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        SocketAddr::new(ip, self.server_port)
    }

    /// `server_host` as an IP literal, brackets allowed.
    fn host_ip(&self) -> Option<IpAddr> {
        let host = self.server_host.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        host.parse().ok()
    }

    /// URL shown in the startup banner.
    pub fn public_url(&self) -> String {
        format!("http://localhost:{}", self.server_port)
    }
}

/// `LAPO_SETUP_*` entries of a dotenv file. Missing or unreadable files
/// contribute nothing.
fn dotenv_setup_vars(path: &Path) -> HashMap<String, String> {
    let Ok(iter) = dotenvy::from_path_iter(path) else {
        return HashMap::new();
    };
    iter.filter_map(Result::ok)
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect()
}
