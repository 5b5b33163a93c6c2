//! Development server launch and liveness checks.
//!
//! The server is the framework's own `runserver` process. This module starts
//! it, waits until its port accepts connections, and keeps it in the
//! foreground until it exits or the user presses Ctrl-C.

use crate::config::Config;
use crate::error::SetupError;
use crate::steps::Step;
use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::time::{Instant, sleep};

/// Delay between readiness probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on a single connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Launch the development server and keep it in the foreground.
///
/// # Flow
///
/// 1. Refuse to start if the port is already taken
/// 2. Spawn `python manage.py runserver host:port`
/// 3. Probe the port until it accepts a TCP connection
/// 4. Print the startup banner
/// 5. Wait for the server to exit, or for Ctrl-C (which stops it)
///
/// # Errors
///
/// - `PortInUse`: something already listens on the port
/// - `Spawn`: the interpreter could not be started
/// - `StepFailed`: the server exited before becoming ready, or exited non-zero later
/// - `ServerNotReady`: the port never opened within `ready_timeout_secs`
///   (the server process is stopped first)
pub async fn serve(config: &Config) -> Result<(), SetupError> {
    let addr = config.probe_address();
    if port_in_use(addr).await {
        return Err(SetupError::PortInUse(addr));
    }

    let spec = Step::RunServer.command(config);
    tracing::info!(command = %spec, "Starting development server");

    let mut child = spec
        .to_command()
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SetupError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

    let timeout = Duration::from_secs(config.ready_timeout_secs);

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| SetupError::io(&config.project_dir, e))?;
            return Err(SetupError::StepFailed { step: Step::RunServer, code: status.code() });
        }
        ready = wait_until_ready(addr, timeout) => {
            if let Err(e) = ready {
                stop(&mut child).await;
                return Err(e);
            }
        }
    }

    println!();
    println!("Server running at {}", config.public_url());
    println!("Admin panel:      {}/admin/", config.public_url());
    println!("Press Ctrl+C to stop.");
    tracing::info!(%addr, "Development server is accepting connections");

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| SetupError::io(&config.project_dir, e))?;
            if status.success() {
                Ok(())
            } else {
                Err(SetupError::StepFailed { step: Step::RunServer, code: status.code() })
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping development server");
            stop(&mut child).await;
            Ok(())
        }
    }
}

async fn stop(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to stop development server");
    }
}

/// Poll `addr` until it accepts a TCP connection.
///
/// # Errors
///
/// Returns `ServerNotReady` once `timeout` has elapsed without a connection.
pub async fn wait_until_ready(addr: SocketAddr, timeout: Duration) -> Result<(), SetupError> {
    let deadline = Instant::now() + timeout;

    loop {
        let attempt = deadline
            .saturating_duration_since(Instant::now())
            .min(CONNECT_TIMEOUT);
        match tokio::time::timeout(attempt, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => tracing::trace!(%addr, error = %e, "Server not ready yet"),
            Err(_) => tracing::trace!(%addr, "Connect attempt timed out"),
        }

        if Instant::now() >= deadline {
            return Err(SetupError::ServerNotReady { addr, timeout });
        }
        sleep(PROBE_INTERVAL).await;
    }
}

/// Whether something is already listening on `addr`.
pub async fn port_in_use(addr: SocketAddr) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Issue one HTTP GET against the server.
///
/// Any HTTP response counts as a live server, whatever its status. The
/// status code is returned for display.
///
/// # Timeout
///
/// 5 seconds, so an unresponsive listener cannot hang the check.
pub async fn smoke_check(url: &url::Url) -> Result<u16, SetupError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let response = client.get(url.clone()).send().await?;
    Ok(response.status().as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn ready_once_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        wait_until_ready(addr, Duration::from_secs(2)).await.unwrap();
        assert!(port_in_use(addr).await);
    }

    #[tokio::test]
    async fn ready_after_late_bind() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let binder = tokio::spawn(async move {
            sleep(Duration::from_millis(400)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            sleep(Duration::from_secs(2)).await;
            drop(listener);
        });

        wait_until_ready(addr, Duration::from_secs(5)).await.unwrap();
        binder.abort();
    }

    #[tokio::test]
    async fn times_out_when_nothing_listens() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let err = wait_until_ready(addr, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::ServerNotReady { .. }));
        assert!(!port_in_use(addr).await);
    }

    #[tokio::test]
    async fn unreachable_address_respects_deadline() {
        // Non-routable: connects either hang or fail immediately
        let addr: SocketAddr = "10.255.255.1:9".parse().unwrap();
        let started = Instant::now();

        let err = wait_until_ready(addr, Duration::from_millis(300))
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::ServerNotReady { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn smoke_check_accepts_any_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(|| async { StatusCode::NOT_FOUND }));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let url = url::Url::parse(&format!("http://{}/", addr)).unwrap();
        assert_eq!(smoke_check(&url).await.unwrap(), 404);
    }

    #[cfg(unix)]
    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Config whose `runserver` step is `sh <dir>/manage.sh runserver ...`.
    #[cfg(unix)]
    fn scripted_server(dir: &std::path::Path, body: &str, port: u16, ready_secs: u64) -> Config {
        let script = dir.join("manage.sh");
        std::fs::write(&script, body).unwrap();
        Config::from_iter(
            dir,
            vec![
                ("LAPO_SETUP_PYTHON".to_string(), "sh".to_string()),
                (
                    "LAPO_SETUP_MANAGE_SCRIPT".to_string(),
                    script.display().to_string(),
                ),
                ("LAPO_SETUP_SERVER_PORT".to_string(), port.to_string()),
                (
                    "LAPO_SETUP_READY_TIMEOUT_SECS".to_string(),
                    ready_secs.to_string(),
                ),
            ],
        )
        .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_exiting_early_reports_its_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = scripted_server(dir.path(), "exit 4\n", free_port().await, 5);

        let err = serve(&config).await.unwrap_err();

        assert!(matches!(
            err,
            SetupError::StepFailed { step: Step::RunServer, code: Some(4) }
        ));
        assert_eq!(err.exit_code(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_that_never_listens_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("server.pid");
        let body = format!("echo $$ > \"{}\"\nexec sleep 30\n", pid_file.display());
        let config = scripted_server(dir.path(), &body, free_port().await, 1);

        let err = serve(&config).await.unwrap_err();
        assert!(matches!(err, SetupError::ServerNotReady { .. }));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .status()
            .unwrap();
        assert!(!alive.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn busy_port_is_refused_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let marker = dir.path().join("started");
        let body = format!("touch \"{}\"\n", marker.display());
        let config = scripted_server(dir.path(), &body, addr.port(), 5);

        let err = serve(&config).await.unwrap_err();

        assert!(matches!(err, SetupError::PortInUse(busy) if busy == addr));
        assert_eq!(err.exit_code(), 69);
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_runs_until_it_exits() {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port().await;
        let marker = dir.path().join("started");
        let body = format!(
            "printf '%s\\n' \"$*\" > \"{}\"\nsleep 2\nexit 0\n",
            marker.display()
        );
        let config = scripted_server(dir.path(), &body, port, 5);

        // Stands in for the listener the real framework would open
        let started = marker.clone();
        let binder = tokio::spawn(async move {
            while !started.exists() {
                sleep(Duration::from_millis(50)).await;
            }
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            sleep(Duration::from_secs(3)).await;
            drop(listener);
        });

        serve(&config).await.unwrap();
        binder.abort();

        let args = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(args.trim(), format!("runserver 127.0.0.1:{}", port));
    }
}
