use std::{
    process::{ExitStatus, Stdio},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    process::{Child, Command},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    config::Timings,
    probe::{self, Backoff},
};

use super::{ssh_output, tunnel_config::SshTunnelConfig};

/// How long an exited ssh gets to flush its stderr before we give up on it.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A running `ssh -N -L ...` process. The process never outlives this handle.
pub(crate) struct SshTunnel {
    config: SshTunnelConfig,
    process: Child,
    stderr_tail: Option<JoinHandle<String>>,
}
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("cannot start {1}: {2}")]
    Spawn(std::io::Error, String, String),
    #[error("ssh exited before the tunnel came up ({status}): {stderr}")]
    EarlyExit { status: String, stderr: String },
    #[error("ssh tunnel not established, local port {port} still closed after {waited:?}")]
    NotEstablished { port: u16, waited: Duration },
    #[error("io error: {1}")]
    Io(std::io::Error, String),
}
impl From<std::io::Error> for TunnelError {
    fn from(value: std::io::Error) -> Self {
        let str = value.to_string();
        Self::Io(value, str)
    }
}
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ShutdownOutcome {
    /// ssh was already gone
    AlreadyExited,
    /// ssh exited within the grace period after SIGTERM
    Terminated,
    /// ssh ignored SIGTERM and got killed
    Killed,
}

impl SshTunnel {
    /// Spawns ssh and waits until the forwarded port accepts connections.
    /// On failure the process is shut down before returning.
    pub async fn start(config: SshTunnelConfig, timings: &Timings) -> Result<Self, TunnelError> {
        let mut tunnel = Self::spawn(config)?;
        if let Err(e) = tunnel.wait_ready(timings).await {
            if let Err(shutdown_err) = tunnel.shutdown(timings.shutdown_grace()).await {
                tracing::warn!("cannot stop the failed ssh tunnel: {shutdown_err}");
            }
            return Err(e);
        }
        Ok(tunnel)
    }

    pub fn spawn(config: SshTunnelConfig) -> Result<Self, TunnelError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            "starting ssh tunnel: localhost:{} -> {}:{} via {}",
            config.local_port,
            config.target_host,
            config.target_port,
            config.destination()
        );
        tracing::debug!("full ssh command: {:?}", cmd);

        let mut process = cmd.spawn().map_err(|e| {
            let str = e.to_string();
            TunnelError::Spawn(e, config.program.clone(), str)
        })?;
        let stderr_tail = process
            .stderr
            .take()
            .map(|stderr| ssh_output::spawn_drain(stderr, config.destination()));
        Ok(SshTunnel {
            config,
            process,
            stderr_tail,
        })
    }

    /// Polls, with backoff, until the local port is open, ssh dies or the deadline passes.
    pub async fn wait_ready(&mut self, timings: &Timings) -> Result<(), TunnelError> {
        let start = Instant::now();
        // absurd timeouts mean "wait for as long as ssh stays alive"
        let deadline = start
            .checked_add(timings.ready_timeout())
            .unwrap_or_else(|| start + FAR_FUTURE);
        let mut backoff = Backoff::new(timings.initial_backoff(), timings.max_backoff());
        loop {
            if let Some(status) = self.process.try_wait()? {
                let stderr = self.take_stderr_tail().await;
                return Err(TunnelError::EarlyExit {
                    status: status.to_string(),
                    stderr: if stderr.is_empty() {
                        String::from("no error output")
                    } else {
                        stderr
                    },
                });
            }
            if probe::is_reachable(
                "localhost",
                self.config.local_port,
                timings.local_probe_timeout(),
            )
            .await
            {
                tracing::info!(
                    "ssh tunnel established: localhost:{} -> {}",
                    self.config.local_port,
                    self.config.forward_spec()
                );
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TunnelError::NotEstablished {
                    port: self.config.local_port,
                    waited: timings.ready_timeout(),
                });
            }
            tokio::time::sleep(backoff.next_delay().min(deadline - now)).await;
        }
    }

    async fn take_stderr_tail(&mut self) -> String {
        let Some(handle) = self.stderr_tail.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_FLUSH_TIMEOUT, handle).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(e)) => {
                tracing::debug!("ssh stderr task failed: {e}");
                String::new()
            }
            Err(_) => String::new(),
        }
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    /// Resolves when ssh exits on its own. Cancel safe.
    pub async fn wait(&mut self) -> Result<ExitStatus, TunnelError> {
        Ok(self.process.wait().await?)
    }

    /// SIGTERM first, SIGKILL once `grace` has passed.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ShutdownOutcome, TunnelError> {
        if self.process.try_wait()?.is_some() {
            return Ok(ShutdownOutcome::AlreadyExited);
        }
        tracing::debug!("shutting down ssh tunnel to {}", self.config.destination());
        self.terminate()?;
        match tokio::time::timeout(grace, self.process.wait()).await {
            Ok(status) => {
                tracing::info!("ssh tunnel closed ({})", status?);
                Ok(ShutdownOutcome::Terminated)
            }
            Err(_) => {
                tracing::warn!("ssh ignored SIGTERM for {grace:?}, killing it");
                self.process.kill().await?;
                Ok(ShutdownOutcome::Killed)
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<(), TunnelError> {
        if let Some(pid) = self.process.id() {
            // SAFETY: the pid belongs to our child, which has not been reaped yet
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<(), TunnelError> {
        Ok(self.process.start_kill()?)
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.process.start_kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use tokio::net::TcpListener;

    use super::*;
    use crate::{
        config::VncTunnelConfig,
        test_support::{fake_program, free_port, wait_for_file},
    };

    fn timings() -> Timings {
        Timings {
            local_probe_timeout_ms: 200,
            ready_timeout_ms: 3_000,
            initial_backoff_ms: 20,
            max_backoff_ms: 200,
            shutdown_grace_ms: 2_000,
            ..Timings::default()
        }
    }

    fn tunnel_config(dir: &Path, body: &str, local_port: u16) -> SshTunnelConfig {
        let mut base = VncTunnelConfig::default();
        base.local_port = local_port;
        base.ssh_program = fake_program(dir, "ssh", body).display().to_string();
        SshTunnelConfig::new(&base, "127.0.0.1")
    }

    #[tokio::test]
    async fn early_exit_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port().await;
        let config = tunnel_config(
            dir.path(),
            "echo 'gdlocal@127.0.0.1: Permission denied (publickey).' >&2\nexit 255",
            port,
        );
        let result = SshTunnel::start(config, &timings()).await;
        match result {
            Err(TunnelError::EarlyExit { status, stderr }) => {
                assert!(status.contains("255"), "status: {status}");
                assert!(stderr.contains("Permission denied"), "stderr: {stderr}");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("tunnel should not come up"),
        }
    }

    #[tokio::test]
    async fn ready_once_local_port_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = tunnel_config(dir.path(), "exec sleep 30", port);

        let mut tunnel = SshTunnel::start(config, &timings()).await.unwrap();
        assert!(tunnel.is_alive());
        let outcome = tunnel.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Terminated);
        assert!(!tunnel.is_alive());
    }

    #[tokio::test]
    async fn huge_ready_timeout_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = tunnel_config(dir.path(), "exec sleep 30", port);
        let mut timings = timings();
        timings.ready_timeout_ms = u64::MAX;
        timings.max_backoff_ms = u64::MAX;

        let mut tunnel = SshTunnel::start(config, &timings).await.unwrap();
        tunnel.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_local_port_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port().await;
        let config = tunnel_config(dir.path(), "exec sleep 30", port);
        let mut timings = timings();
        timings.ready_timeout_ms = 300;

        let result = SshTunnel::start(config, &timings).await;
        assert!(matches!(
            result,
            Err(TunnelError::NotEstablished { port: p, .. }) if p == port
        ));
    }

    #[tokio::test]
    async fn shutdown_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("trapped");
        let body = format!(
            "trap '' TERM\ntouch '{}'\nwhile :; do sleep 0.1; done",
            marker.display()
        );
        let config = tunnel_config(dir.path(), &body, free_port().await);

        let mut tunnel = SshTunnel::spawn(config).unwrap();
        wait_for_file(&marker).await;
        let outcome = tunnel.shutdown(Duration::from_millis(300)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Killed);
        assert!(!tunnel.is_alive());
    }

    #[tokio::test]
    async fn shutdown_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let config = tunnel_config(dir.path(), "exit 0", free_port().await);

        let mut tunnel = SshTunnel::spawn(config).unwrap();
        let status = tunnel.wait().await.unwrap();
        assert!(status.success());
        let outcome = tunnel.shutdown(Duration::from_millis(300)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::AlreadyExited);
    }

    #[tokio::test]
    async fn dropping_the_handle_kills_ssh() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let body = format!("echo $$ > '{}.tmp'\nmv '{0}.tmp' '{0}'\nexec sleep 30", pid_file.display());
        let config = tunnel_config(dir.path(), &body, free_port().await);

        let tunnel = SshTunnel::spawn(config).unwrap();
        wait_for_file(&pid_file).await;
        let pid: libc::pid_t = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(unsafe { libc::kill(pid, 0) }, 0);

        drop(tunnel);
        // tokio reaps killed children in the background
        tokio::time::timeout(Duration::from_secs(5), async {
            while unsafe { libc::kill(pid, 0) } == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("ssh outlived its handle");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let mut base = VncTunnelConfig::default();
        base.ssh_program = String::from("/nonexistent/ssh");
        let result = SshTunnel::spawn(SshTunnelConfig::new(&base, "127.0.0.1"));
        assert!(matches!(result, Err(TunnelError::Spawn(..))));
    }
}
