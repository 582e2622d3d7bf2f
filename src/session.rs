use std::{future::Future, io::Write};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{
    command::CommandError,
    config::VncTunnelConfig,
    connection_log::ConnectionLog,
    credentials::CredentialInjector,
    preflight::{self, PreflightError},
    probe,
    tunneling::{
        tunnel::{ShutdownOutcome, SshTunnel, TunnelError},
        tunnel_config::SshTunnelConfig,
    },
    viewer::{self, Viewer},
};

pub const HOST_PROMPT: &str = "Intermediary host address: ";

/// Where the session is. Failures leave it on the last stage reached.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Stage {
    Init,
    PreflightOk,
    HostEntered,
    HostReachable,
    TunnelStarting,
    TunnelUp,
    VncOpened,
    PasswordSent,
    Logged,
    Running,
    Exited,
    Interrupted,
    Terminated,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// ssh went away by itself, carries its exit status
    TunnelExited(String),
    /// the operator asked us to stop
    Interrupted(ShutdownOutcome),
}

pub(crate) enum HostSource<R> {
    Given(String),
    Prompt(R),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    Preflight(PreflightError),
    #[error("the intermediary host address must be provided")]
    EmptyHost,
    #[error("cannot read the intermediary host address: {1}")]
    Prompt(std::io::Error, String),
    #[error("cannot reach the intermediary {host} on port {port}")]
    Unreachable { host: String, port: u16 },
    #[error("{0}")]
    Tunnel(TunnelError),
    #[error("cannot open the vnc viewer: {0}")]
    Viewer(CommandError, String),
}
impl From<PreflightError> for SessionError {
    fn from(err: PreflightError) -> Self {
        SessionError::Preflight(err)
    }
}
impl From<TunnelError> for SessionError {
    fn from(err: TunnelError) -> Self {
        SessionError::Tunnel(err)
    }
}
impl From<std::io::Error> for SessionError {
    fn from(value: std::io::Error) -> Self {
        let str_value = value.to_string();
        SessionError::Prompt(value, str_value)
    }
}

impl SessionError {
    /// What the operator can do about it.
    pub fn hints(&self) -> Vec<String> {
        match self {
            SessionError::Preflight(PreflightError::MissingSsh(_)) => {
                vec![String::from("make sure OpenSSH is installed and on PATH")]
            }
            SessionError::Preflight(PreflightError::MissingOpener(program)) => vec![format!(
                "make sure `{program}` is installed, or set viewer.open_program"
            )],
            SessionError::Preflight(PreflightError::PortInUse(port)) => vec![format!(
                "stop the process listening on port {port} or change local_port"
            )],
            SessionError::Unreachable { port, .. } => vec![
                String::from("check that the address is correct"),
                String::from("check that the server is powered on and reachable"),
                format!("check that sshd is listening on port {port}"),
                String::from("check the network connection"),
            ],
            SessionError::Tunnel(TunnelError::EarlyExit { .. })
            | SessionError::Tunnel(TunnelError::NotEstablished { .. }) => vec![String::from(
                "check the ssh credentials and the access permissions on the intermediary",
            )],
            SessionError::Viewer(_, url) => vec![format!("open {url} manually")],
            _ => Vec::new(),
        }
    }
}

pub(crate) struct Session<'config> {
    config: &'config VncTunnelConfig,
    viewer: Box<dyn Viewer>,
    injector: Box<dyn CredentialInjector>,
    log: ConnectionLog,
    stage: Stage,
}

impl<'config> Session<'config> {
    pub fn new(
        config: &'config VncTunnelConfig,
        viewer: Box<dyn Viewer>,
        injector: Box<dyn CredentialInjector>,
        log: ConnectionLog,
    ) -> Self {
        Session {
            config,
            viewer,
            injector,
            log,
            stage: Stage::Init,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, stage: Stage) {
        tracing::debug!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    /// Runs the whole flow and holds the tunnel open until ssh exits or `shutdown` resolves.
    pub async fn run<R, S>(
        &mut self,
        host: HostSource<R>,
        shutdown: S,
    ) -> Result<SessionOutcome, SessionError>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let config = self.config;
        println!("Checking system dependencies...");
        preflight::check(config).await?;
        self.advance(Stage::PreflightOk);

        let host = read_host(host).await?;
        self.advance(Stage::HostEntered);

        println!("Checking connectivity with {host}...");
        if !probe::is_reachable(
            &host,
            config.intermediary_port,
            config.timings.host_probe_timeout(),
        )
        .await
        {
            return Err(SessionError::Unreachable {
                host,
                port: config.intermediary_port,
            });
        }
        self.advance(Stage::HostReachable);

        println!("\nStarting ssh tunnel...");
        self.advance(Stage::TunnelStarting);
        let mut tunnel =
            SshTunnel::start(SshTunnelConfig::new(config, &host), &config.timings).await?;
        self.advance(Stage::TunnelUp);
        println!("Ssh tunnel established!");
        println!(
            "Local port {} -> {}:{}",
            config.local_port, config.target_host, config.target_port
        );

        let url = config.vnc_url();
        println!("Opening vnc viewer at {url}...");
        if let Err(e) = self.viewer.open(&url).await {
            if let Err(shutdown_err) = tunnel.shutdown(config.timings.shutdown_grace()).await {
                tracing::warn!("cannot stop the ssh tunnel: {shutdown_err}");
            }
            return Err(SessionError::Viewer(e, url));
        }
        self.advance(Stage::VncOpened);

        tokio::time::sleep(config.timings.settle_delay()).await;
        self.send_password().await;
        self.advance(Stage::PasswordSent);

        match self.log.append(&host, chrono::Local::now().naive_local()) {
            Ok(()) => println!("Host logged to {}", self.log.path().display()),
            Err(e) => {
                tracing::warn!("{e}");
                eprintln!("Could not write the connection log: {e}");
            }
        }
        self.advance(Stage::Logged);

        print_banner(config, &host);
        self.advance(Stage::Running);

        tokio::pin!(shutdown);
        // a terminal ctrl-c reaches ssh too, the interrupt must win that race
        let outcome = tokio::select! {
            biased;
            _ = &mut shutdown => {
                self.advance(Stage::Interrupted);
                println!("\nClosing ssh tunnel...");
                let outcome = tunnel.shutdown(config.timings.shutdown_grace()).await?;
                if outcome == ShutdownOutcome::Killed {
                    println!("Ssh did not stop in time and was killed.");
                }
                println!("Ssh connection closed.");
                if config.viewer.close_terminal_window {
                    viewer::close_terminal_window().await;
                }
                SessionOutcome::Interrupted(outcome)
            }
            status = tunnel.wait() => {
                self.advance(Stage::Exited);
                let status = status?;
                tracing::warn!("ssh tunnel exited on its own ({status})");
                println!("Ssh tunnel closed ({status}).");
                SessionOutcome::TunnelExited(status.to_string())
            }
        };
        self.advance(Stage::Terminated);
        Ok(outcome)
    }

    /// Best effort: every failure is reported and the session goes on.
    async fn send_password(&self) {
        if !self.injector.enabled() {
            tracing::debug!("password injection disabled");
            return;
        }
        println!("Typing the vnc password...");
        let secret = match self.config.viewer.password.resolve() {
            Ok(secret) => secret,
            Err(e) => {
                tracing::warn!("{e}");
                eprintln!("Could not load the vnc password ({e}), please type it manually.");
                return;
            }
        };
        match self.injector.inject(&secret).await {
            Ok(()) => println!("Password typed."),
            Err(e) => {
                tracing::warn!("password injection failed: {e}");
                eprintln!("Could not type the password ({e}), please type it manually.");
                eprintln!(
                    "Hint: the terminal needs accessibility access (System Settings > Privacy & Security > Accessibility)."
                );
            }
        }
    }
}

async fn read_host<R>(source: HostSource<R>) -> Result<String, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let raw = match source {
        HostSource::Given(host) => host,
        HostSource::Prompt(mut input) => {
            print!("{HOST_PROMPT}");
            std::io::stdout().flush()?;
            let mut line = String::new();
            input.read_line(&mut line).await?;
            line
        }
    };
    let host = raw.trim();
    if host.is_empty() {
        return Err(SessionError::EmptyHost);
    }
    Ok(host.to_string())
}

fn print_banner(config: &VncTunnelConfig, host: &str) {
    let rule = "=".repeat(50);
    println!("\n{rule}");
    println!("SSH/VNC TUNNEL ACTIVE");
    println!("{rule}");
    println!("Press CTRL+C to close it.");
    println!(
        "Connection: {host} -> {}:{}",
        config.target_host, config.target_port
    );
    println!("{rule}");
}
