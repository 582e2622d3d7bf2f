use std::process::ExitCode;

use clap::Parser;
use cli::VncTunnelCli;
use config::VncTunnelConfig;
use connection_log::ConnectionLog;
use session::{HostSource, Session, SessionOutcome};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;
use viewer::SystemViewer;

mod cli;
mod command;
mod config;
mod connection_log;
mod credentials;
mod preflight;
mod probe;
mod session;
#[cfg(all(test, unix))]
mod test_support;
mod tunneling;
mod viewer;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vnc_tunnel={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = VncTunnelCli::parse();
    init_tracing(cli.verbose);

    let config = match VncTunnelConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut session = Session::new(
        &config,
        Box::new(SystemViewer::new(&config.viewer.open_program)),
        credentials::get_injector(config.viewer.injector),
        ConnectionLog::new(config.log_path()),
    );
    let host = match cli.host {
        Some(host) => HostSource::Given(host),
        None => HostSource::Prompt(BufReader::new(tokio::io::stdin())),
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for ctrl-c: {e}");
            futures::future::pending::<()>().await;
        }
    };

    match session.run(host, interrupt).await {
        Ok(outcome) => {
            match outcome {
                SessionOutcome::Interrupted(how) => tracing::info!("session interrupted: {how:?}"),
                SessionOutcome::TunnelExited(status) => {
                    tracing::info!("session ended, ssh exited with {status}")
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::debug!("session failed at {:?}", session.stage());
            eprintln!("Error: {e}");
            for hint in e.hints() {
                eprintln!("  - {hint}");
            }
            ExitCode::FAILURE
        }
    }
}
