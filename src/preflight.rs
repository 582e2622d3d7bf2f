use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{config::VncTunnelConfig, probe};

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("ssh client `{0}` is not available")]
    MissingSsh(String),
    #[error("vnc opener `{0}` is not available")]
    MissingOpener(String),
    #[error("local port {0} is already in use by another process")]
    PortInUse(u16),
}

/// Checks, in order, the ssh client, the url opener and the local port.
pub async fn check(config: &VncTunnelConfig) -> Result<(), PreflightError> {
    let ssh = resolve_program(&config.ssh_program)
        .ok_or_else(|| PreflightError::MissingSsh(config.ssh_program.clone()))?;
    tracing::debug!("ssh client: {}", ssh.display());

    let opener = resolve_program(&config.viewer.open_program)
        .ok_or_else(|| PreflightError::MissingOpener(config.viewer.open_program.clone()))?;
    tracing::debug!("vnc opener: {}", opener.display());

    if probe::is_reachable(
        "localhost",
        config.local_port,
        config.timings.local_probe_timeout(),
    )
    .await
    {
        return Err(PreflightError::PortInUse(config.local_port));
    }
    Ok(())
}

/// `which`: a bare name is looked up in `PATH`, anything with a separator is checked as is.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    resolve_in(program, std::env::var_os("PATH").as_deref())
}

fn resolve_in(program: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return is_executable(as_path).then(|| as_path.to_path_buf());
    }
    std::env::split_paths(search_path?)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
