use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("cannot run {1}: {2}")]
    Spawn(std::io::Error, String, String),
    #[error("{program} exited with {status}{}", stderr_suffix(.stderr))]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Runs `program` to completion. Arguments are never logged, they may carry the password.
pub async fn run(program: &str, args: &[&str]) -> Result<(), CommandError> {
    tracing::debug!("running {program} ({} args)", args.len());
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            let str_value = e.to_string();
            CommandError::Spawn(e, program.to_string(), str_value)
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(CommandError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
