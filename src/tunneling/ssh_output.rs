use std::collections::VecDeque;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    task::JoinHandle,
};

/// How many trailing stderr lines are kept for the early-exit diagnostic.
pub const TAIL_LINES: usize = 32;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(super) enum LineKind {
    AuthFailure,
    ConnectionFailure,
    ForwardFailure,
    Other,
}

pub(super) fn classify(line: &str) -> LineKind {
    if line.contains("Permission denied") || line.contains("Authentication failed") {
        LineKind::AuthFailure
    } else if line.contains("Connection refused")
        || line.contains("Connection timed out")
        || line.contains("Could not resolve hostname")
        || line.contains("No route to host")
    {
        LineKind::ConnectionFailure
    } else if line.contains("forwarding failed") || line.contains("cannot listen to port") {
        LineKind::ForwardFailure
    } else {
        LineKind::Other
    }
}

/// Drains ssh's stderr for the whole life of the process so the pipe never fills up.
/// The task resolves to the last [`TAIL_LINES`] lines once ssh closes the stream.
pub(super) fn spawn_drain<R>(stderr: R, destination: String) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(TAIL_LINES);
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    match classify(&line) {
                        LineKind::AuthFailure => {
                            tracing::warn!("ssh authentication failed for {destination}: {line}")
                        }
                        LineKind::ConnectionFailure => {
                            tracing::warn!("ssh connection error: {line}")
                        }
                        LineKind::ForwardFailure => tracing::warn!("ssh forwarding error: {line}"),
                        LineKind::Other => tracing::debug!("ssh stderr: {line}"),
                    }
                    if tail.len() == TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("ssh stderr read error: {e}");
                    break;
                }
            }
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}
