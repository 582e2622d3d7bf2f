use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::command::{self, CommandError};

const CLOSE_TERMINAL_SCRIPT: &str = r#"tell application "Terminal" to close first window"#;

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Viewer: Send + Sync {
    /// Hands `url` to the system vnc viewer.
    async fn open(&self, url: &str) -> Result<(), CommandError>;
}

/// Opens urls through the os handler (`open` on macOS, `xdg-open` elsewhere).
pub(crate) struct SystemViewer {
    open_program: String,
}
impl SystemViewer {
    pub fn new(open_program: &str) -> Self {
        SystemViewer {
            open_program: open_program.to_string(),
        }
    }
}
#[async_trait]
impl Viewer for SystemViewer {
    async fn open(&self, url: &str) -> Result<(), CommandError> {
        tracing::info!("opening {url} with {}", self.open_program);
        command::run(&self.open_program, &[url]).await
    }
}

/// Asks Terminal.app to close the window we were started from. Best effort, errors are dropped.
pub async fn close_terminal_window() {
    if let Err(e) = command::run("osascript", &["-e", CLOSE_TERMINAL_SCRIPT]).await {
        tracing::debug!("terminal window left open: {e}");
    }
}
