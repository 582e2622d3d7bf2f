use async_trait::async_trait;

use crate::{command, command::CommandError, config::Secret};

use super::CredentialInjector;

/// X11 counterpart of the AppleScript injector.
pub(crate) struct XdotoolInjector {
    program: String,
    /// delay between keystrokes, in milliseconds
    key_delay_ms: u32,
}
impl Default for XdotoolInjector {
    fn default() -> Self {
        XdotoolInjector {
            program: String::from("xdotool"),
            key_delay_ms: 50,
        }
    }
}

#[async_trait]
impl CredentialInjector for XdotoolInjector {
    async fn inject(&self, secret: &Secret) -> Result<(), CommandError> {
        let delay = self.key_delay_ms.to_string();
        command::run(
            &self.program,
            &["type", "--delay", &delay, "--", secret.expose()],
        )
        .await?;
        command::run(&self.program, &["key", "Return"]).await
    }
}
