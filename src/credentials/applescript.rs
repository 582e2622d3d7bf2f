use async_trait::async_trait;

use crate::{command, command::CommandError, config::Secret};

use super::CredentialInjector;

/// Drives System Events through `osascript`. Needs accessibility access for the terminal.
pub(crate) struct AppleScriptInjector {
    program: String,
}
impl Default for AppleScriptInjector {
    fn default() -> Self {
        AppleScriptInjector {
            program: String::from("osascript"),
        }
    }
}
impl AppleScriptInjector {
    #[cfg(test)]
    pub fn with_program(program: &str) -> Self {
        AppleScriptInjector {
            program: program.to_string(),
        }
    }
}

/// Quotes `value` as an AppleScript string literal.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

pub(crate) fn keystroke_script(secret: &Secret) -> String {
    format!(
        "tell application \"System Events\"\n\tkeystroke {}\n\tkeystroke return\nend tell",
        quote(secret.expose())
    )
}

#[async_trait]
impl CredentialInjector for AppleScriptInjector {
    async fn inject(&self, secret: &Secret) -> Result<(), CommandError> {
        let script = keystroke_script(secret);
        command::run(&self.program, &["-e", &script]).await
    }
}
