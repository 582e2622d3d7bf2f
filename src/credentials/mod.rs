use applescript::AppleScriptInjector;
use async_trait::async_trait;
use xdotool::XdotoolInjector;

#[cfg(test)]
use mockall::automock;

use crate::{
    command::CommandError,
    config::{InjectorKind, Secret},
};
pub(crate) mod applescript;
pub(crate) mod xdotool;

/// Types the vnc password into whatever window has focus, then presses Enter.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait CredentialInjector: Send + Sync {
    async fn inject(&self, secret: &Secret) -> Result<(), CommandError>;
    /// false when injection is turned off
    fn enabled(&self) -> bool {
        true
    }
}

pub(crate) struct NoopInjector;
#[async_trait]
impl CredentialInjector for NoopInjector {
    async fn inject(&self, _secret: &Secret) -> Result<(), CommandError> {
        Ok(())
    }
    fn enabled(&self) -> bool {
        false
    }
}

pub(crate) fn get_injector(kind: InjectorKind) -> Box<dyn CredentialInjector> {
    match kind {
        InjectorKind::AppleScript => Box::new(AppleScriptInjector::default()),
        InjectorKind::Xdotool => Box::new(XdotoolInjector::default()),
        InjectorKind::Disabled => Box::new(NoopInjector),
    }
}
