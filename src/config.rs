use std::{
    env::VarError,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{
    Deserialize,
    de::{self, Visitor},
};
use thiserror::Error;

pub const CONFIG_DIR_NAME: &str = "vnc-tunnel";
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// kept for compatibility with existing setups, override it with `viewer.password`
pub const DEFAULT_VNC_PASSWORD: &str = "123123";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {msg}", path = .2.display(), msg = .1)]
    Read(std::io::Error, String, PathBuf),
    #[error("invalid config file: {1}")]
    Parse(toml::de::Error, String),
    #[error("password env variable {0} is not set")]
    PasswordEnvMissing(String),
    #[error("password env variable {0} is not unicode")]
    PasswordEnvNotUnicode(String),
}
impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        let str_value = value.to_string();
        Self::Parse(value, str_value)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct VncTunnelConfig {
    /// local end of the forward, `vnc://localhost:<local_port>` is what the viewer opens
    pub local_port: u16,
    /// vnc machine, as seen from the intermediary
    pub target_host: String,
    pub target_port: u16,
    pub intermediary_user: String,
    pub intermediary_port: u16,
    pub ssh_program: String,
    /// appended right before the destination
    pub ssh_extra_args: Vec<String>,
    pub connect_timeout_secs: u32,
    pub server_alive_interval_secs: u32,
    pub server_alive_count_max: u32,
    pub log_path: Option<PathBuf>,
    pub viewer: ViewerConfig,
    pub timings: Timings,
}
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ViewerConfig {
    pub open_program: String,
    pub injector: InjectorKind,
    pub password: PasswordSource,
    pub close_terminal_window: bool,
}
#[derive(Deserialize, Debug, PartialEq, Clone, Copy)]
pub(crate) enum InjectorKind {
    #[serde(alias = "applescript", alias = "APPLESCRIPT")]
    AppleScript,
    #[serde(alias = "xdotool", alias = "XDOTOOL")]
    Xdotool,
    #[serde(alias = "none", alias = "NONE")]
    Disabled,
}
/// Every delay of the session, in milliseconds.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Timings {
    pub host_probe_timeout_ms: u64,
    pub local_probe_timeout_ms: u64,
    /// how long the ssh process gets to open the local port
    pub ready_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// between opening the viewer and typing the password
    pub settle_delay_ms: u64,
    pub shutdown_grace_ms: u64,
}
#[derive(Clone, PartialEq, Debug)]
pub(crate) struct PasswordSource {
    /// the password is stored in plaintext inside the configuration file
    pub value: Option<String>,
    /// the password must be fetched from an environmental variable (env-var-name)
    pub from_env: Option<String>,
}

/// A resolved password. Never printed.
#[derive(Clone, PartialEq)]
pub(crate) struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }
    pub fn expose(&self) -> &str {
        &self.0
    }
}
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Default for VncTunnelConfig {
    fn default() -> Self {
        VncTunnelConfig {
            local_port: 5901,
            target_host: String::from("169.254.1.20"),
            target_port: 5900,
            intermediary_user: String::from("gdlocal"),
            intermediary_port: 22,
            ssh_program: String::from("ssh"),
            ssh_extra_args: Vec::new(),
            connect_timeout_secs: 30,
            server_alive_interval_secs: 60,
            server_alive_count_max: 3,
            log_path: None,
            viewer: ViewerConfig::default(),
            timings: Timings::default(),
        }
    }
}
impl Default for ViewerConfig {
    fn default() -> Self {
        let macos = cfg!(target_os = "macos");
        ViewerConfig {
            open_program: String::from(if macos { "open" } else { "xdg-open" }),
            injector: if macos {
                InjectorKind::AppleScript
            } else {
                InjectorKind::Xdotool
            },
            password: PasswordSource::default(),
            close_terminal_window: macos,
        }
    }
}
impl Default for Timings {
    fn default() -> Self {
        Timings {
            host_probe_timeout_ms: 10_000,
            local_probe_timeout_ms: 1_000,
            ready_timeout_ms: 13_000,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            settle_delay_ms: 2_000,
            shutdown_grace_ms: 5_000,
        }
    }
}
impl Default for PasswordSource {
    fn default() -> Self {
        PasswordSource {
            value: Some(String::from(DEFAULT_VNC_PASSWORD)),
            from_env: None,
        }
    }
}

impl Timings {
    pub fn host_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.host_probe_timeout_ms)
    }
    pub fn local_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.local_probe_timeout_ms)
    }
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl VncTunnelConfig {
    /// Loads the configuration. With no explicit path a missing default file means "all defaults".
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            let str_value = e.to_string();
            ConfigError::Read(e, str_value, path.to_path_buf())
        })?;
        Ok(toml::from_str(&contents)?)
    }
    pub fn vnc_url(&self) -> String {
        format!("vnc://localhost:{}", self.local_port)
    }
    pub fn log_path(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(crate::connection_log::default_path)
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl PasswordSource {
    pub fn resolve(&self) -> Result<Secret, ConfigError> {
        self.resolve_with(|name| std::env::var(name))
    }
    pub fn resolve_with<F>(&self, lookup: F) -> Result<Secret, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        match self {
            PasswordSource {
                value: Some(plaintext),
                ..
            } => Ok(Secret::new(plaintext.as_str())),
            PasswordSource {
                from_env: Some(env_var),
                value: None,
            } => lookup(env_var).map(Secret::new).map_err(|e| match e {
                VarError::NotPresent => ConfigError::PasswordEnvMissing(env_var.clone()),
                VarError::NotUnicode(_) => ConfigError::PasswordEnvNotUnicode(env_var.clone()),
            }),
            // the visitor never produces this one
            PasswordSource {
                value: None,
                from_env: None,
            } => Ok(Secret::new(DEFAULT_VNC_PASSWORD)),
        }
    }
}

impl<'de> Deserialize<'de> for PasswordSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PasswordSourceVisitor;
        impl<'de> Visitor<'de> for PasswordSourceVisitor {
            type Value = PasswordSource;
            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map with at least one between `from_env` or `value` set")
            }
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut from_env = None;
                let mut value = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "from_env" => from_env = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        _ => return Err(de::Error::unknown_field(&key, &["from_env", "value"])),
                    }
                }

                if from_env.is_none() && value.is_none() {
                    return Err(de::Error::custom(
                        "at least one between `from_env` or `value` must be provided!",
                    ));
                }
                if from_env.is_some() && value.is_some() {
                    from_env = None; // value takes precedence
                }
                Ok(PasswordSource { value, from_env })
            }
        }
        deserializer.deserialize_map(PasswordSourceVisitor)
    }
}
