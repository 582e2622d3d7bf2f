use crate::config::VncTunnelConfig;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Everything the ssh client needs for one `-L` forward through the intermediary.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SshTunnelConfig {
    pub program: String,
    /// ssh server the forward goes through
    pub intermediary_host: String,
    pub intermediary_port: u16,
    pub intermediary_user: String,
    pub local_port: u16,
    /// forwarded service's address, resolved by the intermediary
    pub target_host: String,
    pub target_port: u16,
    pub connect_timeout_secs: u32,
    pub server_alive_interval_secs: u32,
    pub server_alive_count_max: u32,
    pub extra_args: Vec<String>,
}

impl SshTunnelConfig {
    pub fn new(config: &VncTunnelConfig, intermediary_host: &str) -> Self {
        SshTunnelConfig {
            program: config.ssh_program.clone(),
            intermediary_host: intermediary_host.to_string(),
            intermediary_port: config.intermediary_port,
            intermediary_user: config.intermediary_user.clone(),
            local_port: config.local_port,
            target_host: config.target_host.clone(),
            target_port: config.target_port,
            connect_timeout_secs: config.connect_timeout_secs,
            server_alive_interval_secs: config.server_alive_interval_secs,
            server_alive_count_max: config.server_alive_count_max,
            extra_args: config.ssh_extra_args.clone(),
        }
    }

    /// `local_port:target_host:target_port`
    pub fn forward_spec(&self) -> String {
        format!("{}:{}:{}", self.local_port, self.target_host, self.target_port)
    }

    /// `user@host`, or just the host when no user is configured
    pub fn destination(&self) -> String {
        if self.intermediary_user.is_empty() {
            self.intermediary_host.clone()
        } else {
            format!("{}@{}", self.intermediary_user, self.intermediary_host)
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            String::from("-N"),
            String::from("-o"),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            String::from("-o"),
            format!("ServerAliveInterval={}", self.server_alive_interval_secs),
            String::from("-o"),
            format!("ServerAliveCountMax={}", self.server_alive_count_max),
            // without it ssh keeps running even when the local port can't be bound
            String::from("-o"),
            String::from("ExitOnForwardFailure=yes"),
        ];
        if self.intermediary_port != DEFAULT_SSH_PORT {
            args.push(String::from("-p"));
            args.push(self.intermediary_port.to_string());
        }
        args.push(String::from("-L"));
        args.push(self.forward_spec());
        args.extend(self.extra_args.iter().cloned());
        args.push(self.destination());
        args
    }
}
