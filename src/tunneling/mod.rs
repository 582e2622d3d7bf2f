pub(crate) mod ssh_output;
pub(crate) mod tunnel;
pub(crate) mod tunnel_config;
