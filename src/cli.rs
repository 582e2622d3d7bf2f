use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(version, about = "vnc-tunnel forwards a local port to a vnc host through an ssh intermediary and opens the viewer on it", long_about = None)]
pub(crate) struct VncTunnelCli {
    /// custom config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// intermediary host address, asked interactively when missing
    #[arg(long)]
    pub host: Option<String>,
    /// more logs on stderr (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
