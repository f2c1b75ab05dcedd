use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// A realtime voice middle tier with server-side retrieval tools.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
pub(crate) struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SWITCHBOARD_CONFIG", default_value = "./switchboard.toml")]
    pub config: PathBuf,

    /// Listen address, overriding the configuration file.
    #[arg(short, long)]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,realtime=debug".
    #[arg(long, default_value = "info")]
    pub log: String,
}
