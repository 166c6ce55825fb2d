//! CLI argument definitions for proxyneighd.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Proxy ARP/NDP synchronization daemon for LXD IPVLAN containers.
///
/// Watches link state transitions and reconciles the kernel's proxy
/// neighbour table with the addresses declared on IPVLAN NIC devices of
/// running containers.
#[derive(Parser, Debug)]
#[command(name = "proxyneighd")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to proxyneigh.toml configuration file.
    #[arg(short, long, default_value = "/etc/proxyneigh/proxyneigh.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}
