//! Command line interfaces for the `router` and `node` binaries.
//!
//! Both definitions are also compiled into the build script, which renders
//! their manual pages, so this file depends on nothing but `clap`.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `router` binary.
#[derive(Debug, Parser)]
#[command(name = "router", version, about = "Forward transaction frames between nodes")]
pub struct RouterCli {
    /// TCP port to listen on, on all interfaces.
    pub port: u16,

    /// Runtime threads and worker tasks. Defaults to the number of CPU cores.
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Command line arguments for the `node` binary.
#[derive(Debug, Parser)]
#[command(name = "node", version, about = "Router endpoint answering transaction frames")]
pub struct NodeCli {
    /// This node's identifier (0-999).
    #[arg(value_parser = clap::value_parser!(u16).range(0..=999))]
    pub own_id: u16,

    /// Identifier the first transaction is sent to (0-999).
    #[arg(value_parser = clap::value_parser!(u16).range(0..=999))]
    pub destination_id: u16,

    /// Router host name or IP address.
    pub router_ip: String,

    /// Router TCP port.
    pub router_port: u16,

    /// Send the first transaction after connecting.
    #[arg(long)]
    pub initiate: bool,
}
