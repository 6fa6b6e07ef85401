//! Node binary: connects to a router and answers transactions.

use std::process::ExitCode;

use clap::Parser;
use log::info;
use txrouter::{
    cli::NodeCli,
    frame::NodeId,
    node::{NodeClient, NodeConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = match NodeCli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(1);
        }
        Err(e) => e.exit(),
    };
    let (Some(node_id), Some(destination)) =
        (NodeId::new(cli.own_id), NodeId::new(cli.destination_id))
    else {
        eprintln!("node ids must be between 0 and 999");
        return ExitCode::from(1);
    };

    info!(
        "node starting: node_id={node_id}, destination={destination}, router={}:{}, initiate={}",
        cli.router_ip, cli.router_port, cli.initiate
    );
    let config = NodeConfig::new(node_id, destination, cli.router_ip, cli.router_port)
        .initiate(cli.initiate);
    NodeClient::new(config)
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    ExitCode::SUCCESS
}
