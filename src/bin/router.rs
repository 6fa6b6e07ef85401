//! Router binary: forwards transaction frames between connected nodes.

use std::{
    net::{Ipv4Addr, SocketAddr},
    process::ExitCode,
};

use clap::Parser;
use log::{error, info};
use txrouter::{
    cli::RouterCli,
    server::{self, RouterServer},
};

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = match RouterCli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(1);
        }
        Err(e) => e.exit(),
    };
    let threads = cli.workers.map_or_else(
        || std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        usize::from,
    );
    info!("router starting: port={}, threads={threads}", cli.port);

    let result = match cli.metrics_addr {
        None => server::start(threads, cli.port).map_err(Into::into),
        Some(addr) => serve_with_metrics(threads, cli.port, addr),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("router failed: error={e}");
            ExitCode::FAILURE
        }
    }
}

fn serve_with_metrics(
    threads: usize,
    port: u16,
    metrics_addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    server::build_runtime(threads)?.block_on(async {
        install_metrics(metrics_addr)?;
        RouterServer::new()
            .workers(threads)
            .bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?
            .run()
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    txrouter::metrics::install_prometheus(addr)?;
    info!("metrics endpoint listening: addr={addr}");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    log::warn!("metrics feature disabled, ignoring --metrics-addr {addr}");
    Ok(())
}
