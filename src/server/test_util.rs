//! Test helpers shared across server modules.

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};

use rstest::fixture;
use tokio::{sync::oneshot, task::JoinHandle};

use super::{Bound, RouterServer, ServerError};

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents race conditions where another
/// process could claim the port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

/// Bind a router with `workers` workers to `listener`.
pub fn bind_server(listener: StdTcpListener, workers: usize) -> RouterServer<Bound> {
    RouterServer::new()
        .workers(workers)
        .bind_existing_listener(listener)
        .expect("Failed to bind")
}

/// A router running on a background task.
pub struct RunningRouter {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl RunningRouter {
    /// Start `server` and wait until its workers are spawned.
    pub async fn start(server: RouterServer<Bound>) -> Self {
        let addr = server.local_addr().expect("bound address");
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.ready_signal(ready_tx).run_with_shutdown(async {
            let _ = shutdown_rx.await;
        }));
        ready_rx.await.expect("router ready");
        Self {
            addr,
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    /// Signal shutdown and wait for every task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle
            .await
            .expect("join router task")
            .expect("router run failed");
    }
}
