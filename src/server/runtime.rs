//! Runtime control for [`RouterServer`].

mod backoff;

use std::future::Future;

pub use backoff::BackoffConfig;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    Bound,
    Pipeline,
    RouterServer,
    ServerError,
    multiplexer::{TcpReadiness, multiplex},
    worker::{read_worker, write_worker},
};

impl RouterServer<Bound> {
    /// Run the router until Ctrl+C is received.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use txrouter::server::RouterServer;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), txrouter::server::ServerError> {
    /// RouterServer::new()
    ///     .workers(4)
    ///     .bind(([0, 0, 0, 0], 9000).into())?
    ///     .run()
    ///     .await
    /// # }
    /// ```
    ///
    /// Attempting to run a router without binding fails to compile:
    ///
    /// ```compile_fail
    /// use txrouter::server::RouterServer;
    ///
    /// async fn try_run() {
    ///     RouterServer::new()
    ///         .run()
    ///         .await
    ///         .expect("unbound routers do not expose run()");
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept failures are retried with
    /// exponential back-off and connection faults only close the connection.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the router until the `shutdown` future resolves.
    ///
    /// Spawns the multiplexer task, the read worker pool and one write worker
    /// per write queue, then signals readiness. When `shutdown` resolves every task is cancelled and
    /// awaited; open connections close as the registry is dropped.
    ///
    /// ```
    /// use tokio::sync::oneshot;
    /// use txrouter::server::RouterServer;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), txrouter::server::ServerError> {
    /// let server = RouterServer::new().bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(async move {
    ///     server
    ///         .run_with_shutdown(async {
    ///             let _ = rx.await;
    ///         })
    ///         .await
    /// });
    ///
    /// let _ = tx.send(());
    /// handle
    ///     .await
    ///     .expect("join router task")
    ///     .expect("router run failed");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`, see [`run`](Self::run).
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let (read_workers, write_workers) = self.pool_sizes();
        let RouterServer {
            registry_config,
            backoff_config,
            ready_tx,
            state: Bound { listener },
            ..
        } = self;
        let pipeline = Pipeline::new(registry_config, write_workers);
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let readiness = TcpReadiness::new(listener, pipeline.registry.clone());
        tracker.spawn({
            let pipeline = pipeline.clone();
            let token = shutdown_token.clone();
            async move { multiplex(&readiness, &pipeline, backoff_config, token).await }
        });
        for _ in 0..read_workers {
            tracker.spawn(read_worker(pipeline.clone(), shutdown_token.clone()));
        }
        for shard in 0..write_workers {
            tracker.spawn(write_worker(pipeline.clone(), shard, shutdown_token.clone()));
        }
        info!("router started: read_workers={read_workers}, write_workers={write_workers}");

        // Signal readiness after all workers have been spawned.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        info!("router stopped: connections={}", pipeline.registry.len());
        Ok(())
    }
}
