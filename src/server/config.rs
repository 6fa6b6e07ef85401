//! Configuration and listener binding for [`RouterServer`].

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

use super::{BackoffConfig, Bound, RouterServer, ServerError, ServerState, Unbound};
use crate::session::RegistryConfig;

impl RouterServer<Unbound> {
    /// Create a new unbound `RouterServer`.
    ///
    /// The worker count defaults to the number of available CPU cores (or 1 if
    /// this cannot be determined). Call [`bind`](Self::bind) before running.
    #[must_use]
    pub fn new() -> Self {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            workers,
            read_workers: None,
            registry_config: RegistryConfig::default(),
            backoff_config: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Return `None` as the server is not bound.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }
}

impl Default for RouterServer<Unbound> {
    fn default() -> Self { Self::new() }
}

impl<S: ServerState> RouterServer<S> {
    /// Set the total number of worker tasks, split between reading and
    /// writing. Values below 2 are raised to 2 so each pool has a worker.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(2);
        self
    }

    /// Set how many of the workers drain the read queue. The rest drain the
    /// write queue. Defaults to half.
    #[must_use]
    pub fn read_workers(mut self, count: usize) -> Self {
        self.read_workers = Some(count);
        self
    }

    /// Set the node id limits enforced at bind time.
    #[must_use]
    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// Configure the back-off applied after failed accepts.
    #[must_use]
    pub fn accept_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config.normalized();
        self
    }

    /// Configure a channel used to signal when the server is ready to accept
    /// connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Returns the configured number of worker tasks.
    #[inline]
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.workers }

    /// Sizes of the read and write pools, each at least one.
    #[must_use]
    pub fn pool_sizes(&self) -> (usize, usize) {
        let total = self.workers.max(2);
        let read = self.read_workers.unwrap_or(total / 2).clamp(1, total - 1);
        (read, total - read)
    }

    /// Bind to a fresh address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`] if binding or configuring the listener fails.
    pub fn bind(self, addr: SocketAddr) -> Result<RouterServer<Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an existing `StdTcpListener`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`] if configuring the listener fails.
    pub fn bind_existing_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<RouterServer<Bound>, ServerError> {
        let RouterServer {
            workers,
            read_workers,
            registry_config,
            backoff_config,
            ready_tx,
            ..
        } = self;

        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;

        Ok(RouterServer {
            workers,
            read_workers,
            registry_config,
            backoff_config,
            ready_tx,
            state: Bound {
                listener: Arc::new(listener),
            },
        })
    }
}

impl RouterServer<Bound> {
    /// Returns the bound address, or `None` if retrieving it fails.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }
}
