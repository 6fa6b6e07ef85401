//! Tokio-based router server.
//!
//! [`RouterServer`] composes the pieces of the router: one
//! [`SessionRegistry`](crate::session::SessionRegistry), the read
//! [`WorkQueue`](crate::queue::WorkQueue) and one write queue per write
//! worker, a single readiness multiplexer task that accepts connections and
//! spots readable ones, and fixed pools of read and write worker tasks that
//! drain the queues.
//!
//! Every write job for a destination lands in the same write queue, so one
//! write worker sends them in the order they were queued.
//!
//! ```text
//! multiplexer -> read queue -> read worker -> write queue -> write worker
//!      |                            |
//!      +------ registry <-----------+
//! ```

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

use crate::{
    queue::{ReadQueue, WriteQueue},
    session::{ConnectionId, RegistryConfig, SessionRegistry},
};

mod config;
pub mod error;
mod multiplexer;
mod runtime;
mod worker;

pub use error::ServerError;
pub use multiplexer::{Readiness, Ready, TcpReadiness};
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;

/// Router server carrying a binding typestate `S`.
///
/// New servers start [`Unbound`] and must call [`RouterServer::bind`] or
/// [`RouterServer::bind_existing_listener`] before running.
pub struct RouterServer<S = Unbound>
where
    S: ServerState,
{
    pub(crate) workers: usize,
    pub(crate) read_workers: Option<usize>,
    pub(crate) registry_config: RegistryConfig,
    pub(crate) backoff_config: BackoffConfig,
    /// Channel used to notify when the server is ready.
    ///
    /// A `oneshot::Sender` can transmit only one readiness notification, so a
    /// new sender must be provided each time the server is started.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

/// The registry and the queues, shared by the multiplexer and every worker.
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) read_queue: Arc<ReadQueue>,
    pub(crate) write_queues: Arc<[WriteQueue]>,
}

impl Pipeline {
    /// Create a pipeline with `write_shards` write queues, at least one.
    pub(crate) fn new(config: RegistryConfig, write_shards: usize) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config)),
            read_queue: Arc::new(ReadQueue::new()),
            write_queues: (0..write_shards.max(1)).map(|_| WriteQueue::new()).collect(),
        }
    }

    /// Index of the write queue that carries every job for `destination`.
    pub(crate) fn write_shard(&self, destination: ConnectionId) -> usize {
        let shards = self.write_queues.len() as u64;
        usize::try_from(destination.as_u64() % shards).unwrap_or_default()
    }

    /// The write queue that carries every job for `destination`.
    pub(crate) fn write_queue(&self, destination: ConnectionId) -> &WriteQueue {
        &self.write_queues[self.write_shard(destination)]
    }
}

/// Build the multi-threaded Tokio runtime used by [`start`].
///
/// # Errors
///
/// Returns [`ServerError::Runtime`] if the runtime cannot be created.
pub fn build_runtime(thread_count: usize) -> Result<tokio::runtime::Runtime, ServerError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(thread_count.max(1))
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)
}

/// Run a router on `0.0.0.0:port` with `thread_count` runtime threads and
/// workers until Ctrl+C.
///
/// Builds its own multi-threaded Tokio runtime, so it must not be called from
/// inside one.
///
/// # Errors
///
/// Returns a [`ServerError`] if the runtime cannot be built or the listening
/// socket cannot be bound.
pub fn start(thread_count: usize, port: u16) -> Result<(), ServerError> {
    let threads = thread_count.max(1);
    build_runtime(threads)?.block_on(async {
        RouterServer::new()
            .workers(threads)
            .bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?
            .run()
            .await
    })
}
