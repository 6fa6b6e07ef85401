//! Readiness multiplexer and accept loop.
//!
//! One task waits for the listening socket and every armed session at once.
//! New connections are registered as unbound sessions; readable connections
//! are published to the read queue. The wait set is rebuilt from the registry
//! on every iteration because accepts and removals change it between waits.
//!
//! The OS-facing part sits behind [`Readiness`], which only answers "what is
//! ready now". Swapping the primitive leaves the workers untouched.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream::FuturesUnordered};
use log::{debug, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use super::{BackoffConfig, Pipeline};
use crate::{
    metrics,
    session::{ConnectionId, Session, SessionRegistry},
};

/// What a readiness wait observed.
#[derive(Debug)]
pub enum Ready {
    /// The listener produced a new connection.
    Incoming(TcpStream, SocketAddr),
    /// These sessions have data (or an error) waiting.
    Readable(Vec<ConnectionId>),
    /// The set of sessions to wait on changed; rebuild and wait again.
    Rearmed,
}

/// Blocking event wait over the listener and a set of sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Readiness: Send + Sync {
    /// Wait, without timeout, until something in the set is ready.
    ///
    /// # Errors
    ///
    /// Returns the error from a failed accept.
    async fn wait(&self, sessions: &[Arc<Session>]) -> io::Result<Ready>;
}

/// [`Readiness`] backed by Tokio's reactor.
pub struct TcpReadiness {
    listener: Arc<TcpListener>,
    registry: Arc<SessionRegistry>,
}

impl TcpReadiness {
    /// Wait on `listener` and on registry changes from `registry`.
    #[must_use]
    pub fn new(listener: Arc<TcpListener>, registry: Arc<SessionRegistry>) -> Self {
        Self { listener, registry }
    }
}

#[async_trait]
impl Readiness for TcpReadiness {
    async fn wait(&self, sessions: &[Arc<Session>]) -> io::Result<Ready> {
        let mut readable: FuturesUnordered<_> = sessions
            .iter()
            .map(|session| async move {
                // A readiness error is reported again by the next read.
                let _ = session.readable().await;
                session.handle()
            })
            .collect();

        select! {
            biased;

            accepted = self.listener.accept() => {
                accepted.map(|(stream, peer)| Ready::Incoming(stream, peer))
            }
            Some(first) = readable.next() => {
                let mut ready = vec![first];
                while let Some(Some(handle)) = readable.next().now_or_never() {
                    ready.push(handle);
                }
                Ok(Ready::Readable(ready))
            }
            () = self.registry.changed() => Ok(Ready::Rearmed),
        }
    }
}

/// Run the multiplexer until `shutdown` is cancelled.
pub(super) async fn multiplex<R>(
    readiness: &R,
    pipeline: &Pipeline,
    backoff: BackoffConfig,
    shutdown: CancellationToken,
) where
    R: Readiness + ?Sized,
{
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        let sessions = pipeline.registry.armed_sessions();
        let ready = select! {
            biased;

            () = shutdown.cancelled() => break,
            ready = readiness.wait(&sessions) => ready,
        };
        // Release the snapshot so removed sessions can close.
        drop(sessions);

        match ready {
            Ok(Ready::Incoming(stream, peer_addr)) => {
                delay = backoff.initial_delay;
                let handle = pipeline.registry.register(stream, Some(peer_addr));
                metrics::inc_connections();
                info!("accepted connection: handle={handle}, peer_addr={peer_addr}");
            }
            Ok(Ready::Readable(handles)) => {
                for handle in handles {
                    publish(pipeline, handle);
                }
            }
            Ok(Ready::Rearmed) => {}
            Err(e) => {
                warn!("accept error: error={e:?}, retry_in={delay:?}");
                select! {
                    biased;

                    () = shutdown.cancelled() => break,
                    () = sleep(delay) => {}
                }
                delay = backoff.next_delay(delay);
            }
        }
    }
    debug!("multiplexer stopped");
}

fn publish(pipeline: &Pipeline, handle: ConnectionId) {
    let Some(session) = pipeline.registry.find_by_handle(handle) else {
        return;
    };
    session.disarm();
    pipeline.read_queue.push_coalescing(handle);
}
