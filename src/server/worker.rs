//! Read and write worker tasks.
//!
//! Read workers pop readable connection handles, drain them under the
//! session lock, bind handshakes and queue transactions for their
//! destination. Each write worker owns one write queue and sends its jobs,
//! in queue order, under the destination's session lock. All jobs for one
//! destination share a queue, so frames from one sender arrive in the order
//! they were read. A socket fault on either side removes the
//! session from the registry, which closes the connection.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures::FutureExt;
use log::{debug, info, warn};
use tokio::select;
use tokio_util::sync::CancellationToken;

use super::Pipeline;
use crate::{
    frame::{HANDSHAKE_LEN, TRANSACTION_LEN, parse_destination_id, parse_source_id},
    metrics::{self, Direction, DropReason},
    queue::WriteJob,
    session::{ConnectionId, Drain, Session},
};

/// Pop readable handles until `shutdown` is cancelled.
pub(super) async fn read_worker(pipeline: Pipeline, shutdown: CancellationToken) {
    let mut buf = [0; TRANSACTION_LEN];
    loop {
        let handle = select! {
            biased;

            () = shutdown.cancelled() => break,
            handle = pipeline.read_queue.pop() => handle,
        };
        if !guarded("read", handle, drain_session(&pipeline, handle, &mut buf)).await {
            // A session abandoned mid-drain would never be re-armed.
            close(&pipeline, handle);
        }
    }
}

/// Pop write jobs from queue `shard` until `shutdown` is cancelled.
pub(super) async fn write_worker(pipeline: Pipeline, shard: usize, shutdown: CancellationToken) {
    let Some(queue) = pipeline.write_queues.get(shard) else {
        warn!("write worker has no queue: shard={shard}");
        return;
    };
    loop {
        let job = select! {
            biased;

            () = shutdown.cancelled() => break,
            job = queue.pop() => job,
        };
        let destination = job.destination;
        guarded("write", destination, deliver(&pipeline, job)).await;
    }
}

/// Run one job, logging instead of unwinding if it panics.
///
/// Returns `false` if the job panicked.
async fn guarded<F>(role: &'static str, handle: ConnectionId, job: F) -> bool
where
    F: Future<Output = ()>,
{
    match AssertUnwindSafe(job).catch_unwind().await {
        Ok(()) => true,
        Err(panic) => {
            let panic_msg = panic_message(&*panic);
            tracing::error!(panic = %panic_msg, role, %handle, "worker job panicked");
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Drain everything currently readable from one connection.
///
/// Unbound sessions are read three bytes at a time as handshakes, bound ones
/// thirty-two bytes at a time as transactions. The session is re-armed for
/// readiness once the socket runs dry.
pub(super) async fn drain_session(
    pipeline: &Pipeline,
    handle: ConnectionId,
    buf: &mut [u8; TRANSACTION_LEN],
) {
    let Some(session) = pipeline.registry.find_by_handle(handle) else {
        debug!("read job for closed connection dropped: handle={handle}");
        return;
    };
    let guard = session.lock().await;
    let still_registered = pipeline
        .registry
        .find_by_handle(handle)
        .is_some_and(|current| Arc::ptr_eq(&current, &session));
    if !still_registered {
        debug!("connection removed while waiting for its lock: handle={handle}");
        return;
    }

    loop {
        let expected = if session.is_bound() {
            TRANSACTION_LEN
        } else {
            HANDSHAKE_LEN
        };
        let frame = &mut buf[..expected];
        match guard.drain_read(frame) {
            Drain::Complete if expected == HANDSHAKE_LEN => handshake(pipeline, &session, frame),
            Drain::Complete => forward(pipeline, &session, frame),
            Drain::Partial(received) => {
                warn!("short frame dropped: handle={handle}, expected={expected}, received={received}");
                metrics::inc_dropped(DropReason::ShortFrame);
            }
            Drain::Empty => break,
            Drain::Closed => {
                drop(guard);
                info!("connection closed by peer: handle={handle}, node_id={:?}", session.node_id());
                close(pipeline, handle);
                return;
            }
            Drain::Failed(e) => {
                drop(guard);
                warn!("receive failed: handle={handle}, error={e}");
                metrics::inc_errors();
                close(pipeline, handle);
                return;
            }
        }
    }

    drop(guard);
    pipeline.registry.rearm(&session);
}

fn handshake(pipeline: &Pipeline, session: &Session, frame: &[u8]) {
    let handle = session.handle();
    let Some(id) = parse_source_id(frame) else {
        warn!(
            "handshake rejected: handle={handle}, frame={:?}",
            String::from_utf8_lossy(frame)
        );
        metrics::inc_dropped(DropReason::InvalidId);
        return;
    };
    match pipeline.registry.bind(handle, id) {
        Ok(None) => info!("node bound: handle={handle}, node_id={id}"),
        Ok(Some(displaced)) => {
            warn!("node id rebound: node_id={id}, handle={handle}, displaced={displaced}");
        }
        Err(e) => warn!("bind rejected: handle={handle}, node_id={id}, error={e}"),
    }
}

fn forward(pipeline: &Pipeline, session: &Session, frame: &[u8]) {
    let handle = session.handle();
    metrics::inc_frames(Direction::Inbound);
    let Some(destination) = parse_destination_id(frame) else {
        warn!(
            "frame dropped: handle={handle}, reason=invalid destination, frame={:?}",
            String::from_utf8_lossy(frame)
        );
        metrics::inc_dropped(DropReason::InvalidId);
        return;
    };
    let Some(target) = pipeline.registry.find_by_id(destination) else {
        info!("destination not found: handle={handle}, destination={destination}");
        metrics::inc_dropped(DropReason::UnknownDestination);
        return;
    };
    pipeline.write_queue(target.handle()).push(WriteJob {
        destination: target.handle(),
        payload: Bytes::copy_from_slice(frame),
    });
    debug!(
        "frame queued: source={:?}, destination={destination}, target={}",
        session.node_id(),
        target.handle()
    );
}

/// Send one queued transaction to its destination connection.
pub(super) async fn deliver(pipeline: &Pipeline, job: WriteJob) {
    let WriteJob {
        destination,
        payload,
    } = job;
    let Some(session) = pipeline.registry.find_by_handle(destination) else {
        info!("destination closed before delivery: handle={destination}");
        metrics::inc_dropped(DropReason::DestinationGone);
        return;
    };

    let guard = session.lock().await;
    match guard.send_all(&payload).await {
        Ok(()) => {
            metrics::inc_frames(Direction::Outbound);
            debug!(
                "frame delivered: handle={destination}, node_id={:?}, len={}",
                session.node_id(),
                payload.len()
            );
        }
        Err(e) => {
            drop(guard);
            warn!("send failed: handle={destination}, error={e}");
            metrics::inc_errors();
            close(pipeline, destination);
        }
    }
}

/// Remove a faulted connection. The socket closes with the last reference.
fn close(pipeline: &Pipeline, handle: ConnectionId) {
    if let Some(session) = pipeline.registry.remove(handle) {
        metrics::dec_connections();
        info!(
            "connection removed: handle={handle}, node_id={:?}, peer_addr={:?}",
            session.node_id(),
            session.peer_addr()
        );
    }
}
