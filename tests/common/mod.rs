//! Shared utilities for integration tests.
//!
//! Starts a router on a free local port and drives raw node connections
//! against it.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

pub mod logging;

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use txrouter::{
    frame::{NodeId, TRANSACTION_LEN, build_first_transaction_frame, build_handshake_frame},
    server::{RouterServer, ServerError},
};

/// How long a test waits for a frame that should arrive.
pub const ARRIVAL: Duration = Duration::from_secs(2);
/// How long a test watches for a frame that should not arrive.
pub const SILENCE: Duration = Duration::from_millis(200);

/// Create a TCP listener bound to a free local port.
pub fn unused_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("failed to bind port")
}

pub fn id(value: u16) -> NodeId { NodeId::new(value).expect("id in range") }

/// First-transaction frame from `source` to `destination`.
pub fn frame(source: u16, destination: u16) -> [u8; TRANSACTION_LEN] {
    build_first_transaction_frame(id(source), id(destination))
}

/// Frame from `source` to `destination` tagged with `seq` in its trace field.
pub fn numbered_frame(source: u16, destination: u16, seq: u16) -> [u8; TRANSACTION_LEN] {
    let mut frame = frame(source, destination);
    frame[7..13].copy_from_slice(format!("{seq:06}").as_bytes());
    frame
}

/// A router serving on a background task.
pub struct TestRouter {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestRouter {
    /// Start a router with `workers` workers and wait until it is ready.
    pub async fn start(workers: usize) -> Self {
        let server = RouterServer::new()
            .workers(workers)
            .bind_existing_listener(unused_listener())
            .expect("bind router");
        let addr = server.local_addr().expect("router address");
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

    /// Connect a raw node and wait until the router has bound `node`.
    ///
    /// The handshake is followed by a frame addressed to the node itself.
    /// Both travel the same connection in order, so the echo proves the bind.
    pub async fn node(&self, node: u16) -> TcpStream {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect node");
        stream
            .write_all(&build_handshake_frame(id(node)))
            .await
            .expect("write handshake");
        let probe = frame(node, node);
        stream.write_all(&probe).await.expect("write probe");
        assert_eq!(read_frame(&mut stream).await, probe, "probe echo");
        stream
    }

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

/// Read one transaction frame, failing the test if none arrives in time.
pub async fn read_frame(stream: &mut TcpStream) -> [u8; TRANSACTION_LEN] {
    let mut buf = [0; TRANSACTION_LEN];
    timeout(ARRIVAL, stream.read_exact(&mut buf))
        .await
        .expect("frame arrived in time")
        .expect("read frame");
    buf
}

/// Assert that nothing arrives on `stream` for a short while.
pub async fn assert_silent(stream: &mut TcpStream) {
    let mut buf = [0; TRANSACTION_LEN];
    if let Ok(result) = timeout(SILENCE, stream.read(&mut buf)).await {
        let n = result.expect("read");
        panic!("unexpected bytes: {:?}", String::from_utf8_lossy(&buf[..n]));
    }
}
