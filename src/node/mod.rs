//! Node client: the endpoint side of the router protocol.
//!
//! A node connects to the router, sends its handshake frame, optionally
//! starts a conversation with a first transaction, then answers every
//! transaction addressed to it with its response frame. Connection loss is
//! never fatal; the node waits a fixed delay and reconnects, forever.

use std::{future::Future, time::Duration};

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
    time::sleep,
};
use tokio_util::codec::FramedRead;

mod error;

pub use error::NodeError;

use crate::{
    codec::FixedFrameCodec,
    frame::{NodeId, build_first_transaction_frame, build_handshake_frame, build_response_frame},
};

/// Settings for one node process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    /// Identifier announced in the handshake.
    pub node_id: NodeId,
    /// Destination of the first transaction.
    pub destination: NodeId,
    /// Router host name or address.
    pub router_host: String,
    /// Router TCP port.
    pub router_port: u16,
    /// Send the first transaction after every handshake.
    pub initiate: bool,
    /// Constant delay between connection attempts.
    pub reconnect_delay: Duration,
    /// Attempts made for each outgoing frame before the connection is dropped.
    pub send_attempts: usize,
}

impl NodeConfig {
    /// Configuration with a 5 second reconnect delay and 3 send attempts.
    #[must_use]
    pub fn new(
        node_id: NodeId,
        destination: NodeId,
        router_host: impl Into<String>,
        router_port: u16,
    ) -> Self {
        Self {
            node_id,
            destination,
            router_host: router_host.into(),
            router_port,
            initiate: false,
            reconnect_delay: Duration::from_secs(5),
            send_attempts: 3,
        }
    }

    /// Send the first transaction after connecting.
    #[must_use]
    pub fn initiate(mut self, initiate: bool) -> Self {
        self.initiate = initiate;
        self
    }

    /// Override the reconnect delay.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// A node that keeps a connection to the router alive.
#[derive(Debug)]
pub struct NodeClient {
    config: NodeConfig,
}

impl NodeClient {
    /// Create a client for `config`; nothing connects until it runs.
    #[must_use]
    pub fn new(config: NodeConfig) -> Self { Self { config } }

    /// The settings this client runs with.
    #[must_use]
    pub fn config(&self) -> &NodeConfig { &self.config }

    /// Connect and serve forever.
    pub async fn run(&self) { self.run_until(futures::future::pending()).await }

    /// Connect and serve, reconnecting after every failure, until `shutdown`
    /// resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let outcome = select! {
                biased;

                () = &mut shutdown => break,
                outcome = self.connect_once() => outcome,
            };
            if let Err(e) = outcome {
                warn!(
                    "router connection ended: node_id={}, error={e}, retry_in={:?}",
                    self.config.node_id, self.config.reconnect_delay
                );
            }
            select! {
                biased;

                () = &mut shutdown => break,
                () = sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    /// Run a single connection until it fails.
    ///
    /// # Errors
    ///
    /// Returns a [`NodeError`] describing why the connection ended; a
    /// connection only ends by failing or by the router closing it.
    pub async fn connect_once(&self) -> Result<(), NodeError> {
        let NodeConfig {
            node_id,
            destination,
            router_host,
            router_port,
            initiate,
            ..
        } = &self.config;
        let stream = TcpStream::connect((router_host.as_str(), *router_port))
            .await
            .map_err(NodeError::Connect)?;
        info!("connected to router: node_id={node_id}, router={router_host}:{router_port}");

        let (reader, mut writer) = stream.into_split();
        self.send(&mut writer, &build_handshake_frame(*node_id)).await?;
        if *initiate {
            let first = build_first_transaction_frame(*node_id, *destination);
            self.send(&mut writer, &first).await?;
            info!("first transaction sent: node_id={node_id}, destination={destination}");
        }

        let mut frames = FramedRead::new(reader, FixedFrameCodec::transaction());
        while let Some(frame) = frames.next().await {
            let frame = frame.map_err(NodeError::Receive)?;
            match build_response_frame(*node_id, &frame) {
                Some(reply) => {
                    self.send(&mut writer, &reply).await?;
                    debug!(
                        "replied: node_id={node_id}, frame={:?}",
                        String::from_utf8_lossy(&reply)
                    );
                }
                None => debug!(
                    "frame not for this node: node_id={node_id}, frame={:?}",
                    String::from_utf8_lossy(&frame)
                ),
            }
        }
        Err(NodeError::Disconnected)
    }

    async fn send<W>(&self, writer: &mut W, frame: &[u8]) -> Result<(), NodeError>
    where
        W: AsyncWrite + Unpin,
    {
        let attempts = self.config.send_attempts.max(1);
        let mut attempt = 1;
        loop {
            match writer.write_all(frame).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!("send failed, retrying: attempt={attempt}, error={e}");
                    attempt += 1;
                }
                Err(source) => return Err(NodeError::Send { attempts, source }),
            }
        }
    }
}
