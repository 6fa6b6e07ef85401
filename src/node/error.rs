//! Error types for node client connections.

use std::io;

/// Reasons a node's connection to the router ended.
///
/// None of these stop the client; it reconnects after its configured delay.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The router could not be reached.
    #[error("connect to router failed: {0}")]
    Connect(#[source] io::Error),
    /// Every send attempt for one frame failed.
    #[error("send failed after {attempts} attempts: {source}")]
    Send {
        /// Attempts made before giving up.
        attempts: usize,
        /// Error from the final attempt.
        #[source]
        source: io::Error,
    },
    /// Reading from the router failed.
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
    /// The router closed the connection.
    #[error("connection closed by router")]
    Disconnected,
}
