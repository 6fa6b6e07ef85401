//! Errors raised by [`RouterServer`](super::RouterServer) operations.

use std::io;

use thiserror::Error;

/// Errors that may occur while starting the router.
///
/// Faults on individual connections never surface here; they are handled
/// where they are detected and only cost that connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Creating or configuring the listening socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// Building the async runtime failed.
    #[error("runtime error: {0}")]
    Runtime(#[source] io::Error),
}
