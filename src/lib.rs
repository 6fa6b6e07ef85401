//! Public API for the `txrouter` library.
//!
//! A TCP message router for fixed-format transaction frames. Nodes connect,
//! announce a three-digit identifier, then send 32-byte transactions that the
//! router forwards verbatim to whichever connection currently holds the
//! destination identifier.

pub mod cli;
pub mod codec;
pub mod frame;
pub mod metrics;
pub mod node;
pub mod queue;
pub mod server;
pub mod session;

#[cfg(test)]
pub(crate) mod test_util;

pub use codec::FixedFrameCodec;
pub use frame::{NodeId, TransactionFrame};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_DROPPED, FRAMES_PROCESSED};
pub use node::{NodeClient, NodeConfig, NodeError};
pub use server::{RouterServer, ServerError, start};
pub use session::{BindError, ConnectionId, RegistryConfig, SessionRegistry};
