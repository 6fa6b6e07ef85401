//! Metric helpers for `txrouter`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "txrouter_connections_active";
/// Name of the counter tracking frames read or delivered.
pub const FRAMES_PROCESSED: &str = "txrouter_frames_total";
/// Name of the counter tracking frames the router discarded.
pub const FRAMES_DROPPED: &str = "txrouter_frames_dropped_total";
/// Name of the counter tracking connection faults.
pub const ERRORS_TOTAL: &str = "txrouter_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from a node.
    Inbound,
    /// Frames delivered to a node.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Why a frame was discarded.
#[derive(Clone, Copy, Debug)]
pub enum DropReason {
    /// Fewer bytes arrived than the expected frame length.
    ShortFrame,
    /// An id field could not be parsed.
    InvalidId,
    /// No connection is bound to the destination id.
    UnknownDestination,
    /// The destination connection closed before delivery.
    DestinationGone,
}

impl DropReason {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            DropReason::ShortFrame => "short_frame",
            DropReason::InvalidId => "invalid_id",
            DropReason::UnknownDestination => "unknown_destination",
            DropReason::DestinationGone => "destination_gone",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a discarded frame.
pub fn inc_dropped(reason: DropReason) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_DROPPED, "reason" => reason.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record a connection fault.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

/// Serve the Prometheus scrape endpoint on `addr` and install it as the
/// global recorder.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener cannot be started or a recorder is
/// already installed.
#[cfg(feature = "metrics")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}
