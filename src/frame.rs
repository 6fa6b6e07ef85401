//! Wire frames exchanged between nodes and the router.
//!
//! Two fixed-size shapes exist on the wire. A handshake frame carries the
//! sender's own [`NodeId`] as three zero-padded ASCII digits. A transaction
//! frame is 32 bytes of fixed-width zero-padded decimal ASCII:
//!
//! ```text
//! offset  0..3   source id
//! offset  3..7   message type indicator (MTI)
//! offset  7..13  trace number
//! offset 13..29  primary account number (PAN)
//! offset 29..32  destination id
//! ```
//!
//! There is no length prefix and no delimiter; frame boundaries follow purely
//! from these byte counts.

use std::{fmt, ops::Range, str::FromStr};

use static_assertions::const_assert_eq;
use thiserror::Error;

/// Length of a handshake frame in bytes.
pub const HANDSHAKE_LEN: usize = 3;
/// Length of a transaction frame in bytes.
pub const TRANSACTION_LEN: usize = 32;
/// Largest identifier representable in the three-digit id field.
pub const MAX_NODE_ID: u16 = 999;

const SOURCE: Range<usize> = 0..3;
const MTI: Range<usize> = 3..7;
const TRACE: Range<usize> = 7..13;
const PAN: Range<usize> = 13..29;
const DESTINATION: Range<usize> = 29..32;

const_assert_eq!(SOURCE.end - SOURCE.start, HANDSHAKE_LEN);
const_assert_eq!(DESTINATION.end, TRANSACTION_LEN);

const FIRST_MTI: &[u8; 4] = b"2200";
const FIRST_TRACE: &[u8; 6] = b"123456";
const FIRST_PAN: &[u8; 16] = b"1111111111111111";
const MTI_STEP: u32 = 10;
const MTI_MODULUS: u32 = 10_000;

/// Reasons a frame or field could not be interpreted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A transaction frame was not exactly [`TRANSACTION_LEN`] bytes.
    #[error("transaction frame must be {TRANSACTION_LEN} bytes, got {0}")]
    WrongLength(usize),
    /// A numeric field contained something other than ASCII digits.
    #[error("field `{0}` is not a zero-padded decimal number")]
    NotDecimal(&'static str),
    /// A parsed identifier does not fit the identifier domain.
    #[error("node id {0} exceeds {MAX_NODE_ID}")]
    OutOfRange(u32),
}

/// Identifier a node registers under, in the range `0..=999`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u16);

impl NodeId {
    /// Create a [`NodeId`], returning `None` if `value` exceeds [`MAX_NODE_ID`].
    #[must_use]
    pub const fn new(value: u16) -> Option<Self> {
        if value > MAX_NODE_ID {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Return the numeric value.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

impl TryFrom<u32> for NodeId {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        u16::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(FrameError::OutOfRange(value))
    }
}

impl FromStr for NodeId {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s.trim().parse().map_err(|_| FrameError::NotDecimal("id"))?;
        Self::try_from(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:03}", self.0) }
}

/// Parse an unsigned zero-padded decimal field.
fn parse_decimal(field: &'static str, digits: &[u8]) -> Result<u32, FrameError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::NotDecimal(field));
    }
    Ok(digits
        .iter()
        .fold(0, |acc, digit| acc * 10 + u32::from(digit - b'0')))
}

/// Write `value` as zero-padded decimal filling all of `dst`.
fn write_decimal(dst: &mut [u8], mut value: u32) {
    for slot in dst.iter_mut().rev() {
        // `value % 10` is always below 10.
        *slot = b'0' + (value % 10) as u8;
        value /= 10;
    }
}

fn parse_id(field: &'static str, digits: &[u8]) -> Result<NodeId, FrameError> {
    NodeId::try_from(parse_decimal(field, digits)?)
}

/// Read the source identifier from the first three bytes of `buf`.
///
/// Returns `None` when `buf` is shorter than [`HANDSHAKE_LEN`] or the field is
/// not three ASCII digits. Works for both handshake and transaction frames.
#[must_use]
pub fn parse_source_id(buf: &[u8]) -> Option<NodeId> {
    let digits = buf.get(SOURCE)?;
    parse_id("source", digits).ok()
}

/// Read the destination identifier from bytes 29..32 of a transaction frame.
///
/// Returns `None` when `buf` is shorter than [`TRANSACTION_LEN`] or the field is
/// not three ASCII digits.
#[must_use]
pub fn parse_destination_id(buf: &[u8]) -> Option<NodeId> {
    let digits = buf.get(DESTINATION)?;
    parse_id("destination", digits).ok()
}

/// Build the handshake frame a node sends after connecting.
///
/// ```
/// use txrouter::frame::{NodeId, build_handshake_frame};
///
/// let id = NodeId::new(3).expect("valid id");
/// assert_eq!(&build_handshake_frame(id), b"003");
/// ```
#[must_use]
pub fn build_handshake_frame(id: NodeId) -> [u8; HANDSHAKE_LEN] {
    let mut frame = [0; HANDSHAKE_LEN];
    write_decimal(&mut frame, u32::from(id.get()));
    frame
}

/// Build the transaction an initiating node injects after its handshake.
#[must_use]
pub fn build_first_transaction_frame(source: NodeId, destination: NodeId) -> [u8; TRANSACTION_LEN] {
    let mut frame = [0; TRANSACTION_LEN];
    write_decimal(&mut frame[SOURCE], u32::from(source.get()));
    frame[MTI].copy_from_slice(FIRST_MTI);
    frame[TRACE].copy_from_slice(FIRST_TRACE);
    frame[PAN].copy_from_slice(FIRST_PAN);
    write_decimal(&mut frame[DESTINATION], u32::from(destination.get()));
    frame
}

/// Build the reply a node sends for a received transaction.
///
/// Returns `None` (no reply) unless `frame` is exactly [`TRANSACTION_LEN`]
/// bytes and addressed to `self_id`. The reply advances the MTI by ten modulo
/// 10000, keeps trace and PAN, and swaps source and destination.
///
/// ```
/// use txrouter::frame::{NodeId, build_response_frame};
///
/// let me = NodeId::new(3).expect("valid id");
/// let reply = build_response_frame(me, b"00522101234561111111111111111003");
/// assert_eq!(reply.as_ref().map(|r| &r[..]), Some(&b"00322201234561111111111111111005"[..]));
/// assert!(build_response_frame(me, b"00322101234561111111111111111005").is_none());
/// ```
#[must_use]
pub fn build_response_frame(self_id: NodeId, frame: &[u8]) -> Option<[u8; TRANSACTION_LEN]> {
    let frame = TransactionFrame::parse(frame).ok()?;
    if frame.destination().ok()? != self_id {
        return None;
    }
    frame.response().ok().map(|reply| reply.into_bytes())
}

/// Owned view over a 32-byte transaction frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TransactionFrame {
    bytes: [u8; TRANSACTION_LEN],
}

impl TransactionFrame {
    /// Copy `buf` into a frame, requiring exactly [`TRANSACTION_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::WrongLength`] for any other length.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        let bytes = <[u8; TRANSACTION_LEN]>::try_from(buf)
            .map_err(|_| FrameError::WrongLength(buf.len()))?;
        Ok(Self { bytes })
    }

    /// Source identifier field.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the field is not three ASCII digits.
    pub fn source(&self) -> Result<NodeId, FrameError> { parse_id("source", &self.bytes[SOURCE]) }

    /// Destination identifier field.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the field is not three ASCII digits.
    pub fn destination(&self) -> Result<NodeId, FrameError> {
        parse_id("destination", &self.bytes[DESTINATION])
    }

    /// Message type indicator as a number.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the field is not four ASCII digits.
    pub fn mti(&self) -> Result<u32, FrameError> { parse_decimal("mti", &self.bytes[MTI]) }

    /// Raw trace number digits.
    #[must_use]
    pub fn trace(&self) -> &[u8] { &self.bytes[TRACE] }

    /// Raw primary account number digits.
    #[must_use]
    pub fn pan(&self) -> &[u8] { &self.bytes[PAN] }

    /// Build the reply frame: MTI + 10, source and destination swapped.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the source, destination, or MTI field is
    /// not decimal.
    pub fn response(&self) -> Result<Self, FrameError> {
        let source = self.source()?;
        let destination = self.destination()?;
        let mti = (self.mti()? + MTI_STEP) % MTI_MODULUS;

        let mut bytes = self.bytes;
        write_decimal(&mut bytes[SOURCE], u32::from(destination.get()));
        write_decimal(&mut bytes[MTI], mti);
        write_decimal(&mut bytes[DESTINATION], u32::from(source.get()));
        Ok(Self { bytes })
    }

    /// Borrow the raw frame bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TRANSACTION_LEN] { &self.bytes }

    /// Consume the view and return the raw frame bytes.
    #[must_use]
    pub fn into_bytes(self) -> [u8; TRANSACTION_LEN] { self.bytes }
}

impl fmt::Debug for TransactionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransactionFrame")
            .field(&String::from_utf8_lossy(&self.bytes))
            .finish()
    }
}
