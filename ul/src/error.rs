//! Crate-level error type.
//!
//! Every failure of an association, a DIMSE exchange or the pool
//! is reported through [`Error`],
//! and [`Error::kind`] sorts it into the coarse classes
//! a caller bases its retry policy on.
use std::time::Duration;

use crate::association::AssociationState;
use crate::dimse::CommandField;
use crate::pdu::{AbortRQSource, AssociationRJ, Pdu};
use snafu::{Backtrace, Snafu};

/// Type alias for a result from this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// invalid destination
    InvalidDestination {
        #[snafu(backtrace)]
        source: crate::destination::Error,
    },

    #[snafu(display("could not connect to {}:{}", host, port))]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("timed out after {:?} connecting to {}:{}", timeout, host, port))]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
        backtrace: Backtrace,
    },

    #[snafu(display("no association response within {:?}", timeout))]
    AssociationTimeout {
        timeout: Duration,
        backtrace: Backtrace,
    },

    #[snafu(display("{} did not complete within {:?}", operation, timeout))]
    OperationTimeout {
        operation: &'static str,
        timeout: Duration,
        backtrace: Backtrace,
    },

    #[snafu(display("{} was cancelled", operation))]
    Cancelled {
        operation: &'static str,
        backtrace: Backtrace,
    },

    /// failed to encode PDU message
    SendPdu {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to send PDU message on wire
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to read from the wire
    WireRead {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// the peer closed the connection
    ConnectionClosed { backtrace: Backtrace },

    #[snafu(display(
        "connection closed in the middle of a PDU ({} bytes buffered)",
        buffered
    ))]
    TruncatedPdu {
        buffered: usize,
        backtrace: Backtrace,
    },

    /// failed to receive PDU message
    ReceivePdu {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the remote application entity",
        length
    ))]
    SendTooLongPdu { length: usize, backtrace: Backtrace },

    #[snafu(display("unexpected PDU from peer: {}", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("association aborted by the peer ({})", abort_source))]
    PeerAborted {
        abort_source: AbortRQSource,
        backtrace: Backtrace,
    },

    /// the peer requested to release the association
    PeerReleased { backtrace: Backtrace },

    #[snafu(display("protocol version mismatch: expected {}, got {}", expected, got))]
    ProtocolVersionMismatch {
        expected: u16,
        got: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("association rejected by the peer: {}", association_rj))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    /// no presentation contexts accepted by the peer
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display(
        "presentation context {} was accepted with transfer syntax {:?}, which was not proposed",
        id,
        transfer_syntax
    ))]
    UnproposedTransferSyntax {
        id: u8,
        transfer_syntax: String,
        backtrace: Backtrace,
    },

    #[snafu(display("cannot {} while the association is {}", operation, state))]
    InvalidState {
        operation: &'static str,
        state: AssociationState,
        backtrace: Backtrace,
    },

    #[snafu(display("message received on unknown presentation context {}", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display("no accepted presentation context for {}", abstract_syntax))]
    NoPresentationContext {
        abstract_syntax: &'static str,
        backtrace: Backtrace,
    },

    /// failed to build or read a DIMSE message
    Dimse {
        #[snafu(backtrace)]
        source: crate::dimse::Error,
    },

    /// failed to encode the data set of a request
    EncodeDataset {
        #[snafu(backtrace)]
        source: dicomlink_encoding::encode::Error,
    },

    /// failed to decode the data set of a response
    DecodeDataset {
        #[snafu(backtrace)]
        source: dicomlink_encoding::decode::Error,
    },

    #[snafu(display("expected a {:?} response, got command field {:#06x}", expected, got))]
    UnexpectedResponse {
        expected: CommandField,
        got: u16,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "response refers to message {}, expected {}",
        got,
        expected
    ))]
    MessageIdMismatch {
        expected: u16,
        got: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("{} response is missing its data set", operation))]
    MissingResponseDataset {
        operation: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "{} failed with status {:#06x}{}",
        operation,
        status,
        error_comment.as_deref().map(|c| format!(": {}", c)).unwrap_or_default()
    ))]
    DimseFailure {
        operation: &'static str,
        status: u16,
        error_comment: Option<String>,
        backtrace: Backtrace,
    },

    #[snafu(display("no capacity left in the pool for {} ({} associations)", key, capacity))]
    PoolExhausted {
        key: String,
        capacity: usize,
        backtrace: Backtrace,
    },

    /// the pool is closed
    PoolClosed { backtrace: Backtrace },
}

/// The class of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// connect, read or write failure, including the peer going away
    Transport,
    /// malformed or unexpected data from the peer
    ProtocolViolation,
    /// the peer refused the association
    AssociationRejected,
    /// the handshake did not complete in time
    AssociationTimeout,
    /// a DIMSE operation or release did not complete in time
    OperationTimeout,
    /// the peer answered with a non-success DIMSE status
    DimseFailure,
    /// no capacity left in the pool
    PoolExhausted,
    /// the operation was cancelled by the caller or by closing the pool
    Cancelled,
    /// the engine was used incorrectly
    Usage,
}

impl Error {
    /// Obtain the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connect { .. }
            | Error::WireSend { .. }
            | Error::WireRead { .. }
            | Error::ConnectionClosed { .. }
            | Error::PeerAborted { .. }
            | Error::PeerReleased { .. } => ErrorKind::Transport,
            Error::TruncatedPdu { .. }
            | Error::ReceivePdu { .. }
            | Error::UnexpectedPdu { .. }
            | Error::ProtocolVersionMismatch { .. }
            | Error::UnproposedTransferSyntax { .. }
            | Error::UnknownPresentationContext { .. }
            | Error::DecodeDataset { .. }
            | Error::UnexpectedResponse { .. }
            | Error::MessageIdMismatch { .. }
            | Error::MissingResponseDataset { .. } => ErrorKind::ProtocolViolation,
            Error::Dimse { source } => {
                if source.is_protocol_violation() {
                    ErrorKind::ProtocolViolation
                } else {
                    ErrorKind::Usage
                }
            }
            Error::Rejected { .. } | Error::NoAcceptedPresentationContexts { .. } => {
                ErrorKind::AssociationRejected
            }
            Error::ConnectTimeout { .. } | Error::AssociationTimeout { .. } => {
                ErrorKind::AssociationTimeout
            }
            Error::OperationTimeout { .. } => ErrorKind::OperationTimeout,
            Error::DimseFailure { .. } => ErrorKind::DimseFailure,
            Error::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::InvalidDestination { .. }
            | Error::SendPdu { .. }
            | Error::SendTooLongPdu { .. }
            | Error::InvalidState { .. }
            | Error::NoPresentationContext { .. }
            | Error::EncodeDataset { .. }
            | Error::PoolClosed { .. } => ErrorKind::Usage,
        }
    }

    /// The DIMSE status reported by the peer, for DIMSE failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::DimseFailure { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error leaves the association unusable.
    ///
    /// A DIMSE failure is a complete exchange
    /// and usage errors are detected before touching the wire,
    /// so neither of them closes the association.
    pub(crate) fn is_fatal(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::DimseFailure | ErrorKind::Usage | ErrorKind::PoolExhausted
        )
    }

    /// Whether the connection is known to be gone,
    /// so that sending an A-ABORT is pointless.
    pub(crate) fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Error::WireSend { .. }
                | Error::WireRead { .. }
                | Error::ConnectionClosed { .. }
                | Error::TruncatedPdu { .. }
                | Error::PeerAborted { .. }
                | Error::PeerReleased { .. }
        )
    }
}
