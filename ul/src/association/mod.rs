//! DICOM association module
//!
//! An [`Association`] is the requesting side of one association
//! with a remote application entity,
//! bound to exactly one transport stream.
//! It is created [`Idle`](AssociationState::Idle),
//! drives the A-ASSOCIATE handshake on [`connect`](Association::connect),
//! runs one DIMSE exchange at a time while
//! [`Established`](AssociationState::Established),
//! and ends [`Closed`](AssociationState::Closed)
//! after a release, an abort or any failure of the connection.
//! A closed association is never reopened.
use std::fmt;

use dicomlink_encoding::TransferSyntax;

pub mod client;

pub use client::Association;

/// The life cycle of an association.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AssociationState {
    /// created, not connected yet
    Idle,
    /// the transport is connected, no request was sent
    TransportOpen,
    /// a request was sent and its response is awaited
    AwaitingResponse,
    /// negotiated and ready for the next operation
    Established,
    /// released, aborted or failed
    Closed,
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssociationState::Idle => "idle",
            AssociationState::TransportOpen => "transport open",
            AssociationState::AwaitingResponse => "awaiting response",
            AssociationState::Established => "established",
            AssociationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A presentation context accepted by the remote node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresentationContextNegotiated {
    /// the presentation context identifier
    pub id: u8,
    /// the abstract syntax UID, as proposed
    pub abstract_syntax: String,
    /// the transfer syntax chosen by the acceptor
    pub transfer_syntax: TransferSyntax,
}
