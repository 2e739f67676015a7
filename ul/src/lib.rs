//! This crate contains the types and methods needed to interact
//! with DICOM nodes through the upper layer protocol,
//! as the requesting side of associations.
//!
//! - The [`destination`] module
//!   describes the remote application entities to associate with.
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   along with their encoding and decoding.
//! - The [`association`] module
//!   drives the life cycle of an association over a transport stream
//!   (see [`transport`]).
//! - The [`dimse`] module
//!   frames DIMSE messages and implements
//!   the C-ECHO, C-FIND and C-MOVE services on top of an association.
//! - The [`pool`] module
//!   keeps established associations for reuse,
//!   with a bounded number of them per destination.
//!
//! Failures are reported through [`Error`],
//! which can be sorted into an [`ErrorKind`].

pub mod association;
pub mod destination;
pub mod dimse;
pub mod error;
pub mod pdu;
pub mod pool;
pub mod transport;

/// The implementation class UID of this library.
///
/// Generated as per the standard, part 5, section B.2.
///
/// This UID may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.262150493178820632154947342718064218129";

/// The implementation version name of this library.
///
/// This name may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOMLINK 0.1.0";

// re-exports

pub use association::{Association, AssociationState, PresentationContextNegotiated};
pub use destination::{Destination, DestinationKey, Timeouts};
pub use dimse::{FindResponses, MoveOutcome, QueryLevel};
pub use error::{Error, ErrorKind, Result};
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
pub use pool::{Pool, PoolBuilder, PoolLimits, PoolStats, PooledAssociation};
pub use transport::{Connector, TcpConnector};
