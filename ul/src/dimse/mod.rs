//! DIMSE message layer
//!
//! This module frames DIMSE command sets
//! (always in _Implicit VR Little Endian_),
//! splits commands and data sets into presentation data values
//! no larger than the peer accepts,
//! and puts them back together on reception.
//!
//! The service operations themselves
//! ([`echo`](crate::Association::echo), [`find`](crate::Association::find)
//! and [`move_study`](crate::Association::move_study))
//! are methods of the association.
pub mod command;
pub mod pdata;
pub mod query;
pub(crate) mod service;

pub use command::Command;
pub use pdata::{fragment, MessageAssembler};
pub use query::{
    InstanceQuery, InstanceRecord, QueryLevel, SeriesQuery, SeriesRecord, StudyQuery, StudyRecord,
    UnknownQueryLevel,
};
pub use service::{FindResponses, MoveOutcome};

use dicomlink_encoding::Tag;
use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// failed to encode command set
    EncodeCommand {
        #[snafu(backtrace)]
        source: dicomlink_encoding::encode::Error,
    },

    /// failed to decode command set
    DecodeCommand {
        #[snafu(backtrace)]
        source: dicomlink_encoding::decode::Error,
    },

    #[snafu(display("command set is missing {}", tag))]
    MissingCommandElement { tag: Tag, backtrace: Backtrace },

    #[snafu(display("command set has an invalid value for {}", tag))]
    InvalidCommandElement { tag: Tag, backtrace: Backtrace },

    #[snafu(display("unknown command field {:#06x}", command_field))]
    UnknownCommandField {
        command_field: u16,
        backtrace: Backtrace,
    },

    /// data set fragment received before the command was complete
    DataBeforeCommand { backtrace: Backtrace },

    #[snafu(display(
        "fragment on presentation context {} while receiving a message on context {}",
        got,
        expected
    ))]
    MixedPresentationContexts {
        expected: u8,
        got: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("{:?} fragment received after the last one", value_type))]
    FragmentAfterLast {
        value_type: crate::pdu::PDataValueType,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Whether the error was caused by data received from the peer.
    pub(crate) fn is_protocol_violation(&self) -> bool {
        !matches!(self, Error::EncodeCommand { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The command field of a DIMSE message.
#[allow(non_camel_case_types)]
#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CommandField {
    C_STORE_RQ = 0x0001,
    C_STORE_RSP = 0x8001,
    C_GET_RQ = 0x0010,
    C_GET_RSP = 0x8010,
    C_FIND_RQ = 0x0020,
    C_FIND_RSP = 0x8020,
    C_MOVE_RQ = 0x0021,
    C_MOVE_RSP = 0x8021,
    C_ECHO_RQ = 0x0030,
    C_ECHO_RSP = 0x8030,
    C_CANCEL_RQ = 0x0FFF,
}

impl CommandField {
    pub fn from_u16(value: u16) -> Option<Self> {
        use CommandField::*;
        let field = match value {
            0x0001 => C_STORE_RQ,
            0x8001 => C_STORE_RSP,
            0x0010 => C_GET_RQ,
            0x8010 => C_GET_RSP,
            0x0020 => C_FIND_RQ,
            0x8020 => C_FIND_RSP,
            0x0021 => C_MOVE_RQ,
            0x8021 => C_MOVE_RSP,
            0x0030 => C_ECHO_RQ,
            0x8030 => C_ECHO_RSP,
            0x0FFF => C_CANCEL_RQ,
            _ => return None,
        };
        Some(field)
    }

    pub fn is_response(self) -> bool {
        (self as u16) & 0x8000 != 0
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum Priority {
    Low = 0x0002,
    #[default]
    Medium = 0x0000,
    High = 0x0001,
}

/// The value of Command Data Set Type (0000,0800).
#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DataSetType {
    Present = 0x0001,
    Absent = 0x0101,
}

impl DataSetType {
    /// Any value other than 0101H means that a data set follows.
    pub fn from_u16(value: u16) -> Self {
        if value == DataSetType::Absent as u16 {
            DataSetType::Absent
        } else {
            DataSetType::Present
        }
    }
}

/// Well-known DIMSE status codes.
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    /// matches are continuing
    pub const PENDING: u16 = 0xFF00;
    /// matches are continuing, some optional keys were not supported
    pub const PENDING_WARNING: u16 = 0xFF01;
    /// matching terminated due to a cancel request
    pub const CANCEL: u16 = 0xFE00;
    /// sub-operations completed with one or more failures
    pub const SUB_OPERATIONS_WARNING: u16 = 0xB000;
}

/// The general meaning of a DIMSE status code.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StatusClass {
    Success,
    Pending,
    Cancel,
    Warning,
    Failure,
}

impl StatusClass {
    pub fn of(code: u16) -> Self {
        match code {
            status::SUCCESS => StatusClass::Success,
            status::PENDING | status::PENDING_WARNING => StatusClass::Pending,
            status::CANCEL => StatusClass::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => StatusClass::Warning,
            _ => StatusClass::Failure,
        }
    }
}

/// Source of message IDs for the requests of one association.
///
/// IDs start at 1 and wrap back to 1 after 65535,
/// so 0 is never handed out.
#[derive(Debug, Clone)]
pub struct MessageIdCounter {
    next: u16,
}

impl Default for MessageIdCounter {
    fn default() -> Self {
        MessageIdCounter { next: 1 }
    }
}

impl MessageIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = if id == u16::MAX { 1 } else { id + 1 };
        id
    }
}
