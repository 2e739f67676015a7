//! Remote application entities and how to talk to them.
//!
//! A [`Destination`] names a service class provider
//! (host, port and called AE title),
//! the AE title this node presents itself with,
//! and the limits of the conversation:
//! maximum PDU length and the [`Timeouts`] of each operation.
//!
//! Destinations can be parsed with the syntax `«ae_title»@«host»:«port»`,
//! which works with IPv4 and bracketed IPv6 addresses as well as domain names.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::pdu::{DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

/// The calling AE title used when none is given.
pub const DEFAULT_CALLING_AE_TITLE: &str = "THIS-SCU";

/// A error in a destination or in its textual form.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("invalid AE title {:?}: {}", ae_title, reason))]
    InvalidAeTitle {
        ae_title: String,
        reason: &'static str,
        backtrace: Backtrace,
    },

    /// Missing `@` in AE address
    MissingAeTitle { backtrace: Backtrace },

    #[snafu(display("missing port in address {:?}", address))]
    MissingPort {
        address: String,
        backtrace: Backtrace,
    },

    #[snafu(display("invalid port in address {:?}", address))]
    InvalidPort {
        address: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },

    /// Empty host name
    MissingHost { backtrace: Backtrace },

    #[snafu(display(
        "maximum PDU length {} is outside of {}..={}",
        max_pdu_length,
        MINIMUM_PDU_SIZE,
        MAXIMUM_PDU_SIZE
    ))]
    InvalidMaxPduLength {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Check that a string is usable as an AE title.
///
/// AE titles have 1 to 16 characters.
/// Accepted characters are uppercase letters, digits,
/// `-`, `_` and `.`, plus spaces in the middle of the title.
pub fn validate_ae_title(ae_title: &str) -> Result<()> {
    let invalid = |reason: &'static str| {
        InvalidAeTitleSnafu {
            ae_title: ae_title.to_string(),
            reason,
        }
        .fail()
    };
    if ae_title.is_empty() {
        return invalid("empty");
    }
    if ae_title.len() > 16 {
        return invalid("longer than 16 characters");
    }
    if ae_title.starts_with(' ') || ae_title.ends_with(' ') {
        return invalid("leading or trailing spaces");
    }
    let allowed = |c: char| {
        c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | ' ')
    };
    if !ae_title.chars().all(allowed) {
        return invalid("only uppercase letters, digits, '-', '_', '.' and spaces are allowed");
    }
    Ok(())
}

/// Time limits of each phase of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeouts {
    /// opening the transport connection
    pub connect: Duration,
    /// waiting for A-ASSOCIATE-AC or A-ASSOCIATE-RJ
    pub association: Duration,
    /// a complete C-ECHO exchange
    pub echo: Duration,
    /// a complete C-FIND exchange, all responses included
    pub find: Duration,
    /// a complete C-MOVE exchange
    pub retrieve: Duration,
    /// waiting for A-RELEASE-RP
    pub release: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_secs(30),
            association: Duration::from_secs(30),
            echo: Duration::from_secs(10),
            find: Duration::from_secs(120),
            retrieve: Duration::from_secs(300),
            release: Duration::from_secs(10),
        }
    }
}

/// A remote application entity and the parameters to associate with it.
///
/// # Example
///
/// ```
/// # use dicomlink_ul::Destination;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let destination: Destination = "PACS@10.0.0.11:104".parse()?;
/// assert_eq!(destination.called_ae_title(), "PACS");
/// assert_eq!(destination.host(), "10.0.0.11");
/// assert_eq!(destination.port(), 104);
/// assert_eq!(destination.calling_ae_title(), "THIS-SCU");
///
/// let destination = destination.with_calling_ae_title("RIS");
/// assert_eq!(&destination.to_string(), "PACS@10.0.0.11:104");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: u16,
    calling_ae_title: String,
    called_ae_title: String,
    max_pdu_length: u32,
    retrieve: bool,
    timeouts: Timeouts,
}

impl Destination {
    /// Create a destination with the default calling AE title,
    /// maximum PDU length and timeouts.
    pub fn new(host: impl Into<String>, port: u16, called_ae_title: impl Into<String>) -> Self {
        Destination {
            host: host.into(),
            port,
            calling_ae_title: DEFAULT_CALLING_AE_TITLE.to_string(),
            called_ae_title: called_ae_title.into(),
            max_pdu_length: DEFAULT_MAX_PDU,
            retrieve: false,
            timeouts: Timeouts::default(),
        }
    }

    /// Define the calling AE title, which refers to this node.
    pub fn with_calling_ae_title(mut self, calling_ae_title: impl Into<String>) -> Self {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Override the called AE title.
    pub fn with_called_ae_title(mut self, called_ae_title: impl Into<String>) -> Self {
        self.called_ae_title = called_ae_title.into();
        self
    }

    /// Define the maximum length of PDUs this node is willing to receive.
    pub fn with_max_pdu_length(mut self, max_pdu_length: u32) -> Self {
        self.max_pdu_length = max_pdu_length;
        self
    }

    /// Also propose the C-MOVE presentation contexts when associating.
    pub fn with_retrieve(mut self, retrieve: bool) -> Self {
        self.retrieve = retrieve;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }

    pub fn called_ae_title(&self) -> &str {
        &self.called_ae_title
    }

    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    pub fn retrieve(&self) -> bool {
        self.retrieve
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Check the AE titles, host and maximum PDU length.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.host.is_empty(), MissingHostSnafu);
        validate_ae_title(&self.calling_ae_title)?;
        validate_ae_title(&self.called_ae_title)?;
        ensure!(
            (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&self.max_pdu_length),
            InvalidMaxPduLengthSnafu {
                max_pdu_length: self.max_pdu_length
            }
        );
        Ok(())
    }

    /// The key under which associations to this destination are pooled.
    pub fn key(&self) -> DestinationKey {
        DestinationKey {
            host: self.host.clone(),
            port: self.port,
            calling_ae_title: self.calling_ae_title.clone(),
            called_ae_title: self.called_ae_title.clone(),
            max_pdu_length: self.max_pdu_length,
            retrieve: self.retrieve,
        }
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ae_title, address) = s.split_once('@').context(MissingAeTitleSnafu)?;
        validate_ae_title(ae_title)?;

        let (host, port) = address.rsplit_once(':').context(MissingPortSnafu { address })?;
        let port: u16 = port.parse().context(InvalidPortSnafu { address })?;
        // bracketed IPv6 literal
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        ensure!(!host.is_empty(), MissingHostSnafu);

        Ok(Destination::new(host, port, ae_title))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.called_ae_title, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.called_ae_title, self.host, self.port)
        }
    }
}

/// The identity of a destination as far as pooling is concerned:
/// associations are only shared between requests
/// to the same host, port, calling and called AE title
/// which negotiate the same maximum PDU length and presentation contexts.
///
/// Timeouts are not part of the key,
/// a reused association takes those of the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationKey {
    pub host: String,
    pub port: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub max_pdu_length: u32,
    pub retrieve: bool,
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}@{}:{}",
            self.calling_ae_title, self.called_ae_title, self.host, self.port
        )
    }
}
