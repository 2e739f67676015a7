//! The transfer syntaxes understood by the codec.

use crate::uids;
use byteordered::Endianness;
use std::fmt;

/// A transfer syntax supported for data set encoding and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferSyntax {
    /// Implicit VR Little Endian, the default transfer syntax of DICOM.
    /// Command sets are always encoded in this transfer syntax.
    ImplicitVrLittleEndian,
    /// Explicit VR Little Endian
    ExplicitVrLittleEndian,
    /// Explicit VR Big Endian (retired, still negotiated by some peers)
    ExplicitVrBigEndian,
}

impl TransferSyntax {
    /// All supported transfer syntaxes, in order of preference.
    pub const ALL: [TransferSyntax; 3] = [
        TransferSyntax::ImplicitVrLittleEndian,
        TransferSyntax::ExplicitVrLittleEndian,
        TransferSyntax::ExplicitVrBigEndian,
    ];

    /// Obtain the transfer syntax identified by the given UID.
    ///
    /// Trailing null padding is ignored.
    pub fn from_uid(uid: &str) -> Option<Self> {
        match uid.trim_end_matches(['\0', ' ']) {
            uids::IMPLICIT_VR_LITTLE_ENDIAN => Some(TransferSyntax::ImplicitVrLittleEndian),
            uids::EXPLICIT_VR_LITTLE_ENDIAN => Some(TransferSyntax::ExplicitVrLittleEndian),
            uids::EXPLICIT_VR_BIG_ENDIAN => Some(TransferSyntax::ExplicitVrBigEndian),
            _ => None,
        }
    }

    /// The unique identifier of this transfer syntax.
    pub fn uid(self) -> &'static str {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => uids::IMPLICIT_VR_LITTLE_ENDIAN,
            TransferSyntax::ExplicitVrLittleEndian => uids::EXPLICIT_VR_LITTLE_ENDIAN,
            TransferSyntax::ExplicitVrBigEndian => uids::EXPLICIT_VR_BIG_ENDIAN,
        }
    }

    /// A human readable name of this transfer syntax.
    pub fn name(self) -> &'static str {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => "Implicit VR Little Endian",
            TransferSyntax::ExplicitVrLittleEndian => "Explicit VR Little Endian",
            TransferSyntax::ExplicitVrBigEndian => "Explicit VR Big Endian",
        }
    }

    /// Whether value representations are written next to each element.
    pub fn is_explicit_vr(self) -> bool {
        !matches!(self, TransferSyntax::ImplicitVrLittleEndian)
    }

    /// The byte order of binary fields and values.
    pub fn endianness(self) -> Endianness {
        match self {
            TransferSyntax::ExplicitVrBigEndian => Endianness::Big,
            _ => Endianness::Little,
        }
    }
}

impl fmt::Display for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::TransferSyntax;

    #[test]
    fn uid_lookup_ignores_padding() {
        assert_eq!(
            TransferSyntax::from_uid("1.2.840.10008.1.2\0"),
            Some(TransferSyntax::ImplicitVrLittleEndian)
        );
        assert_eq!(
            TransferSyntax::from_uid("1.2.840.10008.1.2.1"),
            Some(TransferSyntax::ExplicitVrLittleEndian)
        );
        assert_eq!(TransferSyntax::from_uid("1.2.840.10008.1.2.4.50"), None);
        for ts in TransferSyntax::ALL {
            assert_eq!(TransferSyntax::from_uid(ts.uid()), Some(ts));
        }
    }
}
