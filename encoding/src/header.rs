//! Data element header primitives: attribute tags and value representations.

use std::fmt;
use std::str::FromStr;

/// The data type for DICOM data element tags.
///
/// Tags are ordered by group, then by element,
/// which is also the order in which they must appear in an encoded data set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Tag(pub u16, pub u16);

impl Tag {
    /// Getter for the tag's group value.
    #[inline]
    pub const fn group(self) -> u16 {
        self.0
    }

    /// Getter for the tag's element value.
    #[inline]
    pub const fn element(self) -> u16 {
        self.1
    }

    /// Obtain the 32-bit key of this tag,
    /// with the group number in the most significant half.
    #[inline]
    pub const fn to_u32(self) -> u32 {
        ((self.0 as u32) << 16) | self.1 as u32
    }

    /// Build a tag from its 32-bit key.
    #[inline]
    pub const fn from_u32(key: u32) -> Self {
        Tag((key >> 16) as u16, key as u16)
    }

    /// Whether this is a group length attribute, `(gggg,0000)`.
    #[inline]
    pub const fn is_group_length(self) -> bool {
        self.1 == 0
    }

    /// Whether the tag belongs to a private group.
    #[inline]
    pub const fn is_private(self) -> bool {
        self.0 & 1 == 1
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Tag({:#06X?}, {:#06X?})", self.0, self.1)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

impl From<(u16, u16)> for Tag {
    #[inline]
    fn from(value: (u16, u16)) -> Tag {
        Tag(value.0, value.1)
    }
}

impl From<u32> for Tag {
    #[inline]
    fn from(key: u32) -> Tag {
        Tag::from_u32(key)
    }
}

impl From<Tag> for u32 {
    #[inline]
    fn from(tag: Tag) -> u32 {
        tag.to_u32()
    }
}

/// An enum type for a DICOM value representation.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Ord, PartialOrd)]
pub enum VR {
    /// Application Entity
    AE,
    /// Age String
    AS,
    /// Attribute Tag
    AT,
    /// Code String
    CS,
    /// Date
    DA,
    /// Decimal String
    DS,
    /// Date Time
    DT,
    /// Floating Point Single
    FL,
    /// Floating Point Double
    FD,
    /// Integer String
    IS,
    /// Long String
    LO,
    /// Long Text
    LT,
    /// Other Byte
    OB,
    /// Other Double
    OD,
    /// Other Float
    OF,
    /// Other Long
    OL,
    /// Other Very Long
    OV,
    /// Other Word
    OW,
    /// Person Name
    PN,
    /// Short String
    SH,
    /// Signed Long
    SL,
    /// Sequence of Items
    SQ,
    /// Signed Short
    SS,
    /// Short Text
    ST,
    /// Signed Very Long
    SV,
    /// Time
    TM,
    /// Unlimited Characters
    UC,
    /// Unique Identifier (UID)
    UI,
    /// Unsigned Long
    UL,
    /// Unknown
    UN,
    /// Universal Resource Identifier or Universal Resource Locator (URI/URL)
    UR,
    /// Unsigned Short
    US,
    /// Unlimited Text
    UT,
    /// Unsigned Very Long
    UV,
}

impl VR {
    /// Obtain the value representation corresponding to the given two bytes.
    /// Each byte should represent an alphabetic character in upper case.
    pub fn from_binary(chars: [u8; 2]) -> Option<Self> {
        std::str::from_utf8(chars.as_ref())
            .ok()
            .and_then(|s| VR::from_str(s).ok())
    }

    /// Retrieve a string representation of this VR.
    pub fn as_str(self) -> &'static str {
        use VR::*;
        match self {
            AE => "AE",
            AS => "AS",
            AT => "AT",
            CS => "CS",
            DA => "DA",
            DS => "DS",
            DT => "DT",
            FL => "FL",
            FD => "FD",
            IS => "IS",
            LO => "LO",
            LT => "LT",
            OB => "OB",
            OD => "OD",
            OF => "OF",
            OL => "OL",
            OV => "OV",
            OW => "OW",
            PN => "PN",
            SH => "SH",
            SL => "SL",
            SQ => "SQ",
            SS => "SS",
            ST => "ST",
            SV => "SV",
            TM => "TM",
            UC => "UC",
            UI => "UI",
            UL => "UL",
            UN => "UN",
            UR => "UR",
            US => "US",
            UT => "UT",
            UV => "UV",
        }
    }

    /// Retrieve a copy of this VR's byte representation.
    /// The function returns two alphabetic characters in upper case.
    pub fn to_bytes(self) -> [u8; 2] {
        let bytes = self.as_str().as_bytes();
        [bytes[0], bytes[1]]
    }

    /// Whether the value length of this VR is encoded in 16 bits
    /// in explicit VR transfer syntaxes.
    ///
    /// PS3.5 7.1.2: all other VRs carry two reserved bytes
    /// followed by a 32-bit length.
    pub fn has_short_length(self) -> bool {
        use VR::*;
        matches!(
            self,
            AE | AS
                | AT
                | CS
                | DA
                | DS
                | DT
                | FL
                | FD
                | IS
                | LO
                | LT
                | PN
                | SH
                | SL
                | SS
                | ST
                | TM
                | UI
                | UL
                | US
        )
    }

    /// Whether values of this VR are character strings.
    pub fn is_text(self) -> bool {
        use VR::*;
        matches!(
            self,
            AE | AS | CS | DA | DS | DT | IS | LO | LT | PN | SH | ST | TM | UC | UI | UR | UT
        )
    }

    /// Whether values of this VR may hold multiple values
    /// separated by a backslash.
    pub fn is_multi_valued_text(self) -> bool {
        self.is_text() && !matches!(self, VR::LT | VR::ST | VR::UT | VR::UR)
    }

    /// The byte used to pad values of this VR to an even length.
    pub fn padding(self) -> u8 {
        if self.is_text() && self != VR::UI {
            b' '
        } else {
            0
        }
    }

    /// The size of each binary number in a value of this VR,
    /// which determines how bytes are swapped between endiannesses.
    /// Returns `None` for VRs whose values are byte strings.
    pub fn unit_size(self) -> Option<usize> {
        use VR::*;
        match self {
            AT | OW | SS | US => Some(2),
            FL | OF | OL | SL | UL => Some(4),
            FD | OD | OV | SV | UV => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for VR {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Obtain the value representation corresponding to the given string.
/// The string should hold exactly two UTF-8 encoded alphabetic characters
/// in upper case, otherwise no match is made.
impl FromStr for VR {
    type Err = &'static str;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use VR::*;
        match string {
            "AE" => Ok(AE),
            "AS" => Ok(AS),
            "AT" => Ok(AT),
            "CS" => Ok(CS),
            "DA" => Ok(DA),
            "DS" => Ok(DS),
            "DT" => Ok(DT),
            "FL" => Ok(FL),
            "FD" => Ok(FD),
            "IS" => Ok(IS),
            "LO" => Ok(LO),
            "LT" => Ok(LT),
            "OB" => Ok(OB),
            "OD" => Ok(OD),
            "OF" => Ok(OF),
            "OL" => Ok(OL),
            "OV" => Ok(OV),
            "OW" => Ok(OW),
            "PN" => Ok(PN),
            "SH" => Ok(SH),
            "SL" => Ok(SL),
            "SQ" => Ok(SQ),
            "SS" => Ok(SS),
            "ST" => Ok(ST),
            "SV" => Ok(SV),
            "TM" => Ok(TM),
            "UC" => Ok(UC),
            "UI" => Ok(UI),
            "UL" => Ok(UL),
            "UN" => Ok(UN),
            "UR" => Ok(UR),
            "US" => Ok(US),
            "UT" => Ok(UT),
            "UV" => Ok(UV),
            _ => Err("no such value representation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn tag_key_and_display() {
        let tag = Tag(0x0010, 0x0020);
        assert_eq!(tag.to_u32(), 0x0010_0020);
        assert_eq!(Tag::from_u32(0x0010_0020), tag);
        assert_eq!(Tag::from(0x0008_0052), Tag(0x0008, 0x0052));
        assert_eq!(tag.to_string(), "(0010,0020)");
        assert_eq!(format!("{:?}", Tag(0x7FE0, 0x0010)), "Tag(0x7FE0, 0x0010)");
    }

    #[test]
    fn tags_are_ordered_by_group_then_element() {
        assert!(Tag(0x0008, 0xFFFF) < Tag(0x0010, 0x0000));
        assert!(Tag(0x0010, 0x0010) < Tag(0x0010, 0x0020));
    }

    #[rstest]
    #[case(VR::AE, true)]
    #[case(VR::UI, true)]
    #[case(VR::US, true)]
    #[case(VR::FD, true)]
    #[case(VR::OB, false)]
    #[case(VR::SQ, false)]
    #[case(VR::UN, false)]
    #[case(VR::UT, false)]
    #[case(VR::UC, false)]
    #[case(VR::SV, false)]
    fn explicit_length_class(#[case] vr: VR, #[case] short: bool) {
        assert_eq!(vr.has_short_length(), short);
    }

    #[rstest]
    #[case(VR::PN, b' ')]
    #[case(VR::CS, b' ')]
    #[case(VR::UI, 0)]
    #[case(VR::OB, 0)]
    #[case(VR::US, 0)]
    fn padding_byte(#[case] vr: VR, #[case] padding: u8) {
        assert_eq!(vr.padding(), padding);
    }

    #[test]
    fn vr_from_binary() {
        assert_eq!(VR::from_binary(*b"PN"), Some(VR::PN));
        assert_eq!(VR::from_binary(*b"SV"), Some(VR::SV));
        assert_eq!(VR::from_binary(*b"pn"), None);
        assert_eq!(VR::from_binary([0, 0]), None);
        assert_eq!(VR::TM.to_bytes(), *b"TM");
    }
}
