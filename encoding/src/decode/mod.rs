//! This module contains all DICOM data set decoding logic.
//!
//! Decoding works over a byte slice holding the complete data set.
//! Every read is bounds checked,
//! so truncated or inconsistent input is reported as an error
//! instead of reading past the end of the buffer.

use crate::dataset::Dataset;
use crate::dictionary::StandardDictionary;
use crate::element::{DataElement, Value};
use crate::header::{Tag, VR};
use crate::tags::{ITEM, ITEM_DELIMITATION_ITEM, SEQUENCE_DELIMITATION_ITEM};
use crate::transfer_syntax::TransferSyntax;
use byteordered::byteorder::{BigEndian, ByteOrder, LittleEndian};
use byteordered::Endianness;
use snafu::{ensure, Backtrace, Snafu};

/// The length value used for undefined length sequences and items.
pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// The maximum number of sequences nested in one another
/// which the decoder accepts.
pub const MAX_SEQUENCE_DEPTH: usize = 256;

/// Module-level error type:
/// for errors which may occur while decoding DICOM data.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display(
        "Malformed element at offset {offset}: needed {needed} bytes but {available} remain"
    ))]
    MalformedElement {
        offset: usize,
        needed: usize,
        available: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Unexpected delimiter {tag} at offset {offset}"))]
    UnexpectedDelimiter {
        tag: Tag,
        offset: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Expected a sequence item at offset {offset}, found {tag}"))]
    UnexpectedItemTag {
        tag: Tag,
        offset: usize,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "Sequence {tag} at offset {offset} is nested deeper than {max_depth} levels"
    ))]
    SequenceTooDeep {
        tag: Tag,
        offset: usize,
        max_depth: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Undefined length is not supported for {tag} ({vr})"))]
    UndefinedLength {
        tag: Tag,
        vr: VR,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decode a complete data set from the given bytes.
pub fn decode_dataset(bytes: &[u8], ts: TransferSyntax) -> Result<Dataset> {
    DatasetDecoder::new(bytes, ts).read_dataset(false)
}

/// The header of an encoded data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ElementHeader {
    tag: Tag,
    vr: VR,
    length: u32,
}

#[derive(Debug)]
struct DatasetDecoder<'a> {
    data: &'a [u8],
    /// position in `data`
    pos: usize,
    /// offset of `data` within the outermost buffer
    base: usize,
    /// number of sequences around the current position
    depth: usize,
    ts: TransferSyntax,
}

impl<'a> DatasetDecoder<'a> {
    fn new(data: &'a [u8], ts: TransferSyntax) -> Self {
        DatasetDecoder {
            data,
            pos: 0,
            base: 0,
            depth: 0,
            ts,
        }
    }

    /// Create a decoder over a slice previously taken from this one.
    fn nested(&self, data: &'a [u8], base: usize) -> Self {
        DatasetDecoder {
            data,
            pos: 0,
            base,
            depth: self.depth,
            ts: self.ts,
        }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.data.len() - self.pos;
        ensure!(
            n <= available,
            MalformedElementSnafu {
                offset: self.offset(),
                needed: n,
                available,
            }
        );
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(match self.ts.endianness() {
            Endianness::Little => LittleEndian::read_u16(bytes),
            Endianness::Big => BigEndian::read_u16(bytes),
        })
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(match self.ts.endianness() {
            Endianness::Little => LittleEndian::read_u32(bytes),
            Endianness::Big => BigEndian::read_u32(bytes),
        })
    }

    fn read_tag(&mut self) -> Result<Tag> {
        let group = self.read_u16()?;
        let element = self.read_u16()?;
        Ok(Tag(group, element))
    }

    /// Read the rest of an element header after its tag.
    fn read_header(&mut self, tag: Tag) -> Result<ElementHeader> {
        if self.ts.is_explicit_vr() {
            let vr_bytes = self.take(2)?;
            let vr = VR::from_binary([vr_bytes[0], vr_bytes[1]]).unwrap_or(VR::UN);
            let length = if vr.has_short_length() {
                u32::from(self.read_u16()?)
            } else {
                // reserved
                self.take(2)?;
                self.read_u32()?
            };
            Ok(ElementHeader { tag, vr, length })
        } else {
            let length = self.read_u32()?;
            let vr = StandardDictionary.vr_of(tag).unwrap_or(VR::UN);
            Ok(ElementHeader { tag, vr, length })
        }
    }

    /// Read data elements until the end of the slice,
    /// or until an item delimiter if `delimited` is set.
    fn read_dataset(&mut self, delimited: bool) -> Result<Dataset> {
        let mut dataset = Dataset::new();
        loop {
            if self.at_end() {
                ensure!(
                    !delimited,
                    MalformedElementSnafu {
                        offset: self.offset(),
                        needed: 8_usize,
                        available: 0_usize,
                    }
                );
                return Ok(dataset);
            }
            let offset = self.offset();
            let tag = self.read_tag()?;
            if tag == ITEM_DELIMITATION_ITEM {
                self.read_u32()?;
                ensure!(delimited, UnexpectedDelimiterSnafu { tag, offset });
                return Ok(dataset);
            }
            ensure!(
                tag.group() != 0xFFFE,
                UnexpectedDelimiterSnafu { tag, offset }
            );
            let header = self.read_header(tag)?;
            dataset.put(self.read_value(header)?);
        }
    }

    fn read_value(&mut self, header: ElementHeader) -> Result<DataElement> {
        let ElementHeader { tag, vr, length } = header;
        let implicit_sequence =
            !self.ts.is_explicit_vr() && vr == VR::UN && length == UNDEFINED_LENGTH;
        if vr == VR::SQ || implicit_sequence {
            ensure!(
                self.depth < MAX_SEQUENCE_DEPTH,
                SequenceTooDeepSnafu {
                    tag,
                    offset: self.offset(),
                    max_depth: MAX_SEQUENCE_DEPTH,
                }
            );
            self.depth += 1;
            let items = if length == UNDEFINED_LENGTH {
                self.read_items(true)?
            } else {
                let base = self.offset();
                let body = self.take(length as usize)?;
                self.nested(body, base).read_items(false)?
            };
            self.depth -= 1;
            return Ok(DataElement::sequence(tag, items));
        }

        ensure!(length != UNDEFINED_LENGTH, UndefinedLengthSnafu { tag, vr });
        let bytes = self.take(length as usize)?;
        let bytes = match (self.ts.endianness(), vr.unit_size()) {
            (Endianness::Big, Some(unit)) => swap_units(bytes, unit),
            _ => bytes.to_vec(),
        };
        Ok(DataElement::new(tag, vr, Value::Primitive(bytes)))
    }

    /// Read sequence items until the end of the slice,
    /// or until a sequence delimiter if `delimited` is set.
    fn read_items(&mut self, delimited: bool) -> Result<Vec<Dataset>> {
        let mut items = Vec::new();
        loop {
            if self.at_end() {
                ensure!(
                    !delimited,
                    MalformedElementSnafu {
                        offset: self.offset(),
                        needed: 8_usize,
                        available: 0_usize,
                    }
                );
                return Ok(items);
            }
            let offset = self.offset();
            let tag = self.read_tag()?;
            let length = self.read_u32()?;
            match tag {
                SEQUENCE_DELIMITATION_ITEM => {
                    ensure!(delimited, UnexpectedDelimiterSnafu { tag, offset });
                    return Ok(items);
                }
                ITEM if length == UNDEFINED_LENGTH => {
                    items.push(self.read_dataset(true)?);
                }
                ITEM => {
                    let base = self.offset();
                    let body = self.take(length as usize)?;
                    items.push(self.nested(body, base).read_dataset(false)?);
                }
                _ => return UnexpectedItemTagSnafu { tag, offset }.fail(),
            }
        }
    }
}

/// Reverse the byte order of each binary number in a value.
pub(crate) fn swap_units(bytes: &[u8], unit: usize) -> Vec<u8> {
    let mut out = bytes.to_vec();
    for chunk in out.chunks_mut(unit) {
        chunk.reverse();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags;

    // manually crafted DICOM data elements
    //  Tag: (0008,0060) Modality
    //  VR: CS
    //  Length: 2
    //  Value: "MR"
    // --
    //  Tag: (0010,0010) Patient Name
    //  VR: PN
    //  Length: 8
    //  Value: "Doe^John"
    // --
    //  Tag: (0028,0010) Rows
    //  VR: US
    //  Length: 2
    //  Value: 512
    #[rustfmt::skip]
    const RAW_EXPLICIT_LE: &[u8] = &[
        0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x02, 0x00, b'M', b'R',
        0x10, 0x00, 0x10, 0x00, b'P', b'N', 0x08, 0x00,
            b'D', b'o', b'e', b'^', b'J', b'o', b'h', b'n',
        0x28, 0x00, 0x10, 0x00, b'U', b'S', 0x02, 0x00, 0x00, 0x02,
    ];

    // the same elements in implicit VR little endian
    #[rustfmt::skip]
    const RAW_IMPLICIT_LE: &[u8] = &[
        0x08, 0x00, 0x60, 0x00, 0x02, 0x00, 0x00, 0x00, b'M', b'R',
        0x10, 0x00, 0x10, 0x00, 0x08, 0x00, 0x00, 0x00,
            b'D', b'o', b'e', b'^', b'J', b'o', b'h', b'n',
        0x28, 0x00, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02,
    ];

    // and in explicit VR big endian
    #[rustfmt::skip]
    const RAW_EXPLICIT_BE: &[u8] = &[
        0x00, 0x08, 0x00, 0x60, b'C', b'S', 0x00, 0x02, b'M', b'R',
        0x00, 0x10, 0x00, 0x10, b'P', b'N', 0x00, 0x08,
            b'D', b'o', b'e', b'^', b'J', b'o', b'h', b'n',
        0x00, 0x28, 0x00, 0x10, b'U', b'S', 0x00, 0x02, 0x02, 0x00,
    ];

    fn check_sample(dataset: &Dataset) {
        assert_eq!(dataset.len(), 3);
        let modality = dataset.get(tags::MODALITY).unwrap();
        assert_eq!(modality.vr(), VR::CS);
        assert_eq!(modality.to_str().as_deref(), Some("MR"));
        assert_eq!(dataset.str(tags::PATIENT_NAME).as_deref(), Some("Doe^John"));
        assert_eq!(dataset.u16(tags::ROWS), Some(512));
    }

    #[test]
    fn decode_explicit_vr_le() {
        let dataset = decode_dataset(RAW_EXPLICIT_LE, TransferSyntax::ExplicitVrLittleEndian)
            .expect("should decode");
        check_sample(&dataset);
    }

    #[test]
    fn decode_implicit_vr_le_resolves_vr_from_dictionary() {
        let dataset = decode_dataset(RAW_IMPLICIT_LE, TransferSyntax::ImplicitVrLittleEndian)
            .expect("should decode");
        check_sample(&dataset);
        assert_eq!(dataset.get(tags::PATIENT_NAME).unwrap().vr(), VR::PN);
    }

    #[test]
    fn decode_explicit_vr_be() {
        let dataset = decode_dataset(RAW_EXPLICIT_BE, TransferSyntax::ExplicitVrBigEndian)
            .expect("should decode");
        check_sample(&dataset);
    }

    #[test]
    fn truncated_input_is_rejected_at_every_length() {
        for ts in TransferSyntax::ALL {
            let raw = match ts {
                TransferSyntax::ImplicitVrLittleEndian => RAW_IMPLICIT_LE,
                TransferSyntax::ExplicitVrLittleEndian => RAW_EXPLICIT_LE,
                TransferSyntax::ExplicitVrBigEndian => RAW_EXPLICIT_BE,
            };
            // cutting at an element boundary yields a shorter valid data set
            let boundaries = [0, 10, 26, raw.len()];
            for len in 0..=raw.len() {
                let result = decode_dataset(&raw[..len], ts);
                if boundaries.contains(&len) {
                    assert!(result.is_ok(), "{ts}: prefix of {len} bytes should decode");
                } else {
                    assert!(
                        matches!(result, Err(Error::MalformedElement { .. })),
                        "{ts}: prefix of {len} bytes should be malformed, got {result:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn length_beyond_buffer_is_malformed() {
        #[rustfmt::skip]
        const RAW: &[u8] = &[
            // (0010,0020) LO, claims 200 bytes
            0x10, 0x00, 0x20, 0x00, b'L', b'O', 0xC8, 0x00, b'A', b'B',
        ];
        let err = decode_dataset(RAW, TransferSyntax::ExplicitVrLittleEndian).unwrap_err();
        match err {
            Error::MalformedElement {
                offset,
                needed,
                available,
                ..
            } => {
                assert_eq!(offset, 8);
                assert_eq!(needed, 200);
                assert_eq!(available, 2);
            }
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn undefined_length_sequence() {
        #[rustfmt::skip]
        const RAW: &[u8] = &[
            // (0008,1110) SQ, undefined length
            0x08, 0x00, 0x10, 0x11, b'S', b'Q', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
            // item, undefined length
            0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF,
            // (0008,1155) UI "1.2"
            0x08, 0x00, 0x55, 0x11, b'U', b'I', 0x04, 0x00, b'1', b'.', b'2', 0x00,
            // item delimiter
            0xFE, 0xFF, 0x0D, 0xE0, 0x00, 0x00, 0x00, 0x00,
            // item, defined length 12
            0xFE, 0xFF, 0x00, 0xE0, 0x0C, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x55, 0x11, b'U', b'I', 0x04, 0x00, b'3', b'.', b'4', 0x00,
            // sequence delimiter
            0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00,
            // (0010,0020) LO "ID"
            0x10, 0x00, 0x20, 0x00, b'L', b'O', 0x02, 0x00, b'I', b'D',
        ];
        let dataset = decode_dataset(RAW, TransferSyntax::ExplicitVrLittleEndian).unwrap();
        let items = dataset
            .get(tags::REFERENCED_STUDY_SEQUENCE)
            .and_then(|e| e.items())
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].str(tags::REFERENCED_SOP_INSTANCE_UID).as_deref(),
            Some("1.2")
        );
        assert_eq!(
            items[1].str(tags::REFERENCED_SOP_INSTANCE_UID).as_deref(),
            Some("3.4")
        );
        assert_eq!(dataset.str(tags::PATIENT_ID).as_deref(), Some("ID"));

        // missing sequence delimiter
        let cut = &RAW[..RAW.len() - 18];
        assert!(matches!(
            decode_dataset(cut, TransferSyntax::ExplicitVrLittleEndian),
            Err(Error::MalformedElement { .. })
        ));
    }

    /// `depth` undefined length sequences, each in an item of the previous one.
    fn nested_sequences(depth: usize) -> Vec<u8> {
        #[rustfmt::skip]
        const OPEN: &[u8] = &[
            // (0008,1110) SQ, undefined length
            0x08, 0x00, 0x10, 0x11, b'S', b'Q', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
            // item, undefined length
            0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        #[rustfmt::skip]
        const CLOSE: &[u8] = &[
            // item delimiter
            0xFE, 0xFF, 0x0D, 0xE0, 0x00, 0x00, 0x00, 0x00,
            // sequence delimiter
            0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00,
        ];
        let mut raw = OPEN.repeat(depth);
        raw.extend(CLOSE.repeat(depth));
        raw
    }

    #[test]
    fn sequence_nesting_is_bounded() {
        let ts = TransferSyntax::ExplicitVrLittleEndian;

        let mut dataset = decode_dataset(&nested_sequences(MAX_SEQUENCE_DEPTH), ts).unwrap();
        let mut depth = 0;
        while let Some(items) = dataset
            .get(tags::REFERENCED_STUDY_SEQUENCE)
            .and_then(|e| e.items())
        {
            assert_eq!(items.len(), 1);
            depth += 1;
            dataset = items[0].clone();
        }
        assert_eq!(depth, MAX_SEQUENCE_DEPTH);

        let err = decode_dataset(&nested_sequences(MAX_SEQUENCE_DEPTH + 1), ts).unwrap_err();
        assert!(matches!(
            err,
            Error::SequenceTooDeep {
                offset,
                max_depth: MAX_SEQUENCE_DEPTH,
                ..
            } if offset == MAX_SEQUENCE_DEPTH * 20 + 12
        ));

        // far deeper input fails the same way instead of exhausting the stack
        assert!(matches!(
            decode_dataset(&nested_sequences(60_000), ts),
            Err(Error::SequenceTooDeep { .. })
        ));
    }

    #[test]
    fn stray_delimiter_is_rejected() {
        #[rustfmt::skip]
        const RAW: &[u8] = &[
            0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(matches!(
            decode_dataset(RAW, TransferSyntax::ImplicitVrLittleEndian),
            Err(Error::UnexpectedDelimiter { offset: 0, .. })
        ));
    }
}
