//! This module contains all DICOM data set encoding logic.

use crate::dataset::Dataset;
use crate::decode::{swap_units, UNDEFINED_LENGTH};
use crate::element::{DataElement, Value};
use crate::header::{Tag, VR};
use crate::tags::{ITEM, ITEM_DELIMITATION_ITEM, SEQUENCE_DELIMITATION_ITEM};
use crate::transfer_syntax::TransferSyntax;
use byteordered::byteorder::{BigEndian, ByteOrder, LittleEndian};
use byteordered::Endianness;
use snafu::{ensure, Backtrace, Snafu};
use std::borrow::Cow;

/// Module-level error type:
/// for errors which may occur while encoding DICOM data.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Value of {tag} ({vr}) is too long to encode: {length} bytes"))]
    ValueTooLong {
        tag: Tag,
        vr: VR,
        length: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Encode a data set into a new byte vector.
///
/// Elements are written in ascending tag order.
/// Sequences and their items are written with undefined length.
pub fn encode_dataset(dataset: &Dataset, ts: TransferSyntax) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_dataset(&mut out, dataset, ts)?;
    Ok(out)
}

/// Encode a data set, appending the bytes to the given vector.
pub fn write_dataset(out: &mut Vec<u8>, dataset: &Dataset, ts: TransferSyntax) -> Result<()> {
    let encoder = DatasetEncoder { ts };
    for element in dataset.iter() {
        encoder.write_element(out, element)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct DatasetEncoder {
    ts: TransferSyntax,
}

impl DatasetEncoder {
    fn put_u16(&self, out: &mut Vec<u8>, value: u16) {
        let mut buf = [0u8; 2];
        match self.ts.endianness() {
            Endianness::Little => LittleEndian::write_u16(&mut buf, value),
            Endianness::Big => BigEndian::write_u16(&mut buf, value),
        }
        out.extend_from_slice(&buf);
    }

    fn put_u32(&self, out: &mut Vec<u8>, value: u32) {
        let mut buf = [0u8; 4];
        match self.ts.endianness() {
            Endianness::Little => LittleEndian::write_u32(&mut buf, value),
            Endianness::Big => BigEndian::write_u32(&mut buf, value),
        }
        out.extend_from_slice(&buf);
    }

    fn put_tag(&self, out: &mut Vec<u8>, tag: Tag) {
        self.put_u16(out, tag.group());
        self.put_u16(out, tag.element());
    }

    fn write_header(&self, out: &mut Vec<u8>, tag: Tag, vr: VR, length: u32) -> Result<()> {
        self.put_tag(out, tag);
        if self.ts.is_explicit_vr() {
            out.extend_from_slice(&vr.to_bytes());
            if vr.has_short_length() {
                // PS3.5 7.1.2: 16-bit length right after the VR
                ensure!(
                    length <= u32::from(u16::MAX),
                    ValueTooLongSnafu {
                        tag,
                        vr,
                        length: length as usize,
                    }
                );
                self.put_u16(out, length as u16);
            } else {
                // two reserved bytes, then a 32-bit length
                out.extend_from_slice(&[0, 0]);
                self.put_u32(out, length);
            }
        } else {
            self.put_u32(out, length);
        }
        Ok(())
    }

    fn write_element(&self, out: &mut Vec<u8>, element: &DataElement) -> Result<()> {
        let tag = element.tag();
        let vr = element.vr();
        match element.value() {
            Value::Sequence(items) => {
                self.write_header(out, tag, VR::SQ, UNDEFINED_LENGTH)?;
                for item in items {
                    self.put_tag(out, ITEM);
                    self.put_u32(out, UNDEFINED_LENGTH);
                    for element in item.iter() {
                        self.write_element(out, element)?;
                    }
                    self.put_tag(out, ITEM_DELIMITATION_ITEM);
                    self.put_u32(out, 0);
                }
                self.put_tag(out, SEQUENCE_DELIMITATION_ITEM);
                self.put_u32(out, 0);
            }
            Value::Primitive(bytes) => {
                let mut value = Cow::Borrowed(&bytes[..]);
                if value.len() % 2 == 1 {
                    value.to_mut().push(vr.padding());
                }
                if let (Endianness::Big, Some(unit)) = (self.ts.endianness(), vr.unit_size()) {
                    value = Cow::Owned(swap_units(&value, unit));
                }
                ensure!(
                    value.len() < UNDEFINED_LENGTH as usize,
                    ValueTooLongSnafu {
                        tag,
                        vr,
                        length: value.len(),
                    }
                );
                self.write_header(out, tag, vr, value.len() as u32)?;
                out.extend_from_slice(&value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_dataset;
    use crate::tags;

    fn sample() -> Dataset {
        let mut dataset = Dataset::new();
        dataset.put_str(tags::PATIENT_NAME, "Doe^John");
        dataset.put_str(tags::MODALITY, "MR");
        dataset.put_u16(tags::ROWS, 512);
        dataset
    }

    #[test]
    fn encode_explicit_vr_le() {
        #[rustfmt::skip]
        const EXPECTED: &[u8] = &[
            0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x02, 0x00, b'M', b'R',
            0x10, 0x00, 0x10, 0x00, b'P', b'N', 0x08, 0x00,
                b'D', b'o', b'e', b'^', b'J', b'o', b'h', b'n',
            0x28, 0x00, 0x10, 0x00, b'U', b'S', 0x02, 0x00, 0x00, 0x02,
        ];
        let bytes = encode_dataset(&sample(), TransferSyntax::ExplicitVrLittleEndian).unwrap();
        assert_eq!(bytes, EXPECTED);
    }

    #[test]
    fn encode_implicit_vr_le() {
        #[rustfmt::skip]
        const EXPECTED: &[u8] = &[
            0x08, 0x00, 0x60, 0x00, 0x02, 0x00, 0x00, 0x00, b'M', b'R',
            0x10, 0x00, 0x10, 0x00, 0x08, 0x00, 0x00, 0x00,
                b'D', b'o', b'e', b'^', b'J', b'o', b'h', b'n',
            0x28, 0x00, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02,
        ];
        let bytes = encode_dataset(&sample(), TransferSyntax::ImplicitVrLittleEndian).unwrap();
        assert_eq!(bytes, EXPECTED);
    }

    #[test]
    fn long_length_vrs_use_reserved_bytes() {
        let mut dataset = Dataset::new();
        dataset.put(DataElement::from_bytes(Tag(0x0009, 0x1001), VR::OB, vec![1, 2, 3]));
        #[rustfmt::skip]
        const EXPECTED: &[u8] = &[
            0x09, 0x00, 0x01, 0x10, b'O', b'B', 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
            1, 2, 3, 0,
        ];
        let bytes = encode_dataset(&dataset, TransferSyntax::ExplicitVrLittleEndian).unwrap();
        assert_eq!(bytes, EXPECTED);
    }

    #[test]
    fn short_length_overflow_is_an_error() {
        let mut dataset = Dataset::new();
        dataset.put(DataElement::from_bytes(tags::PATIENT_ID, VR::LO, vec![b'A'; 70_000]));
        assert!(matches!(
            encode_dataset(&dataset, TransferSyntax::ExplicitVrLittleEndian),
            Err(Error::ValueTooLong { length: 70_000, .. })
        ));
        // implicit VR has a 32-bit length for everything
        assert!(encode_dataset(&dataset, TransferSyntax::ImplicitVrLittleEndian).is_ok());
    }

    #[test]
    fn explicit_vr_round_trip() {
        let mut item = Dataset::new();
        item.put_str(tags::REFERENCED_SOP_CLASS_UID, "1.2.840.10008.5.1.4.1.1.2");
        item.put_str(tags::REFERENCED_SOP_INSTANCE_UID, "1.2.3.4.5");

        let mut dataset = sample();
        dataset.put(DataElement::from_texts(
            tags::MODALITIES_IN_STUDY,
            VR::CS,
            ["CT", "MR"],
        ));
        dataset.put_str(tags::STUDY_INSTANCE_UID, "1.2.3");
        dataset.put_empty(tags::STUDY_DATE);
        dataset.put_u32(Tag(0x0009, 0x1002), 0xDEAD_BEEF);
        dataset.put(DataElement::from_bytes(Tag(0x0009, 0x1003), VR::FD, 1.5_f64.to_le_bytes()));
        dataset.put(DataElement::sequence(
            tags::REFERENCED_STUDY_SEQUENCE,
            vec![item.clone(), item],
        ));
        dataset.put(DataElement::sequence(tags::REQUEST_ATTRIBUTES_SEQUENCE, vec![]));

        for ts in [
            TransferSyntax::ExplicitVrLittleEndian,
            TransferSyntax::ExplicitVrBigEndian,
        ] {
            let bytes = encode_dataset(&dataset, ts).unwrap();
            let decoded = decode_dataset(&bytes, ts).unwrap();
            assert_eq!(decoded, dataset, "round trip through {ts}");
        }
    }
}
