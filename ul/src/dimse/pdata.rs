//! Fragmentation and reassembly of DIMSE messages.
use snafu::ensure;

use crate::pdu::{PDataValue, PDataValueType, Pdu, MAXIMUM_PDU_SIZE};

use super::{
    DataBeforeCommandSnafu, FragmentAfterLastSnafu, MixedPresentationContextsSnafu, Result,
};

/// The largest fragment that fits in a P-DATA-TF PDU
/// of the given maximum length,
/// discounting the item length (4 bytes),
/// the presentation context ID and the control header.
fn max_fragment_len(max_pdu_length: u32) -> usize {
    let max_pdu_length = if max_pdu_length == 0 {
        MAXIMUM_PDU_SIZE
    } else {
        max_pdu_length
    };
    (max_pdu_length.saturating_sub(4 + 2) as usize).max(1)
}

/// Split a command or data set into P-DATA-TF PDUs,
/// one presentation data value each,
/// none longer than `max_pdu_length`.
///
/// The last value is marked as such.
/// Empty input still produces one (empty, last) value.
pub fn fragment(
    presentation_context_id: u8,
    value_type: PDataValueType,
    data: &[u8],
    max_pdu_length: u32,
) -> Vec<Pdu> {
    let max_len = max_fragment_len(max_pdu_length);
    if data.is_empty() {
        return vec![Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: true,
                data: Vec::new(),
            }],
        }];
    }
    let count = data.len().div_ceil(max_len);
    data.chunks(max_len)
        .enumerate()
        .map(|(i, chunk)| Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: i + 1 == count,
                data: chunk.to_vec(),
            }],
        })
        .collect()
}

/// Collects the fragments of one incoming DIMSE message.
///
/// The command fragments come first,
/// then the data set fragments if the command announces a data set.
/// All of them must travel on the same presentation context.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    presentation_context_id: Option<u8>,
    command: Vec<u8>,
    command_complete: bool,
    data: Vec<u8>,
    data_complete: bool,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take in one presentation data value.
    pub fn push(&mut self, value: PDataValue) -> Result<()> {
        match self.presentation_context_id {
            Some(expected) => ensure!(
                expected == value.presentation_context_id,
                MixedPresentationContextsSnafu {
                    expected,
                    got: value.presentation_context_id,
                }
            ),
            None => self.presentation_context_id = Some(value.presentation_context_id),
        }

        match value.value_type {
            PDataValueType::Command => {
                ensure!(
                    !self.command_complete,
                    FragmentAfterLastSnafu {
                        value_type: value.value_type
                    }
                );
                self.command.extend_from_slice(&value.data);
                self.command_complete = value.is_last;
            }
            PDataValueType::Data => {
                ensure!(self.command_complete, DataBeforeCommandSnafu);
                ensure!(
                    !self.data_complete,
                    FragmentAfterLastSnafu {
                        value_type: value.value_type
                    }
                );
                self.data.extend_from_slice(&value.data);
                self.data_complete = value.is_last;
            }
        }
        Ok(())
    }

    /// The presentation context of the message, once known.
    pub fn presentation_context_id(&self) -> Option<u8> {
        self.presentation_context_id
    }

    /// The complete command set bytes, once the last command fragment arrived.
    pub fn command(&self) -> Option<&[u8]> {
        self.command_complete.then_some(&self.command[..])
    }

    /// Whether any data set bytes were received.
    pub fn has_data(&self) -> bool {
        !self.data.is_empty() || self.data_complete
    }

    /// Take the complete data set bytes, once the last data fragment arrived.
    pub fn take_data(&mut self) -> Option<Vec<u8>> {
        if self.data_complete {
            Some(std::mem::take(&mut self.data))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimse::Error;
    use crate::pdu::MINIMUM_PDU_SIZE;

    fn values(pdus: Vec<Pdu>) -> Vec<PDataValue> {
        pdus.into_iter()
            .flat_map(|pdu| match pdu {
                Pdu::PData { data } => data,
                other => panic!("unexpected PDU {:?}", other),
            })
            .collect()
    }

    #[test]
    fn fragments_fit_the_max_pdu_length() {
        let data = vec![0xAB; 10_000];
        let fragments = values(fragment(1, PDataValueType::Data, &data, MINIMUM_PDU_SIZE));
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].data.len(), 4090);
        assert_eq!(fragments[1].data.len(), 4090);
        assert_eq!(fragments[2].data.len(), 10_000 - 2 * 4090);
        assert!(!fragments[0].is_last);
        assert!(!fragments[1].is_last);
        assert!(fragments[2].is_last);

        // exact multiple
        let data = vec![0xCD; 4090];
        let fragments = values(fragment(1, PDataValueType::Data, &data, MINIMUM_PDU_SIZE));
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].is_last);
    }

    #[test]
    fn empty_message_is_one_last_fragment() {
        let values = values(fragment(3, PDataValueType::Command, &[], MINIMUM_PDU_SIZE));
        assert_eq!(values.len(), 1);
        assert!(values[0].is_last);
        assert_eq!(values[0].presentation_context_id, 3);
    }

    #[test]
    fn reassemble_command_and_data() {
        let mut assembler = MessageAssembler::new();
        let command = vec![1u8; 9000];
        let data = vec![2u8; 5000];
        for value in values(fragment(5, PDataValueType::Command, &command, MINIMUM_PDU_SIZE)) {
            assert!(assembler.command().is_none());
            assembler.push(value).unwrap();
        }
        assert_eq!(assembler.command(), Some(&command[..]));
        assert!(!assembler.has_data());
        for value in values(fragment(5, PDataValueType::Data, &data, MINIMUM_PDU_SIZE)) {
            assert!(assembler.take_data().is_none());
            assembler.push(value).unwrap();
        }
        assert_eq!(assembler.presentation_context_id(), Some(5));
        assert_eq!(assembler.take_data(), Some(data));
    }

    #[test]
    fn reassembly_errors() {
        let fragment_of = |id, value_type, is_last| PDataValue {
            presentation_context_id: id,
            value_type,
            is_last,
            data: vec![0; 4],
        };

        let mut assembler = MessageAssembler::new();
        assert!(matches!(
            assembler.push(fragment_of(1, PDataValueType::Data, true)),
            Err(Error::DataBeforeCommand { .. })
        ));

        let mut assembler = MessageAssembler::new();
        assembler
            .push(fragment_of(1, PDataValueType::Command, false))
            .unwrap();
        assert!(matches!(
            assembler.push(fragment_of(3, PDataValueType::Command, true)),
            Err(Error::MixedPresentationContexts {
                expected: 1,
                got: 3,
                ..
            })
        ));
        assembler
            .push(fragment_of(1, PDataValueType::Command, true))
            .unwrap();
        assert!(matches!(
            assembler.push(fragment_of(1, PDataValueType::Command, true)),
            Err(Error::FragmentAfterLast { .. })
        ));
    }
}
