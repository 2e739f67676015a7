//! PDU reader module
//!
//! All readers work over complete byte slices.
//! Every item length is checked against the bytes actually remaining,
//! so a PDU claiming more data than it carries is rejected
//! instead of being read past its end.
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, Read};
use tracing::warn;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Unknown PDU type {:#04x}", pdu_type))]
    UnknownPduType { pdu_type: u8, backtrace: Backtrace },

    #[snafu(display(
        "PDU is truncated: {} bytes needed, only {} available",
        needed,
        available
    ))]
    TruncatedPdu {
        needed: usize,
        available: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read {} reserved bytes", bytes))]
    ReadReserved {
        bytes: u32,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "{} of length {} overruns the {} remaining bytes",
        item,
        length,
        remaining
    ))]
    ItemOverrun {
        item: &'static str,
        length: usize,
        remaining: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid item length {} (must be >=2)", length))]
    InvalidItemLength { length: u32, backtrace: Backtrace },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },
    #[snafu(display("PDU contained an invalid value {:?}", var_item))]
    InvalidPduVariable {
        var_item: PduVariableItem,
        backtrace: Backtrace,
    },
    #[snafu(display("Multiple transfer syntaxes were accepted"))]
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },
    #[snafu(display("Invalid reject source or reason"))]
    InvalidRejectSourceOrReason { backtrace: Backtrace },
    #[snafu(display("Invalid abort service provider"))]
    InvalidAbortSourceOrReason { backtrace: Backtrace },
    #[snafu(display("Invalid presentation context result reason"))]
    InvalidPresentationContextResultReason { backtrace: Backtrace },
    #[snafu(display("invalid transfer syntax sub-item"))]
    InvalidTransferSyntaxSubItem { backtrace: Backtrace },
    #[snafu(display("unknown presentation context sub-item"))]
    UnknownPresentationContextSubItem { backtrace: Backtrace },
    #[snafu(display("Text field `{}` is not ASCII", field))]
    DecodeText {
        field: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },
    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },
    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },
    #[snafu(display("Missing user information item"))]
    MissingUserInformation { backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Read the 6 byte header at the start of the given bytes.
///
/// Fails if fewer than 6 bytes are given
/// or if the type byte does not name a known PDU.
pub fn read_pdu_header(bytes: &[u8]) -> Result<PduHeader> {
    ensure!(
        bytes.len() >= PDU_HEADER_SIZE as usize,
        TruncatedPduSnafu {
            needed: PDU_HEADER_SIZE as usize,
            available: bytes.len(),
        }
    );
    let mut cursor = Cursor::new(bytes);

    // 1 - PDU-type
    let pdu_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "PDU-type" })?;
    // 2 - Reserved
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;
    // 3-6 - PDU-length
    let length = cursor
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu {
            field: "PDU-length",
        })?;

    let pdu_type = PduType::from_u8(pdu_type).context(UnknownPduTypeSnafu { pdu_type })?;
    Ok(PduHeader { pdu_type, length })
}

/// Read a PDU from the start of a receive buffer.
///
/// Returns `Ok(None)` if the buffer does not hold a complete PDU yet,
/// or the PDU along with the number of bytes it took.
/// The header is validated as soon as it is available,
/// so an unknown type or an excessive length is reported
/// before the body arrives.
///
/// With `strict`, PDUs longer than `max_pdu_length` are rejected.
/// Otherwise they are accepted up to [`MAXIMUM_PDU_SIZE`] with a warning.
pub fn read_pdu(buffer: &[u8], max_pdu_length: u32, strict: bool) -> Result<Option<(Pdu, usize)>> {
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    if buffer.len() < PDU_HEADER_SIZE as usize {
        return Ok(None);
    }
    let header = read_pdu_header(buffer)?;
    let pdu_length = header.length;

    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        warn!(
            "Incoming pdu was too large: length {}, maximum is {}",
            pdu_length, max_pdu_length
        );
    }

    let total = PDU_HEADER_SIZE as usize + pdu_length as usize;
    if buffer.len() < total {
        return Ok(None);
    }
    let body = &buffer[PDU_HEADER_SIZE as usize..total];
    let pdu = decode_pdu_body(header.pdu_type, body)?;
    Ok(Some((pdu, total)))
}

/// Decode a complete PDU, header included.
///
/// Unlike [`read_pdu`], missing bytes are an error.
pub fn decode_pdu(bytes: &[u8]) -> Result<Pdu> {
    let header = read_pdu_header(bytes)?;
    let total = PDU_HEADER_SIZE as usize + header.length as usize;
    let body = bytes
        .get(PDU_HEADER_SIZE as usize..total)
        .context(TruncatedPduSnafu {
            needed: total,
            available: bytes.len(),
        })?;
    decode_pdu_body(header.pdu_type, body)
}

/// Decode the body of a PDU of the given type.
pub fn decode_pdu_body(pdu_type: PduType, body: &[u8]) -> Result<Pdu> {
    match pdu_type {
        PduType::AssociationRQ => decode_associate_rq(body).map(Pdu::AssociationRQ),
        PduType::AssociationAC => decode_associate_ac(body).map(Pdu::AssociationAC),
        PduType::AssociationRJ => decode_associate_rj(body).map(Pdu::AssociationRJ),
        PduType::PData => decode_pdata(body).map(|data| Pdu::PData { data }),
        PduType::ReleaseRQ => decode_release_rq(body).map(|_| Pdu::ReleaseRQ),
        PduType::ReleaseRP => decode_release_rp(body).map(|_| Pdu::ReleaseRP),
        PduType::AbortRQ => decode_abort(body).map(|source| Pdu::AbortRQ { source }),
    }
}

/// The fields shared by A-ASSOCIATE-RQ and A-ASSOCIATE-AC bodies.
struct AssociationFields {
    protocol_version: u16,
    called_ae_title: String,
    calling_ae_title: String,
    application_context_name: String,
    items: Vec<PduVariableItem>,
    user_variables: Vec<UserVariableItem>,
}

fn read_association_fields(body: &[u8]) -> Result<AssociationFields> {
    let mut cursor = Cursor::new(body);

    // 7-8 - Protocol-version - bit 0 set for version 1
    let protocol_version = cursor
        .read_u16::<BigEndian>()
        .context(ReadPduFieldSnafu {
            field: "Protocol-version",
        })?;

    // 9-10 - Reserved
    cursor
        .read_u16::<BigEndian>()
        .context(ReadReservedSnafu { bytes: 2_u32 })?;

    // 11-26 - Called-AE-title, 16 characters with non-significant spaces
    let called_ae_title = read_ae_title(&mut cursor, "Called-AE-title")?;

    // 27-42 - Calling-AE-title
    let calling_ae_title = read_ae_title(&mut cursor, "Calling-AE-title")?;

    // 43-74 - Reserved
    let mut reserved = [0; 32];
    cursor
        .read_exact(&mut reserved)
        .context(ReadReservedSnafu { bytes: 32_u32 })?;

    // 75-xxx - Variable items: one application context item,
    // presentation context items and one user information item
    let mut application_context_name = None;
    let mut user_variables = None;
    let mut items = vec![];
    while has_remaining(&cursor) {
        match read_pdu_variable(&mut cursor)? {
            PduVariableItem::ApplicationContext(val) => {
                application_context_name = Some(val);
            }
            PduVariableItem::UserVariables(val) => {
                user_variables = Some(val);
            }
            PduVariableItem::Unknown(item_type) => {
                warn!("Ignoring unknown variable item {:#04x}", item_type);
            }
            item => items.push(item),
        }
    }

    Ok(AssociationFields {
        protocol_version,
        called_ae_title,
        calling_ae_title,
        application_context_name: application_context_name
            .context(MissingApplicationContextNameSnafu)?,
        items,
        user_variables: user_variables.context(MissingUserInformationSnafu)?,
    })
}

/// Decode the body of an A-ASSOCIATE-RQ PDU.
pub fn decode_associate_rq(body: &[u8]) -> Result<AssociationRQ> {
    let fields = read_association_fields(body)?;
    let mut presentation_contexts = vec![];
    for item in fields.items {
        match item {
            PduVariableItem::PresentationContextProposed(val) => presentation_contexts.push(val),
            var_item => return InvalidPduVariableSnafu { var_item }.fail(),
        }
    }
    Ok(AssociationRQ {
        protocol_version: fields.protocol_version,
        calling_ae_title: fields.calling_ae_title,
        called_ae_title: fields.called_ae_title,
        application_context_name: fields.application_context_name,
        presentation_contexts,
        user_variables: fields.user_variables,
    })
}

/// Decode the body of an A-ASSOCIATE-AC PDU.
pub fn decode_associate_ac(body: &[u8]) -> Result<AssociationAC> {
    let fields = read_association_fields(body)?;
    let mut presentation_contexts = vec![];
    for item in fields.items {
        match item {
            PduVariableItem::PresentationContextResult(val) => presentation_contexts.push(val),
            var_item => return InvalidPduVariableSnafu { var_item }.fail(),
        }
    }
    Ok(AssociationAC {
        protocol_version: fields.protocol_version,
        calling_ae_title: fields.calling_ae_title,
        called_ae_title: fields.called_ae_title,
        application_context_name: fields.application_context_name,
        presentation_contexts,
        user_variables: fields.user_variables,
    })
}

/// Decode the body of an A-ASSOCIATE-RJ PDU.
pub fn decode_associate_rj(body: &[u8]) -> Result<AssociationRJ> {
    let mut cursor = Cursor::new(body);

    // 7 - Reserved
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 8 - Result: 1 rejected-permanent, 2 rejected-transient
    let result = AssociationRJResult::from(
        cursor
            .read_u8()
            .context(ReadPduFieldSnafu { field: "Result" })?,
    )
    .context(InvalidRejectSourceOrReasonSnafu)?;

    // 9 - Source, 10 - Reason/Diag.
    let source = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Source" })?;
    let reason = cursor.read_u8().context(ReadPduFieldSnafu {
        field: "Reason/Diag.",
    })?;
    let source =
        AssociationRJSource::from(source, reason).context(InvalidRejectSourceOrReasonSnafu)?;

    Ok(AssociationRJ { result, source })
}

/// Decode the presentation data values of a P-DATA-TF PDU body.
pub fn decode_pdata(body: &[u8]) -> Result<Vec<PDataValue>> {
    let mut cursor = Cursor::new(body);
    let mut values = vec![];
    while has_remaining(&cursor) {
        // 1-4 - Item-length, counting the context ID and the control header
        let item_length = cursor
            .read_u32::<BigEndian>()
            .context(ReadPduFieldSnafu {
                field: "Item-Length",
            })?;

        ensure!(
            item_length >= 2,
            InvalidItemLengthSnafu {
                length: item_length
            }
        );

        // 5 - Presentation-context-ID
        let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
            field: "Presentation-context-ID",
        })?;

        // 6 - Message Control Header
        // bit 0: 1 for command information, 0 for data set information
        // bit 1: 1 for the last fragment of the command or data set
        let header = cursor.read_u8().context(ReadPduFieldSnafu {
            field: "Message Control Header",
        })?;

        let value_type = if header & 0x01 > 0 {
            PDataValueType::Command
        } else {
            PDataValueType::Data
        };
        let is_last = (header & 0x02) > 0;

        let data = read_n(
            &mut cursor,
            (item_length - 2) as usize,
            "Presentation-data-value",
        )?
        .to_vec();

        values.push(PDataValue {
            presentation_context_id,
            value_type,
            is_last,
            data,
        })
    }
    Ok(values)
}

/// Decode the body of an A-RELEASE-RQ PDU.
pub fn decode_release_rq(body: &[u8]) -> Result<()> {
    // 7-10 - Reserved
    read_n(&mut Cursor::new(body), 4, "A-RELEASE-RQ body")?;
    Ok(())
}

/// Decode the body of an A-RELEASE-RP PDU.
pub fn decode_release_rp(body: &[u8]) -> Result<()> {
    // 7-10 - Reserved
    read_n(&mut Cursor::new(body), 4, "A-RELEASE-RP body")?;
    Ok(())
}

/// Decode the body of an A-ABORT PDU.
pub fn decode_abort(body: &[u8]) -> Result<AbortRQSource> {
    let mut cursor = Cursor::new(body);

    // 7-8 - Reserved
    let mut buf = [0u8; 2];
    cursor
        .read_exact(&mut buf)
        .context(ReadReservedSnafu { bytes: 2_u32 })?;

    // 9 - Source: 0 service-user, 1 reserved, 2 service-provider
    // 10 - Reason/Diag, significant for the service provider
    let source = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Source" })?;
    let reason = cursor.read_u8().context(ReadPduFieldSnafu {
        field: "Reason/Diag",
    })?;
    AbortRQSource::from(source, reason).context(InvalidAbortSourceOrReasonSnafu)
}

fn has_remaining(cursor: &Cursor<&[u8]>) -> bool {
    (cursor.position() as usize) < cursor.get_ref().len()
}

/// Take the next `length` bytes, failing if fewer remain.
fn read_n<'a>(
    cursor: &mut Cursor<&'a [u8]>,
    length: usize,
    item: &'static str,
) -> Result<&'a [u8]> {
    let data: &'a [u8] = cursor.get_ref();
    let start = (cursor.position() as usize).min(data.len());
    let remaining = data.len() - start;
    ensure!(
        length <= remaining,
        ItemOverrunSnafu {
            item,
            length,
            remaining
        }
    );
    cursor.set_position((start + length) as u64);
    Ok(&data[start..start + length])
}

fn decode_text(bytes: &[u8], field: &'static str) -> Result<String> {
    ensure!(bytes.is_ascii(), DecodeTextSnafu { field });
    let text = String::from_utf8_lossy(bytes);
    Ok(text.trim_matches([' ', '\0']).to_string())
}

fn read_ae_title(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<String> {
    let mut ae_bytes = [0; 16];
    cursor
        .read_exact(&mut ae_bytes)
        .context(ReadPduFieldSnafu { field })?;
    decode_text(&ae_bytes, field)
}

fn read_pdu_variable(cursor: &mut Cursor<&[u8]>) -> Result<PduVariableItem> {
    // 1 - Item-type - XXH
    let item_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 3-4 - Item-length
    let item_length = cursor
        .read_u16::<BigEndian>()
        .context(ReadPduFieldSnafu {
            field: "Item-length",
        })?;

    let bytes = read_n(cursor, item_length as usize, "Variable item")?;

    match item_type {
        0x10 => {
            // Application Context Item
            let val = decode_text(bytes, "Application-context-name")?;
            Ok(PduVariableItem::ApplicationContext(val))
        }
        0x20 => read_presentation_context_proposed(bytes)
            .map(PduVariableItem::PresentationContextProposed),
        0x21 => {
            read_presentation_context_result(bytes).map(PduVariableItem::PresentationContextResult)
        }
        0x50 => read_user_variables(bytes).map(PduVariableItem::UserVariables),
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}

/// Read the type and content of the next sub-item.
fn read_sub_item<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<(u8, &'a [u8])> {
    // 1 - Item-type - XXH
    let item_type = cursor
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 3-4 - Item-length
    let item_length = cursor
        .read_u16::<BigEndian>()
        .context(ReadPduFieldSnafu {
            field: "Item-length",
        })?;

    let bytes = read_n(cursor, item_length as usize, "Sub-item")?;
    Ok((item_type, bytes))
}

fn read_presentation_context_proposed(bytes: &[u8]) -> Result<PresentationContextProposed> {
    let mut cursor = Cursor::new(bytes);

    // 5 - Presentation-context-ID, odd integers between 1 and 255
    let id = cursor.read_u8().context(ReadPduFieldSnafu {
        field: "Presentation-context-ID",
    })?;

    // 6-8 - Reserved
    let mut reserved = [0; 3];
    cursor
        .read_exact(&mut reserved)
        .context(ReadReservedSnafu { bytes: 3_u32 })?;

    // 9-xxx - one Abstract Syntax and one or more Transfer Syntax sub-items
    let mut abstract_syntax: Option<String> = None;
    let mut transfer_syntaxes = vec![];
    while has_remaining(&cursor) {
        match read_sub_item(&mut cursor)? {
            (0x30, bytes) => {
                abstract_syntax = Some(decode_text(bytes, "Abstract-syntax-name")?);
            }
            (0x40, bytes) => {
                transfer_syntaxes.push(decode_text(bytes, "Transfer-syntax-name")?);
            }
            _ => {
                return UnknownPresentationContextSubItemSnafu.fail();
            }
        }
    }

    ensure!(!transfer_syntaxes.is_empty(), MissingTransferSyntaxSnafu);

    Ok(PresentationContextProposed {
        id,
        abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
        transfer_syntaxes,
    })
}

fn read_presentation_context_result(bytes: &[u8]) -> Result<PresentationContextResult> {
    let mut cursor = Cursor::new(bytes);

    // 5 - Presentation-context-ID
    let id = cursor.read_u8().context(ReadPduFieldSnafu {
        field: "Presentation-context-ID",
    })?;

    // 6 - Reserved
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 7 - Result/Reason
    let reason = PresentationContextResultReason::from(cursor.read_u8().context(
        ReadPduFieldSnafu {
            field: "Result/Reason",
        },
    )?)
    .context(InvalidPresentationContextResultReasonSnafu)?;

    // 8 - Reserved
    cursor
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 9-xxx - one Transfer Syntax sub-item,
    // not significant unless the context was accepted
    let mut transfer_syntax: Option<String> = None;
    while has_remaining(&cursor) {
        match read_sub_item(&mut cursor)? {
            (0x40, bytes) => {
                ensure!(
                    transfer_syntax.is_none(),
                    MultipleTransferSyntaxesAcceptedSnafu
                );
                transfer_syntax = Some(decode_text(bytes, "Transfer-syntax-name")?);
            }
            _ => {
                return InvalidTransferSyntaxSubItemSnafu.fail();
            }
        }
    }

    let transfer_syntax = match (reason, transfer_syntax) {
        (_, Some(ts)) => ts,
        (PresentationContextResultReason::Acceptance, None) => {
            return MissingTransferSyntaxSnafu.fail();
        }
        (_, None) => String::new(),
    };

    Ok(PresentationContextResult {
        id,
        reason,
        transfer_syntax,
    })
}

fn read_user_variables(bytes: &[u8]) -> Result<Vec<UserVariableItem>> {
    let mut cursor = Cursor::new(bytes);
    let mut user_variables = vec![];

    while has_remaining(&cursor) {
        match read_sub_item(&mut cursor)? {
            (0x51, bytes) => {
                // Maximum Length Sub-Item: 0 means no maximum
                let max_length = Cursor::new(bytes)
                    .read_u32::<BigEndian>()
                    .context(ReadPduFieldSnafu {
                        field: "Maximum-length-received",
                    })?;
                user_variables.push(UserVariableItem::MaxLength(max_length));
            }
            (0x52, bytes) => {
                user_variables.push(UserVariableItem::ImplementationClassUID(decode_text(
                    bytes,
                    "Implementation-class-uid",
                )?));
            }
            (0x55, bytes) => {
                user_variables.push(UserVariableItem::ImplementationVersionName(decode_text(
                    bytes,
                    "Implementation-version-name",
                )?));
            }
            (item_type, bytes) => {
                user_variables.push(UserVariableItem::Unknown(item_type, bytes.to_vec()));
            }
        }
    }

    Ok(user_variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    const RELEASE_RQ: &[u8] = &[
        0x05, 0x00, 0x00, 0x00, 0x00, 0x04,
        0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn header() {
        let header = read_pdu_header(RELEASE_RQ).unwrap();
        assert_eq!(header.pdu_type, PduType::ReleaseRQ);
        assert_eq!(header.length, 4);

        assert!(matches!(
            read_pdu_header(&[0x09, 0, 0, 0, 0, 4]),
            Err(Error::UnknownPduType { pdu_type: 0x09, .. })
        ));
        assert!(matches!(
            read_pdu_header(&[0x05, 0, 0]),
            Err(Error::TruncatedPdu { needed: 6, available: 3, .. })
        ));
    }

    #[test]
    fn read_pdu_waits_for_complete_pdu() {
        for len in 0..RELEASE_RQ.len() {
            assert!(read_pdu(&RELEASE_RQ[..len], DEFAULT_MAX_PDU, true)
                .unwrap()
                .is_none());
        }
        let mut buffer = RELEASE_RQ.to_vec();
        buffer.extend_from_slice(&[0x06, 0x00]);
        let (pdu, consumed) = read_pdu(&buffer, DEFAULT_MAX_PDU, true).unwrap().unwrap();
        assert_eq!(pdu, Pdu::ReleaseRQ);
        assert_eq!(consumed, 10);
    }

    #[test]
    fn oversized_pdu_is_rejected_from_header() {
        // P-DATA-TF claiming 200_000 bytes
        let header = [0x04, 0x00, 0x00, 0x03, 0x0D, 0x40];
        assert!(matches!(
            read_pdu(&header, DEFAULT_MAX_PDU, false),
            Err(Error::PduTooLarge { pdu_length: 200_000, .. })
        ));
        // 20_000 bytes: tolerated unless strict
        let header = [0x04, 0x00, 0x00, 0x00, 0x4E, 0x20];
        assert!(read_pdu(&header, DEFAULT_MAX_PDU, false).unwrap().is_none());
        assert!(matches!(
            read_pdu(&header, DEFAULT_MAX_PDU, true),
            Err(Error::PduTooLarge { .. })
        ));
    }

    #[test]
    fn decode_pdu_rejects_short_body() {
        // A-ABORT claiming 4 bytes, carrying 2
        let bytes = [0x07, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00];
        assert!(matches!(
            decode_pdu(&bytes),
            Err(Error::TruncatedPdu { needed: 10, available: 8, .. })
        ));
    }

    #[test]
    fn pdv_item_overrunning_body_is_rejected() {
        #[rustfmt::skip]
        let body = [
            // item length 100, context 1, command + last
            0x00, 0x00, 0x00, 0x64, 0x01, 0x03,
            0xAA, 0xBB,
        ];
        assert!(matches!(
            decode_pdata(&body),
            Err(Error::ItemOverrun { length: 98, remaining: 2, .. })
        ));

        #[rustfmt::skip]
        let body = [
            0x00, 0x00, 0x00, 0x01, 0x01,
        ];
        assert!(matches!(
            decode_pdata(&body),
            Err(Error::InvalidItemLength { length: 1, .. })
        ));
    }

    #[test]
    fn pdata_control_header() {
        #[rustfmt::skip]
        let body = [
            0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x10, 0x20,
            0x00, 0x00, 0x00, 0x03, 0x01, 0x02, 0x30,
        ];
        let values = decode_pdata(&body).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].value_type, PDataValueType::Command);
        assert!(!values[0].is_last);
        assert_eq!(values[0].data, [0x10, 0x20]);
        assert_eq!(values[1].value_type, PDataValueType::Data);
        assert!(values[1].is_last);
        assert_eq!(values[1].data, [0x30]);
    }

    #[test]
    fn abort_and_reject() {
        let source = decode_abort(&[0, 0, 2, 2]).unwrap();
        assert_eq!(
            source,
            AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu)
        );
        assert!(matches!(
            decode_abort(&[0, 0, 2, 9]),
            Err(Error::InvalidAbortSourceOrReason { .. })
        ));

        let rj = decode_associate_rj(&[0, 1, 1, 3]).unwrap();
        assert_eq!(rj.result, AssociationRJResult::Permanent);
        assert_eq!(
            rj.source,
            AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CallingAETitleNotRecognized
            )
        );
        assert!(matches!(
            decode_associate_rj(&[0, 1]),
            Err(Error::ReadPduField { field: "Source", .. })
        ));
    }

    #[test]
    fn association_without_application_context_is_rejected() {
        let mut body = vec![0x00, 0x01, 0x00, 0x00];
        body.extend_from_slice(b"ANY-SCP         ");
        body.extend_from_slice(b"THIS-SCU        ");
        body.extend_from_slice(&[0; 32]);
        // user information with a max length sub-item
        body.extend_from_slice(&[0x50, 0x00, 0x00, 0x08, 0x51, 0x00, 0x00, 0x04, 0, 0, 0x40, 0]);
        assert!(matches!(
            decode_associate_ac(&body),
            Err(Error::MissingApplicationContextName { .. })
        ));
    }
}
