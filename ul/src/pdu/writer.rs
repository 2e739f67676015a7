//! PDU writer module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not write chunk of {} PDU structure", name))]
    WriteChunk {
        /// the name of the PDU structure
        name: &'static str,
        source: WriteChunkError,
    },

    #[snafu(display("Could not write field `{}`", field))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not write {} reserved bytes", bytes))]
    WriteReserved {
        bytes: u32,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Field `{}` must be ASCII text, got {:?}", field, value))]
    EncodeField {
        field: &'static str,
        value: String,
        backtrace: Backtrace,
    },

    #[snafu(display("AE title {:?} is longer than 16 characters", ae_title))]
    AeTitleTooLong {
        ae_title: String,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum WriteChunkError {
    #[snafu(display("Failed to build chunk"))]
    BuildChunk {
        backtrace: Backtrace,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
    #[snafu(display("Chunk of {} bytes does not fit its length field", length))]
    ChunkTooLong { length: usize, backtrace: Backtrace },
    #[snafu(display("Failed to write chunk length"))]
    WriteLength {
        backtrace: Backtrace,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write chunk data"))]
    WriteData {
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

/// Write the bytes produced by `func`, preceded by their length as a big endian u32.
fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).context(BuildChunkSnafu)?;

    let length = u32::try_from(data.len())
        .ok()
        .filter(|len| *len != u32::MAX);
    let Some(length) = length else {
        return ChunkTooLongSnafu { length: data.len() }.fail();
    };
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Write the bytes produced by `func`, preceded by their length as a big endian u16.
fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).context(BuildChunkSnafu)?;

    ensure!(
        data.len() <= u16::MAX as usize,
        ChunkTooLongSnafu { length: data.len() }
    );
    writer
        .write_u16::<BigEndian>(data.len() as u16)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

fn write_pdu_start(writer: &mut dyn Write, pdu_type: PduType) -> Result<()> {
    // 1 - PDU-type
    writer
        .write_u8(pdu_type as u8)
        .context(WriteFieldSnafu { field: "PDU-type" })?;

    // 2 - Reserved, sent as 00H
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })
}

fn ascii<'a>(field: &'static str, value: &'a str) -> Result<&'a [u8]> {
    ensure!(
        value.is_ascii(),
        EncodeFieldSnafu {
            field,
            value: value.to_string()
        }
    );
    Ok(value.as_bytes())
}

/// Write an AE title as 16 characters padded with trailing spaces.
fn write_ae_title(writer: &mut dyn Write, field: &'static str, ae_title: &str) -> Result<()> {
    let bytes = ascii(field, ae_title)?;
    ensure!(
        bytes.len() <= 16,
        AeTitleTooLongSnafu {
            ae_title: ae_title.to_string()
        }
    );
    let mut ae_title_bytes = [b' '; 16];
    ae_title_bytes[..bytes.len()].copy_from_slice(bytes);
    writer
        .write_all(&ae_title_bytes)
        .context(WriteFieldSnafu { field })
}

/// Write any PDU, header included.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    match pdu {
        Pdu::AssociationRQ(rq) => write_associate_rq(writer, rq),
        Pdu::AssociationAC(ac) => write_associate_ac(writer, ac),
        Pdu::AssociationRJ(rj) => write_associate_rj(writer, rj),
        Pdu::PData { data } => write_pdata(writer, data),
        Pdu::ReleaseRQ => write_release_rq(writer),
        Pdu::ReleaseRP => write_release_rp(writer),
        Pdu::AbortRQ { source } => write_abort(writer, source),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_association_body(
    writer: &mut Vec<u8>,
    protocol_version: u16,
    called_ae_title: &str,
    calling_ae_title: &str,
    application_context_name: &str,
    contexts: impl FnOnce(&mut Vec<u8>) -> Result<()>,
    user_variables: &[UserVariableItem],
) -> Result<()> {
    // 7-8 - Protocol-version, bit 0 set for version 1
    writer
        .write_u16::<BigEndian>(protocol_version)
        .context(WriteFieldSnafu {
            field: "Protocol-version",
        })?;

    // 9-10 - Reserved
    writer
        .write_u16::<BigEndian>(0x00)
        .context(WriteReservedSnafu { bytes: 2_u32 })?;

    // 11-26 - Called-AE-title
    write_ae_title(writer, "Called-AE-title", called_ae_title)?;

    // 27-42 - Calling-AE-title
    write_ae_title(writer, "Calling-AE-title", calling_ae_title)?;

    // 43-74 - Reserved
    writer
        .write_all(&[0; 32])
        .context(WriteReservedSnafu { bytes: 32_u32 })?;

    // 75-xxx - Variable items
    write_pdu_variable_application_context_name(writer, application_context_name)?;
    contexts(writer)?;
    write_pdu_variable_user_variables(writer, user_variables)
}

/// Write an A-ASSOCIATE-RQ PDU.
pub fn write_associate_rq(writer: &mut dyn Write, rq: &AssociationRQ) -> Result<()> {
    write_pdu_start(writer, PduType::AssociationRQ)?;
    write_chunk_u32(writer, |writer| {
        write_association_body(
            writer,
            rq.protocol_version,
            &rq.called_ae_title,
            &rq.calling_ae_title,
            &rq.application_context_name,
            |writer| {
                for context in &rq.presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(writer, context)?;
                }
                Ok(())
            },
            &rq.user_variables,
        )
    })
    .context(WriteChunkSnafu {
        name: "A-ASSOCIATE-RQ",
    })
}

/// Write an A-ASSOCIATE-AC PDU.
pub fn write_associate_ac(writer: &mut dyn Write, ac: &AssociationAC) -> Result<()> {
    write_pdu_start(writer, PduType::AssociationAC)?;
    write_chunk_u32(writer, |writer| {
        write_association_body(
            writer,
            ac.protocol_version,
            &ac.called_ae_title,
            &ac.calling_ae_title,
            &ac.application_context_name,
            |writer| {
                for context in &ac.presentation_contexts {
                    write_pdu_variable_presentation_context_result(writer, context)?;
                }
                Ok(())
            },
            &ac.user_variables,
        )
    })
    .context(WriteChunkSnafu {
        name: "A-ASSOCIATE-AC",
    })
}

/// Write an A-ASSOCIATE-RJ PDU.
pub fn write_associate_rj(writer: &mut dyn Write, rj: &AssociationRJ) -> Result<()> {
    write_pdu_start(writer, PduType::AssociationRJ)?;
    write_chunk_u32(writer, |writer| {
        // 7 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // 8 - Result
        writer
            .write_u8(rj.result as u8)
            .context(WriteFieldSnafu { field: "Result" })?;

        // 9 - Source, 10 - Reason/Diag.
        let (source, reason) = rj.source.to_bytes();
        writer
            .write_u8(source)
            .context(WriteFieldSnafu { field: "Source" })?;
        writer.write_u8(reason).context(WriteFieldSnafu {
            field: "Reason/Diag.",
        })?;

        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "A-ASSOCIATE-RJ",
    })
}

/// Write a P-DATA-TF PDU holding the given presentation data values.
pub fn write_pdata(writer: &mut dyn Write, data: &[PDataValue]) -> Result<()> {
    write_pdu_start(writer, PduType::PData)?;
    write_chunk_u32(writer, |writer| {
        for presentation_data_value in data {
            write_chunk_u32(writer, |writer| {
                // 5 - Presentation-context-ID
                writer
                    .write_u8(presentation_data_value.presentation_context_id)
                    .context(WriteFieldSnafu {
                        field: "Presentation-context-ID",
                    })?;

                // 6 - Message Control Header
                writer
                    .write_u8(presentation_data_value.control_header())
                    .context(WriteFieldSnafu {
                        field: "Message Control Header",
                    })?;

                writer
                    .write_all(&presentation_data_value.data)
                    .context(WriteFieldSnafu {
                        field: "Presentation-data-value",
                    })
            })
            .context(WriteChunkSnafu {
                name: "Presentation-data-value item",
            })?;
        }
        Ok(())
    })
    .context(WriteChunkSnafu { name: "P-DATA-TF" })
}

fn write_reserved_body(writer: &mut dyn Write, name: &'static str) -> Result<()> {
    write_chunk_u32(writer, |writer| {
        // 7-10 - Reserved
        writer
            .write_u32::<BigEndian>(0x0)
            .context(WriteReservedSnafu { bytes: 4_u32 })
    })
    .context(WriteChunkSnafu { name })
}

/// Write an A-RELEASE-RQ PDU.
pub fn write_release_rq(writer: &mut dyn Write) -> Result<()> {
    write_pdu_start(writer, PduType::ReleaseRQ)?;
    write_reserved_body(writer, "A-RELEASE-RQ")
}

/// Write an A-RELEASE-RP PDU.
pub fn write_release_rp(writer: &mut dyn Write) -> Result<()> {
    write_pdu_start(writer, PduType::ReleaseRP)?;
    write_reserved_body(writer, "A-RELEASE-RP")
}

/// Write an A-ABORT PDU.
pub fn write_abort(writer: &mut dyn Write, source: &AbortRQSource) -> Result<()> {
    write_pdu_start(writer, PduType::AbortRQ)?;
    write_chunk_u32(writer, |writer| {
        // 7-8 - Reserved
        writer
            .write_u16::<BigEndian>(0x00)
            .context(WriteReservedSnafu { bytes: 2_u32 })?;

        // 9 - Source, 10 - Reason/Diag
        let (source, reason) = source.to_bytes();
        writer
            .write_u8(source)
            .context(WriteFieldSnafu { field: "Source" })?;
        writer.write_u8(reason).context(WriteFieldSnafu {
            field: "Reason/Diag",
        })
    })
    .context(WriteChunkSnafu { name: "A-ABORT" })
}

fn write_sub_item(
    writer: &mut dyn Write,
    item_type: u8,
    name: &'static str,
    value: &[u8],
) -> Result<()> {
    // 1 - Item-type
    writer
        .write_u8(item_type)
        .context(WriteFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    // 3-4 - Item-length, then the value
    write_chunk_u16(writer, |writer| {
        writer
            .write_all(value)
            .context(WriteFieldSnafu { field: name })
    })
    .context(WriteChunkSnafu { name })
}

fn write_pdu_variable_application_context_name(
    writer: &mut dyn Write,
    application_context_name: &str,
) -> Result<()> {
    let bytes = ascii("Application-context-name", application_context_name)?;
    write_sub_item(writer, 0x10, "Application Context Item", bytes)
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
) -> Result<()> {
    // 1 - Item-type - 20H
    writer
        .write_u8(0x20)
        .context(WriteFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6-8 - Reserved
        writer
            .write_all(&[0; 3])
            .context(WriteReservedSnafu { bytes: 3_u32 })?;

        // 9-xxx - one Abstract Syntax sub-item, then the Transfer Syntax sub-items
        let abstract_syntax = ascii(
            "Abstract-syntax-name",
            &presentation_context.abstract_syntax,
        )?;
        write_sub_item(writer, 0x30, "Abstract Syntax Sub-Item", abstract_syntax)?;

        for transfer_syntax in &presentation_context.transfer_syntaxes {
            let transfer_syntax = ascii("Transfer-syntax-name", transfer_syntax)?;
            write_sub_item(writer, 0x40, "Transfer Syntax Sub-Item", transfer_syntax)?;
        }

        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })
}

fn write_pdu_variable_presentation_context_result(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextResult,
) -> Result<()> {
    // 1 - Item-type - 21H
    writer
        .write_u8(0x21)
        .context(WriteFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // 7 - Result/Reason
        writer
            .write_u8(presentation_context.reason as u8)
            .context(WriteFieldSnafu {
                field: "Result/Reason",
            })?;

        // 8 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // 9-xxx - one Transfer Syntax sub-item
        let transfer_syntax = ascii(
            "Transfer-syntax-name",
            &presentation_context.transfer_syntax,
        )?;
        write_sub_item(writer, 0x40, "Transfer Syntax Sub-Item", transfer_syntax)
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    // 1 - Item-type - 50H
    writer
        .write_u8(0x50)
        .context(WriteFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        for user_variable in user_variables {
            match user_variable {
                UserVariableItem::MaxLength(max_length) => {
                    write_sub_item(
                        writer,
                        0x51,
                        "Maximum Length Sub-Item",
                        &max_length.to_be_bytes(),
                    )?;
                }
                UserVariableItem::ImplementationClassUID(uid) => {
                    let uid = ascii("Implementation-class-uid", uid)?;
                    write_sub_item(writer, 0x52, "Implementation Class UID Sub-Item", uid)?;
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    let name = ascii("Implementation-version-name", name)?;
                    write_sub_item(writer, 0x55, "Implementation Version Name Sub-Item", name)?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    write_sub_item(writer, *item_type, "User Data Sub-Item", data)?;
                }
            }
        }
        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "User Information Item",
    })
}
