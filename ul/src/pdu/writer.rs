//! PDU writer module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not write chunk of {} PDU structure", name))]
    WriteChunk {
        /// the name of the PDU structure
        name: &'static str,
        #[snafu(source(from(WriteChunkError, Box::new)))]
        source: Box<WriteChunkError>,
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

    #[snafu(display("Could not encode field `{}`", field))]
    EncodeField {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::EncodeTextError,
    },

    #[snafu(display("Field `{}` is too long ({} bytes)", field, length))]
    FieldTooLong {
        field: &'static str,
        length: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
pub enum WriteChunkError {
    #[snafu(display("Failed to build chunk"))]
    BuildChunk {
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

/// Write the output of `func` prefixed by its length as a 4-byte integer.
fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).context(BuildChunkSnafu)?;

    let length = u32::try_from(data.len()).map_err(|_| {
        ChunkTooLongSnafu {
            length: data.len(),
        }
        .build()
    })?;
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Write the output of `func` prefixed by its length as a 2-byte integer.
fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).context(BuildChunkSnafu)?;

    let length = u16::try_from(data.len()).map_err(|_| {
        ChunkTooLongSnafu {
            length: data.len(),
        }
        .build()
    })?;
    writer
        .write_u16::<BigEndian>(length)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Write the type and reserved byte which open every PDU and item.
fn write_type_header(writer: &mut dyn Write, item_type: u8, field: &'static str) -> Result<()> {
    writer.write_u8(item_type).context(WriteFieldSnafu { field })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })
}

/// Write a field preceded by its 2-byte length.
fn write_field_u16(writer: &mut dyn Write, data: &[u8], field: &'static str) -> Result<()> {
    let length = u16::try_from(data.len())
        .ok()
        .context(FieldTooLongSnafu {
            field,
            length: data.len(),
        })?;
    writer
        .write_u16::<BigEndian>(length)
        .context(WriteFieldSnafu { field })?;
    writer.write_all(data).context(WriteFieldSnafu { field })
}

/// Encode a PDU into a new byte vector.
pub fn encode_pdu(pdu: &Pdu) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_pdu(&mut out, pdu)?;
    Ok(out)
}

/// Write a full PDU, header included, to the given writer.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    let codec = DefaultCharacterSetCodec;
    let writer: &mut dyn Write = writer;
    match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_type_header(writer, PDU_TYPE_ASSOCIATE_RQ, "PDU-type")?;

            write_chunk_u32(writer, |writer| {
                write_association_header(
                    writer,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                    &codec,
                )?;

                write_pdu_variable_application_context_name(
                    writer,
                    application_context_name,
                    &codec,
                )?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }

                write_pdu_variable_user_variables(writer, user_variables, &codec)
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RQ",
            })
        }
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_type_header(writer, PDU_TYPE_ASSOCIATE_AC, "PDU-type")?;

            write_chunk_u32(writer, |writer| {
                // the AE titles are echoed back from the request
                write_association_header(
                    writer,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                    &codec,
                )?;

                write_pdu_variable_application_context_name(
                    writer,
                    application_context_name,
                    &codec,
                )?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_result(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }

                write_pdu_variable_user_variables(writer, user_variables, &codec)
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-AC",
            })
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            write_type_header(writer, PDU_TYPE_ASSOCIATE_RJ, "PDU-type")?;

            write_chunk_u32(writer, |writer| {
                // 7 - Reserved
                writer
                    .write_u8(0x00)
                    .context(WriteReservedSnafu { bytes: 1_u32 })?;

                // 8 - Result
                writer
                    .write_u8(result.code())
                    .context(WriteFieldSnafu { field: "Result" })?;

                // 9 - Source, 10 - Reason/Diag.
                let (source, reason) = source.codes();
                writer
                    .write_u8(source)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })
        }
        Pdu::PData { data } => {
            write_type_header(writer, PDU_TYPE_PDATA, "PDU-type")?;

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
                            .write_u8(presentation_data_value.message_control_header())
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
        Pdu::ReleaseRQ => {
            write_type_header(writer, PDU_TYPE_RELEASE_RQ, "PDU-type")?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(&[0u8; 4])
                    .context(WriteReservedSnafu { bytes: 4_u32 })
            })
            .context(WriteChunkSnafu {
                name: "A-RELEASE-RQ",
            })
        }
        Pdu::ReleaseRP => {
            write_type_header(writer, PDU_TYPE_RELEASE_RP, "PDU-type")?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(&[0u8; 4])
                    .context(WriteReservedSnafu { bytes: 4_u32 })
            })
            .context(WriteChunkSnafu {
                name: "A-RELEASE-RP",
            })
        }
        Pdu::AbortRQ { source } => {
            write_type_header(writer, PDU_TYPE_ABORT, "PDU-type")?;

            write_chunk_u32(writer, |writer| {
                // 7-8 - Reserved
                writer
                    .write_all(&[0u8; 2])
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;

                // 9 - Source, 10 - Reason/Diag.
                let (source, reason) = source.codes();
                writer
                    .write_u8(source)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })
            })
            .context(WriteChunkSnafu { name: "A-ABORT" })
        }
        Pdu::Unknown { pdu_type, data } => {
            write_type_header(writer, *pdu_type, "PDU-type")?;

            write_chunk_u32(writer, |writer| {
                writer.write_all(data).context(WriteFieldSnafu {
                    field: "Unknown data",
                })
            })
            .context(WriteChunkSnafu { name: "Unknown" })
        }
    }
}

/// Write the fixed fields of A-ASSOCIATE-RQ and A-ASSOCIATE-AC,
/// from the protocol version up to the 32 reserved bytes.
fn write_association_header(
    writer: &mut dyn Write,
    protocol_version: u16,
    called_ae_title: &str,
    calling_ae_title: &str,
    codec: &dyn TextCodec,
) -> Result<()> {
    // 7-8 - Protocol-version
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
    write_ae_title(writer, called_ae_title, codec, "Called-AE-title")?;

    // 27-42 - Calling-AE-title
    write_ae_title(writer, calling_ae_title, codec, "Calling-AE-title")?;

    // 43-74 - Reserved
    writer
        .write_all(&[0; 32])
        .context(WriteReservedSnafu { bytes: 32_u32 })
}

/// Write an AE title as exactly 16 bytes, padded with trailing spaces.
fn write_ae_title(
    writer: &mut dyn Write,
    ae_title: &str,
    codec: &dyn TextCodec,
    field: &'static str,
) -> Result<()> {
    let mut ae_title_bytes = codec
        .encode(ae_title)
        .context(EncodeFieldSnafu { field })?;
    snafu::ensure!(
        ae_title_bytes.len() <= 16,
        FieldTooLongSnafu {
            field,
            length: ae_title_bytes.len()
        }
    );
    ae_title_bytes.resize(16, b' ');
    writer
        .write_all(&ae_title_bytes)
        .context(WriteFieldSnafu { field })
}

/// Write a sub-item holding a single UID or name, without padding.
fn write_text_item(
    writer: &mut dyn Write,
    item_type: u8,
    uid: &str,
    codec: &dyn TextCodec,
    name: &'static str,
) -> Result<()> {
    write_type_header(writer, item_type, "Item-type")?;

    write_chunk_u16(writer, |writer| {
        let bytes = codec.encode(uid).context(EncodeFieldSnafu { field: name })?;
        writer
            .write_all(&bytes)
            .context(WriteFieldSnafu { field: name })
    })
    .context(WriteChunkSnafu { name })
}

fn write_pdu_variable_application_context_name(
    writer: &mut dyn Write,
    application_context_name: &str,
    codec: &dyn TextCodec,
) -> Result<()> {
    write_text_item(
        writer,
        0x10,
        application_context_name,
        codec,
        "Application-context-name",
    )
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
    codec: &dyn TextCodec,
) -> Result<()> {
    write_type_header(writer, 0x20, "Item-type")?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6-8 - Reserved
        writer
            .write_all(&[0u8; 3])
            .context(WriteReservedSnafu { bytes: 3_u32 })?;

        // 9-xxx - Abstract syntax sub-item, then transfer syntax sub-items
        write_text_item(
            writer,
            0x30,
            &presentation_context.abstract_syntax,
            codec,
            "Abstract-syntax-name",
        )?;

        for transfer_syntax in &presentation_context.transfer_syntaxes {
            write_text_item(writer, 0x40, transfer_syntax, codec, "Transfer-syntax-name")?;
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
    codec: &dyn TextCodec,
) -> Result<()> {
    write_type_header(writer, 0x21, "Item-type")?;

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
            .write_u8(presentation_context.reason.code())
            .context(WriteFieldSnafu {
                field: "Result/Reason",
            })?;

        // 8 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // 9-xxx - Transfer syntax sub-item
        write_text_item(
            writer,
            0x40,
            &presentation_context.transfer_syntax,
            codec,
            "Transfer-syntax-name",
        )
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
    codec: &dyn TextCodec,
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    write_type_header(writer, 0x50, "Item-type")?;

    write_chunk_u16(writer, |writer| {
        for user_variable in user_variables {
            write_user_variable(writer, user_variable, codec)?;
        }
        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "User Information Item",
    })
}

fn write_user_variable(
    writer: &mut dyn Write,
    user_variable: &UserVariableItem,
    codec: &dyn TextCodec,
) -> Result<()> {
    match user_variable {
        UserVariableItem::MaxLength(max_length) => {
            write_type_header(writer, 0x51, "Item-type")?;
            write_chunk_u16(writer, |writer| {
                writer
                    .write_u32::<BigEndian>(*max_length)
                    .context(WriteFieldSnafu {
                        field: "Maximum-length-received",
                    })
            })
            .context(WriteChunkSnafu {
                name: "Maximum Length Sub-Item",
            })
        }
        UserVariableItem::ImplementationClassUID(uid) => {
            write_text_item(writer, 0x52, uid, codec, "Implementation-class-uid")
        }
        UserVariableItem::RoleSelection(role) => {
            write_type_header(writer, 0x54, "Item-type")?;
            write_chunk_u16(writer, |writer| {
                let uid = codec.encode(&role.sop_class_uid).context(EncodeFieldSnafu {
                    field: "SOP-class-uid",
                })?;
                write_field_u16(writer, &uid, "SOP-class-uid")?;
                writer
                    .write_all(&[role.scu_role as u8, role.scp_role as u8])
                    .context(WriteFieldSnafu {
                        field: "SCU-role/SCP-role",
                    })
            })
            .context(WriteChunkSnafu {
                name: "SCP/SCU Role Selection Sub-Item",
            })
        }
        UserVariableItem::ImplementationVersionName(name) => write_text_item(
            writer,
            0x55,
            name,
            codec,
            "Implementation-version-name",
        ),
        UserVariableItem::SopClassExtendedNegotiationSubItem(sop_class_uid, data) => {
            write_type_header(writer, 0x56, "Item-type")?;
            write_chunk_u16(writer, |writer| {
                let uid = codec.encode(sop_class_uid).context(EncodeFieldSnafu {
                    field: "SOP-class-uid",
                })?;
                write_field_u16(writer, &uid, "SOP-class-uid")?;
                writer.write_all(data).context(WriteFieldSnafu {
                    field: "Service-class-application-information",
                })
            })
            .context(WriteChunkSnafu {
                name: "SOP Class Extended Negotiation Sub-Item",
            })
        }
        UserVariableItem::UserIdentityItem(user_identity) => {
            write_type_header(writer, 0x58, "Item-type")?;
            write_chunk_u16(writer, |writer| {
                let flags = [
                    user_identity.identity_type().to_u8(),
                    user_identity.positive_response_requested() as u8,
                ];
                writer.write_all(&flags).context(WriteFieldSnafu {
                    field: "User-Identity-type",
                })?;
                write_field_u16(
                    writer,
                    user_identity.primary_field(),
                    "User-Identity-primary-field",
                )?;
                write_field_u16(
                    writer,
                    user_identity.secondary_field(),
                    "User-Identity-secondary-field",
                )
            })
            .context(WriteChunkSnafu {
                name: "User Identity Sub-Item",
            })
        }
        UserVariableItem::UserIdentityResponse(response) => {
            write_type_header(writer, 0x59, "Item-type")?;
            write_chunk_u16(writer, |writer| {
                write_field_u16(writer, response, "Server-response")
            })
            .context(WriteChunkSnafu {
                name: "User Identity Response Sub-Item",
            })
        }
        UserVariableItem::Unknown(item_type, data) => {
            write_type_header(writer, *item_type, "Item-type")?;
            write_chunk_u16(writer, |writer| {
                writer.write_all(data).context(WriteFieldSnafu {
                    field: "Unknown Data",
                })
            })
            .context(WriteChunkSnafu { name: "Unknown" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_abort_rq() {
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        };
        assert_eq!(
            encode_pdu(&pdu).unwrap(),
            [0x07, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn write_release_pdus() {
        assert_eq!(
            encode_pdu(&Pdu::ReleaseRQ).unwrap(),
            [0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encode_pdu(&Pdu::ReleaseRP).unwrap(),
            [0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn write_reject() {
        let pdu = Pdu::AssociationRJ(AssociationRJ {
            result: AssociationRJResult::Permanent,
            source: AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CalledAETitleNotRecognized,
            ),
        });
        assert_eq!(
            encode_pdu(&pdu).unwrap(),
            [0x03, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x01, 0x01, 0x07]
        );
    }

    #[test]
    fn ae_titles_are_space_padded() {
        let pdu = Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "SCU".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: vec![],
            user_variables: vec![],
        });
        let bytes = encode_pdu(&pdu).unwrap();
        assert_eq!(&bytes[10..26], b"ANY-SCP         ");
        assert_eq!(&bytes[26..42], b"SCU             ");
        assert_eq!(&bytes[42..74], &[0u8; 32][..]);
        // application context item follows, unpadded
        assert_eq!(&bytes[74..78], &[0x10, 0x00, 0x00, 0x15]);
        assert_eq!(&bytes[78..], DICOM_APPLICATION_CONTEXT_NAME.as_bytes());
    }

    #[test]
    fn long_ae_title_is_refused() {
        let pdu = Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "A-VERY-LONG-AE-TITLE".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: vec![],
            user_variables: vec![],
        });
        assert!(encode_pdu(&pdu).is_err());
    }

    #[test]
    fn write_pdv_items() {
        let pdu = Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![0xAA, 0xBB],
            }],
        };
        assert_eq!(
            encode_pdu(&pdu).unwrap(),
            [
                0x04, 0x00, 0x00, 0x00, 0x00, 0x08, // PDU header
                0x00, 0x00, 0x00, 0x04, 0x01, 0x03, 0xAA, 0xBB,
            ]
        );
    }
}
