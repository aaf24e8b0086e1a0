//! PDU reader module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read};
use tracing::warn;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU item"))]
    ReadPduItem {
        source: std::io::Error,
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

    #[snafu(display("Invalid item length {} (must be >=2)", length))]
    InvalidItemLength { length: u32, backtrace: Backtrace },

    #[snafu(display("Invalid length {} for PDU type {:#04x}", length, pdu_type))]
    InvalidPduLength {
        pdu_type: u8,
        length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Expected PDU type {:#04x}, got {:#04x}", expected, got))]
    UnexpectedPduType {
        expected: u8,
        got: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("{} trailing bytes after PDU", count))]
    TrailingBytes { count: usize, backtrace: Backtrace },

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

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::DecodeTextError,
    },

    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },

    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decode a single PDU from a complete byte buffer.
///
/// The buffer must hold exactly one PDU, header included.
/// No PDU length limit is applied other than the protocol maximum.
pub fn decode_pdu(bytes: &[u8]) -> Result<Pdu> {
    let mut cursor = Cursor::new(bytes);
    let pdu = read_pdu(&mut cursor, MAXIMUM_PDU_SIZE, false)?;
    let consumed = cursor.position() as usize;
    ensure!(
        consumed == bytes.len(),
        TrailingBytesSnafu {
            count: bytes.len() - consumed
        }
    );
    Ok(pdu)
}

/// Decode a single PDU while requiring it to be of the given type.
pub(crate) fn decode_pdu_of_type(bytes: &[u8], expected: u8) -> Result<Pdu> {
    let got = bytes.first().copied().context(NoPduAvailableSnafu)?;
    ensure!(got == expected, UnexpectedPduTypeSnafu { expected, got });
    decode_pdu(bytes)
}

/// The length limits applied to incoming PDUs.
///
/// A maximum PDU length of 0 stands for no limit,
/// which is capped at [`MAXIMUM_PDU_SIZE`] like any other maximum.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PduLengthLimit {
    max_pdu_length: u32,
    strict: bool,
}

impl PduLengthLimit {
    /// Prepare the limits for the given local maximum PDU length.
    ///
    /// In `strict` mode, PDUs longer than `max_pdu_length` are refused.
    /// Otherwise, they are only refused past [`MAXIMUM_PDU_SIZE`].
    pub fn new(max_pdu_length: u32, strict: bool) -> Result<Self> {
        let max_pdu_length = match max_pdu_length {
            0 => MAXIMUM_PDU_SIZE,
            len => {
                ensure!(
                    (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&len),
                    InvalidMaxPduSnafu {
                        max_pdu_length: len
                    }
                );
                len
            }
        };
        Ok(PduLengthLimit {
            max_pdu_length,
            strict,
        })
    }

    /// The local maximum PDU length in effect.
    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    /// Check the length declared in an incoming PDU header.
    pub fn check(&self, pdu_length: u32) -> Result<()> {
        let limit = if self.strict {
            self.max_pdu_length
        } else {
            MAXIMUM_PDU_SIZE
        };
        ensure!(
            pdu_length <= limit,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: limit
            }
        );
        if pdu_length > self.max_pdu_length {
            warn!(
                "Incoming pdu was too large: length {}, maximum is {}",
                pdu_length, self.max_pdu_length
            );
        }
        Ok(())
    }
}

/// Read a PDU from the given reader.
///
/// The PDU length is checked against a [`PduLengthLimit`]
/// built from `max_pdu_length` and `strict`.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    let limit = PduLengthLimit::new(max_pdu_length, strict)?;

    // EOF before the first byte means the peer closed cleanly,
    // EOF anywhere after that is a truncated PDU
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes[..1]) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduFieldSnafu { field: "PDU-type" });
    }
    reader
        .read_exact(&mut bytes[1..])
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    let pdu_type = bytes[0];
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "PDU-length" })?;
    limit.check(pdu_length)?;

    let bytes = read_n(reader, pdu_length as usize).context(ReadPduSnafu)?;
    let mut cursor = Cursor::new(bytes);
    let codec = DefaultCharacterSetCodec;

    match pdu_type {
        PDU_TYPE_ASSOCIATE_RQ => {
            let header = read_association_header(&mut cursor, &codec)?;

            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];

            // 75-xxx - Variable items: one application context,
            // one or more presentation contexts, one user information item
            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextProposed(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationRQ(AssociationRQ {
                protocol_version: header.protocol_version,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                called_ae_title: header.called_ae_title,
                calling_ae_title: header.calling_ae_title,
                presentation_contexts,
                user_variables,
            }))
        }
        PDU_TYPE_ASSOCIATE_AC => {
            // the AE title fields of the AC are echoed from the RQ
            // and are not tested on reception
            let header = read_association_header(&mut cursor, &codec)?;

            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];

            while has_remaining(&cursor) {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextResult(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationAC(AssociationAC {
                protocol_version: header.protocol_version,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                called_ae_title: header.called_ae_title,
                calling_ae_title: header.calling_ae_title,
                presentation_contexts,
                user_variables,
            }))
        }
        PDU_TYPE_ASSOCIATE_RJ => {
            ensure_fixed_length(pdu_type, pdu_length)?;

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

            // 9 - Source: 1 service-user, 2 service-provider (ACSE),
            // 3 service-provider (presentation)
            // 10 - Reason/Diag., interpreted according to the source
            let source = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag.",
            })?;
            let source = AssociationRJSource::from(source, reason)
                .context(InvalidRejectSourceOrReasonSnafu)?;

            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        PDU_TYPE_PDATA => {
            // 7-xxx - one or more presentation data value items
            let mut values = vec![];
            while has_remaining(&cursor) {
                values.push(read_pdata_value(&mut cursor)?);
            }

            Ok(Pdu::PData { data: values })
        }
        PDU_TYPE_RELEASE_RQ => {
            ensure_fixed_length(pdu_type, pdu_length)?;
            // 7-10 - Reserved
            Ok(Pdu::ReleaseRQ)
        }
        PDU_TYPE_RELEASE_RP => {
            ensure_fixed_length(pdu_type, pdu_length)?;
            // 7-10 - Reserved
            Ok(Pdu::ReleaseRP)
        }
        PDU_TYPE_ABORT => {
            ensure_fixed_length(pdu_type, pdu_length)?;

            // 7-8 - Reserved
            let mut buf = [0u8; 2];
            cursor
                .read_exact(&mut buf)
                .context(ReadReservedSnafu { bytes: 2_u32 })?;

            // 9 - Source: 0 service-user, 1 reserved, 2 service-provider
            // 10 - Reason/Diag, only significant for the service-provider
            let source = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag",
            })?;
            let source =
                AbortRQSource::from(source, reason).context(InvalidAbortSourceOrReasonSnafu)?;

            Ok(Pdu::AbortRQ { source })
        }
        _ => Ok(Pdu::Unknown {
            pdu_type,
            data: cursor.into_inner(),
        }),
    }
}

/// The fixed part of A-ASSOCIATE-RQ and A-ASSOCIATE-AC.
struct AssociationHeader {
    protocol_version: u16,
    called_ae_title: String,
    calling_ae_title: String,
}

fn read_association_header(
    cursor: &mut Cursor<Vec<u8>>,
    codec: &dyn TextCodec,
) -> Result<AssociationHeader> {
    // 7-8 - Protocol-version, bit 0 set for version 1
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;

    // 9-10 - Reserved
    cursor
        .read_u16::<BigEndian>()
        .context(ReadReservedSnafu { bytes: 2_u32 })?;

    // 11-26 - Called-AE-title, 16 characters,
    // leading and trailing spaces are non-significant
    let called_ae_title = read_ae_title(cursor, codec, "Called-AE-title")?;

    // 27-42 - Calling-AE-title
    let calling_ae_title = read_ae_title(cursor, codec, "Calling-AE-title")?;

    // 43-74 - Reserved
    let mut reserved = [0; 32];
    cursor
        .read_exact(&mut reserved)
        .context(ReadReservedSnafu { bytes: 32_u32 })?;

    Ok(AssociationHeader {
        protocol_version,
        called_ae_title,
        calling_ae_title,
    })
}

fn read_ae_title<R>(reader: &mut R, codec: &dyn TextCodec, field: &'static str) -> Result<String>
where
    R: Read,
{
    let mut ae_bytes = [0; 16];
    reader
        .read_exact(&mut ae_bytes)
        .context(ReadPduFieldSnafu { field })?;
    Ok(codec
        .decode(&ae_bytes)
        .context(DecodeTextSnafu { field })?
        .trim()
        .to_string())
}

fn read_pdata_value<R>(reader: &mut R) -> Result<PDataValue>
where
    R: Read,
{
    // 1-4 - Item-length, counting from the context ID to the end of the value
    let item_length = reader.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-Length",
    })?;

    ensure!(
        item_length >= 2,
        InvalidItemLengthSnafu {
            length: item_length
        }
    );

    // 5 - Presentation-context-ID, odd integer between 1 and 255
    let presentation_context_id = reader.read_u8().context(ReadPduFieldSnafu {
        field: "Presentation-context-ID",
    })?;

    // 6 - Message Control Header:
    // bit 0 set for command information, unset for data set information,
    // bit 1 set for the last fragment
    let header = reader.read_u8().context(ReadPduFieldSnafu {
        field: "Message Control Header",
    })?;

    let value_type = if header & 0x01 > 0 {
        PDataValueType::Command
    } else {
        PDataValueType::Data
    };
    let is_last = (header & 0x02) > 0;

    // 7-xxx - Presentation-data-value fragment
    let data = read_n(reader, (item_length - 2) as usize).context(ReadPduFieldSnafu {
        field: "Presentation-data-value",
    })?;

    Ok(PDataValue {
        presentation_context_id,
        value_type,
        is_last,
        data,
    })
}

fn ensure_fixed_length(pdu_type: u8, length: u32) -> Result<()> {
    ensure!(length == 4, InvalidPduLengthSnafu { pdu_type, length });
    Ok(())
}

fn has_remaining(cursor: &Cursor<Vec<u8>>) -> bool {
    cursor.position() < cursor.get_ref().len() as u64
}

/// Read exactly `bytes_to_read` bytes,
/// failing with `UnexpectedEof` if the source ends earlier.
fn read_n<R>(reader: &mut R, bytes_to_read: usize) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let mut result = Vec::with_capacity(bytes_to_read.min(MAXIMUM_PDU_SIZE as usize));
    reader
        .take(bytes_to_read as u64)
        .read_to_end(&mut result)?;
    if result.len() < bytes_to_read {
        return Err(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("expected {} bytes, got {}", bytes_to_read, result.len()),
        ));
    }
    Ok(result)
}

/// Read a UID text value, trimming null and space padding.
fn read_uid<R>(reader: &mut R, len: usize, codec: &dyn TextCodec, field: &'static str) -> Result<String>
where
    R: Read,
{
    let bytes = read_n(reader, len).context(ReadPduFieldSnafu { field })?;
    Ok(codec
        .decode(&bytes)
        .context(DecodeTextSnafu { field })?
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .trim_start()
        .to_string())
}

/// Read the 4-byte header of a sub-item, returning its type and length.
fn read_sub_item_header<R>(reader: &mut R) -> Result<(u8, u16)>
where
    R: Read,
{
    // 1 - Item-type
    let item_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    reader
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 3-4 - Item-length
    let item_length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;

    Ok((item_type, item_length))
}

fn read_pdu_variable<R>(reader: &mut R, codec: &dyn TextCodec) -> Result<PduVariableItem>
where
    R: Read,
{
    let (item_type, item_length) = read_sub_item_header(reader)?;

    let bytes = read_n(reader, item_length as usize).context(ReadPduItemSnafu)?;
    let len = bytes.len();
    let mut cursor = Cursor::new(bytes);

    match item_type {
        0x10 => {
            // Application Context Item
            let val = read_uid(&mut cursor, len, codec, "Application-context-name")?;
            Ok(PduVariableItem::ApplicationContext(val))
        }
        0x20 => {
            // Presentation Context Item (proposed)
            let mut abstract_syntax: Option<String> = None;
            let mut transfer_syntaxes = vec![];

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            // 6-8 - Reserved
            let mut reserved = [0; 3];
            cursor
                .read_exact(&mut reserved)
                .context(ReadReservedSnafu { bytes: 3_u32 })?;

            // 9-xxx - one abstract syntax and one or more transfer syntaxes
            while has_remaining(&cursor) {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;

                match item_type {
                    0x30 => {
                        abstract_syntax = Some(read_uid(
                            &mut cursor,
                            item_length as usize,
                            codec,
                            "Abstract-syntax-name",
                        )?);
                    }
                    0x40 => {
                        transfer_syntaxes.push(read_uid(
                            &mut cursor,
                            item_length as usize,
                            codec,
                            "Transfer-syntax-name",
                        )?);
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id: presentation_context_id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // Presentation Context Item (result)
            let mut transfer_syntax: Option<String> = None;

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
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

            // 9-xxx - exactly one transfer syntax sub-item,
            // not significant unless the context was accepted
            while has_remaining(&cursor) {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;

                match item_type {
                    0x40 => {
                        ensure!(
                            transfer_syntax.is_none(),
                            MultipleTransferSyntaxesAcceptedSnafu
                        );
                        transfer_syntax = Some(read_uid(
                            &mut cursor,
                            item_length as usize,
                            codec,
                            "Transfer-syntax-name",
                        )?);
                    }
                    _ => {
                        return InvalidTransferSyntaxSubItemSnafu.fail();
                    }
                }
            }

            let transfer_syntax = match (transfer_syntax, reason) {
                (Some(ts), _) => ts,
                (None, PresentationContextResultReason::Acceptance) => {
                    return MissingTransferSyntaxSnafu.fail();
                }
                (None, _) => String::new(),
            };

            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id: presentation_context_id,
                    reason,
                    transfer_syntax,
                },
            ))
        }
        0x50 => {
            // User Information Item
            let mut user_variables = vec![];
            while has_remaining(&cursor) {
                if let Some(item) = read_user_variable(&mut cursor, codec)? {
                    user_variables.push(item);
                }
            }
            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}

fn read_user_variable<R>(reader: &mut R, codec: &dyn TextCodec) -> Result<Option<UserVariableItem>>
where
    R: Read,
{
    let (item_type, item_length) = read_sub_item_header(reader)?;
    let bytes = read_n(reader, item_length as usize).context(ReadPduItemSnafu)?;
    let len = bytes.len();
    let mut cursor = Cursor::new(bytes);

    let item = match item_type {
        0x51 => {
            // 5-8 - Maximum-length-received, 0 meaning unlimited
            UserVariableItem::MaxLength(cursor.read_u32::<BigEndian>().context(
                ReadPduFieldSnafu {
                    field: "Maximum-length-received",
                },
            )?)
        }
        0x52 => UserVariableItem::ImplementationClassUID(read_uid(
            &mut cursor,
            len,
            codec,
            "Implementation-class-uid",
        )?),
        0x54 => {
            // 5-6 - UID-length
            let uid_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "UID-length",
            })?;
            // 7-xxx - SOP-class-uid
            let sop_class_uid =
                read_uid(&mut cursor, uid_length as usize, codec, "SOP-class-uid")?;
            // xxx+1 - SCU-role, xxx+2 - SCP-role
            let scu_role = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "SCU-role" })?;
            let scp_role = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "SCP-role" })?;
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid,
                scu_role: scu_role == 1,
                scp_role: scp_role == 1,
            })
        }
        0x55 => {
            let name = codec
                .decode(cursor.get_ref())
                .context(DecodeTextSnafu {
                    field: "Implementation-version-name",
                })?
                .trim()
                .to_string();
            UserVariableItem::ImplementationVersionName(name)
        }
        0x56 => {
            // 5-6 - SOP-class-uid-length
            let sop_class_uid_length =
                cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "SOP-class-uid-length",
                })?;
            // 7-xxx - SOP-class-uid
            let sop_class_uid = read_uid(
                &mut cursor,
                sop_class_uid_length as usize,
                codec,
                "SOP-class-uid",
            )?;
            // xxx-xxx - Service-class-application-information, to the end of the item
            let mut data = Vec::new();
            cursor.read_to_end(&mut data).context(ReadPduFieldSnafu {
                field: "Service-class-application-information",
            })?;
            UserVariableItem::SopClassExtendedNegotiationSubItem(sop_class_uid, data)
        }
        0x58 => {
            // 5 - User-Identity-Type
            let user_identity_type = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "User-Identity-type",
            })?;
            // 6 - Positive-response-requested
            let positive_response_requested = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "User-Identity-positive-response-requested",
            })?;
            // 7-8 and 9-n - Primary-field
            let primary_field_length =
                cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "User-Identity-primary-field-length",
                })?;
            let primary_field = read_n(&mut cursor, primary_field_length as usize).context(
                ReadPduFieldSnafu {
                    field: "User-Identity-primary-field",
                },
            )?;
            // n+1-n+2 and n+3-m - Secondary-field,
            // only non-empty for username and passcode
            let secondary_field_length =
                cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "User-Identity-secondary-field-length",
                })?;
            let secondary_field = read_n(&mut cursor, secondary_field_length as usize).context(
                ReadPduFieldSnafu {
                    field: "User-Identity-secondary-field",
                },
            )?;

            match UserIdentityType::from(user_identity_type) {
                Some(user_identity_type) => UserVariableItem::UserIdentityItem(UserIdentity::new(
                    positive_response_requested == 1,
                    user_identity_type,
                    primary_field,
                    secondary_field,
                )),
                None => {
                    warn!("Unknown User Identity Type code {}", user_identity_type);
                    return Ok(None);
                }
            }
        }
        0x59 => {
            // 5-6 - Server-response-length, 7-xxx - Server-response
            let response_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Server-response-length",
            })?;
            let response = read_n(&mut cursor, response_length as usize).context(
                ReadPduFieldSnafu {
                    field: "Server-response",
                },
            )?;
            UserVariableItem::UserIdentityResponse(response)
        }
        _ => UserVariableItem::Unknown(item_type, cursor.into_inner()),
    };

    Ok(Some(item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn reads_abort_rq() {
        let bytes = [0x07, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x02, 0x02];
        let pdu = decode_pdu(&bytes).unwrap();
        assert_eq!(
            pdu,
            Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnexpectedPdu
                )
            }
        );
    }

    #[test]
    fn empty_stream_has_no_pdu() {
        let mut empty: &[u8] = &[];
        assert_matches!(
            read_pdu(&mut empty, DEFAULT_MAX_PDU, true),
            Err(Error::NoPduAvailable { .. })
        );
    }

    #[test]
    fn truncated_body_is_an_error() {
        // declares 4 bytes of body, provides 2
        let bytes = [0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00];
        assert_matches!(decode_pdu(&bytes), Err(Error::ReadPdu { .. }));

        // truncated in the middle of the header
        let bytes = [0x05, 0x00, 0x00];
        assert_matches!(decode_pdu(&bytes), Err(Error::ReadPduField { .. }));
    }

    #[test]
    fn truncated_pdv_is_an_error() {
        // P-DATA-TF with a PDV item claiming 10 bytes while holding 4
        let bytes = [
            0x04, 0x00, 0x00, 0x00, 0x00, 0x08, // header
            0x00, 0x00, 0x00, 0x0A, 0x01, 0x03, 0xAA, 0xBB,
        ];
        assert_matches!(decode_pdu(&bytes), Err(Error::ReadPduField { .. }));
    }

    #[test]
    fn pdv_item_length_must_cover_header() {
        let bytes = [
            0x04, 0x00, 0x00, 0x00, 0x00, 0x06, // header
            0x00, 0x00, 0x00, 0x01, 0x01, 0x03,
        ];
        assert_matches!(
            decode_pdu(&bytes),
            Err(Error::InvalidItemLength { length: 1, .. })
        );
    }

    #[test]
    fn fixed_size_pdu_with_wrong_length() {
        let bytes = [0x06, 0x00, 0x00, 0x00, 0x00, 0x05, 0, 0, 0, 0, 0];
        assert_matches!(
            decode_pdu(&bytes),
            Err(Error::InvalidPduLength {
                pdu_type: 0x06,
                length: 5,
                ..
            })
        );
    }

    #[test]
    fn unknown_pdu_type_is_preserved() {
        let bytes = [0x0F, 0x00, 0x00, 0x00, 0x00, 0x02, 0xAB, 0xCD];
        assert_eq!(
            decode_pdu(&bytes).unwrap(),
            Pdu::Unknown {
                pdu_type: 0x0F,
                data: vec![0xAB, 0xCD]
            }
        );
    }

    #[test]
    fn pdu_length_limits() {
        assert_matches!(
            PduLengthLimit::new(1_000, true),
            Err(Error::InvalidMaxPdu {
                max_pdu_length: 1_000,
                ..
            })
        );
        assert_matches!(
            PduLengthLimit::new(MAXIMUM_PDU_SIZE + 1, false),
            Err(Error::InvalidMaxPdu { .. })
        );

        // no limit means the largest one
        let limit = PduLengthLimit::new(0, true).unwrap();
        assert_eq!(limit.max_pdu_length(), MAXIMUM_PDU_SIZE);
        assert!(limit.check(MAXIMUM_PDU_SIZE).is_ok());
        assert_matches!(
            limit.check(MAXIMUM_PDU_SIZE + 1),
            Err(Error::PduTooLarge { .. })
        );

        let limit = PduLengthLimit::new(DEFAULT_MAX_PDU, true).unwrap();
        assert!(limit.check(DEFAULT_MAX_PDU).is_ok());
        assert_matches!(
            limit.check(DEFAULT_MAX_PDU + 1),
            Err(Error::PduTooLarge {
                pdu_length: 16_385,
                max_pdu_length: 16_384,
                ..
            })
        );
        let limit = PduLengthLimit::new(DEFAULT_MAX_PDU, false).unwrap();
        assert!(limit.check(DEFAULT_MAX_PDU + 1).is_ok());
        assert_matches!(
            limit.check(MAXIMUM_PDU_SIZE + 1),
            Err(Error::PduTooLarge {
                max_pdu_length: MAXIMUM_PDU_SIZE,
                ..
            })
        );
    }

    #[test]
    fn strict_mode_refuses_large_pdu() {
        let mut bytes = vec![0x04, 0x00];
        bytes.extend(5000_u32.to_be_bytes());
        bytes.extend(vec![0; 5000]);

        assert_matches!(
            read_pdu(&mut bytes.as_slice(), MINIMUM_PDU_SIZE, true),
            Err(Error::PduTooLarge {
                pdu_length: 5000,
                ..
            })
        );
        // tolerated when not strict, though the PDV items are garbage
        assert_matches!(
            read_pdu(&mut bytes.as_slice(), MINIMUM_PDU_SIZE, false),
            Err(Error::InvalidItemLength { .. })
        );
    }

    #[test]
    fn typed_decode_checks_pdu_type() {
        let bytes = [0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
        assert_matches!(
            AssociationAC::decode(&bytes),
            Err(Error::UnexpectedPduType {
                expected: 0x02,
                got: 0x05,
                ..
            })
        );
    }

    #[test]
    fn uid_padding_is_trimmed() {
        let mut cursor = Cursor::new(b"1.2.840.10008.1.2\0".to_vec());
        let uid = read_uid(
            &mut cursor,
            18,
            &DefaultCharacterSetCodec,
            "Transfer-syntax-name",
        )
        .unwrap();
        assert_eq!(uid, "1.2.840.10008.1.2");
    }
}
