//! DIMSE command messages.
//!
//! A command is a small data set of group 0000 attributes,
//! always encoded in _Implicit VR Little Endian_
//! and led by the _Command Group Length_ element.
//! [`CommandMessage`] covers the composite services
//! used by this crate's peers:
//! C-ECHO, C-FIND, C-MOVE and C-STORE requests and responses,
//! plus C-GET responses.
//! Attributes which do not apply to a message, or are not set,
//! are left out of the encoded command.
//!
//! # Example
//!
//! ```
//! # use dicom_ulp::command::{CommandMessage, StatusClass};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = CommandMessage::c_echo_rq(7);
//! let bytes = request.encode()?;
//! assert_eq!(CommandMessage::decode(&bytes)?, request);
//!
//! let response = CommandMessage::c_echo_rsp(&request, 0x0000);
//! assert_eq!(response.status().map(|s| s.class()), Some(StatusClass::Success));
//! # Ok(())
//! # }
//! ```
use std::fmt;

use dicom_core::{dicom_value, DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{InMemDicomObject, StandardDataDictionary};
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};

/// The value of _Command Data Set Type_ when no data set follows.
pub const NO_DATA_SET: u16 = 0x0101;

/// The value of _Command Data Set Type_ used when a data set follows.
pub const DATA_SET_PRESENT: u16 = 0x0000;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// could not encode command
    EncodeCommand {
        #[snafu(source(from(dicom_object::WriteError, Box::new)))]
        source: Box<dicom_object::WriteError>,
    },

    /// could not decode command
    DecodeCommand {
        #[snafu(source(from(dicom_object::ReadError, Box::new)))]
        source: Box<dicom_object::ReadError>,
    },

    #[snafu(display("missing command attribute {}", tag))]
    MissingAttribute { tag: Tag, backtrace: Backtrace },

    #[snafu(display("invalid value for command attribute {}", tag))]
    InvalidAttribute { tag: Tag, backtrace: Backtrace },

    #[snafu(display("unsupported command field {:#06x}", value))]
    UnsupportedCommandField { value: u16, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The _Command Field_ (0000,0100) of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandField {
    CStoreRq = 0x0001,
    CStoreRsp = 0x8001,
    CGetRq = 0x0010,
    CGetRsp = 0x8010,
    CFindRq = 0x0020,
    CFindRsp = 0x8020,
    CMoveRq = 0x0021,
    CMoveRsp = 0x8021,
    CEchoRq = 0x0030,
    CEchoRsp = 0x8030,
    CCancelRq = 0x0FFF,
}

impl CommandField {
    pub fn from_code(code: u16) -> Option<Self> {
        use CommandField::*;
        Some(match code {
            0x0001 => CStoreRq,
            0x8001 => CStoreRsp,
            0x0010 => CGetRq,
            0x8010 => CGetRsp,
            0x0020 => CFindRq,
            0x8020 => CFindRsp,
            0x0021 => CMoveRq,
            0x8021 => CMoveRsp,
            0x0030 => CEchoRq,
            0x8030 => CEchoRsp,
            0x0FFF => CCancelRq,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether the command is a response.
    pub fn is_response(self) -> bool {
        self.code() & 0x8000 != 0
    }
}

/// The _Priority_ (0000,0700) of a request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(Priority::Medium),
            0x0001 => Some(Priority::High),
            0x0002 => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Priority::Medium => 0x0000,
            Priority::High => 0x0001,
            Priority::Low => 0x0002,
        }
    }
}

/// The broad category of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    Warning,
    Failure,
    Cancel,
    Pending,
}

/// A DIMSE response status code (0000,0900).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0x0000);
    pub const CANCEL: Status = Status(0xFE00);
    pub const PENDING: Status = Status(0xFF00);
    pub const PENDING_WITH_WARNINGS: Status = Status(0xFF01);
    pub const REFUSED_SOP_CLASS_NOT_SUPPORTED: Status = Status(0x0122);
    pub const UNRECOGNIZED_OPERATION: Status = Status(0x0211);
    pub const PROCESSING_FAILURE: Status = Status(0x0110);

    pub fn code(self) -> u16 {
        self.0
    }

    /// Classify the status code.
    ///
    /// Codes in none of the warning, cancel or pending ranges are failures.
    pub fn class(self) -> StatusClass {
        match self.0 {
            0x0000 => StatusClass::Success,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => StatusClass::Warning,
            0xFE00 => StatusClass::Cancel,
            0xFF00 | 0xFF01 => StatusClass::Pending,
            _ => StatusClass::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self.class() == StatusClass::Success
    }

    pub fn is_pending(self) -> bool {
        self.class() == StatusClass::Pending
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Status(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X} ({:?})", self.0, self.class())
    }
}

/// Optional details about a response status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatusDetail {
    /// _Offending Element_ (0000,0901)
    pub offending_elements: Vec<Tag>,
    /// _Error Comment_ (0000,0902)
    pub error_comment: Option<String>,
}

/// Sub-operation counters of C-MOVE and C-GET responses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubOperations {
    pub remaining: Option<u16>,
    pub completed: Option<u16>,
    pub failed: Option<u16>,
    pub warning: Option<u16>,
}

/// A decoded DIMSE command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMessage {
    CEchoRq {
        message_id: u16,
        affected_sop_class_uid: String,
    },
    CEchoRsp {
        message_id_being_responded_to: u16,
        affected_sop_class_uid: Option<String>,
        status: Status,
        detail: StatusDetail,
    },
    CFindRq {
        message_id: u16,
        affected_sop_class_uid: String,
        priority: Priority,
    },
    CFindRsp {
        message_id_being_responded_to: u16,
        affected_sop_class_uid: Option<String>,
        status: Status,
        has_data_set: bool,
        detail: StatusDetail,
    },
    CMoveRq {
        message_id: u16,
        affected_sop_class_uid: String,
        priority: Priority,
        move_destination: String,
    },
    CMoveRsp {
        message_id_being_responded_to: u16,
        affected_sop_class_uid: Option<String>,
        status: Status,
        sub_operations: SubOperations,
        has_data_set: bool,
        detail: StatusDetail,
    },
    CStoreRq {
        message_id: u16,
        affected_sop_class_uid: String,
        affected_sop_instance_uid: String,
        priority: Priority,
        /// AE title and message ID of the C-MOVE which caused this store
        move_originator: Option<(String, u16)>,
    },
    CStoreRsp {
        message_id_being_responded_to: u16,
        affected_sop_class_uid: Option<String>,
        affected_sop_instance_uid: Option<String>,
        status: Status,
        detail: StatusDetail,
    },
    CGetRsp {
        message_id_being_responded_to: u16,
        affected_sop_class_uid: Option<String>,
        status: Status,
        sub_operations: SubOperations,
        has_data_set: bool,
        detail: StatusDetail,
    },
}

impl CommandMessage {
    /// A C-ECHO request for the _Verification_ SOP class.
    pub fn c_echo_rq(message_id: u16) -> Self {
        CommandMessage::CEchoRq {
            message_id,
            affected_sop_class_uid: uids::VERIFICATION.to_string(),
        }
    }

    /// The response to a C-ECHO request.
    pub fn c_echo_rsp(request: &CommandMessage, status: u16) -> Self {
        CommandMessage::CEchoRsp {
            message_id_being_responded_to: request.message_id().unwrap_or_default(),
            affected_sop_class_uid: request.affected_sop_class_uid().map(String::from),
            status: Status(status),
            detail: StatusDetail::default(),
        }
    }

    pub fn c_find_rq(message_id: u16, sop_class_uid: impl Into<String>, priority: Priority) -> Self {
        CommandMessage::CFindRq {
            message_id,
            affected_sop_class_uid: sop_class_uid.into(),
            priority,
        }
    }

    pub fn c_move_rq(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        priority: Priority,
        move_destination: impl Into<String>,
    ) -> Self {
        CommandMessage::CMoveRq {
            message_id,
            affected_sop_class_uid: sop_class_uid.into(),
            priority,
            move_destination: move_destination.into(),
        }
    }

    pub fn c_store_rq(
        message_id: u16,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        priority: Priority,
    ) -> Self {
        CommandMessage::CStoreRq {
            message_id,
            affected_sop_class_uid: sop_class_uid.into(),
            affected_sop_instance_uid: sop_instance_uid.into(),
            priority,
            move_originator: None,
        }
    }

    /// The response to a C-STORE request.
    pub fn c_store_rsp(request: &CommandMessage, status: u16) -> Self {
        let affected_sop_instance_uid = match request {
            CommandMessage::CStoreRq {
                affected_sop_instance_uid,
                ..
            } => Some(affected_sop_instance_uid.clone()),
            _ => None,
        };
        CommandMessage::CStoreRsp {
            message_id_being_responded_to: request.message_id().unwrap_or_default(),
            affected_sop_class_uid: request.affected_sop_class_uid().map(String::from),
            affected_sop_instance_uid,
            status: Status(status),
            detail: StatusDetail::default(),
        }
    }

    pub fn command_field(&self) -> CommandField {
        match self {
            CommandMessage::CEchoRq { .. } => CommandField::CEchoRq,
            CommandMessage::CEchoRsp { .. } => CommandField::CEchoRsp,
            CommandMessage::CFindRq { .. } => CommandField::CFindRq,
            CommandMessage::CFindRsp { .. } => CommandField::CFindRsp,
            CommandMessage::CMoveRq { .. } => CommandField::CMoveRq,
            CommandMessage::CMoveRsp { .. } => CommandField::CMoveRsp,
            CommandMessage::CStoreRq { .. } => CommandField::CStoreRq,
            CommandMessage::CStoreRsp { .. } => CommandField::CStoreRsp,
            CommandMessage::CGetRsp { .. } => CommandField::CGetRsp,
        }
    }

    /// The message ID of a request.
    pub fn message_id(&self) -> Option<u16> {
        match self {
            CommandMessage::CEchoRq { message_id, .. }
            | CommandMessage::CFindRq { message_id, .. }
            | CommandMessage::CMoveRq { message_id, .. }
            | CommandMessage::CStoreRq { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }

    /// The ID of the request a response answers.
    pub fn message_id_being_responded_to(&self) -> Option<u16> {
        match self {
            CommandMessage::CEchoRsp {
                message_id_being_responded_to,
                ..
            }
            | CommandMessage::CFindRsp {
                message_id_being_responded_to,
                ..
            }
            | CommandMessage::CMoveRsp {
                message_id_being_responded_to,
                ..
            }
            | CommandMessage::CStoreRsp {
                message_id_being_responded_to,
                ..
            }
            | CommandMessage::CGetRsp {
                message_id_being_responded_to,
                ..
            } => Some(*message_id_being_responded_to),
            _ => None,
        }
    }

    pub fn affected_sop_class_uid(&self) -> Option<&str> {
        match self {
            CommandMessage::CEchoRq {
                affected_sop_class_uid,
                ..
            }
            | CommandMessage::CFindRq {
                affected_sop_class_uid,
                ..
            }
            | CommandMessage::CMoveRq {
                affected_sop_class_uid,
                ..
            }
            | CommandMessage::CStoreRq {
                affected_sop_class_uid,
                ..
            } => Some(affected_sop_class_uid),
            CommandMessage::CEchoRsp {
                affected_sop_class_uid,
                ..
            }
            | CommandMessage::CFindRsp {
                affected_sop_class_uid,
                ..
            }
            | CommandMessage::CMoveRsp {
                affected_sop_class_uid,
                ..
            }
            | CommandMessage::CStoreRsp {
                affected_sop_class_uid,
                ..
            }
            | CommandMessage::CGetRsp {
                affected_sop_class_uid,
                ..
            } => affected_sop_class_uid.as_deref(),
        }
    }

    /// The status of a response.
    pub fn status(&self) -> Option<Status> {
        match self {
            CommandMessage::CEchoRsp { status, .. }
            | CommandMessage::CFindRsp { status, .. }
            | CommandMessage::CMoveRsp { status, .. }
            | CommandMessage::CStoreRsp { status, .. }
            | CommandMessage::CGetRsp { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a data set follows the command.
    pub fn has_data_set(&self) -> bool {
        match self {
            CommandMessage::CFindRq { .. }
            | CommandMessage::CMoveRq { .. }
            | CommandMessage::CStoreRq { .. } => true,
            CommandMessage::CFindRsp { has_data_set, .. }
            | CommandMessage::CMoveRsp { has_data_set, .. }
            | CommandMessage::CGetRsp { has_data_set, .. } => *has_data_set,
            CommandMessage::CEchoRq { .. }
            | CommandMessage::CEchoRsp { .. }
            | CommandMessage::CStoreRsp { .. } => false,
        }
    }

    /// Build the command data set,
    /// including the _Command Group Length_.
    pub fn to_object(&self) -> InMemDicomObject<StandardDataDictionary> {
        let mut elements = Vec::with_capacity(12);
        if let Some(uid) = self.affected_sop_class_uid() {
            elements.push(uid_element(tags::AFFECTED_SOP_CLASS_UID, uid));
        }
        elements.push(us_element(tags::COMMAND_FIELD, self.command_field().code()));
        if let Some(id) = self.message_id() {
            elements.push(us_element(tags::MESSAGE_ID, id));
        }
        if let Some(id) = self.message_id_being_responded_to() {
            elements.push(us_element(tags::MESSAGE_ID_BEING_RESPONDED_TO, id));
        }

        match self {
            CommandMessage::CFindRq { priority, .. } => {
                elements.push(us_element(tags::PRIORITY, priority.code()));
            }
            CommandMessage::CMoveRq {
                priority,
                move_destination,
                ..
            } => {
                elements.push(us_element(tags::PRIORITY, priority.code()));
                elements.push(DataElement::new(
                    tags::MOVE_DESTINATION,
                    VR::AE,
                    PrimitiveValue::from(move_destination.as_str()),
                ));
            }
            CommandMessage::CStoreRq {
                priority,
                affected_sop_instance_uid,
                move_originator,
                ..
            } => {
                elements.push(us_element(tags::PRIORITY, priority.code()));
                elements.push(uid_element(
                    tags::AFFECTED_SOP_INSTANCE_UID,
                    affected_sop_instance_uid,
                ));
                if let Some((ae_title, message_id)) = move_originator {
                    elements.push(DataElement::new(
                        tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE,
                        VR::AE,
                        PrimitiveValue::from(ae_title.as_str()),
                    ));
                    elements.push(us_element(tags::MOVE_ORIGINATOR_MESSAGE_ID, *message_id));
                }
            }
            CommandMessage::CStoreRsp {
                affected_sop_instance_uid: Some(uid),
                ..
            } => {
                elements.push(uid_element(tags::AFFECTED_SOP_INSTANCE_UID, uid));
            }
            CommandMessage::CMoveRsp { sub_operations, .. }
            | CommandMessage::CGetRsp { sub_operations, .. } => {
                let counters = [
                    (tags::NUMBER_OF_REMAINING_SUBOPERATIONS, sub_operations.remaining),
                    (tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, sub_operations.completed),
                    (tags::NUMBER_OF_FAILED_SUBOPERATIONS, sub_operations.failed),
                    (tags::NUMBER_OF_WARNING_SUBOPERATIONS, sub_operations.warning),
                ];
                for (tag, value) in counters {
                    if let Some(value) = value {
                        elements.push(us_element(tag, value));
                    }
                }
            }
            _ => {}
        }

        let data_set_type = if self.has_data_set() {
            DATA_SET_PRESENT
        } else {
            NO_DATA_SET
        };
        elements.push(us_element(tags::COMMAND_DATA_SET_TYPE, data_set_type));

        if let Some(status) = self.status() {
            elements.push(us_element(tags::STATUS, status.code()));
        }
        if let Some(detail) = self.detail() {
            if !detail.offending_elements.is_empty() {
                elements.push(DataElement::new(
                    tags::OFFENDING_ELEMENT,
                    VR::AT,
                    PrimitiveValue::Tags(detail.offending_elements.iter().copied().collect()),
                ));
            }
            if let Some(comment) = &detail.error_comment {
                elements.push(DataElement::new(
                    tags::ERROR_COMMENT,
                    VR::LO,
                    PrimitiveValue::from(comment.as_str()),
                ));
            }
        }

        InMemDicomObject::command_from_element_iter(elements)
    }

    fn detail(&self) -> Option<&StatusDetail> {
        match self {
            CommandMessage::CEchoRsp { detail, .. }
            | CommandMessage::CFindRsp { detail, .. }
            | CommandMessage::CMoveRsp { detail, .. }
            | CommandMessage::CStoreRsp { detail, .. }
            | CommandMessage::CGetRsp { detail, .. } => Some(detail),
            _ => None,
        }
    }

    /// Encode the command in _Implicit VR Little Endian_.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.to_object()
            .write_dataset_with_ts(&mut bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .context(EncodeCommandSnafu)?;
        Ok(bytes)
    }

    /// Decode a command received in _Implicit VR Little Endian_.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let obj = InMemDicomObject::read_dataset_with_ts(bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .context(DecodeCommandSnafu)?;
        Self::from_object(&obj)
    }

    /// Interpret a command data set.
    pub fn from_object(obj: &InMemDicomObject<StandardDataDictionary>) -> Result<Self> {
        let value = read_us(obj, tags::COMMAND_FIELD)?;
        let command_field =
            CommandField::from_code(value).context(UnsupportedCommandFieldSnafu { value })?;
        let has_data_set = read_us(obj, tags::COMMAND_DATA_SET_TYPE)? != NO_DATA_SET;

        let message = match command_field {
            CommandField::CEchoRq => CommandMessage::CEchoRq {
                message_id: read_us(obj, tags::MESSAGE_ID)?,
                affected_sop_class_uid: read_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
            },
            CommandField::CFindRq => CommandMessage::CFindRq {
                message_id: read_us(obj, tags::MESSAGE_ID)?,
                affected_sop_class_uid: read_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                priority: read_priority(obj)?,
            },
            CommandField::CMoveRq => CommandMessage::CMoveRq {
                message_id: read_us(obj, tags::MESSAGE_ID)?,
                affected_sop_class_uid: read_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                priority: read_priority(obj)?,
                move_destination: read_str(obj, tags::MOVE_DESTINATION)?,
            },
            CommandField::CStoreRq => {
                let move_originator = match read_opt_str(obj, tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE)? {
                    Some(ae_title) => Some((
                        ae_title,
                        read_us(obj, tags::MOVE_ORIGINATOR_MESSAGE_ID)?,
                    )),
                    None => None,
                };
                CommandMessage::CStoreRq {
                    message_id: read_us(obj, tags::MESSAGE_ID)?,
                    affected_sop_class_uid: read_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                    affected_sop_instance_uid: read_str(obj, tags::AFFECTED_SOP_INSTANCE_UID)?,
                    priority: read_priority(obj)?,
                    move_originator,
                }
            }
            CommandField::CEchoRsp => CommandMessage::CEchoRsp {
                message_id_being_responded_to: read_us(obj, tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: read_opt_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                status: Status(read_us(obj, tags::STATUS)?),
                detail: read_detail(obj)?,
            },
            CommandField::CFindRsp => CommandMessage::CFindRsp {
                message_id_being_responded_to: read_us(obj, tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: read_opt_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                status: Status(read_us(obj, tags::STATUS)?),
                has_data_set,
                detail: read_detail(obj)?,
            },
            CommandField::CMoveRsp => CommandMessage::CMoveRsp {
                message_id_being_responded_to: read_us(obj, tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: read_opt_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                status: Status(read_us(obj, tags::STATUS)?),
                sub_operations: read_sub_operations(obj)?,
                has_data_set,
                detail: read_detail(obj)?,
            },
            CommandField::CStoreRsp => CommandMessage::CStoreRsp {
                message_id_being_responded_to: read_us(obj, tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: read_opt_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                affected_sop_instance_uid: read_opt_str(obj, tags::AFFECTED_SOP_INSTANCE_UID)?,
                status: Status(read_us(obj, tags::STATUS)?),
                detail: read_detail(obj)?,
            },
            CommandField::CGetRsp => CommandMessage::CGetRsp {
                message_id_being_responded_to: read_us(obj, tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: read_opt_str(obj, tags::AFFECTED_SOP_CLASS_UID)?,
                status: Status(read_us(obj, tags::STATUS)?),
                sub_operations: read_sub_operations(obj)?,
                has_data_set,
                detail: read_detail(obj)?,
            },
            CommandField::CGetRq | CommandField::CCancelRq => {
                return UnsupportedCommandFieldSnafu { value }.fail()
            }
        };
        Ok(message)
    }
}

fn us_element(tag: Tag, value: u16) -> DataElement<InMemDicomObject<StandardDataDictionary>> {
    DataElement::new(tag, VR::US, dicom_value!(U16, [value]))
}

fn uid_element(tag: Tag, uid: &str) -> DataElement<InMemDicomObject<StandardDataDictionary>> {
    DataElement::new(tag, VR::UI, PrimitiveValue::from(uid))
}

fn read_opt_us(obj: &InMemDicomObject<StandardDataDictionary>, tag: Tag) -> Result<Option<u16>> {
    obj.get(tag)
        .map(|e| e.to_int::<u16>().ok().context(InvalidAttributeSnafu { tag }))
        .transpose()
}

fn read_us(obj: &InMemDicomObject<StandardDataDictionary>, tag: Tag) -> Result<u16> {
    read_opt_us(obj, tag)?.context(MissingAttributeSnafu { tag })
}

fn read_opt_str(
    obj: &InMemDicomObject<StandardDataDictionary>,
    tag: Tag,
) -> Result<Option<String>> {
    obj.get(tag)
        .map(|e| {
            e.to_str()
                .ok()
                .context(InvalidAttributeSnafu { tag })
                .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
        })
        .transpose()
}

fn read_str(obj: &InMemDicomObject<StandardDataDictionary>, tag: Tag) -> Result<String> {
    read_opt_str(obj, tag)?.context(MissingAttributeSnafu { tag })
}

fn read_priority(obj: &InMemDicomObject<StandardDataDictionary>) -> Result<Priority> {
    match read_opt_us(obj, tags::PRIORITY)? {
        Some(code) => Priority::from_code(code).context(InvalidAttributeSnafu {
            tag: tags::PRIORITY,
        }),
        None => Ok(Priority::default()),
    }
}

fn read_sub_operations(obj: &InMemDicomObject<StandardDataDictionary>) -> Result<SubOperations> {
    Ok(SubOperations {
        remaining: read_opt_us(obj, tags::NUMBER_OF_REMAINING_SUBOPERATIONS)?,
        completed: read_opt_us(obj, tags::NUMBER_OF_COMPLETED_SUBOPERATIONS)?,
        failed: read_opt_us(obj, tags::NUMBER_OF_FAILED_SUBOPERATIONS)?,
        warning: read_opt_us(obj, tags::NUMBER_OF_WARNING_SUBOPERATIONS)?,
    })
}

fn read_detail(obj: &InMemDicomObject<StandardDataDictionary>) -> Result<StatusDetail> {
    let offending_elements = match obj.get(tags::OFFENDING_ELEMENT) {
        Some(e) => match e.value().primitive() {
            Some(PrimitiveValue::Tags(tags)) => tags.to_vec(),
            _ => {
                return InvalidAttributeSnafu {
                    tag: tags::OFFENDING_ELEMENT,
                }
                .fail()
            }
        },
        None => Vec::new(),
    };
    Ok(StatusDetail {
        offending_elements,
        error_comment: read_opt_str(obj, tags::ERROR_COMMENT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;
    use rstest::rstest;

    #[test]
    fn echo_request_layout() {
        let bytes = CommandMessage::c_echo_rq(1).encode().unwrap();

        // (0000,0000) UL, length 4
        assert_eq!(&bytes[..8], &[0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00]);
        let group_length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(group_length as usize, bytes.len() - 12);

        let obj =
            InMemDicomObject::read_dataset_with_ts(&bytes[..], &IMPLICIT_VR_LITTLE_ENDIAN.erased())
                .unwrap();
        assert_eq!(
            obj.element(tags::COMMAND_FIELD)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            0x0030
        );
        assert_eq!(
            obj.element(tags::COMMAND_DATA_SET_TYPE)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            NO_DATA_SET
        );
        // not applicable to a request
        assert!(obj.get(tags::STATUS).is_none());
        assert!(obj.get(tags::PRIORITY).is_none());
        assert!(obj.get(tags::MESSAGE_ID_BEING_RESPONDED_TO).is_none());
    }

    #[rstest]
    #[case(CommandMessage::c_echo_rq(3))]
    #[case(CommandMessage::c_find_rq(4, uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND, Priority::High))]
    #[case(CommandMessage::c_move_rq(5, uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE, Priority::Low, "STORE-SCP"))]
    #[case(CommandMessage::CStoreRq {
        message_id: 6,
        affected_sop_class_uid: uids::CT_IMAGE_STORAGE.to_string(),
        affected_sop_instance_uid: "1.2.3.4.5".to_string(),
        priority: Priority::Medium,
        move_originator: Some(("MOVE-SCU".to_string(), 5)),
    })]
    #[case(CommandMessage::CMoveRsp {
        message_id_being_responded_to: 5,
        affected_sop_class_uid: Some(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE.to_string()),
        status: Status::PENDING,
        sub_operations: SubOperations {
            remaining: Some(2),
            completed: Some(1),
            failed: Some(0),
            warning: None,
        },
        has_data_set: false,
        detail: StatusDetail::default(),
    })]
    #[case(CommandMessage::CStoreRsp {
        message_id_being_responded_to: 6,
        affected_sop_class_uid: Some(uids::CT_IMAGE_STORAGE.to_string()),
        affected_sop_instance_uid: Some("1.2.3.4.5".to_string()),
        status: Status(0xA700),
        detail: StatusDetail {
            offending_elements: vec![tags::PATIENT_ID],
            error_comment: Some("out of resources".to_string()),
        },
    })]
    fn commands_survive_the_wire(#[case] message: CommandMessage) {
        let bytes = message.encode().unwrap();
        assert_eq!(CommandMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn responses_answer_their_request() {
        let request = CommandMessage::c_store_rq(
            42,
            uids::CT_IMAGE_STORAGE,
            "1.2.3.4.5.6",
            Priority::Medium,
        );
        assert!(request.has_data_set());
        let response = CommandMessage::c_store_rsp(&request, 0x0000);
        assert_eq!(response.message_id_being_responded_to(), Some(42));
        assert_eq!(response.message_id(), None);
        assert_eq!(response.affected_sop_class_uid(), Some(uids::CT_IMAGE_STORAGE));
        assert!(!response.has_data_set());
        assert!(response.command_field().is_response());
        assert!(!request.command_field().is_response());
    }

    #[rstest]
    #[case(0x0000, StatusClass::Success)]
    #[case(0x0001, StatusClass::Warning)]
    #[case(0xB000, StatusClass::Warning)]
    #[case(0x0107, StatusClass::Warning)]
    #[case(0xFE00, StatusClass::Cancel)]
    #[case(0xFF00, StatusClass::Pending)]
    #[case(0xFF01, StatusClass::Pending)]
    #[case(0xA700, StatusClass::Failure)]
    #[case(0xC000, StatusClass::Failure)]
    #[case(0x0122, StatusClass::Failure)]
    fn status_classes(#[case] code: u16, #[case] class: StatusClass) {
        assert_eq!(Status(code).class(), class);
    }

    #[test]
    fn unsupported_command_field() {
        let obj = InMemDicomObject::command_from_element_iter([
            us_element(tags::COMMAND_FIELD, 0x0FFF),
            us_element(tags::MESSAGE_ID_BEING_RESPONDED_TO, 1),
            us_element(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET),
        ]);
        assert_matches!(
            CommandMessage::from_object(&obj),
            Err(Error::UnsupportedCommandField { value: 0x0FFF, .. })
        );
    }

    #[test]
    fn missing_attribute() {
        let obj = InMemDicomObject::command_from_element_iter([
            us_element(tags::COMMAND_FIELD, 0x8030),
            us_element(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET),
        ]);
        assert_matches!(
            CommandMessage::from_object(&obj),
            Err(Error::MissingAttribute { tag, .. }) if tag == tags::MESSAGE_ID_BEING_RESPONDED_TO
        );
    }
}
