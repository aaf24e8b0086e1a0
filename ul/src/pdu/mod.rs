//! Protocol Data Unit module
//!
//! This module comprises the data structures representing
//! the seven protocol data units (PDUs) of the DICOM upper layer,
//! their variable items and sub-items,
//! as well as readers and writers of PDUs from arbitrary data sources.
//!
//! Whole PDUs can be encoded with [`encode_pdu`] and decoded with [`decode_pdu`].
//! When the expected PDU type is known beforehand,
//! the type-specific constructors
//! (such as [`AssociationAC::decode`])
//! fail if the bytes declare another PDU type.
pub mod reader;
pub mod writer;

use std::fmt::Display;

pub use reader::{
    decode_pdu, read_pdu, PduLengthLimit, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
    PDU_HEADER_SIZE,
};
pub use writer::{encode_pdu, write_pdu};

/// The application context name of DICOM,
/// the only one defined by the standard.
pub const DICOM_APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// PDU type code of A-ASSOCIATE-RQ
pub const PDU_TYPE_ASSOCIATE_RQ: u8 = 0x01;
/// PDU type code of A-ASSOCIATE-AC
pub const PDU_TYPE_ASSOCIATE_AC: u8 = 0x02;
/// PDU type code of A-ASSOCIATE-RJ
pub const PDU_TYPE_ASSOCIATE_RJ: u8 = 0x03;
/// PDU type code of P-DATA-TF
pub const PDU_TYPE_PDATA: u8 = 0x04;
/// PDU type code of A-RELEASE-RQ
pub const PDU_TYPE_RELEASE_RQ: u8 = 0x05;
/// PDU type code of A-RELEASE-RP
pub const PDU_TYPE_RELEASE_RP: u8 = 0x06;
/// PDU type code of A-ABORT
pub const PDU_TYPE_ABORT: u8 = 0x07;

/// Message component for a proposed presentation context.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextProposed {
    /// the presentation context identifier
    pub id: u8,
    /// the expected abstract syntax UID
    /// (commonly referring to the expected SOP class)
    pub abstract_syntax: String,
    /// a list of transfer syntax UIDs to support in this interaction
    pub transfer_syntaxes: Vec<String>,
}

/// Message component for the outcome of a presentation context,
/// as sent in an A-ASSOCIATE-AC.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextResult {
    /// the presentation context identifier
    pub id: u8,
    /// the result of the negotiation
    pub reason: PresentationContextResultReason,
    /// the single transfer syntax of the context
    pub transfer_syntax: String,
}

/// A presentation context after negotiation,
/// retaining the abstract syntax so that it can be looked up
/// throughout the lifetime of the association.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextNegotiated {
    /// the presentation context identifier
    pub id: u8,
    /// the result of the negotiation
    pub reason: PresentationContextResultReason,
    /// the abstract syntax UID
    pub abstract_syntax: String,
    /// the transfer syntax UID
    pub transfer_syntax: String,
}

impl PresentationContextNegotiated {
    /// Whether this presentation context can be used for data transfer.
    pub fn is_accepted(&self) -> bool {
        self.reason == PresentationContextResultReason::Acceptance
    }
}

/// The result/reason code of a presentation context.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    /// Interpret a result/reason code from the wire.
    pub fn from(reason: u8) -> Option<PresentationContextResultReason> {
        let result = match reason {
            0 => PresentationContextResultReason::Acceptance,
            1 => PresentationContextResultReason::UserRejection,
            2 => PresentationContextResultReason::NoReason,
            3 => PresentationContextResultReason::AbstractSyntaxNotSupported,
            4 => PresentationContextResultReason::TransferSyntaxesNotSupported,
            _ => {
                return None;
            }
        };

        Some(result)
    }

    /// The code of this result/reason as written on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Display for PresentationContextResultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            PresentationContextResultReason::Acceptance => "acceptance",
            PresentationContextResultReason::UserRejection => "user rejection",
            PresentationContextResultReason::NoReason => "no reason",
            PresentationContextResultReason::AbstractSyntaxNotSupported => {
                "abstract syntax not supported"
            }
            PresentationContextResultReason::TransferSyntaxesNotSupported => {
                "transfer syntaxes not supported"
            }
        };
        f.write_str(msg)
    }
}

/// Result field of an A-ASSOCIATE-RJ.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJResult {
    Permanent = 1,
    Transient = 2,
}

impl AssociationRJResult {
    fn from(value: u8) -> Option<AssociationRJResult> {
        match value {
            1 => Some(AssociationRJResult::Permanent),
            2 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }

    /// The code of this result as written on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Display for AssociationRJResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJResult::Permanent => f.write_str("rejected-permanent"),
            AssociationRJResult::Transient => f.write_str("rejected-transient"),
        }
    }
}

/// Source and reason of an A-ASSOCIATE-RJ.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJSource {
    ServiceUser(AssociationRJServiceUserReason),
    ServiceProviderASCE(AssociationRJServiceProviderASCEReason),
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    fn from(source: u8, reason: u8) -> Option<AssociationRJSource> {
        use AssociationRJServiceProviderPresentationReason as Presentation;
        use AssociationRJServiceUserReason as User;

        let result = match (source, reason) {
            (1, 1) => AssociationRJSource::ServiceUser(User::NoReasonGiven),
            (1, 2) => AssociationRJSource::ServiceUser(User::ApplicationContextNameNotSupported),
            (1, 3) => AssociationRJSource::ServiceUser(User::CallingAETitleNotRecognized),
            (1, 7) => AssociationRJSource::ServiceUser(User::CalledAETitleNotRecognized),
            (1, x @ 4..=6) | (1, x @ 8..=10) => AssociationRJSource::ServiceUser(User::Reserved(x)),
            (2, 1) => AssociationRJSource::ServiceProviderASCE(
                AssociationRJServiceProviderASCEReason::NoReasonGiven,
            ),
            (2, 2) => AssociationRJSource::ServiceProviderASCE(
                AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported,
            ),
            (3, 1) => AssociationRJSource::ServiceProviderPresentation(
                Presentation::TemporaryCongestion,
            ),
            (3, 2) => {
                AssociationRJSource::ServiceProviderPresentation(Presentation::LocalLimitExceeded)
            }
            (3, x @ 0) | (3, x @ 3..=7) => {
                AssociationRJSource::ServiceProviderPresentation(Presentation::Reserved(x))
            }
            _ => {
                return None;
            }
        };
        Some(result)
    }

    /// The source and reason codes as written on the wire.
    pub fn codes(self) -> (u8, u8) {
        match self {
            AssociationRJSource::ServiceUser(reason) => (1, reason.code()),
            AssociationRJSource::ServiceProviderASCE(reason) => (2, reason.code()),
            AssociationRJSource::ServiceProviderPresentation(reason) => (3, reason.code()),
        }
    }
}

impl Display for AssociationRJSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJSource::ServiceUser(r) => write!(f, "service user: {}", r),
            AssociationRJSource::ServiceProviderASCE(r) => {
                write!(f, "service provider (ACSE): {}", r)
            }
            AssociationRJSource::ServiceProviderPresentation(r) => {
                write!(f, "service provider (presentation): {}", r)
            }
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAETitleNotRecognized,
    CalledAETitleNotRecognized,
    Reserved(u8),
}

impl AssociationRJServiceUserReason {
    fn code(self) -> u8 {
        match self {
            AssociationRJServiceUserReason::NoReasonGiven => 1,
            AssociationRJServiceUserReason::ApplicationContextNameNotSupported => 2,
            AssociationRJServiceUserReason::CallingAETitleNotRecognized => 3,
            AssociationRJServiceUserReason::CalledAETitleNotRecognized => 7,
            AssociationRJServiceUserReason::Reserved(code) => code,
        }
    }
}

impl Display for AssociationRJServiceUserReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceUserReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceUserReason::ApplicationContextNameNotSupported => {
                f.write_str("application context name not supported")
            }
            AssociationRJServiceUserReason::CallingAETitleNotRecognized => {
                f.write_str("calling AE title not recognized")
            }
            AssociationRJServiceUserReason::CalledAETitleNotRecognized => {
                f.write_str("called AE title not recognized")
            }
            AssociationRJServiceUserReason::Reserved(code) => write!(f, "reserved code {}", code),
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderASCEReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

impl AssociationRJServiceProviderASCEReason {
    fn code(self) -> u8 {
        match self {
            AssociationRJServiceProviderASCEReason::NoReasonGiven => 1,
            AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => 2,
        }
    }
}

impl Display for AssociationRJServiceProviderASCEReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderASCEReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => {
                f.write_str("protocol version not supported")
            }
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl AssociationRJServiceProviderPresentationReason {
    fn code(self) -> u8 {
        match self {
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion => 1,
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => 2,
            AssociationRJServiceProviderPresentationReason::Reserved(code) => code,
        }
    }
}

impl Display for AssociationRJServiceProviderPresentationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion => {
                f.write_str("temporary congestion")
            }
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => {
                f.write_str("local limit exceeded")
            }
            AssociationRJServiceProviderPresentationReason::Reserved(code) => {
                write!(f, "reserved code {}", code)
            }
        }
    }
}

/// A presentation data value (PDV) item of a P-DATA-TF PDU.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

impl PDataValue {
    /// The message control header byte of this PDV.
    ///
    /// Bit 0 is set for command fragments,
    /// bit 1 is set for the last fragment.
    pub fn message_control_header(&self) -> u8 {
        let mut header = 0;
        if self.value_type == PDataValueType::Command {
            header |= 0x01;
        }
        if self.is_last {
            header |= 0x02;
        }
        header
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PDataValueType {
    Command,
    Data,
}

/// Source of an A-ABORT.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQSource {
    ServiceUser,
    ServiceProvider(AbortRQServiceProviderReason),
    Reserved,
}

impl AbortRQSource {
    fn from(source: u8, reason: u8) -> Option<AbortRQSource> {
        use AbortRQServiceProviderReason as Reason;

        let result = match (source, reason) {
            (0, _) => AbortRQSource::ServiceUser,
            (1, _) => AbortRQSource::Reserved,
            (2, 0) => AbortRQSource::ServiceProvider(Reason::ReasonNotSpecified),
            (2, 1) => AbortRQSource::ServiceProvider(Reason::UnrecognizedPdu),
            (2, 2) => AbortRQSource::ServiceProvider(Reason::UnexpectedPdu),
            (2, 3) => AbortRQSource::ServiceProvider(Reason::Reserved),
            (2, 4) => AbortRQSource::ServiceProvider(Reason::UnrecognizedPduParameter),
            (2, 5) => AbortRQSource::ServiceProvider(Reason::UnexpectedPduParameter),
            (2, 6) => AbortRQSource::ServiceProvider(Reason::InvalidPduParameter),
            (_, _) => {
                return None;
            }
        };

        Some(result)
    }

    /// The source and reason codes as written on the wire.
    /// The reason is only significant for provider-initiated aborts.
    pub fn codes(self) -> (u8, u8) {
        match self {
            AbortRQSource::ServiceUser => (0, 0),
            AbortRQSource::Reserved => (1, 0),
            AbortRQSource::ServiceProvider(reason) => (2, reason.code()),
        }
    }
}

impl Display for AbortRQSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortRQSource::ServiceUser => f.write_str("service user"),
            AbortRQSource::ServiceProvider(reason) => write!(f, "service provider: {}", reason),
            AbortRQSource::Reserved => f.write_str("reserved source"),
        }
    }
}

/// An enumeration of supported A-ABORT PDU provider reasons.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQServiceProviderReason {
    /// Reason Not Specified
    ReasonNotSpecified,
    /// Unrecognized PDU
    UnrecognizedPdu,
    /// Unexpected PDU
    UnexpectedPdu,
    /// Reserved
    Reserved,
    /// Unrecognized PDU parameter
    UnrecognizedPduParameter,
    /// Unexpected PDU parameter
    UnexpectedPduParameter,
    /// Invalid PDU parameter
    InvalidPduParameter,
}

impl AbortRQServiceProviderReason {
    fn code(self) -> u8 {
        match self {
            AbortRQServiceProviderReason::ReasonNotSpecified => 0,
            AbortRQServiceProviderReason::UnrecognizedPdu => 1,
            AbortRQServiceProviderReason::UnexpectedPdu => 2,
            AbortRQServiceProviderReason::Reserved => 3,
            AbortRQServiceProviderReason::UnrecognizedPduParameter => 4,
            AbortRQServiceProviderReason::UnexpectedPduParameter => 5,
            AbortRQServiceProviderReason::InvalidPduParameter => 6,
        }
    }
}

impl Display for AbortRQServiceProviderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            AbortRQServiceProviderReason::ReasonNotSpecified => "reason not specified",
            AbortRQServiceProviderReason::UnrecognizedPdu => "unrecognized PDU",
            AbortRQServiceProviderReason::UnexpectedPdu => "unexpected PDU",
            AbortRQServiceProviderReason::Reserved => "reserved code",
            AbortRQServiceProviderReason::UnrecognizedPduParameter => "unrecognized PDU parameter",
            AbortRQServiceProviderReason::UnexpectedPduParameter => "unexpected PDU parameter",
            AbortRQServiceProviderReason::InvalidPduParameter => "invalid PDU parameter",
        };
        f.write_str(msg)
    }
}

/// A variable item of an A-ASSOCIATE-RQ or A-ASSOCIATE-AC.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// A sub-item of the user information item.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum UserVariableItem {
    /// Unrecognized sub-item, kept as opaque bytes
    Unknown(u8, Vec<u8>),
    /// Maximum length received (0x51)
    MaxLength(u32),
    /// Implementation class UID (0x52)
    ImplementationClassUID(String),
    /// SCU/SCP role selection (0x54)
    RoleSelection(RoleSelection),
    /// Implementation version name (0x55)
    ImplementationVersionName(String),
    /// SOP class extended negotiation (0x56)
    SopClassExtendedNegotiationSubItem(String, Vec<u8>),
    /// User identity negotiation request (0x58)
    UserIdentityItem(UserIdentity),
    /// User identity negotiation response (0x59),
    /// holding the server response field
    UserIdentityResponse(Vec<u8>),
}

/// SCU/SCP role selection for one SOP class.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct RoleSelection {
    /// the SOP class UID the roles refer to
    pub sop_class_uid: String,
    /// whether the requestor takes the SCU role
    pub scu_role: bool,
    /// whether the requestor takes the SCP role
    pub scp_role: bool,
}

#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct UserIdentity {
    positive_response_requested: bool,
    identity_type: UserIdentityType,
    primary_field: Vec<u8>,
    secondary_field: Vec<u8>,
}

impl UserIdentity {
    pub fn new(
        positive_response_requested: bool,
        identity_type: UserIdentityType,
        primary_field: Vec<u8>,
        secondary_field: Vec<u8>,
    ) -> Self {
        UserIdentity {
            positive_response_requested,
            identity_type,
            primary_field,
            secondary_field,
        }
    }

    /// Username-only identity.
    pub fn username(username: impl Into<Vec<u8>>) -> Self {
        Self::new(false, UserIdentityType::Username, username.into(), Vec::new())
    }

    /// Username and passcode identity.
    pub fn username_password(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        Self::new(
            false,
            UserIdentityType::UsernamePassword,
            username.into(),
            password.into(),
        )
    }

    pub fn positive_response_requested(&self) -> bool {
        self.positive_response_requested
    }

    pub fn identity_type(&self) -> UserIdentityType {
        self.identity_type
    }

    pub fn primary_field(&self) -> &[u8] {
        &self.primary_field
    }

    pub fn secondary_field(&self) -> &[u8] {
        &self.secondary_field
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
#[non_exhaustive]
pub enum UserIdentityType {
    Username,
    UsernamePassword,
    KerberosServiceTicket,
    SamlAssertion,
    Jwt,
}

impl UserIdentityType {
    fn from(user_identity_type: u8) -> Option<Self> {
        match user_identity_type {
            1 => Some(Self::Username),
            2 => Some(Self::UsernamePassword),
            3 => Some(Self::KerberosServiceTicket),
            4 => Some(Self::SamlAssertion),
            5 => Some(Self::Jwt),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Username => 1,
            Self::UsernamePassword => 2,
            Self::KerberosServiceTicket => 3,
            Self::SamlAssertion => 4,
            Self::Jwt => 5,
        }
    }
}

/// An in-memory representation of a full Protocol Data Unit (PDU).
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Hash)]
pub enum Pdu {
    /// Unrecognized PDU type
    Unknown { pdu_type: u8, data: Vec<u8> },
    /// Association request (A-ASSOCIATE-RQ)
    AssociationRQ(AssociationRQ),
    /// Association acceptance (A-ASSOCIATE-AC)
    AssociationAC(AssociationAC),
    /// Association rejection (A-ASSOCIATE-RJ)
    AssociationRJ(AssociationRJ),
    /// P-Data (P-DATA-TF)
    PData { data: Vec<PDataValue> },
    /// Association release request (A-RELEASE-RQ)
    ReleaseRQ,
    /// Association release reply (A-RELEASE-RP)
    ReleaseRP,
    /// Association abort request (A-ABORT)
    AbortRQ { source: AbortRQSource },
}

impl Pdu {
    /// The PDU type code of this PDU.
    pub fn pdu_type(&self) -> u8 {
        match self {
            Pdu::Unknown { pdu_type, .. } => *pdu_type,
            Pdu::AssociationRQ(_) => PDU_TYPE_ASSOCIATE_RQ,
            Pdu::AssociationAC(_) => PDU_TYPE_ASSOCIATE_AC,
            Pdu::AssociationRJ(_) => PDU_TYPE_ASSOCIATE_RJ,
            Pdu::PData { .. } => PDU_TYPE_PDATA,
            Pdu::ReleaseRQ => PDU_TYPE_RELEASE_RQ,
            Pdu::ReleaseRP => PDU_TYPE_RELEASE_RP,
            Pdu::AbortRQ { .. } => PDU_TYPE_ABORT,
        }
    }

    /// Provide a short description of the PDU.
    pub fn short_description(&self) -> impl std::fmt::Display + '_ {
        PduShortDescription(self)
    }
}

struct PduShortDescription<'a>(&'a Pdu);

impl std::fmt::Display for PduShortDescription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Pdu::Unknown { pdu_type, data } => {
                write!(
                    f,
                    "Unknown {{pdu_type: {}, data: {} bytes }}",
                    pdu_type,
                    data.len()
                )
            }
            Pdu::AssociationRQ(rq) => write!(
                f,
                "AssociationRQ {{ calling: {:?}, called: {:?}, {} presentation contexts }}",
                rq.calling_ae_title,
                rq.called_ae_title,
                rq.presentation_contexts.len()
            ),
            Pdu::AssociationAC(ac) => write!(
                f,
                "AssociationAC {{ {} presentation contexts }}",
                ac.presentation_contexts.len()
            ),
            Pdu::AssociationRJ { .. }
            | Pdu::ReleaseRQ
            | Pdu::ReleaseRP
            | Pdu::AbortRQ { .. } => std::fmt::Debug::fmt(self.0, f),
            Pdu::PData { data } => match data.as_slice() {
                [single] => write!(
                    f,
                    "PData [({:?}, {} bytes)]",
                    single.value_type,
                    single.data.len()
                ),
                [first, second] => write!(
                    f,
                    "PData [({:?}, {} bytes), ({:?}, {} bytes)]",
                    first.value_type,
                    first.data.len(),
                    second.value_type,
                    second.data.len(),
                ),
                _ => write!(f, "PData [{} p-data values]", data.len()),
            },
        }
    }
}

/// An in-memory representation of an association request
#[derive(Debug, Clone, Eq, Hash, PartialEq, PartialOrd)]
pub struct AssociationRQ {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

impl AssociationRQ {
    /// Decode an A-ASSOCIATE-RQ from its full PDU bytes.
    pub fn decode(bytes: &[u8]) -> reader::Result<Self> {
        match reader::decode_pdu_of_type(bytes, PDU_TYPE_ASSOCIATE_RQ)? {
            Pdu::AssociationRQ(rq) => Ok(rq),
            pdu => reader::UnexpectedPduTypeSnafu {
                expected: PDU_TYPE_ASSOCIATE_RQ,
                got: pdu.pdu_type(),
            }
            .fail(),
        }
    }
}

impl From<AssociationRQ> for Pdu {
    fn from(value: AssociationRQ) -> Self {
        Pdu::AssociationRQ(value)
    }
}

/// An in-memory representation of an association acceptance
#[derive(Debug, Clone, Eq, Hash, PartialEq, PartialOrd)]
pub struct AssociationAC {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_variables: Vec<UserVariableItem>,
}

impl AssociationAC {
    /// Decode an A-ASSOCIATE-AC from its full PDU bytes.
    pub fn decode(bytes: &[u8]) -> reader::Result<Self> {
        match reader::decode_pdu_of_type(bytes, PDU_TYPE_ASSOCIATE_AC)? {
            Pdu::AssociationAC(ac) => Ok(ac),
            pdu => reader::UnexpectedPduTypeSnafu {
                expected: PDU_TYPE_ASSOCIATE_AC,
                got: pdu.pdu_type(),
            }
            .fail(),
        }
    }
}

impl From<AssociationAC> for Pdu {
    fn from(value: AssociationAC) -> Self {
        Pdu::AssociationAC(value)
    }
}

/// An in-memory representation of an association rejection.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, PartialOrd)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

impl AssociationRJ {
    /// Decode an A-ASSOCIATE-RJ from its full PDU bytes.
    pub fn decode(bytes: &[u8]) -> reader::Result<Self> {
        match reader::decode_pdu_of_type(bytes, PDU_TYPE_ASSOCIATE_RJ)? {
            Pdu::AssociationRJ(rj) => Ok(rj),
            pdu => reader::UnexpectedPduTypeSnafu {
                expected: PDU_TYPE_ASSOCIATE_RJ,
                got: pdu.pdu_type(),
            }
            .fail(),
        }
    }
}

impl Display for AssociationRJ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.result, self.source)
    }
}

impl From<AssociationRJ> for Pdu {
    fn from(value: AssociationRJ) -> Self {
        Pdu::AssociationRJ(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::pdu::{
        AbortRQServiceProviderReason, AbortRQSource, AssociationRJServiceUserReason,
        AssociationRJSource, PDataValue, PDataValueType,
    };

    use super::Pdu;

    #[test]
    fn pdu_short_description() {
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        };
        assert_eq!(
            &pdu.short_description().to_string(),
            "AbortRQ { source: ServiceUser }",
        );

        let pdu = Pdu::PData {
            data: vec![PDataValue {
                is_last: true,
                presentation_context_id: 3,
                value_type: PDataValueType::Command,
                data: vec![0x01; 72],
            }],
        };
        assert_eq!(
            &pdu.short_description().to_string(),
            "PData [(Command, 72 bytes)]",
        );
    }

    #[test]
    fn message_control_header_bits() {
        let mut pdv = PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: false,
            data: vec![],
        };
        assert_eq!(pdv.message_control_header(), 0x00);
        pdv.is_last = true;
        assert_eq!(pdv.message_control_header(), 0x02);
        pdv.value_type = PDataValueType::Command;
        assert_eq!(pdv.message_control_header(), 0x03);
    }

    #[test]
    fn reject_and_abort_codes_round_trip() {
        let source = AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        );
        assert_eq!(source.codes(), (1, 7));
        assert_eq!(AssociationRJSource::from(1, 7), Some(source));
        assert_eq!(AssociationRJSource::from(1, 11), None);
        assert_eq!(AssociationRJSource::from(4, 1), None);

        let source = AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu);
        assert_eq!(source.codes(), (2, 2));
        assert_eq!(AbortRQSource::from(2, 2), Some(source));
        assert_eq!(AbortRQSource::from(0, 5), Some(AbortRQSource::ServiceUser));
        assert_eq!(AbortRQSource::from(2, 9), None);
    }
}
