//! DICOM association module
//!
//! This module contains utilities for establishing associations
//! between DICOM nodes via TCP/IP.
//!
//! As an association requester, often as a service class user (SCU),
//! a new association can be started
//! via the [`ClientAssociationOptions`][1] type.
//! The minimum required properties are the accepted abstract syntaxes
//! and the TCP socket address to the target node.
//!
//! As an association acceptor,
//! usually taking the role of a service class provider (SCP),
//! a newly created [TCP stream][2] can be passed to
//! a previously prepared [`ServerAssociationOptions`][3].
//!
//! Either way, the outcome is an established [`Association`],
//! driven by the protocol [state machine](fsm).
//!
//! [1]: crate::association::client::ClientAssociationOptions
//! [2]: std::net::TcpStream
//! [3]: crate::association::server::ServerAssociationOptions
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use snafu::{Backtrace, ResultExt, Snafu};
use tracing::warn;

use crate::pdu::{
    decode_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource, AssociationRJ, Pdu,
    PduLengthLimit, PresentationContextNegotiated, UserVariableItem, PDU_HEADER_SIZE,
};

pub mod client;
pub mod established;
pub mod fsm;
pub mod negotiation;
pub mod pdata;
pub mod reassembly;
pub mod server;

pub(crate) mod uid;

pub use client::ClientAssociationOptions;
pub use established::Association;
pub use fsm::{Role, State};
pub use negotiation::{NegotiationPipeline, TransferSyntaxSelection};
pub use pdata::PDataWriter;
pub use reassembly::{DataSetHandler, PDataAssembler, ReceivedUnit};
pub use server::{
    AcceptAny, AcceptCalledAeTitle, AcceptCallingAeTitles, AccessControl, ServerAssociationOptions,
};

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax { backtrace: Backtrace },

    /// could not connect to the peer
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("AE title `{}` is not in the directory", ae_title))]
    UnknownAeTitle {
        ae_title: String,
        backtrace: Backtrace,
    },

    /// could not set the socket read timeout
    SetReadTimeout {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// could not set the socket write timeout
    SetWriteTimeout {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// TLS configuration is missing
    #[cfg(feature = "sync-tls")]
    TlsConfigMissing { backtrace: Backtrace },

    /// TLS server name is missing
    #[cfg(feature = "sync-tls")]
    TlsServerNameMissing { backtrace: Backtrace },

    /// invalid TLS server name
    #[cfg(feature = "sync-tls")]
    InvalidServerName {
        source: rustls::pki_types::InvalidDnsNameError,
        backtrace: Backtrace,
    },

    /// could not set up the TLS connection
    #[cfg(feature = "sync-tls")]
    TlsConnection {
        source: rustls::Error,
        backtrace: Backtrace,
    },

    /// failed to encode PDU message
    SendPdu {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to send PDU message on wire
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the remote application entity",
        length
    ))]
    SendTooLongPdu { length: usize, backtrace: Backtrace },

    #[snafu(display("PDU {} cannot be sent by the user", pdu.short_description()))]
    UnsupportedSend { pdu: Box<Pdu>, backtrace: Backtrace },

    /// could not prepare the P-Data writer
    PData {
        #[snafu(backtrace)]
        source: pdata::Error,
    },

    #[snafu(display("presentation context {} was not accepted", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    /// received a malformed PDU
    MalformedPdu {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    /// incoming PDU exceeds the maximum length
    ReceiveTooLongPdu {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    /// invalid local maximum PDU length
    InvalidMaxPdu {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    /// transport failure (A-P-ABORT)
    TransportAbort {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("protocol version mismatch: expected {}, got {}", expected, got))]
    ProtocolVersionMismatch {
        expected: u16,
        got: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("association rejected: {}", association_rj))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    #[snafu(display("association aborted: {}", source))]
    Aborted {
        #[snafu(source(false))]
        source: AbortRQSource,
        backtrace: Backtrace,
    },

    #[snafu(display("cannot propose {} presentation contexts (maximum is 128)", count))]
    TooManyPresentationContexts { count: usize, backtrace: Backtrace },

    /// no presentation contexts accepted by the peer
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display("unexpected PDU `{}`", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("unknown PDU `{}`", pdu.short_description()))]
    UnknownPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    /// the peer violated the P-Data protocol
    ProtocolViolation {
        #[snafu(backtrace)]
        source: reassembly::Error,
    },

    /// could not encode the command
    EncodeCommand {
        source: crate::command::Error,
    },

    /// could not decode a received unit
    DecodeUnit {
        #[snafu(backtrace)]
        source: reassembly::Error,
    },

    /// operation not admitted in the current association state
    InvalidState {
        #[snafu(backtrace)]
        source: fsm::InvalidTransition,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Something that arrived on an established association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A complete command or data set
    Unit(ReceivedUnit),
    /// The peer asked to release the association.
    ///
    /// The association is then waiting for
    /// [`respond_release`](Association::respond_release).
    ReleaseRequested,
}

/// Socket configuration for associations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Timeout for individual read operations
    pub read_timeout: Option<Duration>,
    /// Timeout for individual write operations
    pub write_timeout: Option<Duration>,
    /// Timeout for connection establishment
    pub connection_timeout: Option<Duration>,
}

impl SocketOptions {
    pub(crate) fn apply(&self, socket: &TcpStream) -> Result<()> {
        socket
            .set_read_timeout(self.read_timeout)
            .context(SetReadTimeoutSnafu)?;
        socket
            .set_write_timeout(self.write_timeout)
            .context(SetWriteTimeoutSnafu)
    }
}

/// A transport which can be shut down in both directions.
pub trait CloseSocket {
    fn close(&mut self) -> std::io::Result<()>;
}

impl CloseSocket for TcpStream {
    fn close(&mut self) -> std::io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(feature = "sync-tls")]
impl CloseSocket for rustls::StreamOwned<rustls::ClientConnection, TcpStream> {
    fn close(&mut self) -> std::io::Result<()> {
        self.conn.send_close_notify();
        self.flush()?;
        self.sock.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(feature = "sync-tls")]
impl CloseSocket for rustls::StreamOwned<rustls::ServerConnection, TcpStream> {
    fn close(&mut self) -> std::io::Result<()> {
        self.conn.send_close_notify();
        self.flush()?;
        self.sock.shutdown(std::net::Shutdown::Both)
    }
}

/// What both sides know once the association is negotiated.
#[derive(Debug)]
pub(crate) struct NegotiatedOptions {
    pub local_ae_title: String,
    pub peer_ae_title: String,
    pub peer_max_pdu_length: u32,
    pub user_variables: Vec<UserVariableItem>,
    pub presentation_contexts: Vec<PresentationContextNegotiated>,
}

/// Read one whole PDU from the transport.
///
/// I/O failures become [`Error::TransportAbort`],
/// while decoding failures become [`Error::MalformedPdu`].
pub(crate) fn read_pdu_from_wire<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    let limit = PduLengthLimit::new(max_pdu_length, strict).context(InvalidMaxPduSnafu)?;

    let mut bytes = vec![0; PDU_HEADER_SIZE as usize];
    reader.read_exact(&mut bytes).context(TransportAbortSnafu)?;
    let length = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    limit.check(length).context(ReceiveTooLongPduSnafu)?;

    bytes.resize(PDU_HEADER_SIZE as usize + length as usize, 0);
    reader
        .read_exact(&mut bytes[PDU_HEADER_SIZE as usize..])
        .context(TransportAbortSnafu)?;
    decode_pdu(&bytes).context(MalformedPduSnafu)
}

/// Encode a PDU and write it to the transport in one go.
pub(crate) fn write_pdu_to_wire<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    let mut buffer = Vec::new();
    write_pdu(&mut buffer, pdu).context(SendPduSnafu)?;
    writer.write_all(&buffer).context(WireSendSnafu)?;
    writer.flush().context(WireSendSnafu)
}

/// Close the transport and let the state machine know.
pub(crate) fn close_transport<S>(socket: &mut S, fsm: &mut fsm::StateMachine)
where
    S: CloseSocket,
{
    if let Err(e) = socket.close() {
        if e.kind() != ErrorKind::NotConnected {
            warn!("Could not close the transport: {}", e);
        }
    }
    if fsm.state() != State::Idle {
        let _ = fsm.handle(fsm::Event::TransportClosed);
    }
}

/// Send the A-ABORT demanded by `action` (if any), then close the transport.
pub(crate) fn abort_transport<S>(
    socket: &mut S,
    fsm: &mut fsm::StateMachine,
    action: fsm::Action,
    reason: AbortRQServiceProviderReason,
) where
    S: Write + CloseSocket,
{
    let source = match action {
        fsm::Action::Aa1 | fsm::Action::Aa7 => Some(AbortRQSource::ServiceUser),
        fsm::Action::Aa8 => Some(AbortRQSource::ServiceProvider(reason)),
        _ => None,
    };
    if let Some(source) = source {
        if let Err(e) = write_pdu_to_wire(socket, &Pdu::AbortRQ { source }) {
            warn!("Could not send A-ABORT: {}", e);
        }
    }
    close_transport(socket, fsm);
}

/// Abort the association on behalf of the local user.
pub(crate) fn abort_association<S>(socket: &mut S, fsm: &mut fsm::StateMachine)
where
    S: Write + CloseSocket,
{
    match fsm.handle(fsm::Event::AbortRequest) {
        Ok(action) => abort_transport(
            socket,
            fsm,
            action,
            AbortRQServiceProviderReason::ReasonNotSpecified,
        ),
        Err(_) => close_transport(socket, fsm),
    }
}

/// Terminate the association after a PDU which the state machine
/// did not admit in the current state,
/// producing the error to report.
pub(crate) fn refuse_pdu<S>(
    socket: &mut S,
    fsm: &mut fsm::StateMachine,
    action: fsm::Action,
    pdu: Pdu,
) -> Error
where
    S: Write + CloseSocket,
{
    match pdu {
        Pdu::AbortRQ { source } => {
            close_transport(socket, fsm);
            AbortedSnafu { source }.build()
        }
        pdu @ Pdu::Unknown { .. } => {
            abort_transport(
                socket,
                fsm,
                action,
                AbortRQServiceProviderReason::UnrecognizedPdu,
            );
            UnknownPduSnafu { pdu: Box::new(pdu) }.build()
        }
        pdu => {
            abort_transport(
                socket,
                fsm,
                action,
                AbortRQServiceProviderReason::UnexpectedPdu,
            );
            UnexpectedPduSnafu { pdu: Box::new(pdu) }.build()
        }
    }
}

/// Receive the next PDU,
/// tearing the association down on transport or decoding failures.
pub(crate) fn receive_pdu<S>(
    socket: &mut S,
    fsm: &mut fsm::StateMachine,
    max_pdu_length: u32,
    strict: bool,
) -> Result<Pdu>
where
    S: Read + Write + CloseSocket,
{
    match read_pdu_from_wire(socket, max_pdu_length, strict) {
        Ok(pdu) => Ok(pdu),
        Err(e @ Error::TransportAbort { .. }) => {
            close_transport(socket, fsm);
            Err(e)
        }
        Err(e) => {
            match fsm.handle(fsm::Event::InvalidPduReceived) {
                Ok(action) => abort_transport(
                    socket,
                    fsm,
                    action,
                    AbortRQServiceProviderReason::InvalidPduParameter,
                ),
                Err(_) => close_transport(socket, fsm),
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{PDataValue, PDataValueType};
    use matches::assert_matches;

    #[test]
    fn reads_whole_pdus_in_sequence() {
        let bytes = [
            // A-RELEASE-RQ
            0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00,
            // P-DATA-TF with a single 2 byte PDV
            0x04, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x04, 0x01, 0x02, 0xAA, 0xBB,
        ];
        let mut reader = &bytes[..];
        assert_eq!(
            read_pdu_from_wire(&mut reader, 16_384, true).unwrap(),
            Pdu::ReleaseRQ
        );
        assert_eq!(
            read_pdu_from_wire(&mut reader, 16_384, true).unwrap(),
            Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data: vec![0xAA, 0xBB],
                }]
            }
        );
        assert_matches!(
            read_pdu_from_wire(&mut reader, 16_384, true),
            Err(Error::TransportAbort { .. })
        );
    }

    #[test]
    fn truncated_pdu_is_a_transport_failure() {
        let bytes = [0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00];
        assert_matches!(
            read_pdu_from_wire(&mut &bytes[..], 16_384, true),
            Err(Error::TransportAbort { .. })
        );
    }

    #[test]
    fn garbled_pdu_is_malformed() {
        // A-ABORT with a 3 byte body
        let bytes = [0x07, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];
        assert_matches!(
            read_pdu_from_wire(&mut &bytes[..], 16_384, true),
            Err(Error::MalformedPdu { .. })
        );
    }

    #[test]
    fn oversized_pdu_in_strict_mode() {
        let bytes = [0x04, 0x00, 0x00, 0x01, 0x00, 0x00];
        assert_matches!(
            read_pdu_from_wire(&mut &bytes[..], 16_384, true),
            Err(Error::ReceiveTooLongPdu {
                source: crate::pdu::reader::Error::PduTooLarge {
                    pdu_length: 65_536,
                    max_pdu_length: 16_384,
                    ..
                },
            })
        );
    }

    #[test]
    fn wire_and_stream_readers_share_limits() {
        // tolerated up to the largest PDU size when not strict
        let mut bytes = vec![0x07, 0x00];
        bytes.extend(20_000_u32.to_be_bytes());
        bytes.extend(vec![0; 20_000]);
        assert_matches!(
            read_pdu_from_wire(&mut &bytes[..], 16_384, false),
            Err(Error::MalformedPdu { .. })
        );
        assert_matches!(
            crate::pdu::read_pdu(&mut &bytes[..], 16_384, false),
            Err(crate::pdu::reader::Error::InvalidPduLength {
                pdu_type: 0x07,
                length: 20_000,
                ..
            })
        );

        // 0 means no local limit for both
        let release = [0x05, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            read_pdu_from_wire(&mut &release[..], 0, true).unwrap(),
            Pdu::ReleaseRQ
        );
        assert_eq!(
            crate::pdu::read_pdu(&mut &release[..], 0, true).unwrap(),
            Pdu::ReleaseRQ
        );

        // and anything else below the minimum is refused by both
        assert_matches!(
            read_pdu_from_wire(&mut &release[..], 100, true),
            Err(Error::InvalidMaxPdu { .. })
        );
        assert_matches!(
            crate::pdu::read_pdu(&mut &release[..], 100, true),
            Err(crate::pdu::reader::Error::InvalidMaxPdu { .. })
        );
    }
}
