//! Established associations.
//!
//! An [`Association`] is the outcome of a successful negotiation,
//! whether this node requested it
//! ([`ClientAssociationOptions`](super::ClientAssociationOptions))
//! or accepted it
//! ([`ServerAssociationOptions`](super::ServerAssociationOptions)).
//! Every operation is checked against the protocol state machine,
//! so that a release or abort exchange
//! cannot be interleaved with data transfer by mistake.
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use snafu::{ensure, OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::command::CommandMessage;
use crate::context::UlContext;
use crate::pdu::{
    write_pdu, AbortRQSource, PDataValue, PDataValueType, Pdu, PresentationContextNegotiated,
    UserVariableItem, PDU_HEADER_SIZE,
};

use super::fsm::{Action, Event, Role, State, StateMachine};
use super::pdata::PDataWriter;
use super::reassembly::{DataSetHandler, PDataAssembler};
use super::{
    abort_association, close_transport, receive_pdu, refuse_pdu, CloseSocket, DecodeUnitSnafu,
    EncodeCommandSnafu, Incoming, InvalidStateSnafu, NegotiatedOptions, PDataSnafu,
    ProtocolViolationSnafu, Result, SendPduSnafu, SendTooLongPduSnafu,
    UnknownPresentationContextSnafu, UnsupportedSendSnafu, WireSendSnafu,
};

/// A DICOM upper layer association in the data transfer phase.
///
/// Messages are sent with [`send_message`](Self::send_message)
/// or, more generally,
/// through a P-Data writer (see [`send_pdata`](Self::send_pdata)).
/// Incoming commands and data sets are reassembled by
/// [`receive_unit`](Self::receive_unit).
///
/// When the value falls out of scope,
/// a requestor tries to gracefully release the association,
/// while an acceptor aborts it.
/// The underlying connection is shut down in both cases.
#[derive(Debug)]
pub struct Association<S>
where
    S: Read + Write + CloseSocket,
{
    /// The stream to the other DICOM node
    socket: S,
    /// The protocol state machine
    fsm: StateMachine,
    /// Process-wide number of this association
    association_number: u32,
    /// The AE title of this node
    local_ae_title: String,
    /// The AE title of the other node
    peer_ae_title: String,
    /// The outcome of the presentation context negotiation
    presentation_contexts: Vec<PresentationContextNegotiated>,
    /// The maximum PDU length that this node is expecting to receive
    local_max_pdu_length: u32,
    /// The maximum PDU length that the other node admits
    peer_max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// User variables received from the peer
    user_variables: Vec<UserVariableItem>,
    /// Incoming fragments of commands and data sets
    assembler: PDataAssembler,
    /// PDVs received but not yet fed to the assembler
    pending: VecDeque<PDataValue>,
    /// Reusable buffer for outgoing PDUs
    write_buffer: Vec<u8>,
    context: Arc<UlContext>,
}

impl<S> Association<S>
where
    S: Read + Write + CloseSocket,
{
    pub(crate) fn new(
        socket: S,
        fsm: StateMachine,
        negotiated: NegotiatedOptions,
        local_max_pdu_length: u32,
        strict: bool,
        context: Arc<UlContext>,
    ) -> Self {
        let association_number = context.next_association_number();
        let NegotiatedOptions {
            local_ae_title,
            peer_ae_title,
            peer_max_pdu_length,
            user_variables,
            presentation_contexts,
        } = negotiated;
        debug!(
            "Association #{} established with {} ({:?}), {} presentation contexts",
            association_number,
            peer_ae_title,
            fsm.role(),
            presentation_contexts.len()
        );
        for pc in &presentation_contexts {
            debug!(
                "  [{}] {} | {} | {}",
                pc.id, pc.reason, pc.abstract_syntax, pc.transfer_syntax
            );
        }
        Association {
            socket,
            fsm,
            association_number,
            local_ae_title,
            peer_ae_title,
            presentation_contexts,
            local_max_pdu_length,
            peer_max_pdu_length,
            strict,
            user_variables,
            assembler: PDataAssembler::new(),
            pending: VecDeque::new(),
            write_buffer: Vec::new(),
            context,
        }
    }

    /// Obtain a view of the negotiated presentation contexts,
    /// including the rejected ones.
    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    /// Look up an accepted presentation context by its identifier.
    pub fn accepted_presentation_context(&self, id: u8) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts
            .iter()
            .find(|pc| pc.id == id && pc.is_accepted())
    }

    /// The process-wide number of this association.
    pub fn association_number(&self) -> u32 {
        self.association_number
    }

    /// Whether this node requested or accepted the association.
    pub fn role(&self) -> Role {
        self.fsm.role()
    }

    /// The current protocol state.
    pub fn state(&self) -> State {
        self.fsm.state()
    }

    /// The application entity title of this node.
    pub fn local_ae_title(&self) -> &str {
        &self.local_ae_title
    }

    /// The application entity title of the other node.
    pub fn peer_ae_title(&self) -> &str {
        &self.peer_ae_title
    }

    /// Retrieve the maximum PDU length
    /// that this node is expecting to receive.
    pub fn local_max_pdu_length(&self) -> u32 {
        self.local_max_pdu_length
    }

    /// Retrieve the maximum PDU length
    /// admitted by the other node (0 if unlimited).
    pub fn peer_max_pdu_length(&self) -> u32 {
        self.peer_max_pdu_length
    }

    /// The user information sub-items sent by the other node.
    pub fn user_variables(&self) -> &[UserVariableItem] {
        &self.user_variables
    }

    /// The context which numbered this association.
    pub fn context(&self) -> &Arc<UlContext> {
        &self.context
    }

    /// Obtain access to the inner stream.
    ///
    /// **Note:** reading and writing should be done with care
    /// to avoid inconsistencies in the association state.
    pub fn inner_stream(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Send a PDU message to the other node.
    ///
    /// Only P-DATA-TF, A-RELEASE-RQ, A-RELEASE-RP and A-ABORT
    /// can be sent, each in the states where the protocol admits them.
    pub fn send(&mut self, pdu: &Pdu) -> Result<()> {
        let event = match pdu {
            Pdu::PData { .. } => Event::PDataRequest,
            Pdu::ReleaseRQ => Event::ReleaseRequest,
            Pdu::ReleaseRP => Event::ReleaseResponse,
            Pdu::AbortRQ { .. } => Event::AbortRequest,
            pdu => {
                return UnsupportedSendSnafu {
                    pdu: Box::new(pdu.clone()),
                }
                .fail()
            }
        };
        self.fsm.handle(event).context(InvalidStateSnafu)?;
        self.write_pdu(pdu)
    }

    fn write_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        self.write_buffer.clear();
        write_pdu(&mut self.write_buffer, pdu).context(SendPduSnafu)?;
        if self.peer_max_pdu_length != 0 {
            ensure!(
                self.write_buffer.len()
                    <= (self.peer_max_pdu_length + PDU_HEADER_SIZE) as usize,
                SendTooLongPduSnafu {
                    length: self.write_buffer.len(),
                }
            );
        }
        self.socket
            .write_all(&self.write_buffer)
            .context(WireSendSnafu)?;
        self.socket.flush().context(WireSendSnafu)
    }

    /// Prepare a P-Data writer for sending
    /// a data set on the given presentation context.
    ///
    /// Returns a writer which automatically
    /// splits the inner data into separate PDUs if necessary.
    pub fn send_pdata(&mut self, presentation_context_id: u8) -> Result<PDataWriter<&mut S>> {
        self.pdata_writer(presentation_context_id, PDataValueType::Data)
    }

    fn pdata_writer(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
    ) -> Result<PDataWriter<&mut S>> {
        self.accepted_presentation_context(presentation_context_id)
            .context(UnknownPresentationContextSnafu {
                id: presentation_context_id,
            })?;
        self.fsm
            .handle(Event::PDataRequest)
            .context(InvalidStateSnafu)?;
        PDataWriter::new(
            &mut self.socket,
            presentation_context_id,
            value_type,
            self.peer_max_pdu_length,
        )
        .context(PDataSnafu)
    }

    /// Send a full message:
    /// the encoded command, followed by the data set if there is one.
    ///
    /// The data set must already be encoded
    /// in the transfer syntax of the presentation context.
    pub fn send_message(
        &mut self,
        presentation_context_id: u8,
        command: &[u8],
        data: Option<&mut dyn Read>,
    ) -> Result<()> {
        let mut writer = self.pdata_writer(presentation_context_id, PDataValueType::Command)?;
        writer.write_all(command).context(WireSendSnafu)?;
        writer.close().context(WireSendSnafu)?;

        if let Some(data) = data {
            let mut writer = self.pdata_writer(presentation_context_id, PDataValueType::Data)?;
            std::io::copy(data, &mut writer).context(WireSendSnafu)?;
            writer.close().context(WireSendSnafu)?;
        }
        Ok(())
    }

    /// Encode and send a command,
    /// followed by its data set if `data` is given.
    pub fn send_command(
        &mut self,
        presentation_context_id: u8,
        command: &CommandMessage,
        data: Option<&mut dyn Read>,
    ) -> Result<()> {
        let bytes = command.encode().context(EncodeCommandSnafu)?;
        debug!(
            "Sending {:?} on presentation context {}",
            command.command_field(),
            presentation_context_id
        );
        self.send_message(presentation_context_id, &bytes, data)
    }

    /// Take a fresh message ID for a request.
    pub fn next_message_id(&self) -> u16 {
        self.context.next_message_id()
    }

    /// Receive the next complete command or data set.
    ///
    /// Data set fragments are a protocol violation
    /// unless `allow_data` is true,
    /// which the caller decides from the last command received.
    /// A release request from the peer is reported
    /// as [`Incoming::ReleaseRequested`].
    /// An abort from the peer or any protocol failure
    /// ends the association with an error.
    pub fn receive_unit(&mut self, allow_data: bool) -> Result<Incoming> {
        loop {
            while let Some(pdv) = self.pending.pop_front() {
                match self.assembler.push(pdv, allow_data) {
                    Ok(Some(unit)) => return Ok(Incoming::Unit(unit)),
                    Ok(None) => {}
                    Err(e) => {
                        self.pending.clear();
                        self.abort_locally();
                        return Err(e).context(ProtocolViolationSnafu);
                    }
                }
            }

            let pdu = self.receive_pdu()?;
            let action = self
                .fsm
                .handle(Event::from_pdu(&pdu))
                .context(InvalidStateSnafu)?;
            match (action, pdu) {
                (Action::Dt2, Pdu::PData { data }) => self.pending.extend(data),
                (Action::Ar2, _) => return Ok(Incoming::ReleaseRequested),
                (action, pdu) => {
                    return Err(refuse_pdu(&mut self.socket, &mut self.fsm, action, pdu))
                }
            }
        }
    }

    /// Receive the next complete command or data set
    /// and hand it over decoded to the given handler.
    ///
    /// Data sets are decoded in the transfer syntax
    /// of their presentation context.
    pub fn receive_with<H>(&mut self, allow_data: bool, handler: &mut H) -> Result<Incoming>
    where
        H: DataSetHandler + ?Sized,
    {
        let incoming = self.receive_unit(allow_data)?;
        if let Incoming::Unit(unit) = &incoming {
            let ts = self
                .accepted_presentation_context(unit.presentation_context_id)
                .context(UnknownPresentationContextSnafu {
                    id: unit.presentation_context_id,
                })?
                .transfer_syntax
                .clone();
            let object = unit.decode(&ts).context(DecodeUnitSnafu)?;
            handler.handle(unit.presentation_context_id, unit.value_type, object);
        }
        Ok(incoming)
    }

    fn receive_pdu(&mut self) -> Result<Pdu> {
        receive_pdu(
            &mut self.socket,
            &mut self.fsm,
            self.local_max_pdu_length,
            self.strict,
        )
    }

    /// Gracefully terminate the association by exchanging release messages
    /// and then shutting down the connection.
    pub fn release(mut self) -> Result<()> {
        let out = self.release_impl();
        close_transport(&mut self.socket, &mut self.fsm);
        out
    }

    fn release_impl(&mut self) -> Result<()> {
        self.send(&Pdu::ReleaseRQ)?;
        loop {
            let pdu = self.receive_pdu()?;
            let action = self
                .fsm
                .handle(Event::from_pdu(&pdu))
                .context(InvalidStateSnafu)?;
            match action {
                // data still in flight from the peer
                Action::Ar6 => warn!("Ignoring P-Data received while awaiting release"),
                Action::Ar3 => return Ok(()),
                // release collision, requestor side answers first
                Action::Ar8 if self.fsm.role() == Role::Requestor => {
                    debug!("Release collision");
                    self.send(&Pdu::ReleaseRP)?;
                }
                Action::Ar8 => debug!("Release collision"),
                // release collision, acceptor side answers last
                Action::Ar10 => {
                    self.send(&Pdu::ReleaseRP)?;
                    return Ok(());
                }
                action => {
                    return Err(refuse_pdu(&mut self.socket, &mut self.fsm, action, pdu));
                }
            }
        }
    }

    /// Confirm the release requested by the peer
    /// and shut down the connection.
    pub fn respond_release(mut self) -> Result<()> {
        let out = self.send(&Pdu::ReleaseRP);
        close_transport(&mut self.socket, &mut self.fsm);
        out
    }

    /// Send an abort message and shut down the connection,
    /// terminating the association.
    pub fn abort(mut self) -> Result<()> {
        let out = self.send(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        });
        close_transport(&mut self.socket, &mut self.fsm);
        out
    }

    fn abort_locally(&mut self) {
        abort_association(&mut self.socket, &mut self.fsm);
    }
}

/// Release (requestor) or abort (acceptor) an association still in use,
/// then shut down the connection.
impl<S> Drop for Association<S>
where
    S: Read + Write + CloseSocket,
{
    fn drop(&mut self) {
        if self.fsm.state() == State::Idle {
            return;
        }
        if self.fsm.state() == State::DataTransfer && self.fsm.role() == Role::Requestor {
            if let Err(e) = self.release_impl() {
                debug!("Could not release association on drop: {}", e);
            }
        } else if self.fsm.state() == State::AwaitingLocalReleaseResponse {
            let _ = self.send(&Pdu::ReleaseRP);
        } else {
            self.abort_locally();
        }
        close_transport(&mut self.socket, &mut self.fsm);
    }
}
