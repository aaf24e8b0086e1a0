//! Association acceptor module
//!
//! The module provides an abstraction for a DICOM association
//! in which this application entity listens to incoming association requests.
//! See [`ServerAssociationOptions`]
//! for details and examples on how to create an association.
use std::borrow::Cow;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use snafu::ResultExt;
use tracing::debug;

use crate::context::UlContext;
use crate::pdu::{
    AssociationAC, AssociationRJ, AssociationRJResult, AssociationRJServiceProviderASCEReason,
    AssociationRJServiceUserReason, AssociationRJSource, AssociationRQ, Pdu, UserIdentity,
    UserVariableItem, DEFAULT_MAX_PDU, DICOM_APPLICATION_CONTEXT_NAME,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

use super::established::Association;
use super::fsm::{Action, Event, Role, StateMachine};
use super::negotiation::{
    sanitize_for_accept, to_negotiated, AbstractSyntaxSelection, EchoRoleSelection,
    NegotiationPipeline, RoleSelectionPolicy, TransferSyntaxSelection,
};
use super::uid::trim_uid;
use super::{
    close_transport, receive_pdu, refuse_pdu, write_pdu_to_wire, CloseSocket, InvalidStateSnafu,
    NegotiatedOptions, RejectedSnafu, Result, SocketOptions,
};

#[cfg(feature = "sync-tls")]
pub type TlsStream = rustls::StreamOwned<rustls::ServerConnection, TcpStream>;

/// Common interface for application entity access control policies.
///
/// Existing implementations include [`AcceptAny`] and [`AcceptCalledAeTitle`],
/// but users are free to implement their own.
pub trait AccessControl {
    /// Obtain the decision of whether to accept an incoming association request
    /// based on the recorded application entity titles and/or user identity.
    ///
    /// AE titles are given without their space padding.
    /// Returns `Ok(())` if the requester node should be given clearance.
    /// Otherwise, the reason of the rejection is given.
    fn check_access(
        &self,
        this_ae_title: &str,
        calling_ae_title: &str,
        called_ae_title: &str,
        user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason>;
}

/// An access control rule that accepts any incoming association request.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptAny;

impl AccessControl for AcceptAny {
    fn check_access(
        &self,
        _this_ae_title: &str,
        _calling_ae_title: &str,
        _called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        Ok(())
    }
}

/// An access control rule that only accepts association requests
/// addressed to this node's AE title.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptCalledAeTitle;

impl AccessControl for AcceptCalledAeTitle {
    fn check_access(
        &self,
        this_ae_title: &str,
        _calling_ae_title: &str,
        called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        if this_ae_title.trim() == called_ae_title.trim() {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::CalledAETitleNotRecognized)
        }
    }
}

/// An access control rule that only accepts association requests
/// from a known set of calling AE titles.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct AcceptCallingAeTitles(pub Vec<String>);

impl AccessControl for AcceptCallingAeTitles {
    fn check_access(
        &self,
        _this_ae_title: &str,
        calling_ae_title: &str,
        _called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        if self.0.iter().any(|aet| aet.trim() == calling_ae_title.trim()) {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::CallingAETitleNotRecognized)
        }
    }
}

/// A DICOM association builder for an acceptor DICOM node,
/// often taking the role of a service class provider (SCP).
///
/// This is the standard way of negotiating and establishing
/// an association with a requesting node.
/// The outcome is an [`Association`].
/// Unlike the [`ClientAssociationOptions`](super::ClientAssociationOptions),
/// a value of this type can be reused for multiple connections.
///
/// ## Basic usage
///
/// ### Sequential operation
///
/// Spawn a single thread to listen to incoming requests
/// and handle each association in turn.
///
/// ```no_run
/// # use std::net::TcpListener;
/// # use dicom_ulp::association::server::ServerAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// # let tcp_listener: TcpListener = unimplemented!();
/// let scp_options = ServerAssociationOptions::new()
///    .ae_title("STORE-SCP")
///    .with_abstract_syntax("1.2.840.10008.1.1");
///
/// let (stream, _address) = tcp_listener.accept()?;
/// scp_options.establish(stream)?;
/// # Ok(())
/// # }
/// ```
///
/// The node accepts requests whose called AE title is its own
/// and rejects the others (see [`AcceptCalledAeTitle`]).
/// A different policy can be set with [`ae_access_control`](Self::ae_access_control),
/// or [`accept_any`](Self::accept_any) to admit every request.
///
/// The presentation contexts proposed are negotiated by a [`NegotiationPipeline`]:
/// abstract syntaxes are matched against those registered
/// with [`with_abstract_syntax`](Self::with_abstract_syntax)
/// (or any of them in [`promiscuous`](Self::promiscuous) mode),
/// then a transfer syntax is chosen
/// according to the [transfer syntax policy](Self::transfer_syntax_selection).
#[derive(Debug, Clone)]
pub struct ServerAssociationOptions<'a, A = AcceptCalledAeTitle, R = EchoRoleSelection> {
    /// the application entity access control policy
    ae_access_control: A,
    /// the AE title of this DICOM node
    ae_title: Cow<'a, str>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the presentation context negotiation passes
    negotiation: NegotiationPipeline,
    /// the SCP/SCU role selection policy
    role_selection: R,
    /// the expected protocol version
    protocol_version: u16,
    /// the maximum PDU length
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// Options for the underlying TCP socket
    socket_options: SocketOptions,
    /// the source of association numbers
    context: Option<Arc<UlContext>>,
    /// TLS configuration for the underlying TCP socket
    #[cfg(feature = "sync-tls")]
    tls_config: Option<Arc<rustls::ServerConfig>>,
}

impl Default for ServerAssociationOptions<'_, AcceptCalledAeTitle, EchoRoleSelection> {
    fn default() -> Self {
        ServerAssociationOptions {
            ae_access_control: AcceptCalledAeTitle,
            ae_title: "THIS-SCP".into(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.into(),
            negotiation: NegotiationPipeline::default(),
            role_selection: EchoRoleSelection,
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            socket_options: SocketOptions::default(),
            context: None,
            #[cfg(feature = "sync-tls")]
            tls_config: None,
        }
    }
}

impl ServerAssociationOptions<'_, AcceptCalledAeTitle, EchoRoleSelection> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a, A, R> ServerAssociationOptions<'a, A, R>
where
    A: AccessControl,
    R: RoleSelectionPolicy,
{
    /// Change the access control policy to accept any association
    /// regardless of the specified AE titles.
    pub fn accept_any(self) -> ServerAssociationOptions<'a, AcceptAny, R> {
        self.ae_access_control(AcceptAny)
    }

    /// Change the access control policy to accept an association
    /// if the called AE title matches this node's AE title.
    ///
    /// This is the default.
    pub fn accept_called_ae_title(self) -> ServerAssociationOptions<'a, AcceptCalledAeTitle, R> {
        self.ae_access_control(AcceptCalledAeTitle)
    }

    /// Change the access control policy.
    pub fn ae_access_control<P>(self, access_control: P) -> ServerAssociationOptions<'a, P, R>
    where
        P: AccessControl,
    {
        let ServerAssociationOptions {
            ae_title,
            application_context_name,
            negotiation,
            role_selection,
            protocol_version,
            max_pdu_length,
            strict,
            socket_options,
            context,
            #[cfg(feature = "sync-tls")]
            tls_config,
            ae_access_control: _,
        } = self;

        ServerAssociationOptions {
            ae_access_control: access_control,
            ae_title,
            application_context_name,
            negotiation,
            role_selection,
            protocol_version,
            max_pdu_length,
            strict,
            socket_options,
            context,
            #[cfg(feature = "sync-tls")]
            tls_config,
        }
    }

    /// Change the SCP/SCU role selection policy.
    ///
    /// The default grants every role as requested.
    pub fn role_selection<P>(self, policy: P) -> ServerAssociationOptions<'a, A, P>
    where
        P: RoleSelectionPolicy,
    {
        let ServerAssociationOptions {
            ae_access_control,
            ae_title,
            application_context_name,
            negotiation,
            protocol_version,
            max_pdu_length,
            strict,
            socket_options,
            context,
            #[cfg(feature = "sync-tls")]
            tls_config,
            role_selection: _,
        } = self;

        ServerAssociationOptions {
            ae_access_control,
            ae_title,
            application_context_name,
            negotiation,
            role_selection: policy,
            protocol_version,
            max_pdu_length,
            strict,
            socket_options,
            context,
            #[cfg(feature = "sync-tls")]
            tls_config,
        }
    }

    /// Define the application entity title referring to this DICOM node.
    ///
    /// The default is `THIS-SCP`.
    pub fn ae_title<T>(mut self, ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.ae_title = ae_title.into();
        self
    }

    /// Include this abstract syntax
    /// in the list of abstract syntaxes accepted.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let uid = trim_uid(abstract_syntax_uid.into()).into_owned();
        self.negotiation.abstract_syntax.accepted.push(uid);
        self
    }

    /// Override promiscuous mode:
    /// whether to accept unknown abstract syntaxes.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.negotiation.abstract_syntax.promiscuous = promiscuous;
        self
    }

    /// Replace the abstract syntax selection pass.
    pub fn abstract_syntax_selection(mut self, selection: AbstractSyntaxSelection) -> Self {
        self.negotiation.abstract_syntax = selection;
        self
    }

    /// Replace the transfer syntax selection pass.
    pub fn transfer_syntax_selection(mut self, selection: TransferSyntaxSelection) -> Self {
        self.negotiation.transfer_syntax = selection;
        self
    }

    /// Override whether implicit VR contexts are rejected
    /// when the same abstract syntax was accepted with explicit VR.
    ///
    /// Enabled by default.
    pub fn explicit_vr_dedup(mut self, enabled: bool) -> Self {
        self.negotiation.explicit_vr_dedup = enabled;
        self
    }

    /// Override the maximum expected PDU length.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the read timeout for the underlying TCP socket
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.read_timeout = Some(timeout);
        self
    }

    /// Set the write timeout for the underlying TCP socket
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.write_timeout = Some(timeout);
        self
    }

    /// Use the given context for numbering associations
    /// instead of the global one.
    pub fn context(mut self, context: Arc<UlContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the TLS configuration for the underlying TCP socket
    #[cfg(feature = "sync-tls")]
    pub fn tls_config(mut self, config: impl Into<Arc<rustls::ServerConfig>>) -> Self {
        self.tls_config = Some(config.into());
        self
    }

    /// The negotiation pipeline applied to proposed presentation contexts.
    pub fn negotiation(&self) -> &NegotiationPipeline {
        &self.negotiation
    }

    /// Negotiate an association with the given TCP stream.
    pub fn establish(&self, socket: TcpStream) -> Result<Association<TcpStream>> {
        self.socket_options.apply(&socket)?;
        self.establish_impl(socket)
    }

    /// Negotiate an association with the given TCP stream,
    /// after a TLS handshake.
    #[cfg(feature = "sync-tls")]
    pub fn establish_tls(&self, socket: TcpStream) -> Result<Association<TlsStream>> {
        use snafu::OptionExt;

        let tls_config = self
            .tls_config
            .clone()
            .context(super::TlsConfigMissingSnafu)?;
        self.socket_options.apply(&socket)?;
        let conn = rustls::ServerConnection::new(tls_config).context(super::TlsConnectionSnafu)?;
        self.establish_impl(rustls::StreamOwned::new(conn, socket))
    }

    fn establish_impl<S>(&self, mut socket: S) -> Result<Association<S>>
    where
        S: Read + Write + CloseSocket,
    {
        let mut fsm = StateMachine::new(Role::Acceptor);
        fsm.handle(Event::TransportConnectIndication)
            .context(InvalidStateSnafu)?;

        let pdu = receive_pdu(&mut socket, &mut fsm, self.max_pdu_length, self.strict)?;
        debug!("Received {}", pdu.short_description());
        let action = fsm
            .handle(Event::from_pdu(&pdu))
            .context(InvalidStateSnafu)?;
        let rq = match (action, pdu) {
            (Action::Ae6, Pdu::AssociationRQ(rq)) => rq,
            (action, pdu) => return Err(refuse_pdu(&mut socket, &mut fsm, action, pdu)),
        };

        match self.process_request(rq) {
            Ok((ac, negotiated)) => {
                fsm.handle(Event::AssociateAccept)
                    .context(InvalidStateSnafu)?;
                debug!("Sending {}", ac.short_description());
                if let Err(e) = write_pdu_to_wire(&mut socket, &ac) {
                    close_transport(&mut socket, &mut fsm);
                    return Err(e);
                }
                Ok(Association::new(
                    socket,
                    fsm,
                    negotiated,
                    self.max_pdu_length,
                    self.strict,
                    self.context.clone().unwrap_or_else(UlContext::global),
                ))
            }
            Err(association_rj) => {
                fsm.handle(Event::AssociateReject)
                    .context(InvalidStateSnafu)?;
                debug!("Rejecting association: {}", association_rj);
                let sent = write_pdu_to_wire(&mut socket, &Pdu::AssociationRJ(association_rj));
                close_transport(&mut socket, &mut fsm);
                sent?;
                RejectedSnafu { association_rj }.fail()
            }
        }
    }

    /// Decide on an association request,
    /// producing either the A-ASSOCIATE-AC to send
    /// or the reason of the rejection.
    fn process_request(
        &self,
        rq: AssociationRQ,
    ) -> std::result::Result<(Pdu, NegotiatedOptions), AssociationRJ> {
        let AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        } = rq;

        if protocol_version != self.protocol_version {
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceProviderASCE(
                    AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported,
                ),
            });
        }

        if trim_uid(Cow::from(application_context_name.as_str()))
            != self.application_context_name
        {
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
                ),
            });
        }

        let user_identity = user_variables.iter().find_map(|item| match item {
            UserVariableItem::UserIdentityItem(user_identity) => Some(user_identity),
            _ => None,
        });
        self.ae_access_control
            .check_access(
                &self.ae_title,
                &calling_ae_title,
                &called_ae_title,
                user_identity,
            )
            .map_err(|reason| AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(reason),
            })?;

        let contexts = self.negotiation.negotiate(presentation_contexts);

        let requested_roles: Vec<_> = user_variables
            .iter()
            .filter_map(|item| match item {
                UserVariableItem::RoleSelection(role) => Some(role.clone()),
                _ => None,
            })
            .collect();

        let mut response_variables = vec![
            UserVariableItem::MaxLength(self.max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ];
        response_variables.extend(
            self.role_selection
                .select(&requested_roles)
                .into_iter()
                .map(UserVariableItem::RoleSelection),
        );
        if user_identity.is_some_and(|identity| identity.positive_response_requested()) {
            response_variables.push(UserVariableItem::UserIdentityResponse(Vec::new()));
        }

        let peer_max_pdu_length = user_variables
            .iter()
            .find_map(|item| match item {
                UserVariableItem::MaxLength(len) => Some(*len),
                _ => None,
            })
            .unwrap_or(DEFAULT_MAX_PDU);

        let ac = Pdu::AssociationAC(AssociationAC {
            protocol_version: self.protocol_version,
            calling_ae_title: calling_ae_title.clone(),
            called_ae_title,
            application_context_name: self.application_context_name.to_string(),
            presentation_contexts: sanitize_for_accept(&contexts),
            user_variables: response_variables,
        });

        Ok((
            ac,
            NegotiatedOptions {
                local_ae_title: self.ae_title.to_string(),
                peer_ae_title: calling_ae_title,
                peer_max_pdu_length,
                user_variables,
                presentation_contexts: to_negotiated(&contexts),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{
        PresentationContextProposed, PresentationContextResultReason, RoleSelection,
    };
    use dicom_dictionary_std::uids::{IMPLICIT_VR_LITTLE_ENDIAN, VERIFICATION};
    use matches::assert_matches;

    fn request(called_ae_title: &str) -> AssociationRQ {
        AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "B".to_string(),
            called_ae_title: called_ae_title.to_string(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: vec![PresentationContextProposed {
                id: 1,
                abstract_syntax: VERIFICATION.to_string(),
                transfer_syntaxes: vec![IMPLICIT_VR_LITTLE_ENDIAN.to_string()],
            }],
            user_variables: vec![UserVariableItem::MaxLength(32_768)],
        }
    }

    #[test]
    fn accepts_verification() {
        let options = ServerAssociationOptions::new()
            .ae_title("A")
            .with_abstract_syntax(VERIFICATION);
        let (ac, negotiated) = options.process_request(request("A")).unwrap();

        let Pdu::AssociationAC(ac) = ac else {
            panic!("expected A-ASSOCIATE-AC, got {:?}", ac);
        };
        assert_eq!(ac.presentation_contexts.len(), 1);
        let pc = &ac.presentation_contexts[0];
        assert_eq!(pc.id, 1);
        assert_eq!(pc.reason, PresentationContextResultReason::Acceptance);
        assert_eq!(pc.transfer_syntax, IMPLICIT_VR_LITTLE_ENDIAN);
        assert!(ac
            .user_variables
            .contains(&UserVariableItem::MaxLength(DEFAULT_MAX_PDU)));

        assert_eq!(negotiated.peer_ae_title, "B");
        assert_eq!(negotiated.peer_max_pdu_length, 32_768);
        assert_eq!(negotiated.presentation_contexts[0].abstract_syntax, VERIFICATION);
    }

    #[test]
    fn rejects_unknown_called_ae_title() {
        let options = ServerAssociationOptions::new()
            .ae_title("A")
            .with_abstract_syntax(VERIFICATION);
        let rj = options.process_request(request("C")).unwrap_err();
        assert_eq!(rj.result, AssociationRJResult::Permanent);
        assert_eq!(
            rj.source,
            AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CalledAETitleNotRecognized
            )
        );
        assert_eq!(rj.source.codes(), (1, 7));

        // unless any called AE title is admitted
        let options = options.accept_any();
        assert!(options.process_request(request("C")).is_ok());
    }

    #[test]
    fn rejects_other_protocol_versions() {
        let options = ServerAssociationOptions::new().ae_title("A");
        let mut rq = request("A");
        rq.protocol_version = 2;
        assert_matches!(
            options.process_request(rq),
            Err(AssociationRJ {
                source: AssociationRJSource::ServiceProviderASCE(
                    AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported
                ),
                ..
            })
        );
    }

    #[test]
    fn rejects_other_application_contexts() {
        let options = ServerAssociationOptions::new().ae_title("A");
        let mut rq = request("A");
        rq.application_context_name = "1.2.3.4".to_string();
        assert_matches!(
            options.process_request(rq),
            Err(AssociationRJ {
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::ApplicationContextNameNotSupported
                ),
                ..
            })
        );
    }

    #[test]
    fn calling_ae_title_allow_list() {
        let options = ServerAssociationOptions::new()
            .ae_title("A")
            .with_abstract_syntax(VERIFICATION)
            .ae_access_control(AcceptCallingAeTitles(vec!["B".to_string()]));
        assert!(options.process_request(request("A")).is_ok());

        let mut rq = request("A");
        rq.calling_ae_title = "INTRUDER".to_string();
        assert_matches!(
            options.process_request(rq),
            Err(AssociationRJ {
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::CallingAETitleNotRecognized
                ),
                ..
            })
        );
    }

    #[test]
    fn unknown_abstract_syntax_is_not_fatal() {
        let options = ServerAssociationOptions::new().ae_title("A");
        let (ac, _) = options.process_request(request("A")).unwrap();
        let Pdu::AssociationAC(ac) = ac else {
            panic!("expected A-ASSOCIATE-AC");
        };
        assert_eq!(
            ac.presentation_contexts[0].reason,
            PresentationContextResultReason::AbstractSyntaxNotSupported
        );
        assert_eq!(
            ac.presentation_contexts[0].transfer_syntax,
            IMPLICIT_VR_LITTLE_ENDIAN
        );
    }

    #[test]
    fn role_selection_and_user_identity_response() {
        let role = RoleSelection {
            sop_class_uid: VERIFICATION.to_string(),
            scu_role: true,
            scp_role: true,
        };
        let mut rq = request("A");
        rq.user_variables.push(UserVariableItem::RoleSelection(role.clone()));
        rq.user_variables.push(UserVariableItem::UserIdentityItem(UserIdentity::new(
            true,
            crate::pdu::UserIdentityType::Username,
            b"ALICE".to_vec(),
            Vec::new(),
        )));

        let options = ServerAssociationOptions::new()
            .ae_title("A")
            .with_abstract_syntax(VERIFICATION);
        let (ac, _) = options.process_request(rq.clone()).unwrap();
        let Pdu::AssociationAC(ac) = ac else {
            panic!("expected A-ASSOCIATE-AC");
        };
        assert!(ac
            .user_variables
            .contains(&UserVariableItem::RoleSelection(role.clone())));
        assert!(ac
            .user_variables
            .contains(&UserVariableItem::UserIdentityResponse(Vec::new())));

        let options = options.role_selection(crate::association::negotiation::ScuOnlyRoleSelection);
        let (ac, _) = options.process_request(rq).unwrap();
        let Pdu::AssociationAC(ac) = ac else {
            panic!("expected A-ASSOCIATE-AC");
        };
        assert!(ac
            .user_variables
            .contains(&UserVariableItem::RoleSelection(RoleSelection {
                scp_role: false,
                ..role
            })));
    }
}
