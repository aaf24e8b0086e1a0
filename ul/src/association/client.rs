//! Association requester module
//!
//! The module provides the means to request a DICOM association
//! from another application entity.
//! See [`ClientAssociationOptions`]
//! for details and examples on how to create an association.
use std::borrow::Cow;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use snafu::{ensure, OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::address::AeAddr;
use crate::context::UlContext;
use crate::directory::AeDirectory;
use crate::pdu::{
    AssociationAC, AssociationRQ, Pdu, PresentationContextNegotiated,
    PresentationContextProposed, RoleSelection, UserIdentity, UserVariableItem, DEFAULT_MAX_PDU,
    DICOM_APPLICATION_CONTEXT_NAME, MAXIMUM_PDU_SIZE,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

use super::established::Association;
use super::fsm::{Action, Event, Role, StateMachine};
use super::uid::trim_uid;
use super::{
    abort_association, close_transport, receive_pdu, refuse_pdu, write_pdu_to_wire, CloseSocket,
    ConnectSnafu, InvalidStateSnafu, MissingAbstractSyntaxSnafu, NegotiatedOptions,
    NoAcceptedPresentationContextsSnafu, ProtocolVersionMismatchSnafu, RejectedSnafu, Result,
    SocketOptions, TooManyPresentationContextsSnafu, UnknownAeTitleSnafu,
};

#[cfg(feature = "sync-tls")]
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A DICOM association builder for a requesting node.
/// The final outcome is an [`Association`].
///
/// This is the standard way of requesting and establishing
/// an association with another DICOM node,
/// that one usually taking the role of a service class provider (SCP).
///
/// # Example
///
/// ```no_run
/// # use dicom_ulp::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///    .with_presentation_context("1.2.840.10008.1.1", vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"])
///    .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
///
/// At least one presentation context must be specified,
/// using the method [`with_presentation_context`](Self::with_presentation_context)
/// and supplying both an abstract syntax and list of transfer syntaxes.
/// Presentation context identifiers are assigned in order:
/// 1, 3, 5 and so on.
///
/// A helper method [`with_abstract_syntax`](Self::with_abstract_syntax) will
/// include by default the transfer syntaxes
/// _Explicit VR Little Endian_ and _Implicit VR Little Endian_
/// in the resulting presentation context.
///
/// ```no_run
/// # use dicom_ulp::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .establish_with("STORE-SCP@129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientAssociationOptions<'a> {
    /// the calling AE title
    calling_ae_title: Cow<'a, str>,
    /// the called AE title
    called_ae_title: Option<Cow<'a, str>>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the list of requested presentation contexts
    presentation_contexts: Vec<(Cow<'a, str>, Vec<Cow<'a, str>>)>,
    /// the expected protocol version
    protocol_version: u16,
    /// the maximum PDU length requested for receiving PDUs
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// the user identity to negotiate, if any
    user_identity: Option<UserIdentity>,
    /// proposed SCU/SCP roles
    role_selection: Vec<RoleSelection>,
    /// Options for the underlying TCP socket
    socket_options: SocketOptions,
    /// the source of association numbers
    context: Option<Arc<UlContext>>,
    /// TLS configuration for the underlying TCP socket
    #[cfg(feature = "sync-tls")]
    tls_config: Option<Arc<rustls::ClientConfig>>,
    /// the server name to verify the TLS certificate against
    #[cfg(feature = "sync-tls")]
    server_name: Option<String>,
}

impl Default for ClientAssociationOptions<'_> {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: None,
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.into(),
            presentation_contexts: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            user_identity: None,
            role_selection: Vec::new(),
            socket_options: SocketOptions::default(),
            context: None,
            #[cfg(feature = "sync-tls")]
            tls_config: None,
            #[cfg(feature = "sync-tls")]
            server_name: None,
        }
    }
}

impl<'a> ClientAssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the association,
    /// which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the association,
    /// which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`,
    /// unless the address passed to
    /// [`establish_with`](Self::establish_with) contains one.
    /// Passing an empty string resets the AE title to the default.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let called_ae_title = called_ae_title.into();
        self.called_ae_title = Some(called_ae_title).filter(|aet| !aet.is_empty());
        self
    }

    /// Include this presentation context
    /// in the list of proposed presentation contexts.
    pub fn with_presentation_context<T>(
        mut self,
        abstract_syntax_uid: T,
        transfer_syntax_uids: Vec<T>,
    ) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let transfer_syntaxes = transfer_syntax_uids
            .into_iter()
            .map(|uid| trim_uid(uid.into()))
            .collect();
        self.presentation_contexts
            .push((trim_uid(abstract_syntax_uid.into()), transfer_syntaxes));
        self
    }

    /// Helper to add this abstract syntax
    /// with the default transfer syntaxes
    /// to the list of proposed presentation contexts.
    pub fn with_abstract_syntax<T>(self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.with_presentation_context(
            abstract_syntax_uid.into(),
            vec![
                dicom_dictionary_std::uids::EXPLICIT_VR_LITTLE_ENDIAN.into(),
                dicom_dictionary_std::uids::IMPLICIT_VR_LITTLE_ENDIAN.into(),
            ],
        )
    }

    /// Override the maximum PDU length
    /// that this application entity will admit.
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

    /// Negotiate a user identity with the acceptor.
    pub fn user_identity(mut self, user_identity: UserIdentity) -> Self {
        self.user_identity = Some(user_identity);
        self
    }

    /// Negotiate a user identity made of a user name.
    pub fn username(self, username: impl Into<Vec<u8>>) -> Self {
        self.user_identity(UserIdentity::username(username))
    }

    /// Negotiate a user identity made of a user name and a password.
    pub fn username_password(
        self,
        username: impl Into<Vec<u8>>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.user_identity(UserIdentity::username_password(username, password))
    }

    /// Propose the roles this node can take for the given SOP class.
    pub fn with_role_selection(
        mut self,
        sop_class_uid: impl Into<String>,
        scu_role: bool,
        scp_role: bool,
    ) -> Self {
        self.role_selection.push(RoleSelection {
            sop_class_uid: sop_class_uid.into(),
            scu_role,
            scp_role,
        });
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

    /// Set the timeout for connecting to the other node
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.connection_timeout = Some(timeout);
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
    pub fn tls_config(mut self, config: impl Into<Arc<rustls::ClientConfig>>) -> Self {
        self.tls_config = Some(config.into());
        self
    }

    /// Set the name which the server certificate must be valid for
    #[cfg(feature = "sync-tls")]
    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association,
    /// negotiating the presentation contexts in the process.
    pub fn establish<A: ToSocketAddrs>(self, address: A) -> Result<Association<TcpStream>> {
        self.establish_impl(AeAddr::new_socket_addr(address))
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association,
    /// negotiating the presentation contexts in the process.
    ///
    /// This method allows you to specify the called AE title
    /// alongside with the socket address,
    /// as in `STORE-SCP@10.0.0.100:104`.
    /// The AE title in this parameter
    /// is overridden by any `called_ae_title` option
    /// previously received.
    pub fn establish_with(self, ae_address: &str) -> Result<Association<TcpStream>> {
        match ae_address.parse::<AeAddr<String>>() {
            Ok(ae_address) => self.establish_impl(ae_address),
            Err(_) => self.establish_impl(AeAddr::new_socket_addr(ae_address)),
        }
    }

    /// Request a new DICOM association with the application entity
    /// of the given AE title,
    /// its network address looked up in the given directory.
    pub fn establish_via<D>(self, directory: &D, ae_title: &str) -> Result<Association<TcpStream>>
    where
        D: AeDirectory + ?Sized,
    {
        let entry = directory
            .lookup(ae_title)
            .context(UnknownAeTitleSnafu { ae_title })?;
        debug!("{} found at {}", entry.ae_title, entry.socket_addr());
        self.establish_impl(AeAddr::new(entry.ae_title.clone(), entry.socket_addr()))
    }

    fn establish_impl<T>(self, ae_address: AeAddr<T>) -> Result<Association<TcpStream>>
    where
        T: ToSocketAddrs,
    {
        self.check_presentation_contexts()?;
        let called_ae_title = self.choose_called_ae_title(ae_address.ae_title());
        let mut fsm = StateMachine::new(Role::Requestor);
        fsm.handle(Event::AssociateRequest)
            .context(InvalidStateSnafu)?;
        let socket = self.connect(ae_address)?;
        self.negotiate(socket, fsm, called_ae_title)
    }

    /// Initiate a TLS connection to the given address
    /// and request a new DICOM association.
    #[cfg(feature = "sync-tls")]
    pub fn establish_tls<A: ToSocketAddrs>(self, address: A) -> Result<Association<TlsStream>> {
        self.establish_tls_impl(AeAddr::new_socket_addr(address))
    }

    /// Initiate a TLS connection to the given AE address
    /// and request a new DICOM association.
    #[cfg(feature = "sync-tls")]
    pub fn establish_with_tls(self, ae_address: &str) -> Result<Association<TlsStream>> {
        match ae_address.parse::<AeAddr<String>>() {
            Ok(ae_address) => self.establish_tls_impl(ae_address),
            Err(_) => self.establish_tls_impl(AeAddr::new_socket_addr(ae_address)),
        }
    }

    #[cfg(feature = "sync-tls")]
    fn establish_tls_impl<T>(self, ae_address: AeAddr<T>) -> Result<Association<TlsStream>>
    where
        T: ToSocketAddrs,
    {
        self.check_presentation_contexts()?;
        let tls_config = self
            .tls_config
            .clone()
            .context(super::TlsConfigMissingSnafu)?;
        let server_name = self
            .server_name
            .clone()
            .context(super::TlsServerNameMissingSnafu)?;
        let server_name = rustls::pki_types::ServerName::try_from(server_name)
            .context(super::InvalidServerNameSnafu)?;
        let called_ae_title = self.choose_called_ae_title(ae_address.ae_title());

        let mut fsm = StateMachine::new(Role::Requestor);
        fsm.handle(Event::AssociateRequest)
            .context(InvalidStateSnafu)?;
        let socket = self.connect(ae_address)?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .context(super::TlsConnectionSnafu)?;
        self.negotiate(rustls::StreamOwned::new(conn, socket), fsm, called_ae_title)
    }

    /// Fail if no presentation contexts were provided:
    /// they represent intent, and should not be omitted by the user.
    fn check_presentation_contexts(&self) -> Result<()> {
        ensure!(
            !self.presentation_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );
        ensure!(
            self.presentation_contexts.len() <= 128,
            TooManyPresentationContextsSnafu {
                count: self.presentation_contexts.len()
            }
        );
        Ok(())
    }

    fn choose_called_ae_title(&self, address_ae_title: Option<&str>) -> String {
        match (&self.called_ae_title, address_ae_title) {
            (Some(aec), Some(_)) => {
                warn!(
                    "Option `called_ae_title` overrides the AE title to `{}`",
                    aec
                );
                aec.to_string()
            }
            (Some(aec), None) => aec.to_string(),
            (None, Some(aec)) => aec.to_string(),
            (None, None) => "ANY-SCP".to_string(),
        }
    }

    fn connect<A: ToSocketAddrs>(&self, address: A) -> Result<TcpStream> {
        let socket = match self.socket_options.connection_timeout {
            None => TcpStream::connect(address).context(ConnectSnafu)?,
            Some(timeout) => {
                let mut last_error = None;
                let mut socket = None;
                for addr in address.to_socket_addrs().context(ConnectSnafu)? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(s) => {
                            socket = Some(s);
                            break;
                        }
                        Err(e) => last_error = Some(e),
                    }
                }
                match socket {
                    Some(socket) => socket,
                    None => {
                        let e = last_error.unwrap_or_else(|| {
                            std::io::Error::new(
                                ErrorKind::AddrNotAvailable,
                                "address resolved to nothing",
                            )
                        });
                        return Err(e).context(ConnectSnafu);
                    }
                }
            }
        };
        self.socket_options.apply(&socket)?;
        Ok(socket)
    }

    /// Send the association request on a freshly opened transport
    /// and process the response.
    fn negotiate<S>(
        self,
        mut socket: S,
        mut fsm: StateMachine,
        called_ae_title: String,
    ) -> Result<Association<S>>
    where
        S: Read + Write + CloseSocket,
    {
        let ClientAssociationOptions {
            calling_ae_title,
            application_context_name,
            presentation_contexts,
            protocol_version,
            max_pdu_length,
            strict,
            user_identity,
            role_selection,
            context,
            ..
        } = self;

        let presentation_contexts: Vec<_> = presentation_contexts
            .into_iter()
            .enumerate()
            .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                id: (2 * i + 1) as u8,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntaxes: transfer_syntaxes.iter().map(|uid| uid.to_string()).collect(),
            })
            .collect();
        let abstract_syntaxes: Vec<(u8, String)> = presentation_contexts
            .iter()
            .map(|pc| (pc.id, pc.abstract_syntax.clone()))
            .collect();

        let mut user_variables = vec![
            UserVariableItem::MaxLength(max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ];
        user_variables.extend(role_selection.into_iter().map(UserVariableItem::RoleSelection));
        user_variables.extend(user_identity.map(UserVariableItem::UserIdentityItem));

        let request = Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title: calling_ae_title.to_string(),
            called_ae_title: called_ae_title.clone(),
            application_context_name: application_context_name.to_string(),
            presentation_contexts,
            user_variables,
        });

        fsm.handle(Event::TransportConnectConfirm)
            .context(InvalidStateSnafu)?;
        debug!("Sending {}", request.short_description());
        if let Err(e) = write_pdu_to_wire(&mut socket, &request) {
            close_transport(&mut socket, &mut fsm);
            return Err(e);
        }

        let response = receive_pdu(&mut socket, &mut fsm, MAXIMUM_PDU_SIZE, strict)?;
        debug!("Received {}", response.short_description());
        let action = fsm
            .handle(Event::from_pdu(&response))
            .context(InvalidStateSnafu)?;
        let ac = match (action, response) {
            (Action::Ae3, Pdu::AssociationAC(ac)) => ac,
            (Action::Ae4, Pdu::AssociationRJ(association_rj)) => {
                close_transport(&mut socket, &mut fsm);
                return RejectedSnafu { association_rj }.fail();
            }
            (action, pdu) => return Err(refuse_pdu(&mut socket, &mut fsm, action, pdu)),
        };

        let AssociationAC {
            protocol_version: protocol_version_scp,
            presentation_contexts: results,
            user_variables,
            ..
        } = ac;

        if protocol_version != protocol_version_scp {
            abort_association(&mut socket, &mut fsm);
            return ProtocolVersionMismatchSnafu {
                expected: protocol_version,
                got: protocol_version_scp,
            }
            .fail();
        }

        let presentation_contexts: Vec<_> = results
            .into_iter()
            .filter_map(|pc| {
                let Some((_, abstract_syntax)) =
                    abstract_syntaxes.iter().find(|(id, _)| *id == pc.id)
                else {
                    warn!("Ignoring result for unknown presentation context {}", pc.id);
                    return None;
                };
                Some(PresentationContextNegotiated {
                    id: pc.id,
                    reason: pc.reason,
                    abstract_syntax: abstract_syntax.clone(),
                    transfer_syntax: trim_uid(pc.transfer_syntax.into()).into_owned(),
                })
            })
            .collect();

        if !presentation_contexts.iter().any(|pc| pc.is_accepted()) {
            abort_association(&mut socket, &mut fsm);
            return NoAcceptedPresentationContextsSnafu.fail();
        }

        let peer_max_pdu_length = user_variables
            .iter()
            .find_map(|item| match item {
                UserVariableItem::MaxLength(len) => Some(*len),
                _ => None,
            })
            .unwrap_or(DEFAULT_MAX_PDU);

        Ok(Association::new(
            socket,
            fsm,
            NegotiatedOptions {
                local_ae_title: calling_ae_title.to_string(),
                peer_ae_title: called_ae_title,
                peer_max_pdu_length,
                user_variables,
                presentation_contexts,
            },
            max_pdu_length,
            strict,
            context.unwrap_or_else(UlContext::global),
        ))
    }
}
