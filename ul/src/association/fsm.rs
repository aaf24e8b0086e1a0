//! The upper layer protocol state machine.
//!
//! States, events and actions follow the state transition table
//! of DICOM PS3.8, section 9.2.
//! The ARTIM timer is not implemented:
//! its events never occur and starting or stopping it has no effect.
use snafu::{Backtrace, Snafu};
use std::fmt;

use crate::pdu::Pdu;

/// Which end of the association this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// the node which requested the association
    Requestor,
    /// the node which accepted the association
    Acceptor,
}

/// A state of the upper layer protocol machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Sta1: idle
    Idle,
    /// Sta2: transport connection open, awaiting A-ASSOCIATE-RQ
    AwaitingAssociateRq,
    /// Sta3: awaiting local A-ASSOCIATE response primitive
    AwaitingLocalAssociateResponse,
    /// Sta4: awaiting transport connection opening to complete
    AwaitingTransportOpen,
    /// Sta5: awaiting A-ASSOCIATE-AC or A-ASSOCIATE-RJ
    AwaitingAssociateResponse,
    /// Sta6: association established, ready for data transfer
    DataTransfer,
    /// Sta7: awaiting A-RELEASE-RP
    AwaitingReleaseRp,
    /// Sta8: awaiting local A-RELEASE response primitive
    AwaitingLocalReleaseResponse,
    /// Sta9: release collision requestor side,
    /// awaiting local A-RELEASE response primitive
    CollisionRequestorAwaitingLocalResponse,
    /// Sta10: release collision acceptor side, awaiting A-RELEASE-RP
    CollisionAcceptorAwaitingReleaseRp,
    /// Sta11: release collision requestor side, awaiting A-RELEASE-RP
    CollisionRequestorAwaitingReleaseRp,
    /// Sta12: release collision acceptor side,
    /// awaiting local A-RELEASE response primitive
    CollisionAcceptorAwaitingLocalResponse,
    /// Sta13: awaiting transport connection close
    AwaitingTransportClose,
}

impl State {
    /// The state number in the standard's table.
    pub fn number(self) -> u8 {
        match self {
            State::Idle => 1,
            State::AwaitingAssociateRq => 2,
            State::AwaitingLocalAssociateResponse => 3,
            State::AwaitingTransportOpen => 4,
            State::AwaitingAssociateResponse => 5,
            State::DataTransfer => 6,
            State::AwaitingReleaseRp => 7,
            State::AwaitingLocalReleaseResponse => 8,
            State::CollisionRequestorAwaitingLocalResponse => 9,
            State::CollisionAcceptorAwaitingReleaseRp => 10,
            State::CollisionRequestorAwaitingReleaseRp => 11,
            State::CollisionAcceptorAwaitingLocalResponse => 12,
            State::AwaitingTransportClose => 13,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sta{}", self.number())
    }
}

/// An event of the upper layer protocol machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// E1: A-ASSOCIATE request primitive
    AssociateRequest,
    /// E2: transport connect confirmation
    TransportConnectConfirm,
    /// E3: A-ASSOCIATE-AC PDU received
    AssociateAcReceived,
    /// E4: A-ASSOCIATE-RJ PDU received
    AssociateRjReceived,
    /// E5: transport connection indication
    TransportConnectIndication,
    /// E6: A-ASSOCIATE-RQ PDU received
    AssociateRqReceived,
    /// E7: A-ASSOCIATE response primitive (accept)
    AssociateAccept,
    /// E8: A-ASSOCIATE response primitive (reject)
    AssociateReject,
    /// E9: P-DATA request primitive
    PDataRequest,
    /// E10: P-DATA-TF PDU received
    PDataReceived,
    /// E11: A-RELEASE request primitive
    ReleaseRequest,
    /// E12: A-RELEASE-RQ PDU received
    ReleaseRqReceived,
    /// E13: A-RELEASE-RP PDU received
    ReleaseRpReceived,
    /// E14: A-RELEASE response primitive
    ReleaseResponse,
    /// E15: A-ABORT request primitive
    AbortRequest,
    /// E16: A-ABORT PDU received
    AbortReceived,
    /// E17: transport connection closed indication
    TransportClosed,
    /// E18: ARTIM timer expired
    ArtimExpired,
    /// E19: unrecognized or invalid PDU received
    InvalidPduReceived,
}

impl Event {
    /// The event triggered by receiving the given PDU.
    pub fn from_pdu(pdu: &Pdu) -> Event {
        match pdu {
            Pdu::AssociationRQ(_) => Event::AssociateRqReceived,
            Pdu::AssociationAC(_) => Event::AssociateAcReceived,
            Pdu::AssociationRJ(_) => Event::AssociateRjReceived,
            Pdu::PData { .. } => Event::PDataReceived,
            Pdu::ReleaseRQ => Event::ReleaseRqReceived,
            Pdu::ReleaseRP => Event::ReleaseRpReceived,
            Pdu::AbortRQ { .. } => Event::AbortReceived,
            Pdu::Unknown { .. } => Event::InvalidPduReceived,
        }
    }

    /// The event number in the standard's table.
    pub fn number(self) -> u8 {
        self as u8 + 1
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.number())
    }
}

/// An action of the upper layer protocol machine.
///
/// Performing the action is up to the caller:
/// the state machine only records the resulting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// AE-1: issue transport connect request
    Ae1,
    /// AE-2: send A-ASSOCIATE-RQ
    Ae2,
    /// AE-3: issue A-ASSOCIATE confirmation (accept)
    Ae3,
    /// AE-4: issue A-ASSOCIATE confirmation (reject), close transport
    Ae4,
    /// AE-5: issue transport connection response
    Ae5,
    /// AE-6: issue A-ASSOCIATE indication
    Ae6,
    /// AE-7: send A-ASSOCIATE-AC
    Ae7,
    /// AE-8: send A-ASSOCIATE-RJ
    Ae8,
    /// DT-1: send P-DATA-TF
    Dt1,
    /// DT-2: issue P-DATA indication
    Dt2,
    /// AR-1: send A-RELEASE-RQ
    Ar1,
    /// AR-2: issue A-RELEASE indication
    Ar2,
    /// AR-3: issue A-RELEASE confirmation, close transport
    Ar3,
    /// AR-4: send A-RELEASE-RP
    Ar4,
    /// AR-5: transport closed after release
    Ar5,
    /// AR-6: issue P-DATA indication while awaiting A-RELEASE-RP
    Ar6,
    /// AR-7: send P-DATA-TF while awaiting local release response
    Ar7,
    /// AR-8: issue A-RELEASE indication (release collision)
    Ar8,
    /// AR-9: send A-RELEASE-RP (release collision requestor)
    Ar9,
    /// AR-10: issue A-RELEASE confirmation (release collision acceptor)
    Ar10,
    /// AA-1: send A-ABORT (service user source)
    Aa1,
    /// AA-2: close transport
    Aa2,
    /// AA-3: issue A-ABORT or A-P-ABORT indication, close transport
    Aa3,
    /// AA-4: issue A-P-ABORT indication
    Aa4,
    /// AA-5: transport closed before association
    Aa5,
    /// AA-6: ignore PDU
    Aa6,
    /// AA-7: send A-ABORT
    Aa7,
    /// AA-8: send A-ABORT (service provider source),
    /// issue A-P-ABORT indication
    Aa8,
}

impl Action {
    /// The state reached after performing this action.
    fn next_state(self, role: Role) -> State {
        match self {
            Action::Ae1 => State::AwaitingTransportOpen,
            Action::Ae2 => State::AwaitingAssociateResponse,
            Action::Ae3 | Action::Ae7 | Action::Dt1 | Action::Dt2 => State::DataTransfer,
            Action::Ae4 | Action::Ar3 | Action::Ar5 => State::Idle,
            Action::Ae5 => State::AwaitingAssociateRq,
            Action::Ae6 => State::AwaitingLocalAssociateResponse,
            Action::Ae8 | Action::Ar4 => State::AwaitingTransportClose,
            Action::Ar1 | Action::Ar6 => State::AwaitingReleaseRp,
            Action::Ar2 | Action::Ar7 => State::AwaitingLocalReleaseResponse,
            Action::Ar8 => match role {
                Role::Requestor => State::CollisionRequestorAwaitingLocalResponse,
                Role::Acceptor => State::CollisionAcceptorAwaitingReleaseRp,
            },
            Action::Ar9 => State::CollisionRequestorAwaitingReleaseRp,
            Action::Ar10 => State::CollisionAcceptorAwaitingLocalResponse,
            Action::Aa1 | Action::Aa6 | Action::Aa7 | Action::Aa8 => {
                State::AwaitingTransportClose
            }
            Action::Aa2 | Action::Aa3 | Action::Aa4 | Action::Aa5 => State::Idle,
        }
    }
}

/// An event which is not admitted in the current state.
#[derive(Debug, Snafu)]
#[snafu(display("event {} is not valid in state {}", event, state))]
pub struct InvalidTransition {
    pub state: State,
    pub event: Event,
    backtrace: Backtrace,
}

/// Look up the action for an event in a state.
fn transition(state: State, event: Event) -> Option<Action> {
    use Action::*;
    use Event::*;
    use State::*;

    let action = match (event, state) {
        (AssociateRequest, Idle) => Ae1,
        (TransportConnectConfirm, AwaitingTransportOpen) => Ae2,
        (TransportConnectIndication, Idle) => Ae5,
        (AssociateAccept, AwaitingLocalAssociateResponse) => Ae7,
        (AssociateReject, AwaitingLocalAssociateResponse) => Ae8,

        (AssociateAcReceived, AwaitingAssociateResponse) => Ae3,
        (AssociateRjReceived, AwaitingAssociateResponse) => Ae4,
        (AssociateRqReceived, AwaitingAssociateRq) => Ae6,
        (PDataReceived, DataTransfer) => Dt2,
        (PDataReceived, AwaitingReleaseRp) => Ar6,
        (ReleaseRqReceived, DataTransfer) => Ar2,
        (ReleaseRqReceived, AwaitingReleaseRp) => Ar8,
        (ReleaseRpReceived, AwaitingReleaseRp) => Ar3,
        (ReleaseRpReceived, CollisionAcceptorAwaitingReleaseRp) => Ar10,
        (ReleaseRpReceived, CollisionRequestorAwaitingReleaseRp) => Ar3,

        (PDataRequest, DataTransfer) => Dt1,
        (PDataRequest, AwaitingLocalReleaseResponse) => Ar7,
        (ReleaseRequest, DataTransfer) => Ar1,
        (ReleaseResponse, AwaitingLocalReleaseResponse) => Ar4,
        (ReleaseResponse, CollisionRequestorAwaitingLocalResponse) => Ar9,
        (ReleaseResponse, CollisionAcceptorAwaitingLocalResponse) => Ar4,

        // any PDU before the association request is answered with an abort
        (
            AssociateAcReceived | AssociateRjReceived | PDataReceived | ReleaseRqReceived
            | ReleaseRpReceived | InvalidPduReceived,
            AwaitingAssociateRq,
        ) => Aa1,
        // PDUs are ignored while waiting for the transport to close,
        // except for a new association request
        (
            AssociateAcReceived | AssociateRjReceived | PDataReceived | ReleaseRqReceived
            | ReleaseRpReceived,
            AwaitingTransportClose,
        ) => Aa6,
        (AssociateRqReceived | InvalidPduReceived, AwaitingTransportClose) => Aa7,
        // any other PDU is unexpected
        (
            AssociateAcReceived | AssociateRjReceived | AssociateRqReceived | PDataReceived
            | ReleaseRqReceived | ReleaseRpReceived | InvalidPduReceived,
            AwaitingLocalAssociateResponse
            | AwaitingAssociateResponse
            | DataTransfer
            | AwaitingReleaseRp
            | AwaitingLocalReleaseResponse
            | CollisionRequestorAwaitingLocalResponse
            | CollisionAcceptorAwaitingReleaseRp
            | CollisionRequestorAwaitingReleaseRp
            | CollisionAcceptorAwaitingLocalResponse,
        ) => Aa8,

        (AbortRequest, AwaitingTransportOpen) => Aa2,
        (
            AbortRequest,
            AwaitingLocalAssociateResponse
            | AwaitingAssociateResponse
            | DataTransfer
            | AwaitingReleaseRp
            | AwaitingLocalReleaseResponse
            | CollisionRequestorAwaitingLocalResponse
            | CollisionAcceptorAwaitingReleaseRp
            | CollisionRequestorAwaitingReleaseRp
            | CollisionAcceptorAwaitingLocalResponse,
        ) => Aa1,

        (AbortReceived, AwaitingAssociateRq | AwaitingTransportClose) => Aa2,
        (
            AbortReceived,
            AwaitingLocalAssociateResponse
            | AwaitingAssociateResponse
            | DataTransfer
            | AwaitingReleaseRp
            | AwaitingLocalReleaseResponse
            | CollisionRequestorAwaitingLocalResponse
            | CollisionAcceptorAwaitingReleaseRp
            | CollisionRequestorAwaitingReleaseRp
            | CollisionAcceptorAwaitingLocalResponse,
        ) => Aa3,

        (TransportClosed, AwaitingAssociateRq) => Aa5,
        (TransportClosed, AwaitingTransportClose) => Ar5,
        (
            TransportClosed,
            AwaitingLocalAssociateResponse
            | AwaitingTransportOpen
            | AwaitingAssociateResponse
            | DataTransfer
            | AwaitingReleaseRp
            | AwaitingLocalReleaseResponse
            | CollisionRequestorAwaitingLocalResponse
            | CollisionAcceptorAwaitingReleaseRp
            | CollisionRequestorAwaitingReleaseRp
            | CollisionAcceptorAwaitingLocalResponse,
        ) => Aa4,

        (ArtimExpired, AwaitingAssociateRq | AwaitingTransportClose) => Aa2,

        _ => return None,
    };
    Some(action)
}

/// The state of one association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: State,
    role: Role,
}

impl StateMachine {
    /// Create a state machine in the idle state.
    pub fn new(role: Role) -> Self {
        StateMachine {
            state: State::Idle,
            role,
        }
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// This node's role in the association.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Process an event,
    /// returning the action to perform.
    ///
    /// The state is left untouched if the event is not valid.
    pub fn handle(&mut self, event: Event) -> Result<Action, InvalidTransition> {
        let action = transition(self.state, event).ok_or_else(|| {
            InvalidTransitionSnafu {
                state: self.state,
                event,
            }
            .build()
        })?;
        let next = action.next_state(self.role);
        tracing::debug!("{} + {} -> {:?} -> {}", self.state, event, action, next);
        self.state = next;
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn machine_in(role: Role, events: &[Event]) -> StateMachine {
        let mut fsm = StateMachine::new(role);
        for event in events {
            fsm.handle(*event).unwrap();
        }
        fsm
    }

    #[test]
    fn requestor_happy_path() {
        let mut fsm = StateMachine::new(Role::Requestor);
        assert_eq!(fsm.handle(Event::AssociateRequest).unwrap(), Action::Ae1);
        assert_eq!(fsm.handle(Event::TransportConnectConfirm).unwrap(), Action::Ae2);
        assert_eq!(fsm.state(), State::AwaitingAssociateResponse);
        assert_eq!(fsm.handle(Event::AssociateAcReceived).unwrap(), Action::Ae3);
        assert_eq!(fsm.state(), State::DataTransfer);
        assert_eq!(fsm.handle(Event::PDataRequest).unwrap(), Action::Dt1);
        assert_eq!(fsm.handle(Event::PDataReceived).unwrap(), Action::Dt2);
        assert_eq!(fsm.handle(Event::ReleaseRequest).unwrap(), Action::Ar1);
        // P-Data still in flight is drained
        assert_eq!(fsm.handle(Event::PDataReceived).unwrap(), Action::Ar6);
        assert_eq!(fsm.handle(Event::ReleaseRpReceived).unwrap(), Action::Ar3);
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn acceptor_happy_path() {
        let mut fsm = StateMachine::new(Role::Acceptor);
        assert_eq!(fsm.handle(Event::TransportConnectIndication).unwrap(), Action::Ae5);
        assert_eq!(fsm.handle(Event::AssociateRqReceived).unwrap(), Action::Ae6);
        assert_eq!(fsm.handle(Event::AssociateAccept).unwrap(), Action::Ae7);
        assert_eq!(fsm.handle(Event::ReleaseRqReceived).unwrap(), Action::Ar2);
        assert_eq!(fsm.state(), State::AwaitingLocalReleaseResponse);
        assert_eq!(fsm.handle(Event::ReleaseResponse).unwrap(), Action::Ar4);
        assert_eq!(fsm.handle(Event::TransportClosed).unwrap(), Action::Ar5);
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn acceptor_rejects() {
        let mut fsm = machine_in(
            Role::Acceptor,
            &[Event::TransportConnectIndication, Event::AssociateRqReceived],
        );
        assert_eq!(fsm.handle(Event::AssociateReject).unwrap(), Action::Ae8);
        assert_eq!(fsm.state(), State::AwaitingTransportClose);
    }

    #[test]
    fn requestor_rejected() {
        let mut fsm = machine_in(
            Role::Requestor,
            &[Event::AssociateRequest, Event::TransportConnectConfirm],
        );
        assert_eq!(fsm.handle(Event::AssociateRjReceived).unwrap(), Action::Ae4);
        assert_eq!(fsm.state(), State::Idle);
    }

    #[rstest]
    #[case(Event::AssociateAcReceived)]
    #[case(Event::PDataReceived)]
    #[case(Event::ReleaseRqReceived)]
    #[case(Event::InvalidPduReceived)]
    fn unexpected_pdu_before_request_is_user_abort(#[case] event: Event) {
        let mut fsm = machine_in(Role::Acceptor, &[Event::TransportConnectIndication]);
        assert_eq!(fsm.handle(event).unwrap(), Action::Aa1);
        assert_eq!(fsm.state(), State::AwaitingTransportClose);
    }

    #[rstest]
    #[case(Event::AssociateRqReceived)]
    #[case(Event::AssociateAcReceived)]
    #[case(Event::ReleaseRpReceived)]
    #[case(Event::InvalidPduReceived)]
    fn unexpected_pdu_in_data_transfer_is_provider_abort(#[case] event: Event) {
        let mut fsm = machine_in(
            Role::Requestor,
            &[
                Event::AssociateRequest,
                Event::TransportConnectConfirm,
                Event::AssociateAcReceived,
            ],
        );
        assert_eq!(fsm.handle(event).unwrap(), Action::Aa8);
        assert_eq!(fsm.state(), State::AwaitingTransportClose);
        // further PDUs are ignored
        assert_eq!(fsm.handle(Event::PDataReceived).unwrap(), Action::Aa6);
        assert_eq!(fsm.handle(Event::TransportClosed).unwrap(), Action::Ar5);
    }

    #[rstest]
    #[case(Role::Requestor, State::CollisionRequestorAwaitingLocalResponse)]
    #[case(Role::Acceptor, State::CollisionAcceptorAwaitingReleaseRp)]
    fn release_collision(#[case] role: Role, #[case] expected: State) {
        let setup: &[Event] = match role {
            Role::Requestor => &[
                Event::AssociateRequest,
                Event::TransportConnectConfirm,
                Event::AssociateAcReceived,
            ],
            Role::Acceptor => &[
                Event::TransportConnectIndication,
                Event::AssociateRqReceived,
                Event::AssociateAccept,
            ],
        };
        let mut fsm = machine_in(role, setup);
        fsm.handle(Event::ReleaseRequest).unwrap();
        assert_eq!(fsm.handle(Event::ReleaseRqReceived).unwrap(), Action::Ar8);
        assert_eq!(fsm.state(), expected);

        match role {
            Role::Requestor => {
                assert_eq!(fsm.handle(Event::ReleaseResponse).unwrap(), Action::Ar9);
                assert_eq!(fsm.handle(Event::ReleaseRpReceived).unwrap(), Action::Ar3);
            }
            Role::Acceptor => {
                assert_eq!(fsm.handle(Event::ReleaseRpReceived).unwrap(), Action::Ar10);
                assert_eq!(fsm.handle(Event::ReleaseResponse).unwrap(), Action::Ar4);
            }
        }
    }

    #[test]
    fn abort_from_data_transfer() {
        let mut fsm = machine_in(
            Role::Acceptor,
            &[
                Event::TransportConnectIndication,
                Event::AssociateRqReceived,
                Event::AssociateAccept,
            ],
        );
        assert_eq!(fsm.handle(Event::AbortReceived).unwrap(), Action::Aa3);
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn invalid_events_leave_state_untouched() {
        let mut fsm = StateMachine::new(Role::Requestor);
        let err = fsm.handle(Event::PDataRequest).unwrap_err();
        assert_eq!(err.state, State::Idle);
        assert_eq!(err.event, Event::PDataRequest);
        assert_eq!(fsm.state(), State::Idle);
        assert_eq!(err.to_string(), "event E9 is not valid in state Sta1");
    }

    #[test]
    fn every_pdu_event_is_handled_once_established() {
        let established = [
            State::DataTransfer,
            State::AwaitingReleaseRp,
            State::AwaitingLocalReleaseResponse,
            State::AwaitingTransportClose,
        ];
        let pdu_events = [
            Event::AssociateAcReceived,
            Event::AssociateRjReceived,
            Event::AssociateRqReceived,
            Event::PDataReceived,
            Event::ReleaseRqReceived,
            Event::ReleaseRpReceived,
            Event::AbortReceived,
            Event::InvalidPduReceived,
            Event::TransportClosed,
        ];
        for state in established {
            for event in pdu_events {
                assert!(
                    transition(state, event).is_some(),
                    "{} + {} has no action",
                    state,
                    event
                );
            }
        }
    }
}
