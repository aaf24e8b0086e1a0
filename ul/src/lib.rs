//! This crate contains the types and methods needed to interact
//! with DICOM nodes through the upper layer protocol.
//!
//! It can be used as a base
//! for concrete service class users (SCUs)
//! and service class providers (SCPs).
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   along with their binary encoding and decoding.
//! - The [`association`] module
//!   comprises abstractions for establishing and negotiating associations
//!   between application entities via TCP,
//!   driven by the upper layer state machine.
//!   It also holds the P-Data framing and reassembly layers
//!   and the presentation context negotiation pipeline.
//! - The [`command`] module
//!   encodes and decodes DIMSE command messages.
//! - The [`address`] and [`directory`] modules
//!   help locate application entities in a network.
//!
//! ## Features
//! * `sync-tls`: Enables associations over TLS with `rustls`.
//!
//! ## Example
//!
//! Send a C-ECHO request to a node and check the response:
//!
//! ```no_run
//! # use dicom_ulp::association::{ClientAssociationOptions, Incoming};
//! # use dicom_ulp::command::CommandMessage;
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut association = ClientAssociationOptions::new()
//!     .with_abstract_syntax("1.2.840.10008.1.1")
//!     .establish_with("ECHO-SCP@127.0.0.1:11112")?;
//! let pc_id = association.presentation_contexts()[0].id;
//!
//! let request = CommandMessage::c_echo_rq(association.next_message_id());
//! association.send_command(pc_id, &request, None)?;
//! if let Incoming::Unit(unit) = association.receive_unit(false)? {
//!     let response = CommandMessage::decode(&unit.data)?;
//!     assert!(response.status().is_some_and(|s| s.is_success()));
//! }
//! association.release()?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod association;
pub mod command;
pub mod context;
pub mod directory;
pub mod pdu;

/// The implementation class UID sent in association negotiation.
///
/// Generated as per the standard, part 5, section B.2.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.262466132474961437718316393536412063437";

/// The implementation version name sent in association negotiation.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOM-ULP 0.1.0";

// re-exports

pub use address::{AeAddr, FullAeAddr};
pub use association::{Association, ClientAssociationOptions, ServerAssociationOptions};
pub use command::CommandMessage;
pub use context::UlContext;
pub use pdu::{read_pdu, write_pdu, Pdu};
