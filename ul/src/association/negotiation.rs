//! Presentation context negotiation.
//!
//! The acceptor reduces each proposed presentation context
//! to at most one transfer syntax and a result,
//! by running these passes in order:
//!
//! 1. [`AbstractSyntaxSelection`]:
//!    accept or reject each context by its abstract syntax alone;
//! 2. [`TransferSyntaxSelection`]:
//!    pick a single transfer syntax for each context still accepted;
//! 3. [`ExplicitVrDedup`]:
//!    when the same abstract syntax was accepted
//!    both with an explicit VR transfer syntax
//!    and with _Implicit VR Little Endian_,
//!    reject the implicit VR contexts.
//!
//! Each pass is a [`NegotiationPolicy`],
//! taking the list of contexts by value and returning the new list.
//! [`NegotiationPipeline`] composes them in that fixed order.
//!
//! SCP/SCU role selection is negotiated separately
//! through a [`RoleSelectionPolicy`].
use dicom_dictionary_std::uids;
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use tracing::debug;

use crate::pdu::{
    PresentationContextNegotiated, PresentationContextProposed, PresentationContextResult,
    PresentationContextResultReason, RoleSelection,
};

use super::uid::trim_uid;

/// Transfer syntax UID of the bzip2 compressed explicit VR little endian
/// private transfer syntax.
pub const BZIP2_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.3.6.1.4.1.5962.300.1";

/// The default transfer syntax preference,
/// from the most to the least preferred.
pub const DEFAULT_TRANSFER_SYNTAX_PREFERENCE: [&str; 5] = [
    BZIP2_EXPLICIT_VR_LITTLE_ENDIAN,
    uids::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
    uids::EXPLICIT_VR_LITTLE_ENDIAN,
    uids::EXPLICIT_VR_BIG_ENDIAN,
    uids::IMPLICIT_VR_LITTLE_ENDIAN,
];

/// A presentation context under negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContext {
    /// the presentation context identifier
    pub id: u8,
    /// the current result of the negotiation
    pub result: PresentationContextResultReason,
    /// the abstract syntax UID,
    /// absent once prepared for the A-ASSOCIATE-AC
    pub abstract_syntax: Option<String>,
    /// the transfer syntax candidates,
    /// at most one after transfer syntax selection
    pub transfer_syntaxes: Vec<String>,
}

impl PresentationContext {
    fn is_accepted(&self) -> bool {
        self.result == PresentationContextResultReason::Acceptance
    }

    /// The single transfer syntax assigned to this context, if any.
    pub fn transfer_syntax(&self) -> Option<&str> {
        match self.transfer_syntaxes.as_slice() {
            [ts] => Some(ts),
            _ => None,
        }
    }
}

impl From<PresentationContextProposed> for PresentationContext {
    fn from(pc: PresentationContextProposed) -> Self {
        PresentationContext {
            id: pc.id,
            result: PresentationContextResultReason::Acceptance,
            abstract_syntax: Some(trim_uid(pc.abstract_syntax.into()).into_owned()),
            transfer_syntaxes: pc
                .transfer_syntaxes
                .into_iter()
                .map(|ts| trim_uid(ts.into()).into_owned())
                .collect(),
        }
    }
}

/// A single negotiation pass.
pub trait NegotiationPolicy {
    /// Apply this pass to the full list of presentation contexts.
    fn apply(&self, contexts: Vec<PresentationContext>) -> Vec<PresentationContext>;
}

impl<F> NegotiationPolicy for F
where
    F: Fn(Vec<PresentationContext>) -> Vec<PresentationContext>,
{
    fn apply(&self, contexts: Vec<PresentationContext>) -> Vec<PresentationContext> {
        self(contexts)
    }
}

/// Accept contexts whose abstract syntax is in a known set.
///
/// Transfer syntaxes are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbstractSyntaxSelection {
    /// the supported abstract syntax UIDs
    pub accepted: Vec<String>,
    /// accept any abstract syntax
    pub promiscuous: bool,
}

impl AbstractSyntaxSelection {
    /// Accept only the given abstract syntaxes.
    pub fn new<I, T>(accepted: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        AbstractSyntaxSelection {
            accepted: accepted
                .into_iter()
                .map(|uid| {
                    let uid: String = uid.into();
                    trim_uid(uid.into()).into_owned()
                })
                .collect(),
            promiscuous: false,
        }
    }

    /// Accept any abstract syntax.
    pub fn promiscuous() -> Self {
        AbstractSyntaxSelection {
            accepted: Vec::new(),
            promiscuous: true,
        }
    }

    fn supports(&self, abstract_syntax: Option<&str>) -> bool {
        match abstract_syntax {
            Some(uid) => self.promiscuous || self.accepted.iter().any(|a| a == uid),
            None => false,
        }
    }
}

impl NegotiationPolicy for AbstractSyntaxSelection {
    fn apply(&self, contexts: Vec<PresentationContext>) -> Vec<PresentationContext> {
        contexts
            .into_iter()
            .map(|mut pc| {
                pc.result = if self.supports(pc.abstract_syntax.as_deref()) {
                    PresentationContextResultReason::Acceptance
                } else {
                    PresentationContextResultReason::AbstractSyntaxNotSupported
                };
                pc
            })
            .collect()
    }
}

/// Pick one transfer syntax per accepted context.
///
/// Contexts already rejected are left without any transfer syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSyntaxSelection {
    /// Take the candidate which comes first in this preference list.
    /// Candidates not in the list
    /// or not supported by the transfer syntax registry are skipped.
    PreferenceOrder(Vec<String>),
    /// Take the first explicit VR candidate supported by the transfer syntax registry,
    /// falling back to _Implicit VR Little Endian_ if it was proposed.
    AnyExplicitVr,
}

impl Default for TransferSyntaxSelection {
    fn default() -> Self {
        TransferSyntaxSelection::PreferenceOrder(
            DEFAULT_TRANSFER_SYNTAX_PREFERENCE
                .iter()
                .map(|uid| uid.to_string())
                .collect(),
        )
    }
}

impl TransferSyntaxSelection {
    /// Choose a transfer syntax among the candidates.
    pub fn choose<'a>(&self, candidates: &'a [String]) -> Option<&'a String> {
        match self {
            TransferSyntaxSelection::PreferenceOrder(preference) => preference
                .iter()
                .filter(|preferred| is_supported(preferred))
                .find_map(|preferred| candidates.iter().find(|ts| *ts == preferred)),
            TransferSyntaxSelection::AnyExplicitVr => candidates
                .iter()
                .find(|ts| ts.as_str() != uids::IMPLICIT_VR_LITTLE_ENDIAN && is_supported(ts))
                .or_else(|| {
                    candidates
                        .iter()
                        .find(|ts| ts.as_str() == uids::IMPLICIT_VR_LITTLE_ENDIAN)
                }),
        }
    }
}

impl NegotiationPolicy for TransferSyntaxSelection {
    fn apply(&self, contexts: Vec<PresentationContext>) -> Vec<PresentationContext> {
        contexts
            .into_iter()
            .map(|mut pc| {
                if !pc.is_accepted() {
                    pc.transfer_syntaxes.clear();
                    return pc;
                }
                match self.choose(&pc.transfer_syntaxes).cloned() {
                    Some(ts) => pc.transfer_syntaxes = vec![ts],
                    None => {
                        pc.result = PresentationContextResultReason::TransferSyntaxesNotSupported;
                        pc.transfer_syntaxes.clear();
                    }
                }
                pc
            })
            .collect()
    }
}

/// Reject implicit VR contexts of an abstract syntax
/// which was also accepted with an explicit VR transfer syntax.
///
/// The rejected contexts get the result "no reason" (2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplicitVrDedup;

impl NegotiationPolicy for ExplicitVrDedup {
    fn apply(&self, contexts: Vec<PresentationContext>) -> Vec<PresentationContext> {
        let with_explicit_vr: Vec<String> = contexts
            .iter()
            .filter(|pc| pc.is_accepted())
            .filter(|pc| matches!(pc.transfer_syntax(), Some(ts) if ts != uids::IMPLICIT_VR_LITTLE_ENDIAN))
            .filter_map(|pc| pc.abstract_syntax.clone())
            .collect();

        contexts
            .into_iter()
            .map(|mut pc| {
                let is_implicit =
                    pc.transfer_syntax() == Some(uids::IMPLICIT_VR_LITTLE_ENDIAN);
                let has_explicit_sibling = pc
                    .abstract_syntax
                    .as_ref()
                    .map(|uid| with_explicit_vr.contains(uid))
                    .unwrap_or(false);
                if pc.is_accepted() && is_implicit && has_explicit_sibling {
                    debug!(
                        "Rejecting presentation context {}: abstract syntax also accepted with explicit VR",
                        pc.id
                    );
                    pc.result = PresentationContextResultReason::NoReason;
                }
                pc
            })
            .collect()
    }
}

/// The complete negotiation pipeline of an acceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationPipeline {
    pub abstract_syntax: AbstractSyntaxSelection,
    pub transfer_syntax: TransferSyntaxSelection,
    /// whether to run the [`ExplicitVrDedup`] pass
    pub explicit_vr_dedup: bool,
}

impl Default for NegotiationPipeline {
    fn default() -> Self {
        NegotiationPipeline {
            abstract_syntax: AbstractSyntaxSelection::default(),
            transfer_syntax: TransferSyntaxSelection::default(),
            explicit_vr_dedup: true,
        }
    }
}

impl NegotiationPipeline {
    /// Negotiate the proposed presentation contexts.
    pub fn negotiate(&self, proposed: Vec<PresentationContextProposed>) -> Vec<PresentationContext> {
        let contexts = proposed.into_iter().map(PresentationContext::from).collect();
        self.apply(contexts)
    }
}

impl NegotiationPolicy for NegotiationPipeline {
    fn apply(&self, contexts: Vec<PresentationContext>) -> Vec<PresentationContext> {
        let contexts = self.abstract_syntax.apply(contexts);
        let contexts = self.transfer_syntax.apply(contexts);
        if self.explicit_vr_dedup {
            ExplicitVrDedup.apply(contexts)
        } else {
            contexts
        }
    }
}

/// Prepare negotiated contexts for the A-ASSOCIATE-AC:
/// the abstract syntax is dropped
/// and exactly one transfer syntax is kept,
/// _Implicit VR Little Endian_ if none was assigned.
pub fn sanitize_for_accept(contexts: &[PresentationContext]) -> Vec<PresentationContextResult> {
    contexts
        .iter()
        .map(|pc| PresentationContextResult {
            id: pc.id,
            reason: pc.result,
            transfer_syntax: pc
                .transfer_syntaxes
                .first()
                .cloned()
                .unwrap_or_else(|| uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string()),
        })
        .collect()
}

/// Record the outcome of the negotiation for the lifetime of the association.
pub(crate) fn to_negotiated(contexts: &[PresentationContext]) -> Vec<PresentationContextNegotiated> {
    contexts
        .iter()
        .map(|pc| PresentationContextNegotiated {
            id: pc.id,
            reason: pc.result,
            abstract_syntax: pc.abstract_syntax.clone().unwrap_or_default(),
            transfer_syntax: pc
                .transfer_syntaxes
                .first()
                .cloned()
                .unwrap_or_else(|| uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string()),
        })
        .collect()
}

/// Check that the main transfer syntax registry
/// supports the given transfer syntax,
/// meaning that it can parse and decode DICOM data sets.
///
/// ```
/// # use dicom_ulp::association::negotiation::is_supported;
/// // Implicit VR Little Endian is guaranteed to be supported
/// assert!(is_supported("1.2.840.10008.1.2"));
/// ```
pub fn is_supported(ts_uid: &str) -> bool {
    TransferSyntaxRegistry
        .get(ts_uid)
        .filter(|ts| !ts.is_unsupported())
        .is_some()
}

/// Decision on the SCP/SCU role selection items of a request.
pub trait RoleSelectionPolicy {
    /// Produce the role selection items of the A-ASSOCIATE-AC.
    fn select(&self, requested: &[RoleSelection]) -> Vec<RoleSelection>;
}

/// Grant every role as requested.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct EchoRoleSelection;

impl RoleSelectionPolicy for EchoRoleSelection {
    fn select(&self, requested: &[RoleSelection]) -> Vec<RoleSelection> {
        requested.to_vec()
    }
}

/// Grant the SCU role as requested, never the SCP role.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct ScuOnlyRoleSelection;

impl RoleSelectionPolicy for ScuOnlyRoleSelection {
    fn select(&self, requested: &[RoleSelection]) -> Vec<RoleSelection> {
        requested
            .iter()
            .map(|role| RoleSelection {
                sop_class_uid: role.sop_class_uid.clone(),
                scu_role: role.scu_role,
                scp_role: false,
            })
            .collect()
    }
}
