//! Incoming P-Data reassembly.
//!
//! Fragments of a command or a data set may be spread
//! over any number of PDV items and P-DATA-TF PDUs.
//! The [`PDataAssembler`] concatenates them
//! until the last fragment of a unit arrives.
//! Complete units can then be decoded into DICOM objects
//! and handed over to a [`DataSetHandler`].
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::{entries::IMPLICIT_VR_LITTLE_ENDIAN, TransferSyntaxRegistry};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};

use crate::pdu::{PDataValue, PDataValueType};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// A data set fragment arrived while only a command was expected
    #[snafu(display(
        "unexpected data set fragment on presentation context {}",
        presentation_context_id
    ))]
    UnexpectedData {
        presentation_context_id: u8,
        backtrace: Backtrace,
    },

    /// A fragment continued a unit of another presentation context
    #[snafu(display(
        "fragment for presentation context {} interrupts a unit of presentation context {}",
        got,
        expected
    ))]
    PresentationContextMismatch {
        expected: u8,
        got: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("unsupported transfer syntax {}", uid))]
    UnsupportedTransferSyntax { uid: String, backtrace: Backtrace },

    #[snafu(display("could not decode received {:?} unit", value_type))]
    DecodeUnit {
        value_type: PDataValueType,
        #[snafu(source(from(dicom_object::ReadError, Box::new)))]
        source: Box<dicom_object::ReadError>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A complete command or data set,
/// assembled from all of its fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedUnit {
    /// the presentation context the unit was sent on
    pub presentation_context_id: u8,
    /// whether the unit is a command or a data set
    pub value_type: PDataValueType,
    /// the concatenated fragment bytes
    pub data: Vec<u8>,
}

impl ReceivedUnit {
    /// Decode the unit as a DICOM data set.
    ///
    /// Commands are always decoded in _Implicit VR Little Endian_,
    /// data sets use the given transfer syntax UID.
    pub fn decode(&self, transfer_syntax_uid: &str) -> Result<InMemDicomObject> {
        match self.value_type {
            PDataValueType::Command => {
                let ts = IMPLICIT_VR_LITTLE_ENDIAN.erased();
                InMemDicomObject::read_dataset_with_ts(self.data.as_slice(), &ts).context(
                    DecodeUnitSnafu {
                        value_type: self.value_type,
                    },
                )
            }
            PDataValueType::Data => {
                let ts = TransferSyntaxRegistry
                    .get(transfer_syntax_uid)
                    .filter(|ts| !ts.is_unsupported())
                    .context(UnsupportedTransferSyntaxSnafu {
                        uid: transfer_syntax_uid,
                    })?;
                InMemDicomObject::read_dataset_with_ts(self.data.as_slice(), ts).context(
                    DecodeUnitSnafu {
                        value_type: self.value_type,
                    },
                )
            }
        }
    }
}

/// Receiver of decoded commands and data sets.
///
/// Implemented for any closure
/// taking the presentation context ID, the kind of unit
/// and the decoded object.
pub trait DataSetHandler {
    /// Make use of a completely received and decoded unit.
    fn handle(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
        object: InMemDicomObject,
    );
}

impl<F> DataSetHandler for F
where
    F: FnMut(u8, PDataValueType, InMemDicomObject),
{
    fn handle(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
        object: InMemDicomObject,
    ) {
        self(presentation_context_id, value_type, object)
    }
}

/// Buffer of a unit in progress.
#[derive(Debug, Default)]
struct Fragments {
    presentation_context_id: Option<u8>,
    data: Vec<u8>,
}

impl Fragments {
    fn push(&mut self, pdv: PDataValue) -> Result<Option<(u8, Vec<u8>)>> {
        let id = pdv.presentation_context_id;
        if let Some(expected) = self.presentation_context_id {
            ensure!(
                expected == id,
                PresentationContextMismatchSnafu { expected, got: id }
            );
        }

        if self.data.is_empty() {
            // take ownership of the first fragment instead of copying it
            self.data = pdv.data;
        } else {
            self.data.extend_from_slice(&pdv.data);
        }

        if pdv.is_last {
            self.presentation_context_id = None;
            Ok(Some((id, std::mem::take(&mut self.data))))
        } else {
            self.presentation_context_id = Some(id);
            Ok(None)
        }
    }

    fn is_empty(&self) -> bool {
        self.presentation_context_id.is_none() && self.data.is_empty()
    }
}

/// Accumulator of incoming PDV fragments.
///
/// Commands and data sets are gathered in independent buffers,
/// both of which are reset after each complete unit.
#[derive(Debug, Default)]
pub struct PDataAssembler {
    command: Fragments,
    data: Fragments,
}

impl PDataAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one PDV item.
    ///
    /// Returns the complete unit once its last fragment arrives.
    /// Data set fragments are refused unless `allow_data` is true.
    pub fn push(&mut self, pdv: PDataValue, allow_data: bool) -> Result<Option<ReceivedUnit>> {
        let value_type = pdv.value_type;
        let buffer = match value_type {
            PDataValueType::Command => &mut self.command,
            PDataValueType::Data => {
                ensure!(
                    allow_data,
                    UnexpectedDataSnafu {
                        presentation_context_id: pdv.presentation_context_id
                    }
                );
                &mut self.data
            }
        };

        Ok(buffer
            .push(pdv)?
            .map(|(presentation_context_id, data)| ReceivedUnit {
                presentation_context_id,
                value_type,
                data,
            }))
    }

    /// Whether no unit is partially received.
    pub fn is_idle(&self) -> bool {
        self.command.is_empty() && self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::tags;
    use dicom_object::InMemDicomObject;
    use dicom_transfer_syntax_registry::entries::EXPLICIT_VR_LITTLE_ENDIAN;
    use matches::assert_matches;
    use rstest::rstest;

    use super::*;

    fn pdv(value_type: PDataValueType, is_last: bool, data: &[u8]) -> PDataValue {
        PDataValue {
            presentation_context_id: 1,
            value_type,
            is_last,
            data: data.to_vec(),
        }
    }

    /// Feed `bytes` split at the given boundaries, returning the units produced.
    fn feed_split(bytes: &[u8], cuts: &[usize]) -> Vec<ReceivedUnit> {
        let mut assembler = PDataAssembler::new();
        let mut units = vec![];
        let mut start = 0;
        let mut bounds: Vec<usize> = cuts.to_vec();
        bounds.push(bytes.len());
        for (i, end) in bounds.iter().enumerate() {
            let is_last = i == bounds.len() - 1;
            let fragment = pdv(PDataValueType::Data, is_last, &bytes[start..*end]);
            if let Some(unit) = assembler.push(fragment, true).unwrap() {
                units.push(unit);
            }
            start = *end;
        }
        assert!(assembler.is_idle());
        units
    }

    #[rstest]
    #[case(&[])]
    #[case(&[1])]
    #[case(&[0, 0, 5])]
    #[case(&[3, 3, 9, 15])]
    fn splitting_does_not_change_the_unit(#[case] cuts: &[usize]) {
        let bytes: Vec<u8> = (0..16).collect();
        let units = feed_split(&bytes, cuts);
        assert_eq!(
            units,
            vec![ReceivedUnit {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                data: bytes,
            }]
        );
    }

    #[test]
    fn command_and_data_buffers_are_independent() {
        let mut assembler = PDataAssembler::new();
        assert_eq!(
            assembler
                .push(pdv(PDataValueType::Data, false, &[1, 2]), true)
                .unwrap(),
            None
        );
        let command = assembler
            .push(pdv(PDataValueType::Command, true, &[9, 9]), true)
            .unwrap()
            .unwrap();
        assert_eq!(command.value_type, PDataValueType::Command);
        assert_eq!(command.data, vec![9, 9]);

        let data = assembler
            .push(pdv(PDataValueType::Data, true, &[3, 4]), true)
            .unwrap()
            .unwrap();
        assert_eq!(data.data, vec![1, 2, 3, 4]);
        assert!(assembler.is_idle());
    }

    #[test]
    fn data_is_refused_when_not_expected() {
        let mut assembler = PDataAssembler::new();
        assert_matches!(
            assembler.push(pdv(PDataValueType::Data, true, &[1, 2]), false),
            Err(Error::UnexpectedData {
                presentation_context_id: 1,
                ..
            })
        );
    }

    #[test]
    fn presentation_context_cannot_change_mid_unit() {
        let mut assembler = PDataAssembler::new();
        assembler
            .push(pdv(PDataValueType::Command, false, &[1, 2]), false)
            .unwrap();
        let mut other = pdv(PDataValueType::Command, true, &[3, 4]);
        other.presentation_context_id = 3;
        assert_matches!(
            assembler.push(other, false),
            Err(Error::PresentationContextMismatch {
                expected: 1,
                got: 3,
                ..
            })
        );
    }

    #[test]
    fn units_are_decoded_and_handled() {
        let obj = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            dicom_value!(Str, "Doe^John"),
        )]);
        let mut bytes = Vec::new();
        obj.write_dataset_with_ts(&mut bytes, &EXPLICIT_VR_LITTLE_ENDIAN.erased())
            .unwrap();

        let unit = ReceivedUnit {
            presentation_context_id: 3,
            value_type: PDataValueType::Data,
            data: bytes,
        };
        let decoded = unit.decode("1.2.840.10008.1.2.1").unwrap();

        let mut received = vec![];
        let mut handler = |id: u8, value_type: PDataValueType, obj: InMemDicomObject| {
            received.push((id, value_type, obj));
        };
        handler.handle(unit.presentation_context_id, unit.value_type, decoded);

        assert_eq!(received.len(), 1);
        let (id, value_type, obj) = &received[0];
        assert_eq!(*id, 3);
        assert_eq!(*value_type, PDataValueType::Data);
        assert_eq!(
            obj.element(tags::PATIENT_NAME).unwrap().to_str().unwrap(),
            "Doe^John"
        );
    }

    #[test]
    fn unknown_transfer_syntax_is_refused() {
        let unit = ReceivedUnit {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            data: vec![],
        };
        assert_matches!(
            unit.decode("1.2.3.4.5.6"),
            Err(Error::UnsupportedTransferSyntax { .. })
        );
    }
}
