use dicom_ulp::pdu::{
    decode_pdu, encode_pdu, read_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource,
    AssociationAC, AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason,
    AssociationRJSource, AssociationRQ, PDataValue, PDataValueType, Pdu,
    PresentationContextProposed, PresentationContextResult, PresentationContextResultReason,
    RoleSelection, UserIdentity, UserIdentityType, UserVariableItem, DEFAULT_MAX_PDU,
    DICOM_APPLICATION_CONTEXT_NAME,
};
use matches::assert_matches;
use std::io::Cursor;

const VERIFICATION: &str = "1.2.840.10008.1.1";
const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

fn sample_request() -> AssociationRQ {
    AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "STORE-SCP".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: VERIFICATION.to_string(),
                transfer_syntaxes: vec![IMPLICIT_VR_LE.to_string()],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: CT_IMAGE_STORAGE.to_string(),
                transfer_syntaxes: vec![EXPLICIT_VR_LE.to_string(), IMPLICIT_VR_LE.to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(16_384),
            UserVariableItem::ImplementationClassUID("1.2.3.4".to_string()),
            UserVariableItem::ImplementationVersionName("TEST 1.0".to_string()),
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: CT_IMAGE_STORAGE.to_string(),
                scu_role: true,
                scp_role: true,
            }),
            UserVariableItem::SopClassExtendedNegotiationSubItem(
                CT_IMAGE_STORAGE.to_string(),
                vec![1, 1, 0, 1, 1, 0, 1],
            ),
            UserVariableItem::UserIdentityItem(UserIdentity::username_password(
                "MyUsername",
                "MyPassword",
            )),
        ],
    }
}

#[test]
fn associate_rq_layout() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = encode_pdu(&sample_request().into())?;

    // PDU type and reserved byte
    assert_eq!(&bytes[..2], &[0x01, 0x00]);
    let length = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    assert_eq!(length as usize, bytes.len() - 6);
    // protocol version and reserved
    assert_eq!(&bytes[6..10], &[0x00, 0x01, 0x00, 0x00]);
    // called then calling AE title, space padded to 16 bytes
    assert_eq!(&bytes[10..26], b"STORE-SCP       ");
    assert_eq!(&bytes[26..42], b"STORE-SCU       ");
    assert!(bytes[42..74].iter().all(|b| *b == 0));
    // application context item comes first
    assert_eq!(bytes[74], 0x10);

    Ok(())
}

#[test]
fn associate_rq_survives_the_wire() -> Result<(), Box<dyn std::error::Error>> {
    let request = sample_request();

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &request.clone().into())?;
    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true)?;

    let Pdu::AssociationRQ(decoded) = result else {
        panic!("expected A-ASSOCIATE-RQ, got {:?}", result);
    };
    assert_eq!(decoded, request);

    assert_matches!(&decoded.user_variables[5],
        UserVariableItem::UserIdentityItem(identity)
        if !identity.positive_response_requested()
            && identity.identity_type() == UserIdentityType::UsernamePassword
            && identity.primary_field() == b"MyUsername"
            && identity.secondary_field() == b"MyPassword"
    );

    // typed decoding of the same bytes
    assert_eq!(AssociationRQ::decode(&bytes)?, request);
    assert!(AssociationAC::decode(&bytes).is_err());

    Ok(())
}

#[test]
fn username_only_identity() -> Result<(), Box<dyn std::error::Error>> {
    let request = AssociationRQ {
        user_variables: vec![UserVariableItem::UserIdentityItem(UserIdentity::new(
            true,
            UserIdentityType::Username,
            b"MyUsername".to_vec(),
            vec![],
        ))],
        ..sample_request()
    };

    let bytes = encode_pdu(&request.into())?;
    let decoded = AssociationRQ::decode(&bytes)?;

    assert_matches!(&decoded.user_variables[..],
        [UserVariableItem::UserIdentityItem(identity)]
        if identity.positive_response_requested()
            && identity.identity_type() == UserIdentityType::Username
            && identity.primary_field() == b"MyUsername"
            && identity.secondary_field().is_empty()
    );

    Ok(())
}

#[test]
fn unknown_user_sub_items_are_kept() -> Result<(), Box<dyn std::error::Error>> {
    let request = AssociationRQ {
        user_variables: vec![
            UserVariableItem::MaxLength(0),
            UserVariableItem::Unknown(0x5F, vec![0xCA, 0xFE]),
        ],
        ..sample_request()
    };

    let bytes = encode_pdu(&request.clone().into())?;
    assert_eq!(AssociationRQ::decode(&bytes)?, request);

    Ok(())
}

#[test]
fn associate_ac_survives_the_wire() -> Result<(), Box<dyn std::error::Error>> {
    let accept = AssociationAC {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "STORE-SCP".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: IMPLICIT_VR_LE.to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: EXPLICIT_VR_LE.to_string(),
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(32_768),
            UserVariableItem::ImplementationClassUID("1.2.3.4".to_string()),
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: CT_IMAGE_STORAGE.to_string(),
                scu_role: false,
                scp_role: true,
            }),
            UserVariableItem::UserIdentityResponse(b"ticket".to_vec()),
        ],
    };

    let bytes = encode_pdu(&accept.clone().into())?;
    assert_eq!(bytes[0], 0x02);
    assert_eq!(decode_pdu(&bytes)?, Pdu::AssociationAC(accept));

    Ok(())
}

#[test]
fn full_length_ae_titles() -> Result<(), Box<dyn std::error::Error>> {
    let calling = "CALLING-AE-TITLE";
    let called = "CALLED-AE-TITLE1";
    assert_eq!(calling.len(), 16);
    assert_eq!(called.len(), 16);

    let request = AssociationRQ {
        calling_ae_title: calling.to_string(),
        called_ae_title: called.to_string(),
        ..sample_request()
    };
    let bytes = encode_pdu(&request.clone().into())?;
    // no room left for padding
    assert_eq!(&bytes[10..26], called.as_bytes());
    assert_eq!(&bytes[26..42], calling.as_bytes());
    assert_eq!(AssociationRQ::decode(&bytes)?, request);

    let accept = AssociationAC {
        protocol_version: 1,
        calling_ae_title: calling.to_string(),
        called_ae_title: called.to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![PresentationContextResult {
            id: 1,
            reason: PresentationContextResultReason::Acceptance,
            transfer_syntax: IMPLICIT_VR_LE.to_string(),
        }],
        user_variables: vec![UserVariableItem::MaxLength(DEFAULT_MAX_PDU)],
    };
    let bytes = encode_pdu(&accept.clone().into())?;
    assert_eq!(&bytes[10..26], called.as_bytes());
    assert_eq!(&bytes[26..42], calling.as_bytes());
    let decoded = AssociationAC::decode(&bytes)?;
    assert_eq!(decoded.calling_ae_title, calling);
    assert_eq!(decoded.called_ae_title, called);
    assert_eq!(decoded, accept);

    Ok(())
}

#[test]
fn associate_rj_bytes() -> Result<(), Box<dyn std::error::Error>> {
    let reject = AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        ),
    };

    let bytes = encode_pdu(&reject.into())?;
    assert_eq!(bytes, [0x03, 0, 0, 0, 0, 4, 0, 1, 1, 7]);
    assert_eq!(AssociationRJ::decode(&bytes)?, reject);

    Ok(())
}

#[test]
fn pdata_survives_the_wire() -> Result<(), Box<dyn std::error::Error>> {
    let pdata = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 3,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![0, 0, 0, 0],
            },
            PDataValue {
                presentation_context_id: 3,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![1, 2, 3],
            },
        ],
    };

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdata)?;

    // one PDV item: length (4) + context id + control header + data
    assert_eq!(&bytes[6..12], &[0, 0, 0, 6, 3, 0x03]);
    assert_eq!(&bytes[16..22], &[0, 0, 0, 5, 3, 0x00]);

    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true)?;
    assert_eq!(result, pdata);

    Ok(())
}

#[test]
fn empty_last_fragment_survives_the_wire() -> Result<(), Box<dyn std::error::Error>> {
    let pdata = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![],
        }],
    };

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdata)?;
    // PDU length 6, PDV item length 2: context id and control header only
    assert_eq!(bytes, [0x04, 0, 0, 0, 0, 6, 0, 0, 0, 2, 1, 0x02]);

    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU, true)?;
    assert_eq!(result, pdata);

    Ok(())
}

#[test]
fn several_pdus_from_one_stream() -> Result<(), Box<dyn std::error::Error>> {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::ReleaseRQ)?;
    write_pdu(
        &mut bytes,
        &Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu),
        },
    )?;

    let mut cursor = Cursor::new(&bytes);
    assert_eq!(read_pdu(&mut cursor, DEFAULT_MAX_PDU, true)?, Pdu::ReleaseRQ);
    assert_matches!(
        read_pdu(&mut cursor, DEFAULT_MAX_PDU, true)?,
        Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu)
        }
    );
    assert!(read_pdu(&mut cursor, DEFAULT_MAX_PDU, true).is_err());

    Ok(())
}
