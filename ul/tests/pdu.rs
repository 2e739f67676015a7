use dicomlink_ul::pdu::{
    AssociationAC, AssociationRQ, PDataValue, PDataValueType, Pdu, PresentationContextProposed,
    PresentationContextResult, PresentationContextResultReason, UserVariableItem,
    DEFAULT_MAX_PDU,
};
use dicomlink_ul::{read_pdu, write_pdu};
use matches::matches;

type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

#[test]
fn can_read_write_associate_rq() -> Result {
    let association_rq = AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "QUERY-SCU".to_string(),
        called_ae_title: "ARCHIVE".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec![
                    "1.2.840.10008.1.2".to_string(),
                    "1.2.840.10008.1.2.1".to_string(),
                ],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.2.2.1".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2.2".to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(16_384),
            UserVariableItem::ImplementationClassUID("1.2.3.4".to_string()),
            UserVariableItem::ImplementationVersionName("LINK 1".to_string()),
            UserVariableItem::Unknown(0x54, vec![0x00, 0x01, 0x02]),
        ],
    };

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &association_rq.clone().into())?;
    assert_eq!(bytes[0], 0x01);
    assert_eq!(
        u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize,
        bytes.len() - 6
    );
    // AE titles are space padded to 16 bytes
    assert_eq!(&bytes[10..26], b"ARCHIVE         ");
    assert_eq!(&bytes[26..42], b"QUERY-SCU       ");

    let (pdu, consumed) = read_pdu(&bytes, DEFAULT_MAX_PDU, true)?.ok_or("incomplete PDU")?;
    assert_eq!(consumed, bytes.len());
    assert_eq!(pdu, Pdu::AssociationRQ(association_rq));
    Ok(())
}

#[test]
fn can_read_write_associate_ac() -> Result {
    let association_ac = AssociationAC {
        protocol_version: 1,
        calling_ae_title: "QUERY-SCU".to_string(),
        called_ae_title: "ARCHIVE".to_string(),
        application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
        presentation_contexts: vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(32_768),
            UserVariableItem::ImplementationClassUID("1.2.3.4.5".to_string()),
        ],
    };

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &association_ac.clone().into())?;
    assert_eq!(bytes[0], 0x02);

    let (pdu, _) = read_pdu(&bytes, DEFAULT_MAX_PDU, true)?.ok_or("incomplete PDU")?;
    match pdu {
        Pdu::AssociationAC(ac) => {
            assert_eq!(ac.max_length(), Some(32_768));
            assert_eq!(ac.implementation_class_uid(), Some("1.2.3.4.5"));
            assert_eq!(ac.implementation_version_name(), None);
            assert_eq!(ac, association_ac);
        }
        pdu => panic!("invalid pdu type {:?}", pdu),
    }
    Ok(())
}

#[test]
fn can_read_write_pdata() -> Result {
    let pdata = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 3,
            value_type: PDataValueType::Command,
            is_last: true,
            data: vec![0, 0, 0, 0],
        }],
    };

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdata)?;

    #[rustfmt::skip]
    let expected: &[u8] = &[
        // P-DATA-TF, length 10
        0x04, 0x00, 0x00, 0x00, 0x00, 0x0A,
        // PDV item length, context 3, command + last
        0x00, 0x00, 0x00, 0x06, 0x03, 0x03,
        0x00, 0x00, 0x00, 0x00,
    ];
    assert_eq!(bytes, expected);

    let (pdu, consumed) = read_pdu(&bytes, DEFAULT_MAX_PDU, true)?.ok_or("incomplete PDU")?;
    assert_eq!(consumed, 16);
    assert_eq!(pdu, pdata);
    Ok(())
}

#[test]
fn read_pdu_consumes_one_pdu_at_a_time() -> Result {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::ReleaseRP)?;
    write_pdu(
        &mut bytes,
        &Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![1, 2, 3],
            }],
        },
    )?;

    // nothing is decoded before the header is complete
    assert!(read_pdu(&bytes[..5], DEFAULT_MAX_PDU, true)?.is_none());
    // nor before the body is
    assert!(read_pdu(&bytes[..9], DEFAULT_MAX_PDU, true)?.is_none());

    let (first, consumed) = read_pdu(&bytes, DEFAULT_MAX_PDU, true)?.ok_or("incomplete PDU")?;
    assert_eq!(first, Pdu::ReleaseRP);
    assert_eq!(consumed, 10);

    let (second, consumed) =
        read_pdu(&bytes[10..], DEFAULT_MAX_PDU, true)?.ok_or("incomplete PDU")?;
    assert_eq!(consumed, bytes.len() - 10);
    assert!(matches!(
        second,
        Pdu::PData { ref data } if data.len() == 1
            && data[0].value_type == PDataValueType::Data
            && !data[0].is_last
    ));
    Ok(())
}

#[test]
fn unknown_pdu_type_is_rejected_from_header() {
    let bytes = [0x09, 0x00, 0x00, 0x00, 0x00, 0x04];
    assert!(read_pdu(&bytes, DEFAULT_MAX_PDU, true).is_err());
}
