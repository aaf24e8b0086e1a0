#![no_main]
use std::error::Error;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, bool, &[u8])| {
    let (max_pdu_length, strict, data) = data;
    let _ = fuzz(max_pdu_length, strict, data);
});

fn fuzz(max_pdu_length: u32, strict: bool, mut data: &[u8]) -> Result<(), Box<dyn Error>> {
    let pdu = dicom_ulp::pdu::read_pdu(&mut data, max_pdu_length, strict)?;

    // anything the reader accepts must be written back
    let bytes = dicom_ulp::pdu::encode_pdu(&pdu)?;

    let decoded = dicom_ulp::pdu::decode_pdu(&bytes).expect("encoded PDU should decode");
    assert_eq!(pdu, decoded, "PDU changed after a trip through the encoder");

    Ok(())
}
