#![no_main]
use dicom_ulp::association::PDataAssembler;
use dicom_ulp::pdu::{read_pdu, Pdu, MAXIMUM_PDU_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut data = data;
    let mut assembler = PDataAssembler::new();

    // feed every P-DATA-TF found in the input until the first error
    while let Ok(pdu) = read_pdu(&mut data, MAXIMUM_PDU_SIZE, false) {
        let Pdu::PData { data: pdvs } = pdu else {
            continue;
        };
        for pdv in pdvs {
            let fragment_len = pdv.data.len();
            match assembler.push(pdv, true) {
                Ok(Some(unit)) => assert!(unit.data.len() >= fragment_len),
                Ok(None) => {}
                Err(_) => return,
            }
        }
    }
});
