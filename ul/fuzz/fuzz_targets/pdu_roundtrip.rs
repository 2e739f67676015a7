#![no_main]
use std::error::Error;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, bool, &[u8])| {
    let (maxlen, strict, data) = data;
    let _ = fuzz(maxlen, strict, data);
});

fn fuzz(maxlen: u32, strict: bool, data: &[u8]) -> Result<(), Box<dyn Error>> {
    // deserialize random bytes
    let Some((pdu, consumed)) = dicomlink_ul::pdu::read_pdu(data, maxlen, strict)? else {
        return Ok(());
    };
    assert!(consumed <= data.len());

    // serialize pdu back to bytes
    let mut bytes = Vec::new();
    dicomlink_ul::pdu::write_pdu(&mut bytes, &pdu)?;

    // deserialize back to pdu
    let (pdu2, consumed2) = dicomlink_ul::pdu::read_pdu(&bytes, maxlen, strict)
        .expect("serialized pdu should always deserialize")
        .expect("serialized pdu should be complete");
    assert_eq!(consumed2, bytes.len());

    // assert equivalence
    assert_eq!(
        pdu, pdu2,
        "pdu should be equal after serializing to/from bytes"
    );

    Ok(())
}
