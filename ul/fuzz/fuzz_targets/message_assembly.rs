#![no_main]
use libfuzzer_sys::fuzz_target;

use dicomlink_ul::dimse::{Command, MessageAssembler};
use dicomlink_ul::pdu::Pdu;

fuzz_target!(|data: &[u8]| {
    let mut assembler = MessageAssembler::new();
    let mut rest = data;
    while let Ok(Some((pdu, consumed))) = dicomlink_ul::pdu::read_pdu(rest, 131_072, false) {
        rest = &rest[consumed..];
        let Pdu::PData { data } = pdu else {
            continue;
        };
        for value in data {
            if assembler.push(value).is_err() {
                return;
            }
        }
        if let Some(command) = assembler.command() {
            // any outcome but a panic
            let _ = Command::decode(command);
        }
    }
});
