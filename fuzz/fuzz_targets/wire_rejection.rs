#![no_main]

use libfuzzer_sys::fuzz_target;
use tlsauth_lib::{CertificateState, Rejection, WireRejection};

fuzz_target!(|data: &[u8]| {
    // Decoding rejections sent by a remote object must never panic.
    let Ok(wire) = serde_json::from_slice::<Vec<WireRejection>>(data) else {
        return;
    };
    for w in &wire {
        let rejection = Rejection::from_wire(w);
        let _ = rejection.to_wire();
    }
    for code in 0..4 {
        let _ = CertificateState::from_remote(code, &wire);
    }
});
