#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use tlsauth_lib::{
    CertificateChain, MemoryExceptionStore, TrustStore, VerificationContext, Verifier,
    VerifyOptions,
};

fuzz_target!(|data: &[u8]| {
    // Chain parsing and every check must never panic, whatever the input.
    let chain = match CertificateChain::from_pem_or_der(data) {
        Ok(chain) => chain,
        Err(_) => {
            // Split raw input into a multi-certificate chain as well.
            let parts: Vec<Vec<u8>> = data
                .split(|b| *b == 0xff)
                .filter(|p| !p.is_empty())
                .map(<[u8]>::to_vec)
                .collect();
            match CertificateChain::from_der_list(parts) {
                Ok(chain) => chain,
                Err(_) => return,
            }
        }
    };

    let options = VerifyOptions {
        composite: true,
        crl_ders: vec![data.to_vec()],
        ..VerifyOptions::default()
    };
    let verifier = Verifier::new(
        Arc::new(TrustStore::new()),
        Arc::new(MemoryExceptionStore::new()),
    )
    .with_options(options);
    let ctx = VerificationContext::new("example.com")
        .with_reference_identities(["*.example.com", "192.0.2.1"]);

    let verdict = verifier.verify_chain(&chain, &ctx);
    for rejection in verdict.rejections() {
        let wire = rejection.to_wire();
        let _ = tlsauth_lib::Rejection::from_wire(&wire);
        let _ = rejection.to_string();
    }
});
