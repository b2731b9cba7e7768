#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

mod common;

use common::{chain, self_signed, verifier, verifier_with, TestCa};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tlsauth_lib::{
    CertificateChain, CheckKind, ExceptionStore, MemoryExceptionStore, RejectDetails,
    RejectReason, TrustStore, VerificationContext, Verdict, Verifier, VerifyOptions,
};

fn primary_reason(verdict: &Verdict) -> Option<RejectReason> {
    match verdict {
        Verdict::Rejected { primary, .. } => Some(primary.reason()),
        _ => None,
    }
}

fn testdata(name: &str) -> PathBuf {
    let mut p = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.push("tests");
    p.push("testdata");
    p.push(name);
    p
}

/// Verifier anchored at the RSA root in `testdata/legacy-root.pem`.
fn legacy_verifier(options: VerifyOptions) -> Verifier {
    let store = TrustStore::from_pem_file(&testdata("legacy-root.pem")).unwrap();
    let exceptions: Arc<dyn ExceptionStore> = Arc::new(MemoryExceptionStore::new());
    Verifier::new(Arc::new(store), exceptions).with_options(options)
}

fn testdata_chain(name: &str) -> CertificateChain {
    CertificateChain::from_pem(&std::fs::read(testdata(name)).unwrap()).unwrap()
}

#[test]
fn valid_chain_for_hostname_is_trusted() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf(&["example.com"]);
    let (verifier, _) = verifier(&[&ca]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    assert_eq!(verdict, Verdict::Trusted);
    assert!(verdict.rejections().is_empty());
}

#[test]
fn chain_through_intermediate_in_any_order() {
    let root = TestCa::new("Test Root");
    let inter = root.intermediate("Test Intermediate");
    let leaf = inter.leaf(&["example.com"]);
    let (verifier, _) = verifier(&[&root]);
    let ctx = VerificationContext::new("example.com");

    let unrelated = TestCa::new("Unrelated").der();
    let shuffled = chain(&[&leaf, &unrelated, &inter.der()]);
    assert_eq!(verifier.verify_chain(&shuffled, &ctx), Verdict::Trusted);
}

#[test]
fn issuers_sharing_one_key_do_not_stall_path_building() {
    let shared = rcgen::KeyPair::generate().unwrap();
    let loops: Vec<TestCa> = (1..=12)
        .map(|serial| TestCa::sharing_key("Loop", &shared, serial))
        .collect();
    let leaf = loops[0].leaf(&["example.com"]);
    let loop_ders: Vec<Vec<u8>> = loops.iter().map(TestCa::der).collect();
    let mut presented = vec![leaf.as_slice()];
    presented.extend(loop_ders.iter().map(Vec::as_slice));
    let (verifier, _) = verifier(&[]);

    let ctx = VerificationContext::new("example.com");

    let started = Instant::now();
    let verdict = verifier.verify_chain(&chain(&presented), &ctx);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(primary_reason(&verdict), Some(RejectReason::Untrusted));
}

#[test]
fn missing_intermediate_is_untrusted() {
    let root = TestCa::new("Test Root");
    let inter = root.intermediate("Test Intermediate");
    let leaf = inter.leaf(&["example.com"]);
    let (verifier, _) = verifier(&[&root]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    assert_eq!(primary_reason(&verdict), Some(RejectReason::Untrusted));
}

#[test]
fn lone_self_signed_leaf_is_self_signed() {
    let leaf = self_signed(&["example.com"]);
    let (verifier, _) = verifier(&[]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    match verdict {
        Verdict::Rejected { primary, .. } => {
            assert_eq!(primary.reason(), RejectReason::SelfSigned);
            assert!(!primary.user_requested);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn leaf_signed_by_non_ca_is_untrusted() {
    let root = TestCa::new("Test Root");
    // An end-entity certificate used as an issuer.
    let mut params = rcgen::CertificateParams::new(vec!["issuer.example.com".to_string()]).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "Not A CA");
    let fake_key = rcgen::KeyPair::generate().unwrap();
    let fake_issuer = params.signed_by(&fake_key, &root.cert, &root.key).unwrap();
    let fake = TestCa {
        cert: fake_issuer,
        key: fake_key,
    };
    let leaf = fake.leaf(&["example.com"]);
    let (verifier, _) = verifier(&[&root]);

    let verdict = verifier.verify_chain(
        &chain(&[&leaf, &fake.der()]),
        &VerificationContext::new("example.com"),
    );
    match verdict {
        Verdict::Rejected { primary, .. } => match primary.details {
            RejectDetails::Untrusted { message, .. } => assert!(message.contains("not a CA")),
            other => panic!("expected untrusted, got {:?}", other),
        },
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn expired_leaf_reports_expired() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_valid(&["example.com"], 2020, 2021);
    let (verifier, _) = verifier(&[&ca]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    match verdict {
        Verdict::Rejected { primary, .. } => match primary.details {
            RejectDetails::Expired { not_after, .. } => {
                assert!(not_after.starts_with("2021-01-01"))
            }
            other => panic!("expected expired, got {:?}", other),
        },
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn validity_is_checked_before_hostname() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_valid(&["other.com"], 2020, 2021);
    let (verifier, _) = verifier(&[&ca]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    assert_eq!(primary_reason(&verdict), Some(RejectReason::Expired));
    assert_eq!(verdict.rejections().len(), 1);
}

#[test]
fn expired_certificate_off_the_path_is_ignored() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf(&["example.com"]);
    let retired =
        TestCa::new("Retired Cross Root").leaf_valid(&["legacy.example.com"], 2019, 2021);
    let (verifier, _) = verifier(&[&ca]);
    let ctx = VerificationContext::new("example.com");

    assert_eq!(verifier.verify_chain(&chain(&[&leaf]), &ctx), Verdict::Trusted);
    assert_eq!(
        verifier.verify_chain(&chain(&[&leaf, &retired]), &ctx),
        Verdict::Trusted
    );
}

#[test]
fn future_leaf_is_not_activated() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_valid(&["example.com"], 2090, 2095);
    let (verifier, _) = verifier(&[&ca]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    assert_eq!(primary_reason(&verdict), Some(RejectReason::NotActivated));
}

#[test]
fn fixed_check_time_and_disabled_time_checks() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_valid(&["example.com"], 2020, 2021);
    let ctx = VerificationContext::new("example.com");

    let (at_2020, _) = verifier_with(
        &[&ca],
        VerifyOptions {
            at_time: Some(1_593_561_600), // 2020-07-01
            ..VerifyOptions::default()
        },
    );
    assert_eq!(at_2020.verify_chain(&chain(&[&leaf]), &ctx), Verdict::Trusted);

    let (untimed, _) = verifier_with(
        &[&ca],
        VerifyOptions {
            check_time: false,
            ..VerifyOptions::default()
        },
    );
    assert_eq!(untimed.verify_chain(&chain(&[&leaf]), &ctx), Verdict::Trusted);
}

#[test]
fn other_hostname_is_a_mismatch_with_names() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf(&["other.com"]);
    let (verifier, _) = verifier(&[&ca]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    match verdict {
        Verdict::Rejected { primary, .. } => match primary.details {
            RejectDetails::HostnameMismatch {
                expected_hostname,
                certificate_hostnames,
                ..
            } => {
                assert_eq!(expected_hostname, "example.com");
                assert_eq!(certificate_hostnames, vec!["other.com".to_string()]);
            }
            other => panic!("expected hostname mismatch, got {:?}", other),
        },
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn wildcard_covers_exactly_one_label() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf(&["*.example.com"]);
    let (verifier, _) = verifier(&[&ca]);
    let leaf_chain = chain(&[&leaf]);

    let check = |host: &str| verifier.verify_chain(&leaf_chain, &VerificationContext::new(host));
    assert_eq!(check("foo.example.com"), Verdict::Trusted);
    assert_eq!(
        primary_reason(&check("example.com")),
        Some(RejectReason::HostnameMismatch)
    );
    assert_eq!(
        primary_reason(&check("bar.foo.example.com")),
        Some(RejectReason::HostnameMismatch)
    );
}

#[test]
fn reference_identity_can_match() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf(&["xmpp.example.net"]);
    let (verifier, _) = verifier(&[&ca]);

    let ctx =
        VerificationContext::new("example.com").with_reference_identities(["xmpp.example.net"]);
    assert_eq!(verifier.verify_chain(&chain(&[&leaf]), &ctx), Verdict::Trusted);
}

#[test]
fn common_name_is_used_without_dns_sans() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_cn_only("legacy.example.com");
    let (verifier, _) = verifier(&[&ca]);

    let trusted = verifier.verify_chain(
        &chain(&[&leaf]),
        &VerificationContext::new("LEGACY.example.com."),
    );
    assert_eq!(trusted, Verdict::Trusted);
}

#[test]
fn common_name_is_ignored_when_dns_sans_exist() {
    let ca = TestCa::new("Test Root");
    // CN "test leaf" is never consulted; SAN is other.com.
    let leaf = ca.leaf(&["other.com"]);
    let (verifier, _) = verifier(&[&ca]);

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("test leaf"));
    assert_eq!(primary_reason(&verdict), Some(RejectReason::HostnameMismatch));
}

#[test]
fn ip_literals_match_ip_sans_only() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_ip("192.0.2.7".parse().unwrap());
    let (verifier, _) = verifier(&[&ca]);
    let leaf_chain = chain(&[&leaf]);

    assert_eq!(
        verifier.verify_chain(&leaf_chain, &VerificationContext::new("192.0.2.7")),
        Verdict::Trusted
    );
    assert_eq!(
        primary_reason(&verifier.verify_chain(&leaf_chain, &VerificationContext::new("192.0.2.8"))),
        Some(RejectReason::HostnameMismatch)
    );
}

#[test]
fn revoked_leaf_is_reported_with_reason() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_with_serial(&["example.com"], 0x2a);
    let (verifier, _) = verifier_with(
        &[&ca],
        VerifyOptions {
            crl_ders: vec![ca.crl(&[0x2a])],
            ..VerifyOptions::default()
        },
    );

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    match verdict {
        Verdict::Rejected { primary, .. } => match primary.details {
            RejectDetails::Revoked {
                serial, crl_reason, ..
            } => {
                assert_eq!(serial, "2A");
                assert_eq!(crl_reason, "keyCompromise");
            }
            other => panic!("expected revoked, got {:?}", other),
        },
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn crl_without_the_serial_passes() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf_with_serial(&["example.com"], 0x2b);
    let (verifier, _) = verifier_with(
        &[&ca],
        VerifyOptions {
            crl_ders: vec![ca.crl(&[0x2a])],
            ..VerifyOptions::default()
        },
    );
    assert_eq!(
        verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com")),
        Verdict::Trusted
    );
}

#[test]
fn modern_keys_pass_strength_check() {
    let ca = TestCa::new("Test Root");
    let inter = ca.intermediate("Test Intermediate");
    let leaf = inter.leaf(&["example.com"]);
    let (verifier, _) = verifier(&[&ca]);
    assert!(verifier.options().check_strength);
    assert_eq!(
        verifier.verify_chain(
            &chain(&[&leaf, &inter.der()]),
            &VerificationContext::new("example.com")
        ),
        Verdict::Trusted
    );
}

#[test]
fn small_rsa_key_is_insecure() {
    let leaf = testdata_chain("rsa1024-leaf.pem");
    let ctx = VerificationContext::new("example.com");

    let verdict = legacy_verifier(VerifyOptions::default()).verify_chain(&leaf, &ctx);
    match verdict {
        Verdict::Rejected { primary, .. } => match primary.details {
            RejectDetails::InsecureCipher { subject, message } => {
                assert!(subject.contains("small key"));
                assert!(message.contains("1024 bits"));
            }
            other => panic!("expected insecure cipher, got {:?}", other),
        },
        other => panic!("expected rejection, got {:?}", other),
    }

    let lenient = legacy_verifier(VerifyOptions {
        check_strength: false,
        ..VerifyOptions::default()
    });
    assert_eq!(lenient.verify_chain(&leaf, &ctx), Verdict::Trusted);
}

#[test]
fn sha1_signature_is_insecure() {
    let leaf = testdata_chain("sha1-leaf.pem");
    let ctx = VerificationContext::new("example.com");
    let insecure = |verdict: &Verdict| {
        verdict
            .rejections()
            .iter()
            .filter(|r| r.reason() == RejectReason::InsecureCipher)
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
    };

    let strict = legacy_verifier(VerifyOptions {
        composite: true,
        ..VerifyOptions::default()
    });
    let found = insecure(&strict.verify_chain(&leaf, &ctx));
    assert_eq!(found.len(), 1);
    assert!(found[0].contains("sha1WithRSAEncryption"));

    let lenient = legacy_verifier(VerifyOptions {
        composite: true,
        check_strength: false,
        ..VerifyOptions::default()
    });
    assert!(insecure(&lenient.verify_chain(&leaf, &ctx)).is_empty());
}

#[test]
fn composite_diagnosis_reports_every_failure_in_order() {
    let leaf = self_signed(&["other.com"]);
    let (verifier, _) = verifier_with(
        &[],
        VerifyOptions {
            composite: true,
            ..VerifyOptions::default()
        },
    );

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    let reasons: Vec<_> = verdict.rejections().iter().map(|r| r.reason()).collect();
    assert_eq!(
        reasons,
        vec![RejectReason::SelfSigned, RejectReason::HostnameMismatch]
    );
}

#[test]
fn custom_order_changes_primary_reason() {
    let leaf = self_signed(&["other.com"]);
    let (verifier, _) = verifier_with(
        &[],
        VerifyOptions {
            order: vec![CheckKind::Hostname, CheckKind::Trust],
            ..VerifyOptions::default()
        },
    );

    let verdict = verifier.verify_chain(&chain(&[&leaf]), &VerificationContext::new("example.com"));
    assert_eq!(primary_reason(&verdict), Some(RejectReason::HostnameMismatch));
    assert_eq!(verdict.rejections().len(), 1);
}

#[test]
fn overlong_chain_exceeds_limit() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf(&["example.com"]);
    let (verifier, _) = verifier_with(
        &[&ca],
        VerifyOptions {
            max_chain_depth: 2,
            ..VerifyOptions::default()
        },
    );
    let ca_der = ca.der();
    let verdict = verifier.verify_chain(
        &chain(&[&leaf, &ca_der, &ca_der]),
        &VerificationContext::new("example.com"),
    );
    assert_eq!(primary_reason(&verdict), Some(RejectReason::LimitExceeded));
}

#[test]
fn unparsable_leaf_is_unknown() {
    let (verifier, _) = verifier(&[]);
    let verdict = verifier.verify_chain(
        &chain(&[&[0x30, 0x03, 0x02, 0x01, 0x00]]),
        &VerificationContext::new("example.com"),
    );
    assert_eq!(primary_reason(&verdict), Some(RejectReason::Unknown));
}

#[test]
fn stored_exception_turns_failure_into_trust() {
    let ca = TestCa::new("Test Root");
    let leaf = ca.leaf(&["other.com"]);
    let (verifier, exceptions) = verifier(&[&ca]);
    let leaf_chain = chain(&[&leaf]);
    let ctx = VerificationContext::new("example.com");

    assert!(!verifier.verify_chain(&leaf_chain, &ctx).is_trusted());
    let fingerprint = verifier.fingerprint(&leaf_chain);
    exceptions.store("Example.COM", &fingerprint).unwrap();

    assert_eq!(
        verifier.verify_chain(&leaf_chain, &ctx),
        Verdict::TrustedByException { fingerprint }
    );
    // The exception is bound to the host.
    assert!(!verifier
        .verify_chain(&leaf_chain, &VerificationContext::new("example.org"))
        .is_trusted());
}
