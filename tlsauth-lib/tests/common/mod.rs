//! Certificate fixtures shared by the integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams, DnType,
    IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SanType,
    SerialNumber,
};
use std::net::IpAddr;
use std::sync::Arc;
use tlsauth_lib::{
    CertificateChain, ExceptionStore, MemoryExceptionStore, TrustStore, Verifier, VerifyOptions,
};

/// A CA certificate with its key, able to issue leaves and CRLs.
pub struct TestCa {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl TestCa {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().expect("key pair");
        let cert = ca_params(cn).self_signed(&key).expect("self-signed CA");
        TestCa { cert, key }
    }

    /// An intermediate CA signed by this CA.
    pub fn intermediate(&self, cn: &str) -> TestCa {
        let key = KeyPair::generate().expect("key pair");
        let cert = ca_params(cn)
            .signed_by(&key, &self.cert, &self.key)
            .expect("intermediate");
        TestCa { cert, key }
    }

    /// Self-signed CA reusing `key`, so several of them verify each other.
    pub fn sharing_key(cn: &str, key: &KeyPair, serial: u8) -> TestCa {
        let key = KeyPair::from_pem(&key.serialize_pem()).expect("key copy");
        let mut params = ca_params(cn);
        params.serial_number = Some(SerialNumber::from(vec![serial]));
        let cert = params.self_signed(&key).expect("self-signed CA");
        TestCa { cert, key }
    }

    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Leaf for the given DNS names, valid from 2020 to 2099.
    pub fn leaf(&self, names: &[&str]) -> Vec<u8> {
        self.issue(leaf_params(names))
    }

    /// Leaf for the given names, valid over `[from, until]` (years).
    pub fn leaf_valid(&self, names: &[&str], from: i32, until: i32) -> Vec<u8> {
        let mut params = leaf_params(names);
        params.not_before = rcgen::date_time_ymd(from, 1, 1);
        params.not_after = rcgen::date_time_ymd(until, 1, 1);
        self.issue(params)
    }

    /// Leaf with an explicit serial number.
    pub fn leaf_with_serial(&self, names: &[&str], serial: u8) -> Vec<u8> {
        let mut params = leaf_params(names);
        params.serial_number = Some(SerialNumber::from(vec![serial]));
        self.issue(params)
    }

    /// Leaf with only a subject CN and no SAN extension.
    pub fn leaf_cn_only(&self, cn: &str) -> Vec<u8> {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        params.distinguished_name.push(DnType::CommonName, cn);
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2099, 1, 1);
        self.issue(params)
    }

    /// Leaf carrying an IP address SAN.
    pub fn leaf_ip(&self, ip: IpAddr) -> Vec<u8> {
        let mut params = leaf_params(&[]);
        params.subject_alt_names = vec![SanType::IpAddress(ip)];
        self.issue(params)
    }

    pub fn issue(&self, params: CertificateParams) -> Vec<u8> {
        let key = KeyPair::generate().expect("key pair");
        params
            .signed_by(&key, &self.cert, &self.key)
            .expect("leaf")
            .der()
            .to_vec()
    }

    /// CRL revoking the given serials, current from 2020 to 2099.
    pub fn crl(&self, revoked_serials: &[u8]) -> Vec<u8> {
        let params = CertificateRevocationListParams {
            this_update: rcgen::date_time_ymd(2020, 1, 1),
            next_update: rcgen::date_time_ymd(2099, 1, 1),
            crl_number: SerialNumber::from(vec![1]),
            issuing_distribution_point: None,
            revoked_certs: revoked_serials
                .iter()
                .map(|s| RevokedCertParams {
                    serial_number: SerialNumber::from(vec![*s]),
                    revocation_time: rcgen::date_time_ymd(2021, 1, 1),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params
            .signed_by(&self.cert, &self.key)
            .expect("crl")
            .der()
            .to_vec()
    }
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
    params.distinguished_name.push(DnType::CommonName, cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2099, 1, 1);
    params
}

fn leaf_params(names: &[&str]) -> CertificateParams {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = CertificateParams::new(names).expect("params");
    params.distinguished_name.push(DnType::CommonName, "test leaf");
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2099, 1, 1);
    params
}

/// Self-signed leaf for `names`.
pub fn self_signed(names: &[&str]) -> Vec<u8> {
    let key = KeyPair::generate().expect("key pair");
    leaf_params(names)
        .self_signed(&key)
        .expect("self-signed")
        .der()
        .to_vec()
}

pub fn chain(certs: &[&[u8]]) -> CertificateChain {
    CertificateChain::from_der_list(certs.iter().map(|c| c.to_vec()).collect()).expect("chain")
}

pub fn trust_store(anchors: &[&TestCa]) -> Arc<TrustStore> {
    let mut store = TrustStore::new();
    for ca in anchors {
        store.add_der(&ca.der()).expect("anchor");
    }
    Arc::new(store)
}

pub fn verifier(anchors: &[&TestCa]) -> (Verifier, Arc<MemoryExceptionStore>) {
    verifier_with(anchors, VerifyOptions::default())
}

pub fn verifier_with(
    anchors: &[&TestCa],
    options: VerifyOptions,
) -> (Verifier, Arc<MemoryExceptionStore>) {
    let exceptions = Arc::new(MemoryExceptionStore::new());
    let store: Arc<dyn ExceptionStore> = exceptions.clone();
    let verifier = Verifier::new(trust_store(anchors), store).with_options(options);
    (verifier, exceptions)
}
