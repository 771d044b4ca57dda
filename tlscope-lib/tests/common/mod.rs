//! Shared helpers: mint throwaway CA hierarchies with rcgen.
#![allow(dead_code)]

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use tlscope_lib::{Chain, TrustStoreSet};

/// A generated certificate together with its signing key.
pub struct TestCert {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl TestCert {
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().as_ref().to_vec()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }
}

/// Self-signed root CA.
pub fn make_root(cn: &str) -> TestCert {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params.distinguished_name.push(DnType::CountryName, "US");
    params
        .distinguished_name
        .push(DnType::OrganizationName, "Tlscope Test PKI");
    params.distinguished_name.push(DnType::CommonName, cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let cert = params.self_signed(&key).unwrap();
    TestCert { cert, key }
}

/// Intermediate CA signed by `issuer`.
pub fn make_intermediate(cn: &str, issuer: &TestCert) -> TestCert {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::new()).unwrap();
    params
        .distinguished_name
        .push(DnType::OrganizationName, "Tlscope Test PKI");
    params.distinguished_name.push(DnType::CommonName, cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    TestCert { cert, key }
}

/// End-entity certificate with DNS SANs, signed by `issuer`.
pub fn make_leaf(cn: &str, sans: &[&str], issuer: &TestCert) -> TestCert {
    make_leaf_with(cn, sans, issuer, |_| {})
}

/// End-entity certificate with extra parameter tweaks.
pub fn make_leaf_with(
    cn: &str,
    sans: &[&str],
    issuer: &TestCert,
    tweak: impl FnOnce(&mut CertificateParams),
) -> TestCert {
    let key = KeyPair::generate().unwrap();
    let names: Vec<String> = sans.iter().map(|s| s.to_string()).collect();
    let mut params = CertificateParams::new(names).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    tweak(&mut params);
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    TestCert { cert, key }
}

/// Self-signed end-entity certificate (subject == issuer, no CA rights).
pub fn make_self_signed_leaf(cn: &str, sans: &[&str]) -> TestCert {
    let key = KeyPair::generate().unwrap();
    let names: Vec<String> = sans.iter().map(|s| s.to_string()).collect();
    let mut params = CertificateParams::new(names).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    let cert = params.self_signed(&key).unwrap();
    TestCert { cert, key }
}

/// A trust-store set where all five vendors share one root.
pub fn uniform_stores(root: &TestCert) -> TrustStoreSet {
    TrustStoreSet::uniform(root.pem().as_bytes()).unwrap()
}

/// Assemble an observed chain from DER bodies.
pub fn chain_of(domain: &str, ip: &str, certs: Vec<Vec<u8>>) -> Chain {
    Chain {
        domain: domain.to_string(),
        ip: ip.to_string(),
        certs,
    }
}
