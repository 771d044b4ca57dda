//! Certificate fingerprint computation.
//!
//! All five fingerprints are deterministic functions of the DER body.

use crate::certificate::Hashes;
use crate::util;
use digest::Digest;
use x509_parser::prelude::*;

/// Uppercase-hex MD5 of the input.
pub fn md5_hex(data: &[u8]) -> String {
    util::hex_upper(&md5::Md5::digest(data))
}

/// Uppercase-hex SHA-1 of the input.
pub fn sha1_hex(data: &[u8]) -> String {
    util::hex_upper(&sha1::Sha1::digest(data))
}

/// Uppercase-hex SHA-256 of the input.
pub fn sha256_hex(data: &[u8]) -> String {
    util::hex_upper(&sha2::Sha256::digest(data))
}

/// Uppercase-hex SHA-256 of the raw subject name concatenated with the raw
/// SubjectPublicKeyInfo.
pub fn sha256_subject_spki(raw_subject: &[u8], raw_spki: &[u8]) -> String {
    let mut h = sha2::Sha256::new();
    h.update(raw_subject);
    h.update(raw_spki);
    util::hex_upper(&h.finalize())
}

/// RFC 7469 pin: standard padded base64 of the SHA-256 of the DER-encoded
/// SubjectPublicKeyInfo.
pub fn pkp_sha256(spki_der: &[u8]) -> String {
    util::base64_standard(&sha2::Sha256::digest(spki_der))
}

/// Re-serialize a parsed SubjectPublicKeyInfo to DER.
///
/// Rebuilds the SPKI TLV envelope from its parsed components (algorithm
/// OID, optional parameters, key bit string). The source DER is assumed
/// canonical, so the result is byte-equal to the on-wire SPKI.
pub fn spki_der(spki: &SubjectPublicKeyInfo) -> Option<Vec<u8>> {
    use x509_parser::der_parser::asn1_rs::ToDer;

    let oid_der = spki.algorithm.algorithm.to_der_vec().ok()?;
    let params_der = match &spki.algorithm.parameters {
        Some(any) => any.to_der_vec().ok()?,
        None => Vec::new(),
    };

    let key_data = &spki.subject_public_key.data;

    let mut algo_content = Vec::new();
    algo_content.extend_from_slice(&oid_der);
    algo_content.extend_from_slice(&params_der);

    let mut bitstring_content = Vec::with_capacity(1 + key_data.len());
    bitstring_content.push(0x00); // unused bits
    bitstring_content.extend_from_slice(key_data);

    let algo_seq = util::der_wrap(0x30, &algo_content)?;
    let bitstring = util::der_wrap(0x03, &bitstring_content)?;

    let mut outer_content = Vec::new();
    outer_content.extend_from_slice(&algo_seq);
    outer_content.extend_from_slice(&bitstring);
    util::der_wrap(0x30, &outer_content)
}

/// Compute all five fingerprints for a parsed certificate.
///
/// `pin-sha256` hashes the re-serialized SPKI of the parsed key; for
/// unknown key algorithms it is empty.
pub(crate) fn compute_hashes(x509: &X509Certificate, raw_der: &[u8], known_key: bool) -> Hashes {
    let spki = &x509.tbs_certificate.subject_pki;
    let pkp = if known_key {
        spki_der(spki).map(|der| pkp_sha256(&der)).unwrap_or_default()
    } else {
        String::new()
    };
    Hashes {
        md5: md5_hex(raw_der),
        sha1: sha1_hex(raw_der),
        sha256: sha256_hex(raw_der),
        sha256_subject_spki: sha256_subject_spki(x509.subject().as_raw(), spki.raw),
        pkp_sha256: pkp,
    }
}
