//! Conversion of parsed X.509 certificates into the stored form.

use crate::certificate::{Certificate, Extensions, KeyInfo, Subject, Validity};
use crate::fingerprint;
use crate::oid;
use crate::util;
use crate::TlscopeError;
use chrono::{DateTime, Utc};
use tracing::warn;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Parent-signature marker for a certificate observed with no known signer,
/// e.g. a root served as a leaf.
pub const NO_PARENT: &str = "-- --";

/// The closed signature-algorithm name table; OIDs outside it map to
/// `UnknownSignatureAlgorithm`.
const SIGNATURE_ALGORITHMS: [(&str, &str); 12] = [
    (oid::MD2_WITH_RSA, "MD2WithRSA"),
    (oid::MD5_WITH_RSA, "MD5WithRSA"),
    (oid::SHA1_WITH_RSA, "SHA1WithRSA"),
    (oid::SHA256_WITH_RSA, "SHA256WithRSA"),
    (oid::SHA384_WITH_RSA, "SHA384WithRSA"),
    (oid::SHA512_WITH_RSA, "SHA512WithRSA"),
    (oid::DSA_WITH_SHA1, "DSAWithSHA1"),
    (oid::DSA_WITH_SHA256, "DSAWithSHA256"),
    (oid::ECDSA_WITH_SHA1, "ECDSAWithSHA1"),
    (oid::ECDSA_WITH_SHA256, "ECDSAWithSHA256"),
    (oid::ECDSA_WITH_SHA384, "ECDSAWithSHA384"),
    (oid::ECDSA_WITH_SHA512, "ECDSAWithSHA512"),
];

/// Parse one DER certificate from the front of `input`.
///
/// Returns the exact certificate bytes (trailing data trimmed, so that
/// fingerprints are computed over the correct content) alongside the parsed
/// form.
pub(crate) fn parse_der_prefix(input: &[u8]) -> Result<(&[u8], X509Certificate<'_>), TlscopeError> {
    let (remaining, x509) =
        X509Certificate::from_der(input).map_err(|e| TlscopeError::Parse(format!("{}", e)))?;
    let cert_len = input.len() - remaining.len();
    Ok((input.get(..cert_len).unwrap_or(input), x509))
}

/// Parse a DER certificate and canonicalize it in one step.
pub fn parse_stored(
    input: &[u8],
    parent_signature: &str,
    domain: &str,
    ip: &str,
    observed_at: DateTime<Utc>,
) -> Result<Certificate, TlscopeError> {
    let (cert_der, x509) = parse_der_prefix(input)?;
    Ok(cert_to_stored(
        &x509,
        cert_der,
        parent_signature,
        domain,
        ip,
        observed_at,
    ))
}

/// Build the stored form of a parsed certificate.
///
/// `parent_signature` is the hex SHA-256 of the immediate signer, or
/// [`NO_PARENT`] when none is known. `domain` and `ip` are only recorded on
/// non-CA certificates. Validation verdicts start out empty; the chain
/// validator stamps them.
pub fn cert_to_stored(
    x509: &X509Certificate,
    raw_der: &[u8],
    parent_signature: &str,
    domain: &str,
    ip: &str,
    observed_at: DateTime<Utc>,
) -> Certificate {
    let tbs = &x509.tbs_certificate;
    let version = tbs.version.0 + 1;

    let (key_info, known_key) = build_key_info(&tbs.subject_pki);

    let (extensions, bc) = build_extensions(x509);

    // BasicConstraints is only defined for v3; earlier versions fall back
    // to whatever the extension parser reported, with no display string.
    let (basic_constraints_display, ca) = match bc {
        Some(ref bc) if version >= 3 => ("Critical".to_string(), bc.ca),
        Some(ref bc) => (String::new(), bc.ca),
        None => (String::new(), false),
    };

    let mut stored = Certificate {
        serial: util::hex_upper(&tbs.serial.to_bytes_be()),
        scan_target: String::new(),
        ips: Default::default(),
        version,
        signature_algorithm: signature_algorithm_name(&x509.signature_algorithm),
        issuer: build_subject(x509.issuer()),
        subject: build_subject(x509.subject()),
        validity: Validity {
            not_before: datetime_utc(&tbs.validity.not_before),
            not_after: datetime_utc(&tbs.validity.not_after),
        },
        key_info,
        extensions,
        basic_constraints_display,
        basic_constraints_critical: bc.map(|bc| bc.critical).unwrap_or(false),
        ca,
        parent_signatures: Default::default(),
        validation_info: Default::default(),
        first_seen: observed_at,
        last_seen: observed_at,
        hashes: fingerprint::compute_hashes(x509, raw_der, known_key),
        raw: util::base64_standard(raw_der),
    };

    stored.parent_signatures.insert(parent_signature.to_string());

    if !stored.ca {
        stored.scan_target = domain.to_string();
        if !ip.is_empty() {
            stored.ips.insert(ip.to_string());
        }
    }

    stored
}

fn signature_algorithm_name(algo: &AlgorithmIdentifier) -> String {
    let oid_str = algo.algorithm.to_id_string();
    SIGNATURE_ALGORITHMS
        .iter()
        .find(|(oid, _)| *oid == oid_str)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| "UnknownSignatureAlgorithm".to_string())
}

/// Collect the ordered C/O/OU lists and the first CN from an X.509 name.
fn build_subject(name: &X509Name) -> Subject {
    let mut subject = Subject::default();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let value = match attr.as_str() {
                Ok(v) => v.to_string(),
                Err(_) => continue,
            };
            match attr.attr_type().to_id_string().as_str() {
                oid::COUNTRY => subject.country.push(value),
                oid::ORGANIZATION => subject.organisation.push(value),
                oid::ORGANIZATIONAL_UNIT => subject.org_unit.push(value),
                oid::COMMON_NAME if subject.common_name.is_empty() => {
                    subject.common_name = value;
                }
                _ => {}
            }
        }
    }
    subject
}

fn datetime_utc(t: &ASN1Time) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(t.timestamp(), 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Extract the public-key variant. The second value reports whether the
/// algorithm family is known (an unknown family gets no pin hash).
///
/// A key that belongs to a known family but fails to decode yields a
/// partial record and a log line; the scan continues.
fn build_key_info(spki: &SubjectPublicKeyInfo) -> (KeyInfo, bool) {
    match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => {
            let exponent = match exponent_u64(rsa.exponent) {
                Some(e) => e,
                None => {
                    warn!("RSA exponent does not fit in 64 bits, storing 0");
                    0
                }
            };
            (
                KeyInfo::Rsa {
                    size: util::bit_len_be(rsa.modulus),
                    exponent,
                },
                true,
            )
        }
        Ok(PublicKey::DSA(y)) => {
            let (p, q, g) = match dsa_parameters(spki) {
                Some(params) => params,
                None => {
                    warn!("failed to decode DSA parameters, storing partial key info");
                    (String::new(), String::new(), String::new())
                }
            };
            (
                KeyInfo::Dsa {
                    size: util::bit_len_be(y),
                    p,
                    q,
                    g,
                    y: util::decimal_from_be_bytes(y),
                },
                true,
            )
        }
        Ok(PublicKey::EC(point)) => {
            let (curve, size) = named_curve(spki);
            let (x, y) = match split_ec_point(point.data(), size) {
                Some(xy) => xy,
                None => {
                    warn!("EC point is not in uncompressed form, storing partial key info");
                    (String::new(), String::new())
                }
            };
            (
                KeyInfo::Ecdsa {
                    size,
                    curve,
                    x,
                    y,
                },
                true,
            )
        }
        _ => (KeyInfo::Unknown, false),
    }
}

fn exponent_u64(bytes: &[u8]) -> Option<u64> {
    let stripped: &[u8] = match bytes.iter().position(|&b| b != 0) {
        Some(pos) => &bytes[pos..],
        None => return Some(0),
    };
    if stripped.len() > 8 {
        return None;
    }
    let mut value = 0u64;
    for &b in stripped {
        value = (value << 8) | u64::from(b);
    }
    Some(value)
}

/// Decode the Dss-Parms SEQUENCE (p, q, g) from the SPKI algorithm
/// parameters.
fn dsa_parameters(spki: &SubjectPublicKeyInfo) -> Option<(String, String, String)> {
    use x509_parser::der_parser::asn1_rs::ToDer;
    use x509_parser::der_parser::parse_der;

    let params = spki.algorithm.parameters.as_ref()?;
    let der = params.to_der_vec().ok()?;
    let (_, obj) = parse_der(&der).ok()?;
    let seq = obj.as_sequence().ok()?;
    let p = seq.first()?.as_bigint().ok()?;
    let q = seq.get(1)?.as_bigint().ok()?;
    let g = seq.get(2)?.as_bigint().ok()?;
    Some((p.to_string(), q.to_string(), g.to_string()))
}

fn named_curve(spki: &SubjectPublicKeyInfo) -> (String, u32) {
    if let Some(params) = &spki.algorithm.parameters {
        if let Ok(curve_oid) = params.as_oid() {
            return match curve_oid.to_id_string().as_str() {
                oid::CURVE_P224 => ("P-224".into(), 224),
                oid::CURVE_P256 => ("P-256".into(), 256),
                oid::CURVE_P384 => ("P-384".into(), 384),
                oid::CURVE_P521 => ("P-521".into(), 521),
                other => (other.to_string(), 0),
            };
        }
    }
    ("unknown".into(), 0)
}

/// Split an uncompressed EC point (0x04 ‖ X ‖ Y) into decimal coordinates.
fn split_ec_point(data: &[u8], curve_bits: u32) -> Option<(String, String)> {
    let body = match data.split_first() {
        Some((0x04, rest)) => rest,
        _ => return None,
    };
    let coord_len = if curve_bits > 0 {
        ((curve_bits as usize) + 7) / 8
    } else if body.len() % 2 == 0 {
        body.len() / 2
    } else {
        return None;
    };
    if body.len() != coord_len * 2 {
        return None;
    }
    let (x, y) = body.split_at(coord_len);
    Some((
        util::decimal_from_be_bytes(x),
        util::decimal_from_be_bytes(y),
    ))
}

struct BasicConstraintsInfo {
    ca: bool,
    critical: bool,
}

/// Walk the extension list once, filling the stored extension record.
///
/// Returns the BasicConstraints info separately since the `ca` flag and the
/// display string are computed at the certificate level.
fn build_extensions(x509: &X509Certificate) -> (Extensions, Option<BasicConstraintsInfo>) {
    let mut out = Extensions::default();
    let mut bc = None;

    for ext in x509.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::BasicConstraints(constraints) => {
                bc = Some(BasicConstraintsInfo {
                    ca: constraints.ca,
                    critical: ext.critical,
                });
            }
            ParsedExtension::KeyUsage(ku) => {
                out.key_usage = key_usage_names(ku);
            }
            ParsedExtension::ExtendedKeyUsage(_) => {
                out.extended_key_usage = extended_key_usage_names(ext.value);
            }
            ParsedExtension::SubjectAlternativeName(san) => {
                for gn in &san.general_names {
                    if let GeneralName::DNSName(name) = gn {
                        out.subject_alternative_name.push(name.to_string());
                    }
                }
            }
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                out.subject_key_id = util::base64_standard(ski.0);
            }
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                if let Some(ki) = &aki.key_identifier {
                    out.authority_key_id = util::base64_standard(ki.0);
                }
            }
            ParsedExtension::CRLDistributionPoints(cdp) => {
                for point in &cdp.points {
                    if let Some(x509_parser::extensions::DistributionPointName::FullName(names)) =
                        &point.distribution_point
                    {
                        for gn in names {
                            if let GeneralName::URI(uri) = gn {
                                out.crl_distribution_points.push(uri.to_string());
                            }
                        }
                    }
                }
            }
            ParsedExtension::CertificatePolicies(policies) => {
                out.policy_identifiers = policies
                    .iter()
                    .map(|p| p.policy_id.to_id_string())
                    .collect();
            }
            ParsedExtension::NameConstraints(nc) => {
                if let Some(permitted) = &nc.permitted_subtrees {
                    for subtree in permitted {
                        if let GeneralName::DNSName(name) = &subtree.base {
                            out.permitted_names.push(name.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    out.is_name_constrained = !out.permitted_names.is_empty();
    (out, bc)
}

/// The nine key-usage bit names, in bit order. Strings match OpenSSL's
/// textual output.
fn key_usage_names(ku: &KeyUsage) -> Vec<String> {
    let mut usage = Vec::new();
    if ku.digital_signature() {
        usage.push("Digital Signature".to_string());
    }
    if ku.non_repudiation() {
        usage.push("Non Repudiation".to_string());
    }
    if ku.key_encipherment() {
        usage.push("Key Encipherment".to_string());
    }
    if ku.data_encipherment() {
        usage.push("Data Encipherment".to_string());
    }
    if ku.key_agreement() {
        usage.push("Key Agreement".to_string());
    }
    if ku.key_cert_sign() {
        usage.push("Certificate Sign".to_string());
    }
    if ku.crl_sign() {
        usage.push("CRL Sign".to_string());
    }
    if ku.encipher_only() {
        usage.push("Encipher Only".to_string());
    }
    if ku.decipher_only() {
        usage.push("Decipher Only".to_string());
    }
    usage
}

/// Translate extended key usages through the closed name table, preserving
/// the order they are declared in the certificate; OIDs outside the table
/// are appended in dotted-decimal form.
///
/// Walks the raw ExtKeyUsageSyntax SEQUENCE instead of the parsed
/// extension, whose per-purpose flags lose the declaration order.
fn extended_key_usage_names(raw_value: &[u8]) -> Vec<String> {
    use x509_parser::der_parser::parse_der;

    let mut usage = Vec::new();
    let parsed = match parse_der(raw_value) {
        Ok((_, obj)) => obj,
        Err(_) => return usage,
    };
    let seq = match parsed.as_sequence() {
        Ok(seq) => seq,
        Err(_) => return usage,
    };
    for item in seq {
        if let Ok(eku_oid) = item.as_oid() {
            usage.push(extended_key_usage_name(&eku_oid.to_id_string()));
        }
    }
    usage
}

fn extended_key_usage_name(dotted: &str) -> String {
    match dotted {
        oid::EKU_ANY => "ExtKeyUsageAny".to_string(),
        oid::EKU_SERVER_AUTH => "ExtKeyUsageServerAuth".to_string(),
        oid::EKU_CLIENT_AUTH => "ExtKeyUsageClientAuth".to_string(),
        oid::EKU_CODE_SIGNING => "ExtKeyUsageCodeSigning".to_string(),
        oid::EKU_EMAIL_PROTECTION => "ExtKeyUsageEmailProtection".to_string(),
        oid::EKU_IPSEC_END_SYSTEM => "ExtKeyUsageIPSECEndSystem".to_string(),
        oid::EKU_IPSEC_TUNNEL => "ExtKeyUsageIPSECTunnel".to_string(),
        oid::EKU_IPSEC_USER => "ExtKeyUsageIPSECUser".to_string(),
        oid::EKU_TIME_STAMPING => "ExtKeyUsageTimeStamping".to_string(),
        oid::EKU_OCSP_SIGNING => "ExtKeyUsageOCSPSigning".to_string(),
        oid::EKU_MS_SERVER_GATED_CRYPTO => "ExtKeyUsageMicrosoftServerGatedCrypto".to_string(),
        oid::EKU_NS_SERVER_GATED_CRYPTO => "ExtKeyUsageNetscapeServerGatedCrypto".to_string(),
        other => other.to_string(),
    }
}
