//! Stored-form certificate data model.
//!
//! A [`Certificate`] is the unit of persistence: one record per distinct
//! DER, identified by the SHA-256 of its bytes. Repeated observations of
//! the same DER merge into the existing record (see
//! [`Certificate::merge_observation`]) rather than creating a new one.

use crate::util;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The five vendor root stores every certificate is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrustStoreName {
    Ubuntu,
    Mozilla,
    Microsoft,
    Apple,
    Android,
}

impl TrustStoreName {
    /// All five stores, in canonical order.
    pub const ALL: [TrustStoreName; 5] = [
        TrustStoreName::Ubuntu,
        TrustStoreName::Mozilla,
        TrustStoreName::Microsoft,
        TrustStoreName::Apple,
        TrustStoreName::Android,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustStoreName::Ubuntu => "Ubuntu",
            TrustStoreName::Mozilla => "Mozilla",
            TrustStoreName::Microsoft => "Microsoft",
            TrustStoreName::Apple => "Apple",
            TrustStoreName::Android => "Android",
        }
    }
}

impl std::fmt::Display for TrustStoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of one root store for one certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationInfo {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(rename = "validationError", default)]
    pub validation_error: String,
}

impl ValidationInfo {
    pub fn valid() -> Self {
        ValidationInfo {
            is_valid: true,
            validation_error: String::new(),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        ValidationInfo {
            is_valid: false,
            validation_error: error.into(),
        }
    }
}

/// The five per-store verdicts of a certificate.
///
/// A fixed-size record rather than an open map: every store is always
/// present, so "absent key" cannot be observed downstream. A freshly
/// canonicalized certificate carries five default (invalid, no error)
/// entries until the validator stamps it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMap {
    #[serde(rename = "Ubuntu")]
    pub ubuntu: ValidationInfo,
    #[serde(rename = "Mozilla")]
    pub mozilla: ValidationInfo,
    #[serde(rename = "Microsoft")]
    pub microsoft: ValidationInfo,
    #[serde(rename = "Apple")]
    pub apple: ValidationInfo,
    #[serde(rename = "Android")]
    pub android: ValidationInfo,
}

impl ValidationMap {
    pub fn get(&self, name: TrustStoreName) -> &ValidationInfo {
        match name {
            TrustStoreName::Ubuntu => &self.ubuntu,
            TrustStoreName::Mozilla => &self.mozilla,
            TrustStoreName::Microsoft => &self.microsoft,
            TrustStoreName::Apple => &self.apple,
            TrustStoreName::Android => &self.android,
        }
    }

    pub fn set(&mut self, name: TrustStoreName, info: ValidationInfo) {
        match name {
            TrustStoreName::Ubuntu => self.ubuntu = info,
            TrustStoreName::Mozilla => self.mozilla = info,
            TrustStoreName::Microsoft => self.microsoft = info,
            TrustStoreName::Apple => self.apple = info,
            TrustStoreName::Android => self.android = info,
        }
    }

    /// The five validity flags in canonical store order, for the
    /// [`Trust`] record.
    pub fn booleans(&self) -> [bool; 5] {
        [
            self.ubuntu.is_valid,
            self.mozilla.is_valid,
            self.microsoft.is_valid,
            self.apple.is_valid,
            self.android.is_valid,
        ]
    }

    /// True if at least one store considers the certificate valid.
    pub fn trusted_anywhere(&self) -> bool {
        self.booleans().iter().any(|b| *b)
    }
}

/// Certificate subject or issuer: ordered attribute lists plus common name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "c", default)]
    pub country: Vec<String>,
    #[serde(rename = "o", default)]
    pub organisation: Vec<String>,
    #[serde(rename = "ou", default)]
    pub org_unit: Vec<String>,
    #[serde(rename = "cn", default)]
    pub common_name: String,
}

impl std::fmt::Display for Subject {
    /// One-line rendering in OpenSSL's display order:
    /// `C=US, O=Example Corp, CN=example.com`. Empty components are
    /// omitted; repeated list elements render as additional `C=`/`O=`/`OU=`
    /// parts.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut comp: Vec<String> = Vec::new();
        if !self.country.is_empty() {
            comp.push(format!("C={}", self.country.join(", C=")));
        }
        if !self.organisation.is_empty() {
            comp.push(format!("O={}", self.organisation.join(", O=")));
        }
        if !self.org_unit.is_empty() {
            comp.push(format!("OU={}", self.org_unit.join(", OU=")));
        }
        if !self.common_name.is_empty() {
            comp.push(format!("CN={}", self.common_name));
        }
        f.write_str(&comp.join(", "))
    }
}

/// Validity window, both ends UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    #[serde(rename = "notBefore")]
    pub not_before: DateTime<Utc>,
    #[serde(rename = "notAfter")]
    pub not_after: DateTime<Utc>,
}

/// Public key parameters, tagged by algorithm family.
///
/// DSA and ECDSA integers are decimal text so downstream JSON consumers do
/// not need a big-integer type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "alg")]
pub enum KeyInfo {
    #[serde(rename = "RSA")]
    Rsa { size: u32, exponent: u64 },
    #[serde(rename = "DSA")]
    Dsa {
        size: u32,
        p: String,
        q: String,
        g: String,
        y: String,
    },
    #[serde(rename = "ECDSA")]
    Ecdsa {
        size: u32,
        curve: String,
        x: String,
        y: String,
    },
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Default for KeyInfo {
    fn default() -> Self {
        KeyInfo::Unknown
    }
}

/// Decoded X.509v3 extensions of interest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    /// Base64 of the authority key identifier, empty when absent.
    #[serde(rename = "authorityKeyId", default)]
    pub authority_key_id: String,
    /// Base64 of the subject key identifier, empty when absent.
    #[serde(rename = "subjectKeyId", default)]
    pub subject_key_id: String,
    #[serde(rename = "keyUsage", default)]
    pub key_usage: Vec<String>,
    #[serde(rename = "extendedKeyUsage", default)]
    pub extended_key_usage: Vec<String>,
    /// DNS names only; other SAN forms are not captured.
    #[serde(rename = "subjectAlternativeName", default)]
    pub subject_alternative_name: Vec<String>,
    #[serde(rename = "crlDistributionPoints", default)]
    pub crl_distribution_points: Vec<String>,
    /// Policy OIDs in dotted-decimal form.
    #[serde(rename = "policyIdentifiers", default)]
    pub policy_identifiers: Vec<String>,
    #[serde(rename = "isNameConstrained", default)]
    pub is_name_constrained: bool,
    #[serde(rename = "permittedNames", default)]
    pub permitted_names: Vec<String>,
}

/// The five content fingerprints of a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashes {
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub sha1: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(rename = "sha256_subject_spki", default)]
    pub sha256_subject_spki: String,
    #[serde(rename = "pin-sha256", default)]
    pub pkp_sha256: String,
}

/// A stored certificate: the canonical record for one distinct DER.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: String,
    /// Hostname this certificate was served for. Leaves only; never set on
    /// CA certificates.
    #[serde(rename = "scanTarget", default)]
    pub scan_target: String,
    /// IPs the certificate was observed on. Leaves only.
    #[serde(default)]
    pub ips: BTreeSet<String>,
    pub version: u32,
    #[serde(rename = "signatureAlgorithm")]
    pub signature_algorithm: String,
    pub issuer: Subject,
    pub subject: Subject,
    pub validity: Validity,
    #[serde(rename = "keyInfo")]
    pub key_info: KeyInfo,
    pub extensions: Extensions,
    /// The literal string `"Critical"` when the certificate is v3 and
    /// carries a valid BasicConstraints extension; empty otherwise. This is
    /// a display convention kept for wire compatibility, not the
    /// extension's criticality bit — that is
    /// [`Certificate::basic_constraints_critical`].
    #[serde(rename = "basicConstraintsDisplay", default)]
    pub basic_constraints_display: String,
    /// The actual criticality bit of the BasicConstraints extension.
    #[serde(skip)]
    pub basic_constraints_critical: bool,
    pub ca: bool,
    /// SHA-256 fingerprints (hex) of certificates observed signing this
    /// one, `"-- --"` when no signer is known. Content-addressed edges of
    /// the issuance DAG.
    #[serde(rename = "parentSignatures", default)]
    pub parent_signatures: BTreeSet<String>,
    #[serde(rename = "validationInfo", default)]
    pub validation_info: ValidationMap,
    #[serde(rename = "firstSeen")]
    pub first_seen: DateTime<Utc>,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
    pub hashes: Hashes,
    /// Standard base64 of the full DER body.
    pub raw: String,
}

impl Certificate {
    /// Decode the stored base64 DER body.
    pub fn to_der(&self) -> Result<Vec<u8>, crate::TlscopeError> {
        util::base64_decode(&self.raw)
            .map_err(|e| crate::TlscopeError::Parse(format!("stored DER is not base64: {}", e)))
    }

    /// Subject and issuer are identical: common name equal, and each of
    /// country, organisation, and organisational-unit equal element-wise.
    pub fn is_self_signed(&self) -> bool {
        self.subject.common_name == self.issuer.common_name
            && self.subject.country == self.issuer.country
            && self.subject.organisation == self.issuer.organisation
            && self.subject.org_unit == self.issuer.org_unit
    }

    /// Fold a newer (or older) observation of the same DER into this
    /// record.
    ///
    /// Commutative by construction so that two concurrent observations end
    /// in the same state regardless of apply order: set-union for `ips` and
    /// `parent_signatures`, min/max for the seen window, the validation
    /// verdicts of whichever observation is latest, and the
    /// lexicographically smallest non-empty `scan_target` when the same
    /// leaf is served for more than one hostname.
    pub fn merge_observation(&mut self, other: &Certificate) {
        debug_assert_eq!(self.hashes.sha256, other.hashes.sha256);

        if other.last_seen > self.last_seen {
            self.validation_info = other.validation_info.clone();
        }
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.ips.extend(other.ips.iter().cloned());
        self.parent_signatures
            .extend(other.parent_signatures.iter().cloned());
        if !other.scan_target.is_empty()
            && (self.scan_target.is_empty() || other.scan_target < self.scan_target)
        {
            self.scan_target = other.scan_target.clone();
        }
    }
}

/// An observed chain in transit: ordered DER bodies for one (domain, IP).
///
/// Never persisted; it lives only long enough to drive validation and
/// parent linking. On the wire the bodies are base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub domain: String,
    pub ip: String,
    #[serde(with = "der_list_base64")]
    pub certs: Vec<Vec<u8>>,
}

/// Result of the last validation run for one certificate, flattened for
/// the persistence sink. `current` is true on at most one row per
/// certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trust {
    #[serde(rename = "certSha256")]
    pub cert_sha256: String,
    #[serde(rename = "issuerSha256")]
    pub issuer_sha256: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "trustUbuntu")]
    pub trust_ubuntu: bool,
    #[serde(rename = "trustMozilla")]
    pub trust_mozilla: bool,
    #[serde(rename = "trustMicrosoft")]
    pub trust_microsoft: bool,
    #[serde(rename = "trustApple")]
    pub trust_apple: bool,
    #[serde(rename = "trustAndroid")]
    pub trust_android: bool,
    pub current: bool,
}

impl Trust {
    /// Build a trust row from a certificate's current verdicts.
    pub fn from_validation(
        cert_sha256: impl Into<String>,
        issuer_sha256: impl Into<String>,
        timestamp: DateTime<Utc>,
        map: &ValidationMap,
    ) -> Self {
        let [ubuntu, mozilla, microsoft, apple, android] = map.booleans();
        Trust {
            cert_sha256: cert_sha256.into(),
            issuer_sha256: issuer_sha256.into(),
            timestamp,
            trust_ubuntu: ubuntu,
            trust_mozilla: mozilla,
            trust_microsoft: microsoft,
            trust_apple: apple,
            trust_android: android,
            current: true,
        }
    }
}

mod der_list_base64 {
    use crate::util;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(certs: &[Vec<u8>], ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_seq(certs.iter().map(|der| util::base64_standard(der)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(de)?;
        encoded
            .iter()
            .map(|s| util::base64_decode(s).map_err(D::Error::custom))
            .collect()
    }
}
