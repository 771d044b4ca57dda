//! tlscope-lib: TLS observation and grading engine.
//!
//! Given the certificate chain observed on the wire for a scan target, this
//! library canonicalizes every certificate into a stored form, fingerprints
//! it, validates the chain against five vendor root stores (Ubuntu, Mozilla,
//! Microsoft, Apple, Android), links parent/issuer relationships by content
//! hash, and evaluates declarative assertions against the resulting
//! observation.
//!
//! The actual TLS scanner, the persistent database, and notification
//! delivery are external collaborators behind the [`Scanner`],
//! [`CertificateStore`], and [`NotificationSink`] traits.

mod assertion;
mod canonicalize;
mod certificate;
mod fingerprint;
mod observation;
mod oid;
mod runner;
mod truststore;
mod util;
mod validate;

pub use assertion::{
    evaluate_all, evaluate_assertion, Assertion, AssertionVerdict, CmpOp, Comparator,
};
pub use canonicalize::{cert_to_stored, parse_stored, NO_PARENT};
pub use certificate::{
    Certificate, Chain, Extensions, Hashes, KeyInfo, Subject, Trust, TrustStoreName,
    Validity, ValidationInfo, ValidationMap,
};
pub use fingerprint::{md5_hex, pkp_sha256, sha1_hex, sha256_hex, sha256_subject_spki, spki_der};
pub use observation::{CertificateStore, MemoryStore, Observation, ObservationBuilder};
pub use runner::{
    load_run_config, CronExpr, EmailNotification, Notifications, Run, RunConfig, Runner,
    NotificationSink, ScanOutcome, Scanner,
};
pub use truststore::{parse_pem_bundle, RootStore, TrustStoreSet};
pub use validate::{validate_chain, ValidatedChain};

/// Errors returned by tlscope-lib.
///
/// Everything except [`TlscopeError::TrustStoreLoad`] is recoverable and is
/// surfaced through observation or verdict output rather than aborting a
/// scan; see the per-variant docs.
#[derive(Debug, thiserror::Error)]
pub enum TlscopeError {
    /// Malformed DER; the certificate is dropped from the chain and the scan
    /// continues.
    #[error("failed to parse certificate: {0}")]
    Parse(String),

    /// Public-key serialization failed; key info is emitted partial.
    #[error("failed to serialize public key: {0}")]
    KeyInfo(String),

    /// A root pool failed to load. Fatal at process start only.
    #[error("trust store {name} failed to load: {reason}")]
    TrustStoreLoad { name: String, reason: String },

    /// An assertion or run definition does not parse; the enclosing run is
    /// skipped and reported, other runs continue.
    #[error("invalid assertion: {0}")]
    AssertionSyntax(String),

    /// A scan task exceeded its deadline. Nothing is persisted.
    #[error("scan of {target} timed out after {seconds}s")]
    Timeout { target: String, seconds: u64 },

    #[error("scan of {target} failed: {reason}")]
    Scan { target: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
