//! Observation records and the persistence-sink seam.
//!
//! The store behind [`CertificateStore`] is an external collaborator (any
//! key-value or relational backend); [`MemoryStore`] is the reference
//! implementation used by tests and the CLI. The contract is
//! optimistic-merge: concurrent observations of one certificate must land
//! in the same state as some sequential order of the same observations.

use crate::canonicalize::NO_PARENT;
use crate::certificate::{Certificate, Chain, Trust};
use crate::validate::ValidatedChain;
use crate::TlscopeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// One scan result: the target, the observed IP, and the chain as content
/// hashes. Certificates themselves live in the store; the observation only
/// references them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "scanTarget")]
    pub scan_target: String,
    pub ip: String,
    #[serde(rename = "leafSha256")]
    pub leaf_sha256: String,
    /// Chain hashes in leaf-first order.
    #[serde(rename = "chainSha256s")]
    pub chain_sha256s: Vec<String>,
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
    /// Named analyzer outputs attached to this observation, keyed by
    /// analyzer name. Read by `analysis` assertions.
    #[serde(default)]
    pub analysis: HashMap<String, serde_json::Value>,
}

impl Observation {
    pub fn attach_analysis(&mut self, analyzer: impl Into<String>, output: serde_json::Value) {
        self.analysis.insert(analyzer.into(), output);
    }
}

/// Persistence contract for stored certificates and trust rows.
///
/// Updates for one certificate identity are serialized by the
/// implementation; `upsert` applies the merge semantics of
/// [`Certificate::merge_observation`] and returns the merged state.
pub trait CertificateStore: Send + Sync {
    fn upsert(&self, cert: Certificate) -> Result<Certificate, TlscopeError>;

    /// Record the latest validation run for a certificate. The new row is
    /// `current`; any prior row for the same certificate is swept to
    /// `current=false` in the same critical section.
    fn record_trust(&self, trust: Trust) -> Result<(), TlscopeError>;

    fn get(&self, sha256: &str) -> Result<Option<Certificate>, TlscopeError>;

    fn trust_rows(&self, sha256: &str) -> Result<Vec<Trust>, TlscopeError>;
}

/// In-memory [`CertificateStore`].
#[derive(Default)]
pub struct MemoryStore {
    certs: Mutex<HashMap<String, Certificate>>,
    trust: Mutex<HashMap<String, Vec<Trust>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.certs.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CertificateStore for MemoryStore {
    fn upsert(&self, cert: Certificate) -> Result<Certificate, TlscopeError> {
        let mut certs = self
            .certs
            .lock()
            .map_err(|_| TlscopeError::Parse("certificate store poisoned".into()))?;
        let merged = certs
            .entry(cert.hashes.sha256.clone())
            .and_modify(|existing| existing.merge_observation(&cert))
            .or_insert(cert);
        Ok(merged.clone())
    }

    fn record_trust(&self, trust: Trust) -> Result<(), TlscopeError> {
        let mut rows = self
            .trust
            .lock()
            .map_err(|_| TlscopeError::Parse("trust store poisoned".into()))?;
        let entry = rows.entry(trust.cert_sha256.clone()).or_default();
        for row in entry.iter_mut() {
            row.current = false;
        }
        entry.push(trust);
        Ok(())
    }

    fn get(&self, sha256: &str) -> Result<Option<Certificate>, TlscopeError> {
        let certs = self
            .certs
            .lock()
            .map_err(|_| TlscopeError::Parse("certificate store poisoned".into()))?;
        Ok(certs.get(sha256).cloned())
    }

    fn trust_rows(&self, sha256: &str) -> Result<Vec<Trust>, TlscopeError> {
        let rows = self
            .trust
            .lock()
            .map_err(|_| TlscopeError::Parse("trust store poisoned".into()))?;
        Ok(rows.get(sha256).cloned().unwrap_or_default())
    }
}

/// Materializes observation records: upserts every certificate of a
/// validated chain, writes the trust rows, and emits the observation.
pub struct ObservationBuilder<'a, S: CertificateStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: CertificateStore + ?Sized> ObservationBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        ObservationBuilder { store }
    }

    /// Persist a validated chain and produce its observation record.
    ///
    /// Nothing here partially persists: the caller is expected to run the
    /// whole record step inside the task deadline, and a timed-out task
    /// never reaches this point.
    pub fn record(
        &self,
        chain: &Chain,
        validated: &ValidatedChain,
    ) -> Result<Observation, TlscopeError> {
        let mut chain_sha256s = Vec::with_capacity(validated.certificates.len());
        let mut observed_at = Utc::now();

        for cert in &validated.certificates {
            // Fresh records carry exactly the positional signer edge; the
            // marker for "no known signer" maps to an empty issuer id.
            let issuer_sha256 = cert
                .parent_signatures
                .iter()
                .next()
                .filter(|sig| sig.as_str() != NO_PARENT)
                .cloned()
                .unwrap_or_default();

            let merged = self.store.upsert(cert.clone())?;
            self.store.record_trust(Trust::from_validation(
                merged.hashes.sha256.clone(),
                issuer_sha256,
                cert.last_seen,
                &cert.validation_info,
            ))?;

            chain_sha256s.push(cert.hashes.sha256.clone());
            observed_at = cert.last_seen;
        }

        let leaf_sha256 = chain_sha256s.first().cloned().unwrap_or_default();
        info!(
            target = %chain.domain,
            ip = %chain.ip,
            certs = chain_sha256s.len(),
            leaf = %leaf_sha256,
            "recorded observation"
        );

        Ok(Observation {
            scan_target: chain.domain.clone(),
            ip: chain.ip.clone(),
            leaf_sha256,
            chain_sha256s,
            observed_at,
            analysis: HashMap::new(),
        })
    }
}
