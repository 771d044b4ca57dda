//! Vendor root pools and chain verification against them.
//!
//! Five named pools (Ubuntu, Mozilla, Microsoft, Apple, Android) are loaded
//! once at process start and frozen. Any pool that fails to load refuses the
//! whole process (fail-closed). The set answers exactly one question: is
//! this chain valid under store X right now?

use crate::certificate::{TrustStoreName, ValidationInfo};
use crate::TlscopeError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use x509_parser::prelude::*;

/// Maximum chain depth during path building, to bound the DFS.
const MAX_CHAIN_DEPTH: usize = 32;

/// Parse a PEM bundle into individual DER-encoded certificates.
pub fn parse_pem_bundle(input: &[u8]) -> Result<Vec<Vec<u8>>, TlscopeError> {
    let mut certs = Vec::new();

    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if pem.label == "CERTIFICATE" || pem.label == "TRUSTED CERTIFICATE" {
                    certs.push(pem.contents);
                }
            }
            Err(e) => {
                // Trailing garbage after at least one cert is tolerated.
                if !certs.is_empty() {
                    break;
                }
                return Err(TlscopeError::Parse(format!("failed to parse PEM: {}", e)));
            }
        }
    }

    if certs.is_empty() {
        return Err(TlscopeError::Parse(
            "no certificates found in PEM input".into(),
        ));
    }

    Ok(certs)
}

/// One vendor's root certificates, indexed by raw subject name.
pub struct RootStore {
    certs_by_subject: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    count: usize,
}

impl std::fmt::Debug for RootStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootStore")
            .field("count", &self.count)
            .finish()
    }
}

impl RootStore {
    pub fn new() -> Self {
        RootStore {
            certs_by_subject: HashMap::new(),
            count: 0,
        }
    }

    /// Build a pool from a PEM bundle. Certificates that fail to parse are
    /// skipped; an entirely unusable bundle is an error.
    pub fn from_pem(pem_data: &[u8]) -> Result<Self, TlscopeError> {
        let mut store = RootStore::new();
        for der in parse_pem_bundle(pem_data)? {
            let _ = store.add_der(&der);
        }
        if store.is_empty() {
            return Err(TlscopeError::Parse(
                "no usable certificates in PEM bundle".into(),
            ));
        }
        Ok(store)
    }

    pub fn add_der(&mut self, der: &[u8]) -> Result<(), TlscopeError> {
        let (_, x509) =
            X509Certificate::from_der(der).map_err(|e| TlscopeError::Parse(format!("{}", e)))?;
        let subject_raw = x509.subject().as_raw().to_vec();
        self.certs_by_subject
            .entry(subject_raw)
            .or_default()
            .push(der.to_vec());
        self.count += 1;
        Ok(())
    }

    pub(crate) fn find_by_subject_raw(&self, subject_raw: &[u8]) -> Option<&Vec<Vec<u8>>> {
        self.certs_by_subject.get(subject_raw)
    }

    pub fn contains(&self, der: &[u8]) -> bool {
        if let Ok((_, x509)) = X509Certificate::from_der(der) {
            if let Some(certs) = self.find_by_subject_raw(x509.subject().as_raw()) {
                return certs.iter().any(|c| c == der);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for RootStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The immutable-after-init collection of the five vendor pools.
#[derive(Debug)]
pub struct TrustStoreSet {
    ubuntu: RootStore,
    mozilla: RootStore,
    microsoft: RootStore,
    apple: RootStore,
    android: RootStore,
}

impl TrustStoreSet {
    /// Load all five pools from `<dir>/<store>.pem` (lowercased store
    /// names). Fail-closed: any pool that cannot be read, parsed, or is
    /// empty aborts the load.
    pub fn load(dir: &Path) -> Result<Self, TlscopeError> {
        let mut pools = Vec::with_capacity(5);
        for name in TrustStoreName::ALL {
            let path = dir.join(format!("{}.pem", name.as_str().to_lowercase()));
            let data = std::fs::read(&path).map_err(|e| TlscopeError::TrustStoreLoad {
                name: name.as_str().into(),
                reason: format!("{}: {}", path.display(), e),
            })?;
            let store = RootStore::from_pem(&data).map_err(|e| TlscopeError::TrustStoreLoad {
                name: name.as_str().into(),
                reason: e.to_string(),
            })?;
            pools.push(store);
        }
        let mut it = pools.into_iter();
        Ok(TrustStoreSet {
            ubuntu: it.next().unwrap_or_default(),
            mozilla: it.next().unwrap_or_default(),
            microsoft: it.next().unwrap_or_default(),
            apple: it.next().unwrap_or_default(),
            android: it.next().unwrap_or_default(),
        })
    }

    /// Build a set from five in-memory PEM bundles, in canonical store
    /// order. Used by tests and by callers that manage bundle files
    /// themselves.
    pub fn from_pems(bundles: [&[u8]; 5]) -> Result<Self, TlscopeError> {
        let make = |name: TrustStoreName, data: &[u8]| {
            RootStore::from_pem(data).map_err(|e| TlscopeError::TrustStoreLoad {
                name: name.as_str().into(),
                reason: e.to_string(),
            })
        };
        Ok(TrustStoreSet {
            ubuntu: make(TrustStoreName::Ubuntu, bundles[0])?,
            mozilla: make(TrustStoreName::Mozilla, bundles[1])?,
            microsoft: make(TrustStoreName::Microsoft, bundles[2])?,
            apple: make(TrustStoreName::Apple, bundles[3])?,
            android: make(TrustStoreName::Android, bundles[4])?,
        })
    }

    /// A set where every pool holds the same roots. Convenient in tests.
    pub fn uniform(pem_data: &[u8]) -> Result<Self, TlscopeError> {
        Self::from_pems([pem_data; 5])
    }

    pub fn store(&self, name: TrustStoreName) -> &RootStore {
        match name {
            TrustStoreName::Ubuntu => &self.ubuntu,
            TrustStoreName::Mozilla => &self.mozilla,
            TrustStoreName::Microsoft => &self.microsoft,
            TrustStoreName::Apple => &self.apple,
            TrustStoreName::Android => &self.android,
        }
    }

    /// Verify `leaf_der` against one pool, building a path through
    /// `intermediates` (untrusted pool, any order, leaf excluded).
    ///
    /// Success is an empty-error verdict; failure carries the first
    /// diagnostic (missing anchor, expired certificate, bad signature...).
    pub fn verify(
        &self,
        leaf_der: &[u8],
        intermediates: &[Vec<u8>],
        name: TrustStoreName,
        at_time: DateTime<Utc>,
    ) -> ValidationInfo {
        verify_against_pool(leaf_der, intermediates, self.store(name), at_time)
    }
}

/// Outcome of the DFS path build: the chain from leaf up to (excluding) the
/// anchor, plus the anchoring root from the pool.
struct BuiltPath {
    chain: Vec<Vec<u8>>,
    root: Vec<u8>,
}

fn verify_against_pool(
    leaf_der: &[u8],
    intermediates: &[Vec<u8>],
    pool: &RootStore,
    at_time: DateTime<Utc>,
) -> ValidationInfo {
    let leaf = match X509Certificate::from_der(leaf_der) {
        Ok((_, cert)) => cert,
        Err(e) => return ValidationInfo::invalid(format!("failed to parse leaf: {}", e)),
    };

    let parsed_pool: Vec<(Vec<u8>, X509Certificate)> = intermediates
        .iter()
        .filter_map(|der| {
            X509Certificate::from_der(der)
                .ok()
                .map(|(_, cert)| (der.clone(), cert))
        })
        .collect();

    let mut chain = vec![leaf_der.to_vec()];
    let mut used = vec![false; parsed_pool.len()];
    let path = match dfs_build(&leaf, &mut chain, &mut used, &parsed_pool, pool) {
        Some(path) => path,
        None => {
            return ValidationInfo::invalid(format!(
                "unable to find trusted root for issuer: {}",
                leaf.issuer()
            ))
        }
    };

    let mut errors = Vec::new();
    for (depth, der) in path.chain.iter().chain(std::iter::once(&path.root)).enumerate() {
        if let Ok((_, x509)) = X509Certificate::from_der(der) {
            check_time_validity(&x509, depth, at_time, &mut errors);
            // Everything above the leaf must be a CA.
            if depth > 0 && !is_ca_cert(&x509) {
                errors.push(format!(
                    "certificate at depth {} ({}) is not a CA but is used as issuer",
                    depth,
                    x509.subject()
                ));
            }
        }
    }

    match errors.first() {
        Some(first) => ValidationInfo::invalid(first.clone()),
        None => ValidationInfo::valid(),
    }
}

fn check_time_validity(
    x509: &X509Certificate,
    depth: usize,
    at_time: DateTime<Utc>,
    errors: &mut Vec<String>,
) {
    let now_ts = at_time.timestamp();
    if now_ts < x509.validity().not_before.timestamp() {
        errors.push(format!(
            "certificate at depth {} ({}) is not yet valid",
            depth,
            x509.subject()
        ));
    }
    if now_ts > x509.validity().not_after.timestamp() {
        errors.push(format!(
            "certificate at depth {} ({}) has expired",
            depth,
            x509.subject()
        ));
    }
}

fn is_ca_cert(x509: &X509Certificate) -> bool {
    x509.basic_constraints()
        .ok()
        .flatten()
        .map(|bc| bc.value.ca)
        .unwrap_or(false)
}

/// DFS with backtracking from the current chain head to a pool root.
///
/// Signatures are verified along the way, so a returned path is
/// cryptographically linked end to end. A root present both in the chain
/// and in the pool anchors at the pool copy, since anchoring is checked
/// before intermediate descent.
fn dfs_build(
    current: &X509Certificate,
    chain: &mut Vec<Vec<u8>>,
    used: &mut [bool],
    intermediates: &[(Vec<u8>, X509Certificate)],
    pool: &RootStore,
) -> Option<BuiltPath> {
    let issuer_raw = current.issuer().as_raw();

    // Self-signed and in the pool: the chain terminates on itself.
    if current.subject().as_raw() == issuer_raw && current.verify_signature(None).is_ok() {
        if let Some(last) = chain.last() {
            if pool.contains(last) {
                return Some(BuiltPath {
                    chain: chain[..chain.len() - 1].to_vec(),
                    root: last.clone(),
                });
            }
        }
    }

    // Issuer in the pool: anchored.
    if let Some(candidates) = pool.find_by_subject_raw(issuer_raw) {
        for root_der in candidates {
            if let Ok((_, root)) = X509Certificate::from_der(root_der) {
                if current.verify_signature(Some(root.public_key())).is_ok() {
                    return Some(BuiltPath {
                        chain: chain.clone(),
                        root: root_der.clone(),
                    });
                }
            }
        }
    }

    if chain.len() >= MAX_CHAIN_DEPTH {
        return None;
    }

    for (idx, (der, cert)) in intermediates.iter().enumerate() {
        if used[idx] || cert.subject().as_raw() != issuer_raw {
            continue;
        }
        if current.verify_signature(Some(cert.public_key())).is_err() {
            continue;
        }

        used[idx] = true;
        chain.push(der.clone());

        if let Some(found) = dfs_build(cert, chain, used, intermediates, pool) {
            return Some(found);
        }

        chain.pop();
        used[idx] = false;
    }

    None
}
