//! Chain validation: five independent verdicts plus parent linking.

use crate::canonicalize::{cert_to_stored, parse_der_prefix, NO_PARENT};
use crate::certificate::{Certificate, Chain, TrustStoreName};
use crate::fingerprint::sha256_hex;
use crate::truststore::TrustStoreSet;
use crate::TlscopeError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

/// The outcome of validating one observed chain: canonicalized records in
/// leaf-first order, each stamped with all five store verdicts and linked
/// to its signer by content hash.
#[derive(Debug)]
pub struct ValidatedChain {
    pub certificates: Vec<Certificate>,
    /// The leaf's subject and issuer are identical. Such chains are still
    /// validated; they typically fail every store.
    pub self_signed_leaf: bool,
}

impl ValidatedChain {
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificates.first()
    }
}

/// Validate an observed chain against all five root stores.
///
/// Malformed DER entries are dropped (logged, non-fatal) and duplicates are
/// collapsed by SHA-256 before anything else. The leaf is the first
/// certificate without CA rights, so a shuffled chain produces the same
/// records as a well-ordered one. Every surviving certificate receives its
/// own five verdicts, with the rest of the chain as the untrusted
/// intermediate pool.
pub fn validate_chain(
    chain: &Chain,
    stores: &TrustStoreSet,
    observed_at: DateTime<Utc>,
) -> Result<ValidatedChain, TlscopeError> {
    // Parse and trim every DER body, dropping the malformed ones.
    let mut seen = HashSet::new();
    let mut ders: Vec<Vec<u8>> = Vec::with_capacity(chain.certs.len());
    for (i, der) in chain.certs.iter().enumerate() {
        match parse_der_prefix(der) {
            Ok((cert_der, _)) => {
                if seen.insert(sha256_hex(cert_der)) {
                    ders.push(cert_der.to_vec());
                }
            }
            Err(e) => {
                warn!(domain = %chain.domain, index = i, "dropping malformed certificate: {}", e);
            }
        }
    }

    if ders.is_empty() {
        return Err(TlscopeError::Parse(format!(
            "no parseable certificates in chain for {}",
            chain.domain
        )));
    }

    reorder_leaf_first(&mut ders);

    let mut certificates = Vec::with_capacity(ders.len());
    for (i, der) in ders.iter().enumerate() {
        let (cert_der, x509) = parse_der_prefix(der)?;

        // Content-addressed edge to the immediate signer: the next chain
        // position, or no parent for the last certificate.
        let parent_signature = match ders.get(i + 1) {
            Some(parent_der) => sha256_hex(parent_der),
            None => NO_PARENT.to_string(),
        };

        let mut stored = cert_to_stored(
            &x509,
            cert_der,
            &parent_signature,
            &chain.domain,
            &chain.ip,
            observed_at,
        );

        // Five independent verdicts, with every other chain member as the
        // untrusted pool.
        let pool: Vec<Vec<u8>> = ders
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, d)| d.clone())
            .collect();
        for name in TrustStoreName::ALL {
            let verdict = stores.verify(der, &pool, name, observed_at);
            stored.validation_info.set(name, verdict);
        }

        debug!(
            subject = %stored.subject,
            sha256 = %stored.hashes.sha256,
            trusted = stored.validation_info.trusted_anywhere(),
            "canonicalized chain certificate"
        );
        certificates.push(stored);
    }

    let self_signed_leaf = certificates
        .first()
        .map(|leaf| leaf.is_self_signed())
        .unwrap_or(false);

    Ok(ValidatedChain {
        certificates,
        self_signed_leaf,
    })
}

/// Move the first non-CA certificate to the front, preserving the relative
/// order of the rest. Scanners occasionally deliver the intermediate ahead
/// of the leaf.
fn reorder_leaf_first(ders: &mut Vec<Vec<u8>>) {
    let leaf_pos = ders.iter().position(|der| {
        parse_der_prefix(der)
            .map(|(_, x509)| {
                !x509
                    .basic_constraints()
                    .ok()
                    .flatten()
                    .map(|bc| bc.value.ca)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    if let Some(pos) = leaf_pos {
        if pos > 0 {
            let leaf = ders.remove(pos);
            ders.insert(0, leaf);
        }
    }
}
