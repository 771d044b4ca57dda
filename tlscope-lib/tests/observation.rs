//! Observation recording, merge semantics, and trust-row bookkeeping.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::{Duration, Utc};
use common::{chain_of, make_intermediate, make_leaf, make_root, uniform_stores};
use tlscope_lib::{parse_stored, validate_chain, CertificateStore, MemoryStore, ObservationBuilder};

#[test]
fn merge_is_commutative() {
    let root = make_root("Merge Root");
    let leaf = make_leaf("merge.example.com", &["merge.example.com"], &root);
    let der = leaf.der();

    let t0 = Utc::now();
    let t1 = t0 + Duration::hours(24);

    let first = parse_stored(&der, "aaaa", "merge.example.com", "192.0.2.1", t0).unwrap();
    let second = parse_stored(&der, "bbbb", "merge.example.com", "192.0.2.2", t1).unwrap();

    let mut forward = first.clone();
    forward.merge_observation(&second);
    let mut backward = second.clone();
    backward.merge_observation(&first);

    assert_eq!(forward, backward);
    assert_eq!(forward.first_seen, t0);
    assert_eq!(forward.last_seen, t1);
    assert_eq!(forward.ips.len(), 2);
    assert!(forward.parent_signatures.contains("aaaa"));
    assert!(forward.parent_signatures.contains("bbbb"));
}

#[test]
fn merge_picks_deterministic_scan_target() {
    let root = make_root("Target Merge Root");
    let leaf = make_leaf(
        "shared.example.com",
        &["shared.example.com", "alias.example.net"],
        &root,
    );
    let der = leaf.der();
    let now = Utc::now();

    // The same leaf DER served for two hostnames must merge to the same
    // target regardless of which observation lands first.
    let under_a = parse_stored(&der, "cccc", "shared.example.com", "192.0.2.3", now).unwrap();
    let under_b = parse_stored(&der, "cccc", "alias.example.net", "192.0.2.4", now).unwrap();

    let mut forward = under_a.clone();
    forward.merge_observation(&under_b);
    let mut backward = under_b.clone();
    backward.merge_observation(&under_a);

    assert_eq!(forward, backward);
    assert_eq!(forward.scan_target, "alias.example.net");
}

#[test]
fn repeated_observation_extends_the_record() {
    let root = make_root("Repeat Root");
    let intermediate = make_intermediate("Repeat Intermediate", &root);
    let leaf = make_leaf("repeat.example.com", &["repeat.example.com"], &intermediate);
    let stores = uniform_stores(&root);
    let store = MemoryStore::new();
    let builder = ObservationBuilder::new(&store);

    let t0 = Utc::now();
    let t1 = t0 + Duration::hours(24);

    let chain_day1 = chain_of(
        "repeat.example.com",
        "192.0.2.21",
        vec![leaf.der(), intermediate.der(), root.der()],
    );
    let validated1 = validate_chain(&chain_day1, &stores, t0).unwrap();
    let obs1 = builder.record(&chain_day1, &validated1).unwrap();

    let chain_day2 = chain_of(
        "repeat.example.com",
        "192.0.2.22",
        vec![leaf.der(), intermediate.der(), root.der()],
    );
    let validated2 = validate_chain(&chain_day2, &stores, t1).unwrap();
    let obs2 = builder.record(&chain_day2, &validated2).unwrap();

    assert_eq!(obs1.leaf_sha256, obs2.leaf_sha256);
    assert_eq!(store.len(), 3);

    let merged_leaf = store.get(&obs1.leaf_sha256).unwrap().unwrap();
    assert_eq!(merged_leaf.first_seen, t0);
    assert_eq!(merged_leaf.last_seen, t1);
    assert_eq!(
        merged_leaf.ips.iter().collect::<Vec<_>>(),
        vec!["192.0.2.21", "192.0.2.22"]
    );
}

#[test]
fn one_current_trust_row_per_certificate() {
    let root = make_root("Current Root");
    let intermediate = make_intermediate("Current Intermediate", &root);
    let leaf = make_leaf("current.example.com", &["current.example.com"], &intermediate);
    let stores = uniform_stores(&root);
    let store = MemoryStore::new();
    let builder = ObservationBuilder::new(&store);

    let chain = chain_of(
        "current.example.com",
        "192.0.2.31",
        vec![leaf.der(), intermediate.der(), root.der()],
    );

    // Two validation runs: the earlier trust rows must be swept.
    for offset in [0i64, 1] {
        let at = Utc::now() + Duration::hours(offset);
        let validated = validate_chain(&chain, &stores, at).unwrap();
        builder.record(&chain, &validated).unwrap();
    }

    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();
    for cert in &validated.certificates {
        let rows = store.trust_rows(&cert.hashes.sha256).unwrap();
        assert_eq!(rows.len(), 2);
        let current: Vec<_> = rows.iter().filter(|r| r.current).collect();
        assert_eq!(current.len(), 1, "want exactly one current row");
        assert!(current[0].trust_ubuntu && current[0].trust_android);
    }
}

#[test]
fn observation_references_chain_by_hash() {
    let root = make_root("Ref Root");
    let intermediate = make_intermediate("Ref Intermediate", &root);
    let leaf = make_leaf("ref.example.com", &["ref.example.com"], &intermediate);
    let stores = uniform_stores(&root);
    let store = MemoryStore::new();

    let chain = chain_of(
        "ref.example.com",
        "192.0.2.41",
        vec![leaf.der(), intermediate.der(), root.der()],
    );
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();
    let observation = ObservationBuilder::new(&store)
        .record(&chain, &validated)
        .unwrap();

    assert_eq!(observation.scan_target, "ref.example.com");
    assert_eq!(observation.ip, "192.0.2.41");
    assert_eq!(observation.chain_sha256s.len(), 3);
    assert_eq!(observation.leaf_sha256, observation.chain_sha256s[0]);

    // Every referenced certificate is resolvable in the store, and only the
    // leaf carries the scan target.
    for (i, sha) in observation.chain_sha256s.iter().enumerate() {
        let cert = store.get(sha).unwrap().unwrap();
        if i == 0 {
            assert_eq!(cert.scan_target, "ref.example.com");
        } else {
            assert!(cert.ca);
            assert!(cert.scan_target.is_empty());
            assert!(cert.ips.is_empty());
        }
    }

    // Trust rows carry the issuer edge by content hash.
    let leaf_rows = store.trust_rows(&observation.leaf_sha256).unwrap();
    assert_eq!(leaf_rows[0].issuer_sha256, observation.chain_sha256s[1]);
    let root_rows = store.trust_rows(&observation.chain_sha256s[2]).unwrap();
    assert!(root_rows[0].issuer_sha256.is_empty());
}
