//! Chain validation scenarios against the five-store set.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::Utc;
use common::{chain_of, make_intermediate, make_leaf, make_leaf_with, make_root,
    make_self_signed_leaf, uniform_stores};
use tlscope_lib::{
    sha256_hex, validate_chain, TlscopeError, TrustStoreName, TrustStoreSet,
};

#[test]
fn trusted_chain_validates_in_every_store() {
    let root = make_root("Happy Root");
    let intermediate = make_intermediate("Happy Intermediate", &root);
    let leaf = make_leaf("happy.example.com", &["*.example.com"], &intermediate);
    let stores = uniform_stores(&root);

    let chain = chain_of(
        "happy.example.com",
        "192.0.2.10",
        vec![leaf.der(), intermediate.der(), root.der()],
    );
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();

    assert_eq!(validated.certificates.len(), 3);
    assert!(!validated.self_signed_leaf);

    let stored_leaf = &validated.certificates[0];
    assert!(!stored_leaf.ca);
    assert_eq!(stored_leaf.scan_target, "happy.example.com");
    for name in TrustStoreName::ALL {
        let verdict = stored_leaf.validation_info.get(name);
        assert!(verdict.is_valid, "leaf not valid under {}", name);
        assert!(verdict.validation_error.is_empty());
    }

    assert!(validated.certificates[1].ca);
    assert!(validated.certificates[2].ca);
    // Intermediates never carry scan targets.
    assert!(validated.certificates[1].scan_target.is_empty());
    assert!(validated.certificates[2].scan_target.is_empty());

    // Parent edges are content hashes of the signer.
    assert!(stored_leaf
        .parent_signatures
        .contains(&sha256_hex(&intermediate.der())));
    assert!(validated.certificates[1]
        .parent_signatures
        .contains(&sha256_hex(&root.der())));
    assert!(validated.certificates[2].parent_signatures.contains("-- --"));
}

#[test]
fn expired_leaf_fails_every_store_with_expiry_errors() {
    let root = make_root("Expiry Root");
    let intermediate = make_intermediate("Expiry Intermediate", &root);
    let not_before = time::OffsetDateTime::now_utc() - time::Duration::days(30);
    let not_after = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    let leaf = make_leaf_with(
        "expired.example.com",
        &["expired.example.com"],
        &intermediate,
        |params| {
            params.not_before = not_before;
            params.not_after = not_after;
        },
    );
    let stores = uniform_stores(&root);

    let chain = chain_of(
        "expired.example.com",
        "192.0.2.11",
        vec![leaf.der(), intermediate.der(), root.der()],
    );
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();

    let stored_leaf = &validated.certificates[0];
    for name in TrustStoreName::ALL {
        let verdict = stored_leaf.validation_info.get(name);
        assert!(!verdict.is_valid, "expired leaf valid under {}", name);
        assert!(
            verdict.validation_error.contains("expired"),
            "error does not cite expiry: {}",
            verdict.validation_error
        );
    }
}

#[test]
fn self_signed_leaf_is_flagged_and_untrusted() {
    let unrelated_root = make_root("Unrelated Root");
    let stores = uniform_stores(&unrelated_root);
    let leaf = make_self_signed_leaf("lonely.example.com", &["lonely.example.com"]);

    let chain = chain_of("lonely.example.com", "192.0.2.12", vec![leaf.der()]);
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();

    assert_eq!(validated.certificates.len(), 1);
    assert!(validated.self_signed_leaf);

    let stored = &validated.certificates[0];
    assert!(stored.is_self_signed());
    assert_eq!(
        stored.parent_signatures.iter().collect::<Vec<_>>(),
        vec!["-- --"]
    );
    for name in TrustStoreName::ALL {
        assert!(!stored.validation_info.get(name).is_valid);
    }
}

#[test]
fn shuffled_chain_produces_identical_records() {
    let root = make_root("Shuffle Root");
    let intermediate = make_intermediate("Shuffle Intermediate", &root);
    let leaf = make_leaf("shuffle.example.com", &["shuffle.example.com"], &intermediate);
    let stores = uniform_stores(&root);
    let observed_at = Utc::now();

    let ordered = chain_of(
        "shuffle.example.com",
        "192.0.2.13",
        vec![leaf.der(), intermediate.der(), root.der()],
    );
    let shuffled = chain_of(
        "shuffle.example.com",
        "192.0.2.13",
        vec![intermediate.der(), leaf.der(), root.der()],
    );

    let from_ordered = validate_chain(&ordered, &stores, observed_at).unwrap();
    let from_shuffled = validate_chain(&shuffled, &stores, observed_at).unwrap();

    assert_eq!(from_ordered.certificates, from_shuffled.certificates);
    assert_eq!(
        from_shuffled.certificates[0].scan_target,
        "shuffle.example.com"
    );
}

#[test]
fn duplicate_chain_entries_collapse() {
    let root = make_root("Dup Root");
    let leaf = make_leaf("dup.example.com", &["dup.example.com"], &root);
    let stores = uniform_stores(&root);

    let chain = chain_of(
        "dup.example.com",
        "192.0.2.14",
        vec![leaf.der(), leaf.der(), root.der(), root.der()],
    );
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();
    assert_eq!(validated.certificates.len(), 2);
}

#[test]
fn malformed_entries_are_dropped_not_fatal() {
    let root = make_root("Garble Root");
    let leaf = make_leaf("garble.example.com", &["garble.example.com"], &root);
    let stores = uniform_stores(&root);

    let chain = chain_of(
        "garble.example.com",
        "192.0.2.15",
        vec![leaf.der(), vec![0xde, 0xad, 0xbe, 0xef], root.der()],
    );
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();
    assert_eq!(validated.certificates.len(), 2);
    assert!(validated.certificates[0]
        .validation_info
        .get(TrustStoreName::Mozilla)
        .is_valid);
}

#[test]
fn all_validation_entries_present_after_any_pass() {
    let root = make_root("Complete Root");
    let leaf = make_self_signed_leaf("complete.example.com", &[]);
    let stores = uniform_stores(&root);

    let chain = chain_of("complete.example.com", "", vec![leaf.der()]);
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();

    let json = serde_json::to_value(&validated.certificates[0]).unwrap();
    let info = json["validationInfo"].as_object().unwrap();
    assert_eq!(info.len(), 5);
    for name in ["Ubuntu", "Mozilla", "Microsoft", "Apple", "Android"] {
        assert!(info.contains_key(name), "missing {} verdict", name);
        assert!(info[name].get("isValid").is_some());
    }
}

#[test]
fn per_store_verdicts_are_independent() {
    let trusted_root = make_root("Trusted Root");
    let other_root = make_root("Other Root");
    let leaf = make_leaf("split.example.com", &["split.example.com"], &trusted_root);

    // Ubuntu and Mozilla trust the issuing root; the rest trust another.
    let trusted_pem = trusted_root.pem();
    let other_pem = other_root.pem();
    let stores = TrustStoreSet::from_pems([
        trusted_pem.as_bytes(),
        trusted_pem.as_bytes(),
        other_pem.as_bytes(),
        other_pem.as_bytes(),
        other_pem.as_bytes(),
    ])
    .unwrap();

    let chain = chain_of(
        "split.example.com",
        "192.0.2.16",
        vec![leaf.der(), trusted_root.der()],
    );
    let validated = validate_chain(&chain, &stores, Utc::now()).unwrap();
    let info = &validated.certificates[0].validation_info;

    assert!(info.get(TrustStoreName::Ubuntu).is_valid);
    assert!(info.get(TrustStoreName::Mozilla).is_valid);
    assert!(!info.get(TrustStoreName::Microsoft).is_valid);
    assert!(!info.get(TrustStoreName::Apple).is_valid);
    assert!(!info.get(TrustStoreName::Android).is_valid);
}

#[test]
fn trust_store_load_is_fail_closed() {
    let dir = std::env::temp_dir().join(format!("tlscope-stores-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let root = make_root("Partial Root");
    for name in ["ubuntu", "mozilla", "microsoft", "apple"] {
        std::fs::write(dir.join(format!("{}.pem", name)), root.pem()).unwrap();
    }
    // android.pem is missing: the whole set must refuse to load.
    let err = TrustStoreSet::load(&dir).unwrap_err();
    match err {
        TlscopeError::TrustStoreLoad { name, .. } => assert_eq!(name, "Android"),
        other => panic!("expected TrustStoreLoad, got {}", other),
    }

    std::fs::write(dir.join("android.pem"), root.pem()).unwrap();
    let stores = TrustStoreSet::load(&dir).unwrap();
    assert_eq!(stores.store(TrustStoreName::Android).len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}
