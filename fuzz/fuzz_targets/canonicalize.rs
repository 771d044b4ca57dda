#![no_main]

use libfuzzer_sys::fuzz_target;
use tlscope_lib::{parse_stored, sha256_hex, NO_PARENT};

fuzz_target!(|data: &[u8]| {
    // Canonicalization must never panic, regardless of input.
    let observed_at = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
    if let Ok(stored) = parse_stored(data, NO_PARENT, "fuzz.example.com", "192.0.2.1", observed_at)
    {
        // The content hash must match the bytes that were actually parsed.
        let der = stored.to_der().expect("stored raw must decode");
        assert_eq!(stored.hashes.sha256, sha256_hex(&der));

        // Subject rendering and re-canonicalization must also hold up.
        let _ = stored.subject.to_string();
        let again = parse_stored(&der, NO_PARENT, "fuzz.example.com", "192.0.2.1", observed_at)
            .expect("canonical DER must re-parse");
        assert_eq!(stored.hashes.sha256, again.hashes.sha256);
    }
});
