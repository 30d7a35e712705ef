//! Fuzz target for transactional quad operations.
//!
//! Interprets the input as a stream of adds, deletes, pattern deletes,
//! commits and aborts against an in-memory store, mirrored in a `BTreeSet`.
//! After every commit the store must agree with the model and pass an
//! integrity check.

#![no_main]

use std::collections::BTreeSet;

use libfuzzer_sys::fuzz_target;

use graphvault_store::{Quad, QuadPattern, Store, StoreConfig, TermId};

fn term(byte: u8) -> TermId {
    TermId::new(u64::from(byte % 8))
}

fuzz_target!(|data: &[u8]| {
    let Ok(config) = StoreConfig::builder().block_size(512).cache_blocks(16).build() else {
        return;
    };
    let Ok(store) = Store::open_in_memory_with_config(config) else {
        return;
    };
    let mut model = BTreeSet::new();
    let mut staged = BTreeSet::new();
    let Ok(mut txn) = store.write() else {
        return;
    };

    for chunk in data.chunks_exact(5) {
        let quad = Quad::new(term(chunk[1]), term(chunk[2]), term(chunk[3]), term(chunk[4]));
        match chunk[0] % 8 {
            0..=3 => {
                let added = txn.add(&quad).unwrap_or(false);
                assert_eq!(added, staged.insert(quad));
            },
            4 | 5 => {
                let removed = txn.delete(&quad).unwrap_or(false);
                assert_eq!(removed, staged.remove(&quad));
            },
            6 => {
                let pattern = QuadPattern::any().with_subject(quad.subject);
                let before = staged.len();
                staged.retain(|q: &Quad| !pattern.matches(q));
                let removed = txn.delete_matching(&pattern).unwrap_or(0);
                assert_eq!(removed, (before - staged.len()) as u64);
            },
            _ => {
                if chunk[1] % 4 == 0 {
                    txn.abort();
                    staged = model.clone();
                } else {
                    assert!(txn.commit().is_ok());
                    model = staged.clone();
                    verify(&store, &model);
                }
                let Ok(next) = store.write() else {
                    return;
                };
                txn = next;
            },
        }
    }
    txn.abort();
    verify(&store, &model);
});

fn verify(store: &Store<graphvault_store::MemoryChannel>, model: &BTreeSet<Quad>) {
    let Ok(read) = store.read() else {
        return;
    };
    let found: BTreeSet<Quad> = read.find(&QuadPattern::any()).filter_map(Result::ok).collect();
    assert_eq!(&found, model);
    drop(read);
    assert!(store.check_integrity().map(|r| r.is_healthy()).unwrap_or(false));
}
