//! Fuzz target for on-disk block decoding.
//!
//! Tests that header and tree-node decoding never panic on arbitrary bytes,
//! and that a decoded header re-encodes to one that decodes identically.

#![no_main]

use libfuzzer_sys::fuzz_target;

use graphvault_store::{StoreHeader, btree::node::Node, quad::KEY_WIDTH};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let selector = data[0] % 3;
    let payload = &data[1..];

    match selector {
        0 => fuzz_header(payload),
        1 => fuzz_node(payload, KEY_WIDTH),
        _ => fuzz_node(payload, 8),
    }
});

fn fuzz_header(data: &[u8]) {
    if let Ok(header) = StoreHeader::from_block(data) {
        let _ = header.validate_and_choose_slot();
        let encoded = header.to_block(data.len());
        let roundtrip = StoreHeader::from_block(&encoded).ok();
        assert_eq!(roundtrip.as_ref(), Some(&header), "header roundtrip mismatch");
    }
}

fn fuzz_node(data: &[u8], key_width: usize) {
    if let Ok(node) = Node::decode(1, data, key_width) {
        let mut buf = vec![0u8; data.len()];
        node.encode(&mut buf, 1);
        assert!(Node::decode(1, &buf, key_width).is_ok(), "re-encoded node failed to decode");
    }
}
