//! Fuzz target for datagram decoding
//!
//! Any byte string must either decode or yield an error; the message
//! iterator must stop after its first error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use verse_core::wire::split_header;
use verse_core::{Message, Messages};

fuzz_target!(|data: &[u8]| {
    let Ok((packet_id, body)) = split_header(data) else {
        return;
    };

    let mut decoded = Vec::new();
    let mut iter = Messages::new(body);
    for message in iter.by_ref() {
        match message {
            Ok(message) => decoded.push(message),
            Err(_) => break,
        }
    }
    assert!(iter.next().is_none());

    // Decoded messages re-encode, except the decode-only incompatible challenge
    let encodable: Vec<_> = decoded
        .into_iter()
        .filter(|m| !matches!(m, Message::IncompatibleChallenge { .. }))
        .collect();
    let _ = Message::datagram(packet_id, &encodable);
});
