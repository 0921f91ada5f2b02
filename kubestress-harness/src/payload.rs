//! Synthesis of oversized request payloads.
//!
//! A payload is an optional prefix followed by random lowercase hex filler, padded to an exact
//! byte size. Hex keeps payloads valid inside URL paths and DNS-style resource names, so the only
//! property a remote service sees changing is the length.

use rand::RngCore;

/// Maximum number of random hex characters generated for a single filler block.
///
/// Larger payloads repeat the block instead of generating fresh randomness for every byte.
const FILLER_BLOCK: usize = 1024;

/// Builds a payload of `target_size` bytes starting with `prefix`.
///
/// If `target_size` does not exceed the length of `prefix`, the prefix is returned unchanged. The
/// filler content is random and not reproducible, only its length is guaranteed.
pub fn synthesize(target_size: usize, prefix: &str) -> String {
    let remaining = target_size.saturating_sub(prefix.len());

    let mut payload = String::with_capacity(prefix.len() + remaining);
    payload.push_str(prefix);
    if remaining == 0 {
        return payload;
    }

    let block = random_hex(remaining.min(FILLER_BLOCK));
    for _ in 0..remaining / block.len() {
        payload.push_str(&block);
    }
    payload.push_str(&random_hex(remaining % block.len()));

    payload
}

/// Returns `len` random lowercase hex characters.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0; len.div_ceil(2)];
    rand::rng().fill_bytes(&mut bytes);

    let mut encoded = hex::encode(bytes);
    encoded.truncate(len);
    encoded
}
