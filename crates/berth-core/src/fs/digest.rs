//! Content digests for package archives.
//!
//! Digests are written as `blake3:<hex>`. A bare hex string is accepted on
//! input and treated as blake3.

const PREFIX: &str = "blake3:";

pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{}{}", PREFIX, blake3::hash(bytes).to_hex())
}

/// Check `bytes` against an expected digest string.
pub fn verify_digest(bytes: &[u8], expected: &str) -> bool {
    let expected = expected.strip_prefix(PREFIX).unwrap_or(expected);
    blake3::hash(bytes)
        .to_hex()
        .as_str()
        .eq_ignore_ascii_case(expected)
}
