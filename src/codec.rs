//! Digest and codec primitives: SHA hashing, base64, big-integer bytes.

use base64::Engine;
use rsa::BigUint;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::Error;

/// SHA-1 digest of `data`.
pub fn sha1(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

/// Digest `data` with the hash named in a `DigestMethod` fragment
/// (`sha1` or `sha256`).
pub fn digest_by_name(name: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    match name {
        "sha1" => Ok(sha1(data)),
        "sha256" => Ok(Sha256::digest(data).to_vec()),
        other => Err(Error::unknown_algorithm(format!(
            "unsupported digest algorithm '{}'",
            other
        ))),
    }
}

/// Standard-alphabet base64, no embedded newlines.
pub fn b64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Base64 decoding tolerant of embedded ASCII whitespace, as found in
/// PEM bodies and `X509Certificate` text.
pub fn b64_decode(data: &str) -> Result<Vec<u8>, Error> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::malformed(format!("invalid base64: {}", e)))
}

/// Minimum-length big-endian encoding of an unsigned integer, with a leading
/// zero byte whenever the top bit of the first content byte is set, so the
/// value stays unambiguous when re-read as unsigned.
pub fn int_to_minimal_be_bytes(n: &BigUint) -> Vec<u8> {
    let mut bytes = n.to_bytes_be();
    if bytes.first().map_or(false, |b| b & 0x80 != 0) {
        bytes.insert(0, 0x00);
    }
    bytes
}
