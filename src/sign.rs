//! Identifiers and request signatures expected by the upstream web API.

use md5::{Digest, Md5};
use rand::Rng;

/// Alphabet of the upstream web client's nanoid implementation.
const NANOID_ALPHABET: &[u8] = b"abcdefgh0ijkl1mno2pqrs3tuv4wxyz5ABCDEFGH6IJKL7MNO8PQRS9TUV-WXYZ_";

/// Random id of `size` characters over the upstream alphabet.
pub fn nanoid(size: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..size)
        .map(|_| NANOID_ALPHABET[rng.gen_range(0..NANOID_ALPHABET.len())] as char)
        .collect()
}

/// Fresh device id: `<uuid hex>_<nanoid(20)>`.
pub fn generate_device_id() -> String {
    format!("{}_{}", uuid::Uuid::new_v4().simple(), nanoid(20))
}

/// Uppercase hex MD5 of `timestamp + body + nonce`.
///
/// `body` must be the exact compact JSON bytes that are sent.
pub fn sign(timestamp: &str, body: &str, nonce: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(body.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect()
}

/// Signature headers for one upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub timestamp: String,
    pub nonce: String,
    pub sign: String,
}

impl Signature {
    /// Sign `body` at unix time `timestamp` with a fresh nonce.
    pub fn new(timestamp: u64, body: &str) -> Self {
        let timestamp = timestamp.to_string();
        let nonce = nanoid(21);
        let sign = sign(&timestamp, body, &nonce);
        Self {
            timestamp,
            nonce,
            sign,
        }
    }
}
