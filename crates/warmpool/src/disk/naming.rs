use data_encoding::BASE32HEX_NOPAD;
use sha2::{Digest, Sha256};

const HASH_CHARS: usize = 52;

/// Name of the persistent disk owned by `user`.
///
/// The identity is hashed so it never appears in a resource name. SHA-256
/// encoded as lowercase extended-hex base32 is exactly 52 characters from
/// `[0-9a-v]`, so the result is a fixed 62-character valid resource name.
pub fn disk_name(user: &str) -> String {
    let digest = Sha256::digest(user.as_bytes());
    let encoded = BASE32HEX_NOPAD.encode(&digest).to_lowercase();
    format!("user-{}-disk", &encoded[..HASH_CHARS])
}
