//! Password hashing and session cookies for the web app

mod password;
mod session;

pub use password::{DEFAULT_ROUNDS, hash_password, verify_password};
pub use session::{SESSION_COOKIE, SessionKeys, session_token_from_headers};

use rand::RngCore;

/// Generate a random 256-bit secret, hex encoded
#[must_use]
pub fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compare two byte strings without early exit
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
