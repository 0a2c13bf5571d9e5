//! Password hashing
//!
//! Hashes use the `pbkdf2:sha256:<rounds>$<salt>$<hex digest>` layout so rows
//! created by the earlier Flask deployment keep verifying.

use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::Sha256;

use super::constant_time_eq;

/// PBKDF2 rounds for new hashes
pub const DEFAULT_ROUNDS: u32 = 600_000;

const SALT_LENGTH: usize = 16;
const METHOD_PREFIX: &str = "pbkdf2:sha256";

/// Hash a password with a fresh random salt
#[must_use]
pub fn hash_password(password: &str, rounds: u32) -> String {
    let rounds = rounds.max(1);
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect();
    let digest = derive(password, &salt, rounds);
    format!("{METHOD_PREFIX}:{rounds}${salt}${}", hex::encode(digest))
}

/// Check a password against a stored hash
///
/// Unknown or malformed hash formats never verify.
#[must_use]
pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(method), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let Some(rest) = method.strip_prefix(METHOD_PREFIX) else {
        return false;
    };
    let rounds = if rest.is_empty() {
        DEFAULT_ROUNDS
    } else {
        match rest.strip_prefix(':').and_then(|r| r.parse::<u32>().ok()) {
            Some(r) if r > 0 => r,
            _ => return false,
        }
    };

    let Ok(expected) = hex::decode(expected) else {
        return false;
    };

    constant_time_eq(&derive(password, salt, rounds), &expected)
}

fn derive(password: &str, salt: &str, rounds: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut out);
    out
}
