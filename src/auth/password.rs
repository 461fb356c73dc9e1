//! Password hashing capability consumed by registration and login.
//!
//! Stored form: `pbkdf2-sha256$<rounds>$<salt hex>$<digest hex>`, so the
//! round count can be raised later without invalidating existing hashes.

use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Default PBKDF2 round count.
pub const DEFAULT_HASH_ITERATIONS: u32 = 100_000;

const SCHEME: &str = "pbkdf2-sha256";

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Derived key length.
const DIGEST_BYTES: usize = 32;

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// PBKDF2-HMAC-SHA256 with a random per-password salt.
#[derive(Debug, Clone, Copy)]
pub struct Pbkdf2Sha256 {
    rounds: u32,
}

impl Pbkdf2Sha256 {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }
}

impl Default for Pbkdf2Sha256 {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_ITERATIONS)
    }
}

impl PasswordHasher for Pbkdf2Sha256 {
    fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let mut digest = [0u8; DIGEST_BYTES];
        derive(password, &salt, self.rounds, &mut digest);
        format!(
            "{SCHEME}${}${}${}",
            self.rounds,
            hex::encode(salt),
            hex::encode(digest)
        )
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.split('$');
        let (Some(SCHEME), Some(rounds), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        let Ok(rounds) = rounds.parse::<u32>() else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
            return false;
        };
        if rounds == 0 || expected.len() != DIGEST_BYTES {
            return false;
        }

        let mut attempt = [0u8; DIGEST_BYTES];
        derive(password, &salt, rounds, &mut attempt);
        attempt[..].ct_eq(&expected[..]).into()
    }
}

fn derive(password: &str, salt: &[u8], rounds: u32, out: &mut [u8]) {
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, out);
}
