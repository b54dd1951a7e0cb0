//! Credential primitives: invitation codes, PINs, PIN hashing, membership keys.

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore, distributions::Alphanumeric};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use keygate_core::{DomainError, DomainResult};

/// Length of a generated invitation code.
pub const CODE_LENGTH: usize = 24;

/// Number of digits in an invitation PIN.
pub const PIN_LENGTH: usize = 6;

const KEY_PREFIX: &str = "MEMBER-";
const HASH_SCHEME: &str = "sha256";
const SALT_BYTES: usize = 16;

/// Generate a URL-safe, fixed-length invitation code.
///
/// Uniqueness is not guaranteed here; callers check against the store.
pub fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect()
}

/// Generate a 6-digit numeric PIN (leading zeros preserved).
pub fn generate_pin() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

/// Returns true when `pin` is exactly six ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Returns true when `code` has the shape of a generated invitation code.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= 128 && code.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Mint a membership key: `MEMBER-<6 hex>-<unix seconds>`.
pub fn mint_membership_key(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{KEY_PREFIX}{}-{}", hex::encode(bytes), now.timestamp())
}

/// Returns true when `key` matches `MEMBER-[0-9a-f]{6}-\d+`.
pub fn is_membership_key_format(key: &str) -> bool {
    let Some(rest) = key.strip_prefix(KEY_PREFIX) else {
        return false;
    };
    let Some((hex_part, secs)) = rest.split_once('-') else {
        return false;
    };
    hex_part.len() == 6
        && hex_part.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && !secs.is_empty()
        && secs.bytes().all(|b| b.is_ascii_digit())
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// One-way salted hash of a PIN.
///
/// Encoded as `sha256$<salt hex>$<digest hex>`. The plaintext is never kept.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPin(String);

impl HashedPin {
    /// Hash a plaintext PIN with a fresh random salt.
    pub fn hash(pin: &str) -> Self {
        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = digest(&salt, pin);
        Self(format!("{HASH_SCHEME}${}${}", hex::encode(salt), hex::encode(digest)))
    }

    /// Rehydrate a stored hash, validating its encoding.
    pub fn from_encoded(encoded: impl Into<String>) -> DomainResult<Self> {
        let encoded = encoded.into();
        split_encoded(&encoded)
            .ok_or_else(|| DomainError::validation("malformed pin hash"))?;
        Ok(Self(encoded))
    }

    pub fn as_encoded(&self) -> &str {
        &self.0
    }

    /// Compare a candidate PIN against this hash in constant time.
    pub fn verify(&self, candidate: &str) -> bool {
        let Some((salt, expected)) = split_encoded(&self.0) else {
            return false;
        };
        let actual = digest(&salt, candidate);
        constant_time_eq(&actual, &expected)
    }
}

impl core::fmt::Debug for HashedPin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("HashedPin(<redacted>)")
    }
}

fn digest(salt: &[u8], pin: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(pin.as_bytes());
    hasher.finalize().to_vec()
}

fn split_encoded(encoded: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut parts = encoded.split('$');
    let scheme = parts.next()?;
    let salt = hex::decode(parts.next()?).ok()?;
    let digest = hex::decode(parts.next()?).ok()?;
    if scheme != HASH_SCHEME || parts.next().is_some() || digest.len() != 32 {
        return None;
    }
    Some((salt, digest))
}
