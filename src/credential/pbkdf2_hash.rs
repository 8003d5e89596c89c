//! Self-describing PBKDF2 hashes.
//!
//! Format: `$<tag>$<iterations>$<salt>$<checksum>`, as written by passlib
//! for Odoo's `res_users.password`. The tag is `pbkdf2` (HMAC-SHA1) or
//! `pbkdf2-<digest>`. Salt and checksum use the "adapted base64" alphabet:
//! standard base64 with `.` in place of `+` and no padding.

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{Engine, alphabet};
use hmac::Hmac;
use subtle::ConstantTimeEq;

const AB64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encode bytes with the adapted base64 alphabet.
pub fn ab64_encode(bytes: &[u8]) -> String {
    AB64.encode(bytes).replace('+', ".")
}

/// Decode adapted base64. Padding is optional.
pub fn ab64_decode(text: &str) -> Option<Vec<u8>> {
    AB64.decode(text.replace('.', "+")).ok()
}

/// Pseudorandom function named by the hash tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prf {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Prf {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "pbkdf2" | "pbkdf2-sha1" => Some(Prf::Sha1),
            "pbkdf2-sha256" => Some(Prf::Sha256),
            "pbkdf2-sha384" => Some(Prf::Sha384),
            "pbkdf2-sha512" => Some(Prf::Sha512),
            _ => None,
        }
    }
}

/// A parsed PBKDF2 hash string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pbkdf2Hash {
    pub prf: Prf,
    pub iterations: u32,
    pub salt: Vec<u8>,
    checksum_len: usize,
    encoded_checksum: String,
}

impl Pbkdf2Hash {
    /// Parse a stored hash. Malformed strings yield `None`.
    pub fn parse(stored: &str) -> Option<Self> {
        let mut segments = stored.split('$');
        if !segments.next()?.is_empty() {
            return None;
        }
        let prf = Prf::from_tag(segments.next()?)?;
        let iterations = segments.next()?.parse::<u32>().ok().filter(|n| *n > 0)?;
        let salt = ab64_decode(segments.next()?)?;
        let encoded_checksum = segments.next()?.trim_end_matches('=');
        let checksum_len = ab64_decode(encoded_checksum)?.len();
        if checksum_len == 0 {
            return None;
        }
        Some(Self {
            prf,
            iterations,
            salt,
            checksum_len,
            encoded_checksum: encoded_checksum.to_string(),
        })
    }

    /// Derive a key of the stored checksum's length from `password`.
    pub fn derive(&self, password: &str) -> Option<Vec<u8>> {
        let mut out = vec![0u8; self.checksum_len];
        let pw = password.as_bytes();
        let result = match self.prf {
            Prf::Sha1 => pbkdf2::pbkdf2::<Hmac<sha1::Sha1>>(pw, &self.salt, self.iterations, &mut out),
            Prf::Sha256 => {
                pbkdf2::pbkdf2::<Hmac<sha2::Sha256>>(pw, &self.salt, self.iterations, &mut out)
            }
            Prf::Sha384 => {
                pbkdf2::pbkdf2::<Hmac<sha2::Sha384>>(pw, &self.salt, self.iterations, &mut out)
            }
            Prf::Sha512 => {
                pbkdf2::pbkdf2::<Hmac<sha2::Sha512>>(pw, &self.salt, self.iterations, &mut out)
            }
        };
        result.ok().map(|_| out)
    }

    /// Re-derive and compare the encoded checksum in constant time.
    pub fn verify(&self, password: &str) -> bool {
        match self.derive(password) {
            Some(derived) => {
                let encoded = ab64_encode(&derived);
                encoded.as_bytes().ct_eq(self.encoded_checksum.as_bytes()).into()
            }
            None => false,
        }
    }
}

/// Verify `password` against a stored PBKDF2 string.
pub fn verify(password: &str, stored: &str) -> bool {
    match Pbkdf2Hash::parse(stored) {
        Some(hash) => hash.verify(password),
        None => {
            tracing::debug!("Stored PBKDF2 hash is malformed");
            false
        }
    }
}
