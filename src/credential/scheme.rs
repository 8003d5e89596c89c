//! Hash scheme classification.
//!
//! Stored hashes are classified by shape alone, before any cryptography
//! runs. Anything that does not match a known shape is unclassified and
//! verification against it fails.

use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::str::FromStr;

/// Fixed-output digests compared as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_224,
    Sha512_256,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 12] = [
        DigestAlgorithm::Md5,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha224,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
        DigestAlgorithm::Sha512_224,
        DigestAlgorithm::Sha512_256,
        DigestAlgorithm::Sha3_224,
        DigestAlgorithm::Sha3_256,
        DigestAlgorithm::Sha3_384,
        DigestAlgorithm::Sha3_512,
    ];

    /// Standard name, as offered in the admin hashing selector.
    pub fn label(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha224 => "SHA-224",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
            DigestAlgorithm::Sha512_224 => "SHA-512/224",
            DigestAlgorithm::Sha512_256 => "SHA-512/256",
            DigestAlgorithm::Sha3_224 => "SHA3-224",
            DigestAlgorithm::Sha3_256 => "SHA3-256",
            DigestAlgorithm::Sha3_384 => "SHA3-384",
            DigestAlgorithm::Sha3_512 => "SHA3-512",
        }
    }

    /// Look up an algorithm by name, ignoring case and `-`, `_`, `/` separators.
    pub fn from_name(name: &str) -> Option<Self> {
        let key = normalize(name);
        Self::ALL.into_iter().find(|alg| normalize(alg.label()) == key)
    }

    /// Digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Md5 => md5::Md5::digest(data).to_vec(),
            DigestAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha224 => sha2::Sha224::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
            DigestAlgorithm::Sha512_224 => sha2::Sha512_224::digest(data).to_vec(),
            DigestAlgorithm::Sha512_256 => sha2::Sha512_256::digest(data).to_vec(),
            DigestAlgorithm::Sha3_224 => sha3::Sha3_224::digest(data).to_vec(),
            DigestAlgorithm::Sha3_256 => sha3::Sha3_256::digest(data).to_vec(),
            DigestAlgorithm::Sha3_384 => sha3::Sha3_384::digest(data).to_vec(),
            DigestAlgorithm::Sha3_512 => sha3::Sha3_512::digest(data).to_vec(),
        }
    }

    /// Lowercase hex digest of a password's UTF-8 bytes.
    pub fn hex_digest(&self, password: &str) -> String {
        hex::encode(self.digest(password.as_bytes()))
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | '/' | ' '))
        .flat_map(char::to_uppercase)
        .collect()
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a stored credential was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashScheme {
    /// Stored as-is. Only for legacy stores.
    Plaintext,
    /// `$2a$`, `$2b$`, `$2x$` or `$2y$` adaptive hash.
    Bcrypt,
    /// Self-describing `$pbkdf2[-<digest>]$<iterations>$<salt>$<checksum>`.
    Pbkdf2,
    /// Hex-encoded unsalted digest.
    Digest(DigestAlgorithm),
}

impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashScheme::Plaintext => f.write_str("INSECURE PLAINTEXT"),
            HashScheme::Bcrypt => f.write_str("Blowfish (bcrypt)"),
            HashScheme::Pbkdf2 => f.write_str("PBKDF2"),
            HashScheme::Digest(alg) => f.write_str(alg.label()),
        }
    }
}

/// Error returned when a hashing selector is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScheme(pub String);

impl fmt::Display for UnknownScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown password hashing algorithm '{}'", self.0)
    }
}

impl std::error::Error for UnknownScheme {}

impl FromStr for HashScheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        match key.as_str() {
            "BLOWFISH(BCRYPT)" | "BCRYPT" | "BLOWFISH" => Ok(HashScheme::Bcrypt),
            "INSECUREPLAINTEXT" | "PLAINTEXT" | "PLAIN" => Ok(HashScheme::Plaintext),
            k if k.starts_with("PBKDF2") => Ok(HashScheme::Pbkdf2),
            _ => DigestAlgorithm::from_name(s)
                .map(HashScheme::Digest)
                .ok_or_else(|| UnknownScheme(s.to_string())),
        }
    }
}

/// Infer the scheme of a stored hash from its shape.
///
/// Unsalted hex digests are recognised by length; 56-character hex is
/// ambiguous between SHA-224 and SHA3-224 and is left unclassified.
pub fn classify(stored: &str) -> Option<HashScheme> {
    if stored.starts_with("$pbkdf2") {
        return Some(HashScheme::Pbkdf2);
    }
    if ["$2a$", "$2b$", "$2x$", "$2y$"]
        .iter()
        .any(|prefix| stored.starts_with(prefix))
    {
        return Some(HashScheme::Bcrypt);
    }
    if !stored.is_empty() && stored.chars().all(|c| c.is_ascii_hexdigit()) {
        let alg = match stored.len() {
            32 => DigestAlgorithm::Md5,
            40 => DigestAlgorithm::Sha1,
            64 => DigestAlgorithm::Sha256,
            96 => DigestAlgorithm::Sha384,
            128 => DigestAlgorithm::Sha512,
            _ => return None,
        };
        return Some(HashScheme::Digest(alg));
    }
    None
}
