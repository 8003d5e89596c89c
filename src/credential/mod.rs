//! Password verification against hashes stored in the partner store.
//!
//! Verification is split in two steps that are tested separately: pick a
//! [`HashScheme`] (fixed per deployment, or classified from the stored
//! string), then run that scheme's check. Every failure, including a
//! malformed or unrecognised hash, is reported as a plain `false`.

pub mod pbkdf2_hash;
pub mod scheme;

pub use scheme::{DigestAlgorithm, HashScheme, UnknownScheme, classify};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use tracing::debug;

/// How a deployment decides which scheme its stored hashes use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CredentialPolicy {
    /// Classify every stored hash by its shape.
    #[default]
    Detect,
    /// Every stored hash uses this scheme.
    Fixed(HashScheme),
}

impl CredentialPolicy {
    /// Check `password` against `stored` under this policy.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let scheme = match self {
            CredentialPolicy::Fixed(scheme) => *scheme,
            CredentialPolicy::Detect => match classify(stored) {
                Some(scheme) => scheme,
                None => {
                    debug!("Stored hash has no recognised shape");
                    return false;
                }
            },
        };
        verify(password, stored, scheme)
    }
}

impl FromStr for CredentialPolicy {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "detect" | "auto" => Ok(CredentialPolicy::Detect),
            _ => s.trim().parse().map(CredentialPolicy::Fixed),
        }
    }
}

impl TryFrom<String> for CredentialPolicy {
    type Error = UnknownScheme;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CredentialPolicy> for String {
    fn from(policy: CredentialPolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for CredentialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialPolicy::Detect => f.write_str("detect"),
            CredentialPolicy::Fixed(scheme) => write!(f, "{}", scheme),
        }
    }
}

/// Check `password` against `stored` using `scheme`.
///
/// An empty stored value never verifies.
pub fn verify(password: &str, stored: &str, scheme: HashScheme) -> bool {
    if stored.is_empty() {
        return false;
    }
    match scheme {
        HashScheme::Plaintext => password.as_bytes().ct_eq(stored.as_bytes()).into(),
        HashScheme::Bcrypt => match bcrypt::verify(password, stored) {
            Ok(matched) => matched,
            Err(e) => {
                debug!(error = %e, "Stored bcrypt hash is malformed");
                false
            }
        },
        HashScheme::Pbkdf2 => pbkdf2_hash::verify(password, stored),
        HashScheme::Digest(alg) => {
            let computed = alg.hex_digest(password);
            let expected = stored.trim().to_ascii_lowercase();
            computed.as_bytes().ct_eq(expected.as_bytes()).into()
        }
    }
}
