//! 256-bit digest newtypes
//!
//! Both digests travel as lowercase hex in persisted and displayed form,
//! and as raw bytes everywhere else.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Width in bytes of every digest in the ledger
pub const DIGEST_LEN: usize = 32;

/// Error returned when a hex string is not a 32-byte digest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDigestError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected {DIGEST_LEN} bytes, got {0}")]
    WrongLength(usize),
}

fn parse_hex(s: &str) -> Result<[u8; DIGEST_LEN], ParseDigestError> {
    let bytes = hex::decode(s.trim()).map_err(|e| ParseDigestError::InvalidHex(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParseDigestError::WrongLength(len))
}

macro_rules! digest_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; DIGEST_LEN]);

        impl $name {
            /// Raw digest bytes
            pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
                &self.0
            }

            /// Full lowercase hex rendering
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// First 8 hex characters, for log lines
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl From<[u8; DIGEST_LEN]> for $name {
            fn from(bytes: [u8; DIGEST_LEN]) -> Self {
                Self(bytes)
            }
        }

        impl FromStr for $name {
            type Err = ParseDigestError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

digest_type! {
    /// Content-addressed identity of a breeding event record
    Fingerprint
}

digest_type! {
    /// Opaque digest of an offspring genotype payload
    ///
    /// The payload itself belongs to the breeding logic; the ledger only
    /// commits to its hash.
    GenotypeDigest
}

impl GenotypeDigest {
    /// Digest an arbitrary genotype payload with SHA-256
    pub fn of(payload: &[u8]) -> Self {
        Self(Sha256::digest(payload).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let fp = Fingerprint([0xab; DIGEST_LEN]);
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!(fp.short(), "abababab");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "zz".parse::<Fingerprint>(),
            Err(ParseDigestError::InvalidHex(_))
        ));
        assert_eq!(
            "abcd".parse::<Fingerprint>(),
            Err(ParseDigestError::WrongLength(2))
        );
    }

    #[test]
    fn test_serde_as_hex_string() {
        let fp = Fingerprint([1; DIGEST_LEN]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(DIGEST_LEN)));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_genotype_digest_is_sha256() {
        let a = GenotypeDigest::of(b"purple-haze x blue-dream");
        let b = GenotypeDigest::of(b"purple-haze x blue-dream");
        let c = GenotypeDigest::of(b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
