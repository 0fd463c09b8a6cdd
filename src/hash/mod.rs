//! Fingerprint hashing for breeding event records
//!
//! Records are identified by the SHA-256 digest of a canonical, fixed-width
//! encoding of their fields. The same encoding drives mining and
//! verification, so a record's validity never depends on who mined it.

mod digest;
mod hasher;

pub use digest::{Fingerprint, GenotypeDigest, ParseDigestError, DIGEST_LEN};
pub use hasher::{leading_zero_bits, FingerprintHasher, PrefixState};
