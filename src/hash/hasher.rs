//! FingerprintHasher: canonical encoding, digesting and difficulty checks

use super::Fingerprint;
use crate::ledger::{BreedingEventRecord, RecordCandidate, ValidationError};
use sha2::{Digest, Sha256};

/// Domain separation tag absorbed before any record field
const DOMAIN_TAG: &[u8] = b"strain-ledger/record/v1";

/// Hasher state with every candidate field absorbed except the nonce
///
/// Mining clones this per attempt, so the record is encoded once per search.
#[derive(Clone)]
pub struct PrefixState {
    state: Sha256,
}

impl PrefixState {
    /// Finish the digest for one nonce
    pub fn finish(&self, nonce: u64) -> Fingerprint {
        let mut hasher = self.state.clone();
        hasher.update(nonce.to_be_bytes());
        Fingerprint(hasher.finalize().into())
    }
}

/// Deterministic content hashing and proof-of-work verification
pub struct FingerprintHasher;

impl FingerprintHasher {
    /// Absorb the canonical encoding of a candidate, nonce excluded
    pub fn prefix_state(candidate: &RecordCandidate) -> PrefixState {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update((candidate.parents().len() as u32).to_be_bytes());
        for parent in candidate.parents() {
            hasher.update(parent.as_bytes());
        }
        hasher.update(candidate.genotype().as_bytes());
        hasher.update(candidate.generation().to_be_bytes());
        let breeder = candidate.breeder().as_bytes();
        hasher.update((breeder.len() as u32).to_be_bytes());
        hasher.update(breeder);
        hasher.update(candidate.created_at().timestamp_millis().to_be_bytes());
        hasher.update([candidate.difficulty()]);
        PrefixState { state: hasher }
    }

    /// Fingerprint of a candidate sealed with `nonce`
    pub fn compute_fingerprint(candidate: &RecordCandidate, nonce: u64) -> Fingerprint {
        Self::prefix_state(candidate).finish(nonce)
    }

    /// Whether a digest carries at least `difficulty` leading zero bits
    pub fn meets_difficulty(fingerprint: &Fingerprint, difficulty: u8) -> bool {
        leading_zero_bits(fingerprint.as_bytes()) >= u32::from(difficulty)
    }

    /// Re-hash a record and check it against its own stored difficulty
    pub fn check(record: &BreedingEventRecord) -> Result<(), ValidationError> {
        let computed = Self::compute_fingerprint(record.candidate(), record.nonce());
        if computed != record.fingerprint() {
            return Err(ValidationError::HashMismatch {
                stored: record.fingerprint(),
                computed,
            });
        }
        let required = record.difficulty();
        if !Self::meets_difficulty(&computed, required) {
            return Err(ValidationError::DifficultyNotMet {
                fingerprint: computed,
                required,
                actual: leading_zero_bits(computed.as_bytes()),
            });
        }
        Ok(())
    }

    /// Boolean form of [`FingerprintHasher::check`]
    pub fn verify(record: &BreedingEventRecord) -> bool {
        Self::check(record).is_ok()
    }
}

/// Count leading zero bits of a digest, bit-granular rather than per nibble
pub fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}
