//! BreedingEventRecord: one immutable ledger entry
//!
//! A record is a [`RecordCandidate`] (everything the breeder decides) sealed
//! with the nonce and fingerprint produced by mining.

use super::ValidationError;
use crate::hash::{Fingerprint, GenotypeDigest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Most parents a single breeding event may name
pub const MAX_PARENTS: usize = 2;

/// Record fields that exist before mining: no nonce, no fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCandidate {
    pub(crate) parents: Vec<Fingerprint>,
    pub(crate) genotype: GenotypeDigest,
    pub(crate) generation: u32,
    pub(crate) breeder: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) difficulty: u8,
}

impl RecordCandidate {
    /// Build a candidate, quantizing the timestamp to whole milliseconds
    pub fn new(
        parents: Vec<Fingerprint>,
        genotype: GenotypeDigest,
        generation: u32,
        breeder: impl Into<String>,
        created_at: DateTime<Utc>,
        difficulty: u8,
    ) -> Result<Self, ValidationError> {
        if parents.len() > MAX_PARENTS {
            return Err(ValidationError::TooManyParents(parents.len()));
        }
        let created_at =
            DateTime::<Utc>::from_timestamp_millis(created_at.timestamp_millis()).unwrap_or(created_at);
        Ok(Self {
            parents,
            genotype,
            generation,
            breeder: breeder.into(),
            created_at,
            difficulty,
        })
    }

    /// Candidate for a genesis import: no parents, generation 0
    pub fn genesis(
        genotype: GenotypeDigest,
        breeder: impl Into<String>,
        difficulty: u8,
    ) -> Self {
        Self {
            parents: Vec::new(),
            genotype,
            generation: 0,
            breeder: breeder.into(),
            created_at: DateTime::<Utc>::from_timestamp_millis(Utc::now().timestamp_millis())
                .unwrap_or_else(Utc::now),
            difficulty,
        }
    }

    pub fn parents(&self) -> &[Fingerprint] {
        &self.parents
    }

    pub fn genotype(&self) -> &GenotypeDigest {
        &self.genotype
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn breeder(&self) -> &str {
        &self.breeder
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }
}

/// An accepted (or about to be submitted) breeding event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreedingEventRecord {
    pub(crate) fingerprint: Fingerprint,
    #[serde(flatten)]
    pub(crate) candidate: RecordCandidate,
    pub(crate) nonce: u64,
}

impl BreedingEventRecord {
    /// Seal a candidate with a mined nonce and its fingerprint
    ///
    /// Nothing is checked here; the ledger verifies on append.
    pub fn seal(candidate: RecordCandidate, nonce: u64, fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            candidate,
            nonce,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn candidate(&self) -> &RecordCandidate {
        &self.candidate
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn parents(&self) -> &[Fingerprint] {
        self.candidate.parents()
    }

    pub fn genotype(&self) -> &GenotypeDigest {
        self.candidate.genotype()
    }

    pub fn generation(&self) -> u32 {
        self.candidate.generation()
    }

    pub fn breeder(&self) -> &str {
        self.candidate.breeder()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.candidate.created_at()
    }

    pub fn difficulty(&self) -> u8 {
        self.candidate.difficulty()
    }

    pub fn is_genesis(&self) -> bool {
        self.candidate.is_genesis()
    }

    /// One-line description for logs and the CLI
    pub fn summary(&self) -> String {
        let parents: Vec<String> = self.parents().iter().map(|p| p.short()).collect();
        format!(
            "Record {} | gen={} | parents={:?} | breeder='{}' | difficulty={} | nonce={}",
            self.fingerprint.short(),
            self.generation(),
            parents,
            self.breeder(),
            self.difficulty(),
            self.nonce
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_three_parents() {
        let p = Fingerprint([7; 32]);
        let result = RecordCandidate::new(
            vec![p, p, p],
            GenotypeDigest::of(b"x"),
            1,
            "b",
            Utc::now(),
            0,
        );
        assert_eq!(result, Err(ValidationError::TooManyParents(3)));
    }

    #[test]
    fn test_same_parent_twice_is_allowed() {
        let p = Fingerprint([7; 32]);
        let c = RecordCandidate::new(vec![p, p], GenotypeDigest::of(b"clone"), 1, "b", Utc::now(), 0)
            .unwrap();
        assert_eq!(c.parents().len(), 2);
        assert!(!c.is_genesis());
    }

    #[test]
    fn test_serde_flattens_candidate() {
        let c = RecordCandidate::genesis(GenotypeDigest::of(b"g"), "breeder", 3);
        let record = BreedingEventRecord::seal(c, 17, Fingerprint([9; 32]));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["nonce"], 17);
        assert_eq!(json["difficulty"], 3);
        assert_eq!(json["breeder"], "breeder");
        let back: BreedingEventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
