//! Admission and audit errors

use crate::hash::Fingerprint;

/// Why a record was rejected by `append` or flagged by `audit`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("fingerprint {0} is already in the ledger")]
    DuplicateFingerprint(Fingerprint),

    #[error("record {record} names parent {parent} which is not in the ledger")]
    MissingParent {
        record: Fingerprint,
        parent: Fingerprint,
    },

    #[error("a record may name at most 2 parents, got {0}")]
    TooManyParents(usize),

    #[error("record {record} claims generation {actual}, lineage implies {expected}")]
    GenerationMismatch {
        record: Fingerprint,
        expected: u32,
        actual: u32,
    },

    #[error("stored fingerprint {stored} does not match recomputed {computed}")]
    HashMismatch {
        stored: Fingerprint,
        computed: Fingerprint,
    },

    #[error("fingerprint {fingerprint} has {actual} leading zero bits, {required} required")]
    DifficultyNotMet {
        fingerprint: Fingerprint,
        required: u8,
        actual: u32,
    },

    #[error("record mined at difficulty {actual}, policy requires {expected}")]
    DifficultyMismatch { expected: u8, actual: u8 },

    #[error("record {0} failed integrity checks")]
    CorruptedRecord(Fingerprint),

    #[error("ledger is corrupted and refuses appends until replaced")]
    LedgerCorrupted,
}
