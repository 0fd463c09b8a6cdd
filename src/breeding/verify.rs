//! Verification reports for lineage consumers
//!
//! A report is plain data: whether a record and its whole ancestry hold up,
//! its generation, and one shortest path back to genesis.

use crate::hash::{Fingerprint, FingerprintHasher};
use crate::ledger::{GeneticLedger, LedgerStatus};
use serde::{Deserialize, Serialize};

/// Outcome of verifying one fingerprint against the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub fingerprint: Fingerprint,
    /// The record and every ancestor re-hash correctly and the ledger is healthy
    pub is_valid: bool,
    /// `None` when the fingerprint is not in the ledger
    pub generation: Option<u32>,
    /// From the record back to a genesis ancestor, inclusive
    pub lineage_path: Vec<Fingerprint>,
}

impl VerificationReport {
    /// Verify `fingerprint` against one snapshot of `ledger`
    pub fn build(ledger: &GeneticLedger, fingerprint: &Fingerprint) -> Self {
        let state = ledger.snapshot();
        let lineage = state.lineage();

        let Some(record) = state.get(fingerprint) else {
            return Self {
                fingerprint: *fingerprint,
                is_valid: false,
                generation: None,
                lineage_path: Vec::new(),
            };
        };

        let ancestry_holds = lineage.ancestors(fingerprint).all(|ancestor| {
            state
                .get(&ancestor)
                .is_some_and(FingerprintHasher::verify)
        });
        let parents_present = record.parents().iter().all(|p| lineage.contains(p));

        Self {
            fingerprint: *fingerprint,
            is_valid: state.status() == LedgerStatus::Healthy
                && FingerprintHasher::verify(record)
                && parents_present
                && ancestry_holds,
            generation: lineage.generation(fingerprint),
            lineage_path: lineage.path_to_genesis(fingerprint),
        }
    }
}
