//! GeneticLedger: append-only, validated store of breeding events
//!
//! State lives behind a single writer lock as an `Arc` snapshot. `append`
//! validates against the current snapshot and mutates copy-on-write, so a
//! reader holding an older snapshot is never disturbed and never sees a
//! half-applied record.

use super::difficulty::{DifficultyContext, DifficultyPolicy};
use super::lineage::{Direction, LineageIndex, Walk};
use super::record::{BreedingEventRecord, MAX_PARENTS};
use super::ValidationError;
use crate::hash::{Fingerprint, FingerprintHasher};
use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;

/// Health of the ledger as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LedgerStatus {
    #[default]
    Healthy,
    /// Terminal: an audit found invalid records. Appends are refused and
    /// the ledger has to be replaced from a backup.
    Corrupted,
}

/// Immutable view of the ledger at one point in append order
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    records: Vec<BreedingEventRecord>,
    lineage: LineageIndex,
    status: LedgerStatus,
}

impl LedgerState {
    /// Records in append order
    pub fn records(&self) -> &[BreedingEventRecord] {
        &self.records
    }

    pub fn lineage(&self) -> &LineageIndex {
        &self.lineage
    }

    pub fn status(&self) -> LedgerStatus {
        self.status
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&BreedingEventRecord> {
        self.lineage
            .position(fingerprint)
            .and_then(|pos| self.records.get(pos))
    }
}

/// Lineage index pinned to a ledger snapshot
#[derive(Debug, Clone)]
pub struct LineageView(Arc<LedgerState>);

impl Deref for LineageView {
    type Target = LineageIndex;

    fn deref(&self) -> &LineageIndex {
        &self.0.lineage
    }
}

/// Receipt for an accepted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub fingerprint: Fingerprint,
    pub generation: u32,
    /// Zero-based position in append order
    pub position: usize,
}

/// One record that failed a full-ledger audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionFinding {
    pub fingerprint: Fingerprint,
    pub position: usize,
    pub reason: ValidationError,
}

/// Aggregate numbers about the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_records: usize,
    pub genesis_records: usize,
    pub max_generation: u32,
    pub distinct_breeders: usize,
    pub status: LedgerStatus,
}

/// The breeding provenance ledger
pub struct GeneticLedger {
    state: RwLock<Arc<LedgerState>>,
    policy: Arc<dyn DifficultyPolicy>,
}

impl GeneticLedger {
    /// Create an empty ledger governed by `policy`
    pub fn new(policy: impl DifficultyPolicy + 'static) -> Self {
        Self::with_policy(Arc::new(policy))
    }

    pub fn with_policy(policy: Arc<dyn DifficultyPolicy>) -> Self {
        Self {
            state: RwLock::new(Arc::new(LedgerState::default())),
            policy,
        }
    }

    /// Rebuild a ledger from persisted records in append order
    ///
    /// Records are loaded without admission checks and then audited with
    /// [`GeneticLedger::validate_all`]; check [`GeneticLedger::status`]
    /// before handing the ledger to anyone.
    pub fn restore(records: Vec<BreedingEventRecord>, policy: Arc<dyn DifficultyPolicy>) -> Self {
        let lineage = LineageIndex::build(&records);
        let ledger = Self {
            state: RwLock::new(Arc::new(LedgerState {
                records,
                lineage,
                status: LedgerStatus::Healthy,
            })),
            policy,
        };
        let corrupted = ledger.validate_all();
        if corrupted.is_empty() {
            info!("Restored ledger with {} records", ledger.len());
        }
        ledger
    }

    /// Current state as an immutable snapshot
    pub fn snapshot(&self) -> Arc<LedgerState> {
        self.state.read().clone()
    }

    /// Lineage index of the current snapshot
    pub fn lineage(&self) -> LineageView {
        LineageView(self.snapshot())
    }

    pub fn status(&self) -> LedgerStatus {
        self.state.read().status
    }

    pub fn is_corrupted(&self) -> bool {
        self.status() == LedgerStatus::Corrupted
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.state.read().lineage.contains(fingerprint)
    }

    /// Difficulty the policy would demand of a record with these parents
    /// if it were appended now
    ///
    /// No record exists yet, so a `MissingParent` error carries a zeroed
    /// record fingerprint.
    pub fn required_difficulty(&self, parents: &[Fingerprint]) -> Result<u8, ValidationError> {
        let state = self.snapshot();
        if parents.len() > MAX_PARENTS {
            return Err(ValidationError::TooManyParents(parents.len()));
        }
        let generation = state
            .lineage
            .expected_generation(parents)
            .map_err(|parent| ValidationError::MissingParent {
                record: Fingerprint::default(),
                parent,
            })?;
        Ok(self.policy.difficulty_for(&DifficultyContext {
            generation,
            parent_count: parents.len(),
            ledger_len: state.records.len(),
        }))
    }

    /// Validate and append one record
    ///
    /// All checks run before anything is written; a rejected record leaves
    /// the ledger untouched.
    pub fn append(&self, record: BreedingEventRecord) -> Result<Accepted, ValidationError> {
        let mut guard = self.state.write();
        if let Err(err) = self.admit(&guard, &record) {
            warn!("Rejected record {}: {}", record.fingerprint().short(), err);
            return Err(err);
        }

        let state = Arc::make_mut(&mut *guard);
        let position = state.records.len();
        let generation = state.lineage.attach(&record, position);
        let fingerprint = record.fingerprint();
        info!("Accepted {}", record.summary());
        state.records.push(record);

        Ok(Accepted {
            fingerprint,
            generation,
            position,
        })
    }

    fn admit(&self, state: &LedgerState, record: &BreedingEventRecord) -> Result<(), ValidationError> {
        if state.status == LedgerStatus::Corrupted {
            return Err(ValidationError::LedgerCorrupted);
        }
        let fingerprint = record.fingerprint();
        if state.lineage.contains(&fingerprint) {
            return Err(ValidationError::DuplicateFingerprint(fingerprint));
        }
        if record.parents().len() > MAX_PARENTS {
            return Err(ValidationError::TooManyParents(record.parents().len()));
        }
        let expected = state
            .lineage
            .expected_generation(record.parents())
            .map_err(|parent| ValidationError::MissingParent {
                record: fingerprint,
                parent,
            })?;
        if expected != record.generation() {
            return Err(ValidationError::GenerationMismatch {
                record: fingerprint,
                expected,
                actual: record.generation(),
            });
        }

        FingerprintHasher::check(record)?;

        let required = self.policy.difficulty_for(&DifficultyContext {
            generation: expected,
            parent_count: record.parents().len(),
            ledger_len: state.records.len(),
        });
        if record.difficulty() != required {
            return Err(ValidationError::DifficultyMismatch {
                expected: required,
                actual: record.difficulty(),
            });
        }
        Ok(())
    }

    pub fn get_record(&self, fingerprint: &Fingerprint) -> Option<BreedingEventRecord> {
        self.snapshot().get(fingerprint).cloned()
    }

    pub fn get_children(&self, fingerprint: &Fingerprint) -> Vec<Fingerprint> {
        self.state.read().lineage.children(fingerprint)
    }

    /// Every record without parents, in append order
    pub fn get_genesis_records(&self) -> Vec<BreedingEventRecord> {
        self.snapshot()
            .records
            .iter()
            .filter(|r| r.is_genesis())
            .cloned()
            .collect()
    }

    pub fn generation(&self, fingerprint: &Fingerprint) -> Option<u32> {
        self.state.read().lineage.generation(fingerprint)
    }

    /// Ancestors as of now, nearest first
    pub fn ancestors(&self, fingerprint: &Fingerprint) -> Walk<LineageView> {
        Walk::new(self.lineage(), fingerprint, Direction::Up)
    }

    /// Descendants as of now, nearest first
    pub fn descendants(&self, fingerprint: &Fingerprint) -> Walk<LineageView> {
        Walk::new(self.lineage(), fingerprint, Direction::Down)
    }

    /// Re-verify every record in append order without changing state
    pub fn audit(&self) -> Vec<CorruptionFinding> {
        audit_records(self.snapshot().records())
    }

    /// Re-verify every record; any finding marks the ledger `Corrupted`
    ///
    /// Runs under the write lock, so the audit covers every record appended
    /// before the call and none can slip in between audit and status change.
    /// Returns the fingerprints of the offending records in append order.
    pub fn validate_all(&self) -> Vec<Fingerprint> {
        let mut guard = self.state.write();
        let findings = audit_records(&guard.records);
        if findings.is_empty() {
            return Vec::new();
        }

        for finding in &findings {
            warn!(
                "Corrupted record #{} {}: {}",
                finding.position,
                finding.fingerprint.short(),
                finding.reason
            );
        }

        let state = Arc::make_mut(&mut *guard);
        state.status = LedgerStatus::Corrupted;
        state.lineage = LineageIndex::build(&state.records);
        warn!(
            "Ledger marked corrupted: {} of {} records failed validation",
            findings.len(),
            state.records.len()
        );

        findings.into_iter().map(|f| f.fingerprint).collect()
    }

    /// Mark the ledger `Corrupted` for damage found outside the records
    /// themselves, such as a truncated ledger file
    pub fn mark_corrupted(&self) {
        let mut guard = self.state.write();
        if guard.status != LedgerStatus::Corrupted {
            Arc::make_mut(&mut *guard).status = LedgerStatus::Corrupted;
            warn!("Ledger marked corrupted");
        }
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.snapshot();
        let breeders: HashSet<&str> = state.records.iter().map(|r| r.breeder()).collect();
        LedgerStats {
            total_records: state.records.len(),
            genesis_records: state.records.iter().filter(|r| r.is_genesis()).count(),
            max_generation: state
                .records
                .iter()
                .filter_map(|r| state.lineage.generation(&r.fingerprint()))
                .max()
                .unwrap_or(0),
            distinct_breeders: breeders.len(),
            status: state.status,
        }
    }

    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "GeneticLedger | {} records | {} genesis | max generation {} | {} breeders | {:?}",
            stats.total_records,
            stats.genesis_records,
            stats.max_generation,
            stats.distinct_breeders,
            stats.status
        )
    }
}

/// Walk records in append order checking uniqueness, causal order,
/// lineage depth and proof of work. One finding per bad record.
fn audit_records(records: &[BreedingEventRecord]) -> Vec<CorruptionFinding> {
    let mut generations: HashMap<Fingerprint, u32> = HashMap::with_capacity(records.len());
    let mut findings = Vec::new();

    for (position, record) in records.iter().enumerate() {
        let fingerprint = record.fingerprint();
        if let Some(reason) = audit_one(record, &generations) {
            findings.push(CorruptionFinding {
                fingerprint,
                position,
                reason,
            });
        }
        generations.entry(fingerprint).or_insert(record.generation());
    }
    findings
}

fn audit_one(record: &BreedingEventRecord, seen: &HashMap<Fingerprint, u32>) -> Option<ValidationError> {
    let fingerprint = record.fingerprint();
    if seen.contains_key(&fingerprint) {
        return Some(ValidationError::DuplicateFingerprint(fingerprint));
    }
    if record.parents().len() > MAX_PARENTS {
        return Some(ValidationError::TooManyParents(record.parents().len()));
    }

    let mut expected: Option<u32> = None;
    for parent in record.parents() {
        match seen.get(parent) {
            Some(&g) => expected = Some(expected.map_or(g, |e| e.max(g))),
            None => {
                return Some(ValidationError::MissingParent {
                    record: fingerprint,
                    parent: *parent,
                })
            }
        }
    }

    if let Err(err) = FingerprintHasher::check(record) {
        return Some(err);
    }

    let expected = expected.map_or(0, |e| e + 1);
    if expected != record.generation() {
        return Some(ValidationError::GenerationMismatch {
            record: fingerprint,
            expected,
            actual: record.generation(),
        });
    }
    None
}
