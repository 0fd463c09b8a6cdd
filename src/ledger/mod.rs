//! Genetic ledger: records, admission control, lineage
//!
//! - **Record**: the immutable breeding event entry
//! - **GeneticLedger**: append-only store with validation and audit
//! - **LineageIndex**: derived ancestry DAG with generation cache
//! - **DifficultyPolicy**: pluggable proof-of-work difficulty provider

mod difficulty;
mod error;
mod genetic;
mod lineage;
mod record;

pub use difficulty::{DifficultyContext, DifficultyPolicy, FixedDifficulty};
pub use error::ValidationError;
pub use genetic::{
    Accepted, CorruptionFinding, GeneticLedger, LedgerState, LedgerStats, LedgerStatus,
    LineageView,
};
pub use lineage::{Direction, LineageIndex, Walk};
pub use record::{BreedingEventRecord, RecordCandidate, MAX_PARENTS};
