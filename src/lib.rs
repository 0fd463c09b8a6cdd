//! Strain Ledger: content-addressed breeding provenance
//!
//! Every breeding event is an immutable record identified by the SHA-256
//! fingerprint of its contents, admitted only with a proof-of-work nonce and
//! linked to its parents into a lineage DAG that can be audited end to end.

pub mod breeding;
pub mod config;
pub mod hash;
pub mod ledger;
pub mod pow;
pub mod storage;

pub use breeding::{BredRecord, BreedError, BreedingRequest, BreedingService, VerificationReport};
pub use config::StrainConfig;
pub use hash::{Fingerprint, FingerprintHasher, GenotypeDigest};
pub use ledger::{BreedingEventRecord, FixedDifficulty, GeneticLedger, ValidationError};
pub use pow::{CancelToken, MineError, ProofOfWorkEngine};
pub use storage::{LedgerStore, StoreError};
