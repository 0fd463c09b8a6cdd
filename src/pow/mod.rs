//! Proof-of-work admission control
//!
//! Mining searches for a nonce whose record fingerprint carries at least
//! D leading zero bits. Expected work is about 2^D hashes, so D directly
//! sets how expensive it is to add a record to the ledger.

mod cancel;
mod engine;
mod shard;

pub use cancel::CancelToken;
pub use engine::{MineError, MinedNonce, MiningConfig, MiningStrategy, ProofOfWorkEngine};
