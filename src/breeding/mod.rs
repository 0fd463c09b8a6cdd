//! Breeding and verification interfaces
//!
//! - **BreedingService**: submit parents + genotype digest, get back a mined
//!   and appended record
//! - **VerificationReport**: validity, generation and genesis path of a
//!   fingerprint, as plain data

mod service;
mod verify;

pub use service::{BredRecord, BreedError, BreedingRequest, BreedingService, RequestId};
pub use verify::VerificationReport;
