//! BreedingService: mine-and-append entry point for breeding logic
//!
//! The breeding side decides the offspring genotype; this service turns a
//! request into a mined, validated ledger record and reports back its
//! fingerprint and generation. In-flight requests can be cancelled by id.

use super::VerificationReport;
use crate::hash::{Fingerprint, GenotypeDigest};
use crate::ledger::{GeneticLedger, RecordCandidate, ValidationError, MAX_PARENTS};
use crate::pow::{CancelToken, MineError, ProofOfWorkEngine};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Times a request is re-mined when the difficulty policy changes its
/// answer between mining and append
const MAX_ADMISSION_ROUNDS: u32 = 16;

/// Identifier of one breeding request
pub type RequestId = Uuid;

/// What the breeding logic submits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreedingRequest {
    pub id: RequestId,
    /// Zero parents for a genesis import, otherwise one or two
    pub parents: Vec<Fingerprint>,
    pub genotype: GenotypeDigest,
    pub breeder: String,
}

impl BreedingRequest {
    pub fn new(parents: Vec<Fingerprint>, genotype: GenotypeDigest, breeder: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parents,
            genotype,
            breeder: breeder.into(),
        }
    }

    /// Import an externally sourced strain
    pub fn genesis(genotype: GenotypeDigest, breeder: impl Into<String>) -> Self {
        Self::new(Vec::new(), genotype, breeder)
    }

    /// Cross two parents
    pub fn cross(
        parent_a: Fingerprint,
        parent_b: Fingerprint,
        genotype: GenotypeDigest,
        breeder: impl Into<String>,
    ) -> Self {
        Self::new(vec![parent_a, parent_b], genotype, breeder)
    }
}

/// What the breeding logic gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BredRecord {
    pub request_id: RequestId,
    pub fingerprint: Fingerprint,
    pub generation: u32,
    pub attempts: u64,
    pub elapsed: Duration,
}

/// Why a breeding request produced no record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreedError {
    #[error("parent {0} is not in the ledger")]
    UnknownParent(Fingerprint),

    #[error("a breeding event may name at most 2 parents, got {0}")]
    TooManyParents(usize),

    #[error("mining failed: {0}")]
    Mine(#[from] MineError),

    #[error("ledger rejected the record: {0}")]
    Rejected(#[from] ValidationError),
}

/// Removes a request from the in-flight table however `breed` exits
///
/// The token is cancelled on the way out, so workers on the blocking pool
/// stop even when the `breed` future is dropped mid-mine.
struct InFlight<'a> {
    table: &'a Mutex<HashMap<RequestId, CancelToken>>,
    id: RequestId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.table.lock().remove(&self.id) {
            token.cancel();
        }
    }
}

/// Breeding and verification front end over one ledger
pub struct BreedingService {
    ledger: Arc<GeneticLedger>,
    engine: ProofOfWorkEngine,
    time_budget: Duration,
    in_flight: Mutex<HashMap<RequestId, CancelToken>>,
}

impl BreedingService {
    pub fn new(ledger: Arc<GeneticLedger>, engine: ProofOfWorkEngine) -> Self {
        let time_budget = engine.config().time_budget();
        Self {
            ledger,
            engine,
            time_budget,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Override the engine's default time budget per request
    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = time_budget;
        self
    }

    pub fn ledger(&self) -> &Arc<GeneticLedger> {
        &self.ledger
    }

    /// Mine and append one breeding event
    ///
    /// Parents are checked before any mining starts. A request cancelled at
    /// any point before the append returns `Mine(Cancelled)` and leaves the
    /// ledger unchanged.
    pub async fn breed(&self, request: BreedingRequest) -> Result<BredRecord, BreedError> {
        let cancel = CancelToken::new();
        self.in_flight.lock().insert(request.id, cancel.clone());
        let _guard = InFlight {
            table: &self.in_flight,
            id: request.id,
        };

        let result = self.mine_and_append(&request, &cancel).await;
        match &result {
            Ok(bred) => info!(
                "Bred {} (generation {}) for {}",
                bred.fingerprint.short(),
                bred.generation,
                request.breeder
            ),
            Err(e) => warn!("Breeding request {} failed: {}", request.id, e),
        }
        result
    }

    async fn mine_and_append(
        &self,
        request: &BreedingRequest,
        cancel: &CancelToken,
    ) -> Result<BredRecord, BreedError> {
        if request.parents.len() > MAX_PARENTS {
            return Err(BreedError::TooManyParents(request.parents.len()));
        }
        let generation = self
            .ledger
            .lineage()
            .expected_generation(&request.parents)
            .map_err(BreedError::UnknownParent)?;

        let started = Instant::now();
        let mut attempts = 0u64;
        let mut round = 1;
        loop {
            let difficulty = self.ledger.required_difficulty(&request.parents)?;
            let candidate = RecordCandidate::new(
                request.parents.clone(),
                request.genotype,
                generation,
                request.breeder.clone(),
                Utc::now(),
                difficulty,
            )?;
            let budget = self.time_budget.saturating_sub(started.elapsed());
            let mined = self
                .engine
                .mine(&candidate, budget, cancel)
                .await
                .map_err(|e| with_total_attempts(e, attempts))?;
            attempts += mined.attempts;
            if cancel.is_cancelled() {
                return Err(BreedError::Mine(MineError::Cancelled {
                    attempts,
                    elapsed: started.elapsed(),
                }));
            }

            match self.ledger.append(mined.seal(candidate)) {
                Ok(accepted) => {
                    return Ok(BredRecord {
                        request_id: request.id,
                        fingerprint: accepted.fingerprint,
                        generation: accepted.generation,
                        attempts,
                        elapsed: started.elapsed(),
                    })
                }
                // the policy moved on while we mined; mine again at its new target
                Err(ValidationError::DifficultyMismatch { expected, actual })
                    if round < MAX_ADMISSION_ROUNDS =>
                {
                    debug!(
                        "Request {} mined at difficulty {}, ledger now wants {}; re-mining",
                        request.id, actual, expected
                    );
                    round += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Cancel one in-flight request; false if it is not running
    pub fn cancel(&self, id: &RequestId) -> bool {
        match self.in_flight.lock().get(id) {
            Some(token) => {
                token.cancel();
                info!("Cancelled breeding request {}", id);
                true
            }
            None => false,
        }
    }

    /// Cancel everything in flight, e.g. on shutdown
    pub fn cancel_all(&self) -> usize {
        let table = self.in_flight.lock();
        for token in table.values() {
            token.cancel();
        }
        table.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn verify(&self, fingerprint: &Fingerprint) -> VerificationReport {
        VerificationReport::build(&self.ledger, fingerprint)
    }
}

/// Report attempts across every mining round, not just the failing one
fn with_total_attempts(error: MineError, earlier: u64) -> MineError {
    match error {
        MineError::TimedOut { attempts, elapsed } => MineError::TimedOut {
            attempts: attempts + earlier,
            elapsed,
        },
        MineError::Cancelled { attempts, elapsed } => MineError::Cancelled {
            attempts: attempts + earlier,
            elapsed,
        },
        MineError::Exhausted { attempts } => MineError::Exhausted {
            attempts: attempts + earlier,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::leading_zero_bits;
    use crate::ledger::{DifficultyContext, FixedDifficulty};
    use crate::pow::{MiningConfig, MiningStrategy};
    use crate::storage::frame;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(difficulty: u8, strategy: MiningStrategy) -> BreedingService {
        let ledger = Arc::new(GeneticLedger::new(FixedDifficulty(difficulty)));
        let engine = ProofOfWorkEngine::new(MiningConfig {
            strategy,
            ..MiningConfig::default()
        });
        BreedingService::new(ledger, engine)
    }

    fn genotype(tag: &str) -> GenotypeDigest {
        GenotypeDigest::of(tag.as_bytes())
    }

    #[tokio::test]
    async fn test_end_to_end_cross() {
        let service = service(4, MiningStrategy::Auto);
        let a = service
            .breed(BreedingRequest::genesis(genotype("strain-a"), "grower"))
            .await
            .unwrap();
        let b = service
            .breed(BreedingRequest::genesis(genotype("strain-b"), "grower"))
            .await
            .unwrap();
        let o = service
            .breed(BreedingRequest::cross(
                a.fingerprint,
                b.fingerprint,
                genotype("a-x-b"),
                "grower",
            ))
            .await
            .unwrap();

        assert_eq!(o.generation, 1);
        assert!(service.ledger().get_children(&a.fingerprint).contains(&o.fingerprint));
        let report = service.verify(&o.fingerprint);
        assert!(report.is_valid);
        assert_eq!(report.generation, Some(1));
        assert_eq!(report.lineage_path.first(), Some(&o.fingerprint));
        assert_eq!(report.lineage_path.len(), 2);
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_hundred_genesis_records_meet_difficulty() {
        let service = service(8, MiningStrategy::Auto);
        for i in 0..100 {
            let bred = service
                .breed(BreedingRequest::genesis(genotype(&format!("landrace-{}", i)), "importer"))
                .await
                .unwrap();
            assert!(leading_zero_bits(bred.fingerprint.as_bytes()) >= 8);
        }
        let ledger = service.ledger();
        assert_eq!(ledger.len(), 100);
        assert_eq!(ledger.get_genesis_records().len(), 100);
        assert!(ledger
            .snapshot()
            .records()
            .iter()
            .all(|r| leading_zero_bits(r.fingerprint().as_bytes()) >= 8));
        assert!(ledger.validate_all().is_empty());
    }

    #[tokio::test]
    async fn test_generations_through_service() {
        let service = service(2, MiningStrategy::Sequential);
        let g0 = service
            .breed(BreedingRequest::genesis(genotype("g0"), "b"))
            .await
            .unwrap();
        let c1 = service
            .breed(BreedingRequest::new(vec![g0.fingerprint], genotype("c1"), "b"))
            .await
            .unwrap();
        let c2 = service
            .breed(BreedingRequest::cross(c1.fingerprint, g0.fingerprint, genotype("c2"), "b"))
            .await
            .unwrap();
        assert_eq!(g0.generation, 0);
        assert_eq!(c1.generation, 1);
        assert_eq!(c2.generation, 2);
        assert_eq!(service.ledger().generation(&c2.fingerprint), Some(2));
        assert_eq!(
            service.verify(&c2.fingerprint).lineage_path,
            vec![c2.fingerprint, g0.fingerprint]
        );
    }

    #[tokio::test]
    async fn test_unknown_parent_fails_before_mining() {
        let service = service(255, MiningStrategy::Sequential);
        let ghost = Fingerprint([3; 32]);
        let err = service
            .breed(BreedingRequest::new(vec![ghost], genotype("x"), "b"))
            .await
            .unwrap_err();
        assert_eq!(err, BreedError::UnknownParent(ghost));
    }

    #[tokio::test]
    async fn test_too_many_parents() {
        let service = service(1, MiningStrategy::Sequential);
        let p = Fingerprint([3; 32]);
        let err = service
            .breed(BreedingRequest::new(vec![p, p, p], genotype("x"), "b"))
            .await
            .unwrap_err();
        assert_eq!(err, BreedError::TooManyParents(3));
    }

    #[tokio::test]
    async fn test_timeout_is_recoverable() {
        let service = service(255, MiningStrategy::Sequential).with_time_budget(Duration::from_millis(20));
        let err = service
            .breed(BreedingRequest::genesis(genotype("x"), "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, BreedError::Mine(MineError::TimedOut { .. })));
        assert!(service.ledger().is_empty());
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_leaves_ledger_unchanged() {
        // 255 leading zero bits: this request never finishes on its own
        let service = Arc::new(service(255, MiningStrategy::Auto));
        let before = frame::encode_to_vec(service.ledger().snapshot().records()).unwrap();

        let request = BreedingRequest::genesis(genotype("never"), "b");
        let id = request.id;
        let task = {
            let service = service.clone();
            tokio::spawn(async move { service.breed(request).await })
        };

        while service.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(service.cancel(&id));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BreedError::Mine(MineError::Cancelled { .. })));
        let after = frame::encode_to_vec(service.ledger().snapshot().records()).unwrap();
        assert_eq!(before, after);
        assert_eq!(service.in_flight(), 0);
        assert!(!service.cancel(&id));
    }

    #[tokio::test]
    async fn test_verify_unknown_fingerprint() {
        let service = service(1, MiningStrategy::Sequential);
        let report = service.verify(&Fingerprint([8; 32]));
        assert!(!report.is_valid);
        assert_eq!(report.generation, None);
        assert!(report.lineage_path.is_empty());
    }

    #[tokio::test]
    async fn test_verify_fails_on_corrupted_ledger() {
        let service = service(1, MiningStrategy::Sequential);
        let g0 = service
            .breed(BreedingRequest::genesis(genotype("g0"), "b"))
            .await
            .unwrap();
        let mut records = service.ledger().snapshot().records().to_vec();
        records[0].nonce = records[0].nonce.wrapping_add(1);
        let restored = GeneticLedger::restore(records, Arc::new(FixedDifficulty(1)));
        assert!(restored.is_corrupted());
        assert!(!VerificationReport::build(&restored, &g0.fingerprint).is_valid);
        assert!(service.verify(&g0.fingerprint).is_valid);
    }

    #[tokio::test]
    async fn test_remines_when_difficulty_moves() {
        // answers 3 the first time it is asked, 4 from then on
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = {
            let calls = calls.clone();
            move |_: &DifficultyContext| -> u8 {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    3
                } else {
                    4
                }
            }
        };
        let engine = ProofOfWorkEngine::new(MiningConfig {
            strategy: MiningStrategy::Sequential,
            ..MiningConfig::default()
        });
        let service = BreedingService::new(Arc::new(GeneticLedger::new(policy)), engine);

        let bred = service
            .breed(BreedingRequest::genesis(genotype("moving-target"), "b"))
            .await
            .unwrap();
        let record = service.ledger().get_record(&bred.fingerprint).unwrap();
        assert_eq!(record.difficulty(), 4);
        assert!(leading_zero_bits(bred.fingerprint.as_bytes()) >= 4);
        // required, admit (mismatch), required, admit
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(bred.attempts >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_breeds_with_length_dependent_difficulty() {
        let policy = |ctx: &DifficultyContext| 6 + (ctx.ledger_len % 2) as u8;
        let engine = ProofOfWorkEngine::new(MiningConfig {
            strategy: MiningStrategy::Sequential,
            ..MiningConfig::default()
        });
        let service = Arc::new(BreedingService::new(Arc::new(GeneticLedger::new(policy)), engine));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .breed(BreedingRequest::genesis(genotype(&format!("racer-{}", i)), "b"))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let ledger = service.ledger();
        assert_eq!(ledger.len(), 8);
        assert!(ledger.validate_all().is_empty());
        for (position, record) in ledger.snapshot().records().iter().enumerate() {
            assert_eq!(record.difficulty(), 6 + (position % 2) as u8);
        }
    }

    #[test]
    fn test_in_flight_guard_cancels_on_drop() {
        let table = Mutex::new(HashMap::new());
        let id = Uuid::new_v4();
        let token = CancelToken::new();
        table.lock().insert(id, token.clone());

        drop(InFlight { table: &table, id });
        assert!(token.is_cancelled());
        assert!(table.lock().is_empty());
    }
}
