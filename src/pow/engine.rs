//! ProofOfWorkEngine: nonce search for breeding records
//!
//! Two strategies share one verification predicate:
//! - **Sequential**: counts up from nonce 0 in bounded slices, yielding to
//!   the runtime between slices
//! - **Parallel**: splits the nonce space into disjoint shards searched on
//!   worker threads; the first shard to claim a valid nonce wins
//!
//! Whichever strategy mined it, a record verifies the same way.

use super::shard::{deadline_after, expired, run_shard, shard_ranges, Halt, Shard, ShardReport, Step};
use super::CancelToken;
use crate::hash::{Fingerprint, FingerprintHasher, PrefixState};
use crate::ledger::{BreedingEventRecord, RecordCandidate};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, Instant};

/// How the nonce space is searched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MiningStrategy {
    /// Parallel when more than one execution lane is available
    #[default]
    Auto,
    Sequential,
    Parallel { lanes: usize },
}

/// Tunables for the mining engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub strategy: MiningStrategy,
    /// Default time budget for a single mine call
    pub time_budget_ms: u64,
    /// Safety cap on total attempts across all shards
    pub max_iterations: u64,
    /// Attempts per sequential slice before yielding
    pub slice_size: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            strategy: MiningStrategy::Auto,
            time_budget_ms: 30_000,
            max_iterations: 1 << 32,
            slice_size: 4096,
        }
    }
}

impl MiningConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// A nonce that satisfies the candidate's difficulty target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedNonce {
    pub nonce: u64,
    pub fingerprint: Fingerprint,
    pub elapsed: Duration,
    /// Hashes computed across all shards
    pub attempts: u64,
    /// Strategy that actually ran (never `Auto`)
    pub strategy: MiningStrategy,
}

impl MinedNonce {
    /// Seal the mined candidate into a record ready for `append`
    pub fn seal(&self, candidate: RecordCandidate) -> BreedingEventRecord {
        BreedingEventRecord::seal(candidate, self.nonce, self.fingerprint)
    }
}

/// Recoverable mining failures; the ledger is untouched in every case
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MineError {
    #[error("no valid nonce within {elapsed:?} ({attempts} attempts)")]
    TimedOut { attempts: u64, elapsed: Duration },

    #[error("mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64, elapsed: Duration },

    #[error("safety cap reached after {attempts} attempts")]
    Exhausted { attempts: u64 },

    #[error("mining worker failed: {0}")]
    Worker(String),
}

/// Proof-of-work miner
#[derive(Debug, Clone, Default)]
pub struct ProofOfWorkEngine {
    config: MiningConfig,
}

impl ProofOfWorkEngine {
    pub fn new(config: MiningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    /// Resolve `Auto` against the host's available parallelism
    pub fn resolve_strategy(&self) -> MiningStrategy {
        match self.config.strategy {
            MiningStrategy::Auto => {
                let lanes = thread::available_parallelism().map_or(1, |n| n.get());
                if lanes > 1 {
                    MiningStrategy::Parallel { lanes }
                } else {
                    MiningStrategy::Sequential
                }
            }
            MiningStrategy::Parallel { lanes } if lanes <= 1 => MiningStrategy::Sequential,
            other => other,
        }
    }

    /// Search for a nonce meeting `candidate.difficulty()` without blocking
    /// the async executor
    ///
    /// Sequential mining runs inline and yields between slices; parallel
    /// mining runs on the blocking pool. Dropping the returned future does
    /// not stop parallel workers; cancel the token for that.
    pub async fn mine(
        &self,
        candidate: &RecordCandidate,
        time_budget: Duration,
        cancel: &CancelToken,
    ) -> Result<MinedNonce, MineError> {
        let started = Instant::now();
        let deadline = deadline_after(started, time_budget);
        let prefix = FingerprintHasher::prefix_state(candidate);
        let difficulty = candidate.difficulty();
        let strategy = self.resolve_strategy();

        let result = match strategy {
            MiningStrategy::Parallel { lanes } => {
                let cap = self.config.max_iterations;
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || {
                    search_parallel(prefix, difficulty, lanes, cap, deadline, &cancel)
                })
                .await
                .map_err(|e| MineError::Worker(e.to_string()))?
            }
            _ => self.search_sequential(prefix, difficulty, deadline, cancel).await,
        };
        finish(result, started, strategy, difficulty)
    }

    /// Blocking variant of [`ProofOfWorkEngine::mine`] for synchronous callers
    pub fn mine_blocking(
        &self,
        candidate: &RecordCandidate,
        time_budget: Duration,
        cancel: &CancelToken,
    ) -> Result<MinedNonce, MineError> {
        let started = Instant::now();
        let deadline = deadline_after(started, time_budget);
        let prefix = FingerprintHasher::prefix_state(candidate);
        let difficulty = candidate.difficulty();
        let strategy = self.resolve_strategy();
        let lanes = match strategy {
            MiningStrategy::Parallel { lanes } => lanes,
            _ => 1,
        };
        let result = search_parallel(
            prefix,
            difficulty,
            lanes,
            self.config.max_iterations,
            deadline,
            cancel,
        );
        finish(result, started, strategy, difficulty)
    }

    async fn search_sequential(
        &self,
        prefix: PrefixState,
        difficulty: u8,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<(u64, Fingerprint, u64), (Halt, u64)> {
        let mut shard = Shard::new(prefix, difficulty, 0..u64::MAX);
        let cap = self.config.max_iterations;
        let slice = self.config.slice_size.max(1);
        loop {
            if cancel.is_cancelled() {
                return Err((Halt::Cancelled, shard.attempts()));
            }
            if expired(deadline) {
                return Err((Halt::TimedOut, shard.attempts()));
            }
            let remaining = cap.saturating_sub(shard.attempts());
            if remaining == 0 {
                return Err((Halt::Exhausted, shard.attempts()));
            }
            match shard.search(remaining.min(slice)) {
                Step::Found { nonce, fingerprint } => {
                    return Ok((nonce, fingerprint, shard.attempts()))
                }
                Step::Drained => return Err((Halt::Exhausted, shard.attempts())),
                Step::Continue => tokio::task::yield_now().await,
            }
        }
    }
}

/// Run one worker per shard and collect the winner, if any
fn search_parallel(
    prefix: PrefixState,
    difficulty: u8,
    lanes: usize,
    cap: u64,
    deadline: Option<Instant>,
    cancel: &CancelToken,
) -> Result<(u64, Fingerprint, u64), (Halt, u64)> {
    let ranges = shard_ranges(lanes);
    let per_shard_cap = (cap / ranges.len() as u64).max(1);
    let found = AtomicBool::new(false);

    if ranges.len() == 1 {
        let shard = Shard::new(prefix, difficulty, 0..u64::MAX);
        let report = run_shard(shard, per_shard_cap, deadline, &found, cancel);
        return report
            .result
            .map(|(nonce, fingerprint)| (nonce, fingerprint, report.attempts))
            .map_err(|halt| (halt, report.attempts));
    }

    let reports: Vec<Option<ShardReport>> = thread::scope(|scope| {
        let handles: Vec<_> = ranges
            .into_iter()
            .map(|range| {
                let shard = Shard::new(prefix.clone(), difficulty, range);
                let found = &found;
                scope.spawn(move || run_shard(shard, per_shard_cap, deadline, found, cancel))
            })
            .collect();
        handles.into_iter().map(|h| h.join().ok()).collect()
    });

    let attempts: u64 = reports.iter().flatten().map(|r| r.attempts).sum();
    if let Some((nonce, fingerprint)) = reports
        .iter()
        .flatten()
        .find_map(|r| r.result.ok())
    {
        return Ok((nonce, fingerprint, attempts));
    }
    if reports.iter().any(Option::is_none) {
        return Err((Halt::Panicked, attempts));
    }
    let halt = if cancel.is_cancelled() {
        Halt::Cancelled
    } else if expired(deadline) {
        Halt::TimedOut
    } else {
        Halt::Exhausted
    };
    Err((halt, attempts))
}

fn finish(
    result: Result<(u64, Fingerprint, u64), (Halt, u64)>,
    started: Instant,
    strategy: MiningStrategy,
    difficulty: u8,
) -> Result<MinedNonce, MineError> {
    let elapsed = started.elapsed();
    match result {
        Ok((nonce, fingerprint, attempts)) => {
            info!(
                "Mined {} at difficulty {} in {:?} ({} attempts, {:?})",
                fingerprint.short(),
                difficulty,
                elapsed,
                attempts,
                strategy
            );
            Ok(MinedNonce {
                nonce,
                fingerprint,
                elapsed,
                attempts,
                strategy,
            })
        }
        Err((halt, attempts)) => {
            debug!("Mining stopped after {} attempts: {:?}", attempts, halt);
            Err(match halt {
                Halt::Cancelled => MineError::Cancelled { attempts, elapsed },
                Halt::TimedOut => MineError::TimedOut { attempts, elapsed },
                Halt::Exhausted => MineError::Exhausted { attempts },
                Halt::Panicked => MineError::Worker("a mining shard panicked".to_string()),
                // a beaten shard implies a winner, which was returned above
                Halt::Beaten => MineError::Worker("shard beaten without a winner".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::GenotypeDigest;

    fn candidate(tag: &str, difficulty: u8) -> RecordCandidate {
        RecordCandidate::genesis(GenotypeDigest::of(tag.as_bytes()), "tester", difficulty)
    }

    fn engine(strategy: MiningStrategy) -> ProofOfWorkEngine {
        ProofOfWorkEngine::new(MiningConfig {
            strategy,
            ..MiningConfig::default()
        })
    }

    #[test]
    fn test_resolve_strategy() {
        assert_eq!(
            engine(MiningStrategy::Parallel { lanes: 1 }).resolve_strategy(),
            MiningStrategy::Sequential
        );
        assert_eq!(
            engine(MiningStrategy::Parallel { lanes: 4 }).resolve_strategy(),
            MiningStrategy::Parallel { lanes: 4 }
        );
        assert_ne!(engine(MiningStrategy::Auto).resolve_strategy(), MiningStrategy::Auto);
    }

    #[tokio::test]
    async fn test_sequential_mines_valid_record() {
        let c = candidate("seq", 8);
        let mined = engine(MiningStrategy::Sequential)
            .mine(&c, Duration::from_secs(30), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(mined.strategy, MiningStrategy::Sequential);
        let record = mined.seal(c);
        assert!(FingerprintHasher::verify(&record));
    }

    #[tokio::test]
    async fn test_parallel_mines_valid_record() {
        let c = candidate("par", 8);
        let mined = engine(MiningStrategy::Parallel { lanes: 4 })
            .mine(&c, Duration::from_secs(30), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(mined.strategy, MiningStrategy::Parallel { lanes: 4 });
        assert_eq!(
            FingerprintHasher::compute_fingerprint(&c, mined.nonce),
            mined.fingerprint
        );
        assert!(FingerprintHasher::verify(&mined.seal(c)));
    }

    #[tokio::test]
    async fn test_strategies_are_verification_equivalent() {
        let c = candidate("equiv", 6);
        let cancel = CancelToken::new();
        let budget = Duration::from_secs(30);
        let seq = engine(MiningStrategy::Sequential)
            .mine(&c, budget, &cancel)
            .await
            .unwrap();
        // the blocking path searches the same way from nonce 0
        let one_lane = engine(MiningStrategy::Sequential).mine_blocking(&c, budget, &cancel).unwrap();
        let par = engine(MiningStrategy::Parallel { lanes: 3 })
            .mine(&c, budget, &cancel)
            .await
            .unwrap();

        assert_eq!(seq.nonce, one_lane.nonce);
        assert_eq!(seq.fingerprint, one_lane.fingerprint);
        for mined in [&seq, &par] {
            assert_eq!(
                FingerprintHasher::compute_fingerprint(&c, mined.nonce),
                mined.fingerprint
            );
            assert!(FingerprintHasher::verify(&mined.seal(c.clone())));
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let c = candidate("hopeless", 255);
        let err = engine(MiningStrategy::Sequential)
            .mine(&c, Duration::from_millis(20), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MineError::TimedOut { attempts, .. } if attempts > 0));
    }

    #[tokio::test]
    async fn test_parallel_timeout() {
        let c = candidate("hopeless", 255);
        let err = engine(MiningStrategy::Parallel { lanes: 2 })
            .mine(&c, Duration::from_millis(20), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MineError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = engine(MiningStrategy::Sequential)
            .mine(&candidate("x", 4), Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MineError::Cancelled { attempts: 0, .. }));
    }

    #[tokio::test]
    async fn test_cancel_in_flight_parallel() {
        let engine = engine(MiningStrategy::Parallel { lanes: 2 });
        let cancel = CancelToken::new();
        let task = {
            let cancel = cancel.clone();
            let c = candidate("forever", 255);
            tokio::spawn(async move { engine.mine(&c, Duration::from_secs(60), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, MineError::Cancelled { .. }));
    }

    #[test]
    fn test_unbounded_budget_blocking() {
        let c = candidate("no-limit", 4);
        for strategy in [MiningStrategy::Sequential, MiningStrategy::Parallel { lanes: 2 }] {
            let mined = engine(strategy)
                .mine_blocking(&c, Duration::MAX, &CancelToken::new())
                .unwrap();
            assert!(FingerprintHasher::verify(&mined.seal(c.clone())));
        }
    }

    #[tokio::test]
    async fn test_unbounded_budget_async() {
        let c = candidate("no-limit-async", 4);
        for strategy in [MiningStrategy::Sequential, MiningStrategy::Parallel { lanes: 2 }] {
            let mined = engine(strategy)
                .mine(&c, Duration::MAX, &CancelToken::new())
                .await
                .unwrap();
            assert!(FingerprintHasher::verify(&mined.seal(c.clone())));
        }
    }

    #[tokio::test]
    async fn test_unbounded_budget_still_cancels() {
        let engine = engine(MiningStrategy::Parallel { lanes: 2 });
        let cancel = CancelToken::new();
        let task = {
            let cancel = cancel.clone();
            let c = candidate("forever-unbounded", 255);
            tokio::spawn(async move { engine.mine(&c, Duration::MAX, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, MineError::Cancelled { .. }));
    }

    #[test]
    fn test_safety_cap() {
        let engine = ProofOfWorkEngine::new(MiningConfig {
            strategy: MiningStrategy::Sequential,
            max_iterations: 500,
            ..MiningConfig::default()
        });
        let err = engine
            .mine_blocking(&candidate("capped", 255), Duration::from_secs(30), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, MineError::Exhausted { attempts: 500 });
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: MiningConfig = serde_json::from_str(r#"{"slice_size": 64}"#).unwrap();
        assert_eq!(config.slice_size, 64);
        assert_eq!(config.strategy, MiningStrategy::Auto);
        assert_eq!(config.time_budget(), Duration::from_secs(30));
    }
}
