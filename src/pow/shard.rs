//! Nonce shards: disjoint slices of the nonce space and their search loop

use super::CancelToken;
use crate::hash::{Fingerprint, FingerprintHasher, PrefixState};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Attempts between checks of the stop flags inside a worker thread
const CHECK_STRIDE: u64 = 1024;

/// Outcome of one bounded search step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Found { nonce: u64, fingerprint: Fingerprint },
    Continue,
    /// The shard's nonce range is used up
    Drained,
}

/// Sequential search state over one contiguous nonce range
pub(crate) struct Shard {
    prefix: PrefixState,
    difficulty: u8,
    next: u64,
    end: u64,
    attempts: u64,
}

impl Shard {
    pub(crate) fn new(prefix: PrefixState, difficulty: u8, range: Range<u64>) -> Self {
        Self {
            prefix,
            difficulty,
            next: range.start,
            end: range.end,
            attempts: 0,
        }
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Hash up to `budget` consecutive nonces
    pub(crate) fn search(&mut self, budget: u64) -> Step {
        for _ in 0..budget {
            if self.next >= self.end {
                return Step::Drained;
            }
            let nonce = self.next;
            self.next += 1;
            self.attempts += 1;
            let fingerprint = self.prefix.finish(nonce);
            if FingerprintHasher::meets_difficulty(&fingerprint, self.difficulty) {
                return Step::Found { nonce, fingerprint };
            }
        }
        Step::Continue
    }
}

/// Split the nonce space into `lanes` disjoint contiguous ranges
///
/// The last range absorbs the remainder and stops short of `u64::MAX`.
pub(crate) fn shard_ranges(lanes: usize) -> Vec<Range<u64>> {
    let lanes = lanes.max(1) as u64;
    let span = u64::MAX / lanes;
    (0..lanes)
        .map(|i| {
            let start = i * span;
            let end = if i + 1 == lanes { u64::MAX } else { start + span };
            start..end
        })
        .collect()
}

/// Deadline for a time budget; `None` when the budget runs past what
/// `Instant` can represent, which means no deadline at all
pub(crate) fn deadline_after(started: Instant, budget: Duration) -> Option<Instant> {
    started.checked_add(budget)
}

pub(crate) fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Why a worker stopped without claiming a nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Halt {
    /// Another shard claimed the win first
    Beaten,
    Cancelled,
    TimedOut,
    /// Per-shard attempt cap reached or range drained
    Exhausted,
    /// The worker thread panicked; set by the collector, never by a shard
    Panicked,
}

/// What one worker reports back when it stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShardReport {
    pub attempts: u64,
    pub result: Result<(u64, Fingerprint), Halt>,
}

/// Blocking search loop run by each worker
///
/// The only shared state is `found`, claimed with a compare-exchange so
/// exactly one shard wins, and the read-only cancel token.
pub(crate) fn run_shard(
    mut shard: Shard,
    cap: u64,
    deadline: Option<Instant>,
    found: &AtomicBool,
    cancel: &CancelToken,
) -> ShardReport {
    let halt = loop {
        if found.load(Ordering::Acquire) {
            break Halt::Beaten;
        }
        if cancel.is_cancelled() {
            break Halt::Cancelled;
        }
        if expired(deadline) {
            break Halt::TimedOut;
        }
        let remaining = cap.saturating_sub(shard.attempts());
        if remaining == 0 {
            break Halt::Exhausted;
        }
        match shard.search(remaining.min(CHECK_STRIDE)) {
            Step::Found { nonce, fingerprint } => {
                let won = found
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                let result = if won {
                    Ok((nonce, fingerprint))
                } else {
                    Err(Halt::Beaten)
                };
                return ShardReport {
                    attempts: shard.attempts(),
                    result,
                };
            }
            Step::Continue => {}
            Step::Drained => break Halt::Exhausted,
        }
    };
    ShardReport {
        attempts: shard.attempts(),
        result: Err(halt),
    }
}
