//! Difficulty policy: how many leading zero bits a new record must carry
//!
//! The ledger only asks the question; answering it is left to the
//! embedding application. [`FixedDifficulty`] is the one policy shipped.

use serde::{Deserialize, Serialize};

/// What the policy gets to see about the record being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyContext {
    /// Generation of the record
    pub generation: u32,
    /// Number of parents the record names
    pub parent_count: usize,
    /// Records already accepted when the question is asked
    pub ledger_len: usize,
}

/// Pluggable difficulty provider
pub trait DifficultyPolicy: Send + Sync {
    /// Difficulty (leading zero bits) the record should have been mined at
    fn difficulty_for(&self, ctx: &DifficultyContext) -> u8;
}

/// Same difficulty for every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedDifficulty(pub u8);

impl Default for FixedDifficulty {
    fn default() -> Self {
        Self(8)
    }
}

impl DifficultyPolicy for FixedDifficulty {
    fn difficulty_for(&self, _ctx: &DifficultyContext) -> u8 {
        self.0
    }
}

impl<F> DifficultyPolicy for F
where
    F: Fn(&DifficultyContext) -> u8 + Send + Sync,
{
    fn difficulty_for(&self, ctx: &DifficultyContext) -> u8 {
        self(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(generation: u32) -> DifficultyContext {
        DifficultyContext {
            generation,
            parent_count: 2,
            ledger_len: 10,
        }
    }

    #[test]
    fn test_fixed_difficulty() {
        let policy = FixedDifficulty(12);
        assert_eq!(policy.difficulty_for(&ctx(0)), 12);
        assert_eq!(policy.difficulty_for(&ctx(40)), 12);
    }

    #[test]
    fn test_closure_policy() {
        let policy = |c: &DifficultyContext| 4 + c.generation.min(4) as u8;
        assert_eq!(policy.difficulty_for(&ctx(0)), 4);
        assert_eq!(policy.difficulty_for(&ctx(9)), 8);
    }
}
