//! Proof-of-work mining
//!
//! The nonce search here is an integrity marker, not a defence: difficulty
//! is kept low so that appending stays cheap.

use crate::blockchain::Block;
use crate::error::LedgerError;
use tracing::debug;

pub const DEFAULT_DIFFICULTY: u32 = 2;
/// A SHA-256 hex digest has 64 characters.
pub const MAX_DIFFICULTY: u32 = 64;
pub const DEFAULT_MAX_ITERATIONS: u64 = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWorkMiner {
    difficulty: u32,
    max_iterations: Option<u64>,
}

impl Default for ProofOfWorkMiner {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
        }
    }
}

impl ProofOfWorkMiner {
    pub fn new(difficulty: u32, max_iterations: Option<u64>) -> Result<Self, LedgerError> {
        check_difficulty(difficulty)?;
        Ok(Self {
            difficulty,
            max_iterations,
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn set_difficulty(&mut self, difficulty: u32) -> Result<(), LedgerError> {
        check_difficulty(difficulty)?;
        self.difficulty = difficulty;
        Ok(())
    }

    pub fn max_iterations(&self) -> Option<u64> {
        self.max_iterations
    }

    /// Searches nonces upward from `block.nonce` until the hash has
    /// `difficulty` leading zeros, then seals the block.
    ///
    /// Fails with `MiningFailed` once `max_iterations` hashes were tried;
    /// the block is left unsealed in that case.
    pub fn mine(&self, block: &mut Block) -> Result<(), LedgerError> {
        let mut attempts: u64 = 0;
        loop {
            let hash = block.calculate_hash()?;
            attempts += 1;
            if meets_difficulty(&hash, self.difficulty) {
                debug!(
                    "Mined block {} (nonce {}, {} attempts): {}",
                    block.index, block.nonce, attempts, hash
                );
                block.hash = hash;
                return Ok(());
            }

            let exhausted = self.max_iterations.is_some_and(|max| attempts >= max);
            match block.nonce.checked_add(1) {
                Some(next) if !exhausted => block.nonce = next,
                _ => {
                    block.hash.clear();
                    return Err(LedgerError::MiningFailed {
                        iterations: attempts,
                        difficulty: self.difficulty,
                    });
                }
            }
        }
    }
}

/// Mines a copy of `block` and returns it sealed.
pub fn mine_block(mut block: Block, miner: &ProofOfWorkMiner) -> Result<Block, LedgerError> {
    miner.mine(&mut block)?;
    Ok(block)
}

pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

fn check_difficulty(difficulty: u32) -> Result<(), LedgerError> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::InvalidDifficulty(difficulty));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Block;

    #[test]
    fn test_mined_hash_meets_difficulty_and_reproduces() {
        let miner = ProofOfWorkMiner::new(2, None).unwrap();
        let block = mine_block(Block::genesis(1_700_000_000_000), &miner).unwrap();
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.calculate_hash().unwrap());
        assert!(block.is_valid());
    }

    #[test]
    fn test_mining_is_deterministic() {
        let miner = ProofOfWorkMiner::default();
        let a = mine_block(Block::genesis(42), &miner).unwrap();
        let b = mine_block(Block::genesis(42), &miner).unwrap();
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_difficulty_zero_takes_first_nonce() {
        let miner = ProofOfWorkMiner::new(0, Some(1)).unwrap();
        let block = mine_block(Block::genesis(0), &miner).unwrap();
        assert_eq!(block.nonce, 0);
        assert!(block.is_sealed());
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let miner = ProofOfWorkMiner::new(64, Some(10)).unwrap();
        let mut block = Block::genesis(0);
        let err = miner.mine(&mut block).unwrap_err();
        assert_eq!(
            err,
            LedgerError::MiningFailed {
                iterations: 10,
                difficulty: 64
            }
        );
        assert!(!block.is_sealed());
    }

    #[test]
    fn test_difficulty_bounds() {
        assert!(ProofOfWorkMiner::new(65, None).is_err());
        let mut miner = ProofOfWorkMiner::default();
        assert_eq!(miner.difficulty(), DEFAULT_DIFFICULTY);
        assert_eq!(miner.set_difficulty(99), Err(LedgerError::InvalidDifficulty(99)));
        miner.set_difficulty(3).unwrap();
        assert_eq!(miner.difficulty(), 3);
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0ab0", 2));
        assert!(meets_difficulty("abc", 0));
        assert!(!meets_difficulty("00", 3));
    }
}
