use crate::error::LedgerError;
use crate::miner::ProofOfWorkMiner;
use crate::transaction::{TransactionId, TransactionSnapshot};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::block::{Block, BlockData, GENESIS_PREVIOUS_HASH};

struct ChainInner {
    blocks: Vec<Block>,
    by_transaction: HashMap<TransactionId, usize>,
    miner: ProofOfWorkMiner,
}

impl ChainInner {
    /// Indexes by the transaction in the hashed data, not by the stored
    /// back-reference, which the verifier checks separately.
    fn push(&mut self, block: Block) {
        if let Some(snapshot) = block.data.transaction() {
            self.by_transaction
                .insert(snapshot.transaction_id, self.blocks.len());
        }
        self.blocks.push(block);
    }
}

/// The ordered, append-only block sequence shared by every account.
///
/// All appends go through a [`ChainWriter`], which holds the chain lock from
/// reading the tip until the staged blocks are published or dropped.
pub struct ChainStore {
    inner: Mutex<ChainInner>,
}

impl ChainStore {
    pub fn new(miner: ProofOfWorkMiner) -> Self {
        Self::from_blocks(Vec::new(), miner)
    }

    /// Restores a chain from storage. Blocks are ordered by index; their
    /// integrity is not judged here, see [`super::validation`].
    pub fn from_blocks(mut blocks: Vec<Block>, miner: ProofOfWorkMiner) -> Self {
        blocks.sort_by_key(|b| b.index);
        let mut inner = ChainInner {
            blocks: Vec::with_capacity(blocks.len()),
            by_transaction: HashMap::new(),
            miner,
        };
        for block in blocks {
            inner.push(block);
        }
        ChainStore {
            inner: Mutex::new(inner),
        }
    }

    /// Takes the chain lock for an append or maintenance unit.
    pub fn writer(&self) -> ChainWriter<'_> {
        ChainWriter {
            inner: self.inner.lock(),
            staged: Vec::new(),
        }
    }

    pub fn latest(&self) -> Option<Block> {
        self.inner.lock().blocks.last().cloned()
    }

    pub fn all_ordered(&self) -> Vec<Block> {
        self.inner.lock().blocks.clone()
    }

    /// The `n` newest blocks, highest index first.
    pub fn recent(&self, n: usize) -> Vec<Block> {
        self.inner.lock().blocks.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_by_transaction(&self, transaction_id: TransactionId) -> Option<Block> {
        let inner = self.inner.lock();
        inner
            .by_transaction
            .get(&transaction_id)
            .and_then(|&pos| inner.blocks.get(pos))
            .cloned()
    }

    pub fn difficulty(&self) -> u32 {
        self.inner.lock().miner.difficulty()
    }

    /// Applies to blocks mined from now on; sealed blocks keep their hashes.
    pub fn set_difficulty(&self, difficulty: u32) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        inner.miner.set_difficulty(difficulty)?;
        info!("Mining difficulty set to {}", difficulty);
        Ok(())
    }
}

/// Exclusive access to the chain tip.
///
/// Blocks appended through a writer are staged, not visible to readers, until
/// [`ChainWriter::publish`]. Dropping the writer discards them.
pub struct ChainWriter<'a> {
    inner: MutexGuard<'a, ChainInner>,
    staged: Vec<Block>,
}

impl ChainWriter<'_> {
    fn tip(&self) -> Option<&Block> {
        self.staged.last().or_else(|| self.inner.blocks.last())
    }

    fn next_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        match self.tip() {
            Some(tip) if tip.timestamp > now => tip.timestamp,
            _ => now,
        }
    }

    fn stage_genesis(&mut self) -> Result<(), LedgerError> {
        let mut genesis = Block::genesis(self.next_timestamp());
        self.inner.miner.mine(&mut genesis)?;
        info!("Genesis block created: {}", genesis.hash);
        self.staged.push(genesis);
        Ok(())
    }

    /// Builds, mines and stages the block for one transaction, creating the
    /// genesis block first when the chain is empty.
    ///
    /// On failure nothing staged by this call remains.
    pub fn append(&mut self, snapshot: TransactionSnapshot) -> Result<Block, LedgerError> {
        let mark = self.staged.len();
        let result = self.try_append(snapshot);
        if result.is_err() {
            self.staged.truncate(mark);
        }
        result
    }

    fn try_append(&mut self, snapshot: TransactionSnapshot) -> Result<Block, LedgerError> {
        if self.tip().is_none() {
            self.stage_genesis()?;
        }
        let (index, previous_hash) = match self.tip() {
            Some(tip) => (tip.index + 1, tip.hash.clone()),
            None => (0, GENESIS_PREVIOUS_HASH.to_string()),
        };

        let mut block = Block::new(
            index,
            previous_hash,
            BlockData::Transaction(snapshot),
            self.next_timestamp(),
        );
        self.inner.miner.mine(&mut block)?;
        debug!("Staged block {} for transaction {:?}", block.index, block.transaction_id);
        self.staged.push(block.clone());
        Ok(block)
    }

    pub fn staged(&self) -> &[Block] {
        &self.staged
    }

    /// Makes the staged blocks visible. Call only after they are durable.
    pub fn publish(mut self) {
        let staged = std::mem::take(&mut self.staged);
        for block in staged {
            self.inner.push(block);
        }
    }

    /// Discards every staged block and returns how many there were.
    pub fn rollback(mut self) -> usize {
        let discarded = self.staged.len();
        if discarded > 0 {
            warn!("Rolling back {} staged block(s)", discarded);
        }
        self.staged.clear();
        discarded
    }

    pub fn committed(&self) -> &[Block] {
        &self.inner.blocks
    }

    /// Recomputes every link from genesis forward, restores each block's
    /// transaction back-reference from its data and re-mines it.
    ///
    /// Returns the rewritten chain without installing it. The result is
    /// self-consistent by construction, whatever the stored content was.
    pub fn repaired_chain(&self) -> Result<Vec<Block>, LedgerError> {
        let mut repaired: Vec<Block> = Vec::with_capacity(self.inner.blocks.len());
        for (pos, block) in self.inner.blocks.iter().enumerate() {
            let mut block = block.clone();
            block.index = pos as u64;
            block.previous_hash = match repaired.last() {
                Some(prev) => prev.hash.clone(),
                None => GENESIS_PREVIOUS_HASH.to_string(),
            };
            block.transaction_id = block.data.transaction().map(|s| s.transaction_id);
            block.nonce = 0;
            block.hash.clear();
            self.inner.miner.mine(&mut block)?;
            repaired.push(block);
        }
        Ok(repaired)
    }

    /// Swaps in a rewritten chain. Call only after it is durable.
    pub fn replace(mut self, blocks: Vec<Block>) {
        self.inner.blocks.clear();
        self.inner.by_transaction.clear();
        for block in blocks {
            self.inner.push(block);
        }
    }
}
