use serde::Serialize;

use super::block::{Block, GENESIS_PREVIOUS_HASH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    /// Stored hash differs from the recomputed one.
    HashMismatch,
    /// `previous_hash` is not the predecessor's hash.
    BrokenLink,
    /// Index is not predecessor index + 1.
    IndexGap,
    /// First block is not a proper genesis block.
    BadGenesis,
    /// `transaction_id` disagrees with the transaction in the hashed data.
    TransactionMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenBlock {
    pub index: u64,
    pub reason: BreakReason,
}

/// Every problem found in one pass over the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainAudit {
    pub blocks_checked: usize,
    pub broken: Vec<BrokenBlock>,
}

impl ChainAudit {
    pub fn is_valid(&self) -> bool {
        self.broken.is_empty()
    }

    /// Distinct indices with at least one problem, ascending.
    pub fn broken_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.broken.iter().map(|b| b.index).collect();
        indices.dedup();
        indices
    }
}

fn check_block(block: &Block, predecessor: Option<&Block>, mut report: impl FnMut(BreakReason)) {
    match predecessor {
        None => {
            if block.index != 0 || block.previous_hash != GENESIS_PREVIOUS_HASH {
                report(BreakReason::BadGenesis);
            }
        }
        Some(prev) => {
            if block.index != prev.index.wrapping_add(1) {
                report(BreakReason::IndexGap);
            }
            if block.previous_hash != prev.hash {
                report(BreakReason::BrokenLink);
            }
        }
    }
    if !block.is_valid() {
        report(BreakReason::HashMismatch);
    }
    if block.transaction_id != block.data.transaction().map(|s| s.transaction_id) {
        report(BreakReason::TransactionMismatch);
    }
}

/// Walks the chain in order and stops at the first violation.
///
/// An empty chain is valid. The genesis block has no link to check but must
/// still hash to its stored value.
pub fn is_chain_valid(blocks: &[Block]) -> bool {
    let mut predecessor: Option<&Block> = None;
    for block in blocks {
        let mut ok = true;
        check_block(block, predecessor, |_| ok = false);
        if !ok {
            return false;
        }
        predecessor = Some(block);
    }
    true
}

/// Like [`is_chain_valid`] but reports every broken block.
pub fn audit_chain(blocks: &[Block]) -> ChainAudit {
    let mut audit = ChainAudit {
        blocks_checked: blocks.len(),
        broken: Vec::new(),
    };
    let mut predecessor: Option<&Block> = None;
    for block in blocks {
        check_block(block, predecessor, |reason| {
            audit.broken.push(BrokenBlock {
                index: block.index,
                reason,
            })
        });
        predecessor = Some(block);
    }
    audit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{BlockData, ChainStore};
    use crate::miner::ProofOfWorkMiner;
    use crate::transaction::{TransactionKind, TransactionSnapshot};
    use rust_decimal::Decimal;

    fn chain_of(n: u64) -> Vec<Block> {
        let store = ChainStore::new(ProofOfWorkMiner::new(1, None).unwrap());
        let mut writer = store.writer();
        for id in 1..=n {
            writer
                .append(TransactionSnapshot {
                    transaction_id: id,
                    kind: TransactionKind::Deposit,
                    amount: Decimal::new(1000, 2),
                    account_code: "ACC-00000001".to_string(),
                    balance_before: Decimal::ZERO,
                    balance_after: Decimal::new(1000, 2),
                    description: Some(format!("deposit {}", id)),
                    timestamp: 0,
                })
                .unwrap();
        }
        writer.publish();
        store.all_ordered()
    }

    #[test]
    fn test_empty_chain_is_valid() {
        assert!(is_chain_valid(&[]));
        assert!(audit_chain(&[]).is_valid());
    }

    #[test]
    fn test_fresh_chain_is_valid() {
        let blocks = chain_of(4);
        assert_eq!(blocks.len(), 5);
        assert!(is_chain_valid(&blocks));
        let audit = audit_chain(&blocks);
        assert!(audit.is_valid());
        assert_eq!(audit.blocks_checked, 5);
    }

    #[test]
    fn test_tampering_any_field_is_detected() {
        let blocks = chain_of(3);
        for target in 1..blocks.len() {
            let mut b = blocks.clone();
            if let BlockData::Transaction(ref mut s) = b[target].data {
                s.amount = Decimal::new(99999, 2);
            }
            assert!(!is_chain_valid(&b), "data edit at {}", target);

            let mut b = blocks.clone();
            b[target].nonce += 1;
            assert!(!is_chain_valid(&b), "nonce edit at {}", target);

            let mut b = blocks.clone();
            b[target].hash = "00".repeat(32);
            assert!(!is_chain_valid(&b), "hash edit at {}", target);

            let mut b = blocks.clone();
            b[target].previous_hash = "00".repeat(32);
            assert!(!is_chain_valid(&b), "previous_hash edit at {}", target);
        }
    }

    #[test]
    fn test_remined_block_still_breaks_next_link() {
        let mut blocks = chain_of(3);
        if let BlockData::Transaction(ref mut s) = blocks[1].data {
            s.description = Some("forged".to_string());
        }
        blocks[1].nonce = 0;
        ProofOfWorkMiner::new(1, None).unwrap().mine(&mut blocks[1]).unwrap();
        assert!(blocks[1].is_valid());

        let audit = audit_chain(&blocks);
        assert_eq!(
            audit.broken,
            vec![BrokenBlock {
                index: 2,
                reason: BreakReason::BrokenLink
            }]
        );
    }

    #[test]
    fn test_audit_lists_every_broken_index() {
        let mut blocks = chain_of(4);
        blocks[1].nonce += 1;
        blocks[3].nonce += 1;
        let audit = audit_chain(&blocks);
        assert!(!audit.is_valid());
        // block 2 still links to block 1's stored hash, so only the edited blocks break
        assert_eq!(audit.broken_indices(), vec![1, 3]);
    }

    #[test]
    fn test_genesis_must_self_validate() {
        let mut blocks = chain_of(1);
        blocks[0].nonce += 1;
        assert!(!is_chain_valid(&blocks));

        let mut blocks = chain_of(1);
        blocks[0].previous_hash = "1".to_string();
        let audit = audit_chain(&blocks);
        assert!(audit.broken.iter().any(|b| b.reason == BreakReason::BadGenesis));
    }

    #[test]
    fn test_swapped_transaction_reference_is_detected() {
        let mut blocks = chain_of(2);
        blocks[1].transaction_id = Some(2);
        blocks[2].transaction_id = None;
        assert!(!is_chain_valid(&blocks));

        let audit = audit_chain(&blocks);
        assert_eq!(audit.broken_indices(), vec![1, 2]);
        assert!(audit
            .broken
            .iter()
            .all(|b| b.reason == BreakReason::TransactionMismatch));

        let mut blocks = chain_of(1);
        blocks[0].transaction_id = Some(1);
        assert!(!is_chain_valid(&blocks));
    }

    #[test]
    fn test_index_gap_is_detected() {
        let mut blocks = chain_of(3);
        blocks.remove(2);
        let audit = audit_chain(&blocks);
        assert!(audit
            .broken
            .iter()
            .any(|b| b.index == 3 && b.reason == BreakReason::IndexGap));
    }
}
