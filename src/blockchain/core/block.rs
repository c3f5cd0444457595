use crate::error::LedgerError;
use crate::transaction::{TransactionId, TransactionSnapshot};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `previous_hash` carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_MESSAGE: &str = "Genesis Block - SecroChain";

/// What a block records. Serialized field order is part of the hash input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockData {
    Genesis { message: String, timestamp: i64 },
    Transaction(TransactionSnapshot),
}

impl BlockData {
    pub fn transaction(&self) -> Option<&TransactionSnapshot> {
        match self {
            BlockData::Transaction(snapshot) => Some(snapshot),
            BlockData::Genesis { .. } => None,
        }
    }
}

/// One entry of the hash chain.
///
/// A block is sealed once `hash` is set by the miner; sealed blocks are never
/// modified again. The proof of work only makes naive edits evident: anyone
/// with write access to the store can re-mine a tampered suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub data: BlockData,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
    pub transaction_id: Option<TransactionId>,
}

impl Block {
    /// An unsealed block ready for mining.
    pub fn new(index: u64, previous_hash: String, data: BlockData, timestamp: i64) -> Self {
        let transaction_id = data.transaction().map(|s| s.transaction_id);
        Block {
            index,
            timestamp,
            data,
            previous_hash,
            nonce: 0,
            hash: String::new(),
            transaction_id,
        }
    }

    pub fn genesis(timestamp: i64) -> Self {
        let data = BlockData::Genesis {
            message: GENESIS_MESSAGE.to_string(),
            timestamp: timestamp / 1000,
        };
        Block::new(0, GENESIS_PREVIOUS_HASH.to_string(), data, timestamp)
    }

    /// SHA-256 over index, timestamp, data, previous hash and nonce, as lowercase hex.
    ///
    /// Variable-length fields are length-prefixed so distinct field tuples
    /// never produce the same byte stream.
    pub fn calculate_hash(&self) -> Result<String, LedgerError> {
        let data = serde_json::to_vec(&self.data)?;

        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(&data);
        hasher.update((self.previous_hash.len() as u64).to_le_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// True iff the stored hash matches a fresh computation.
    pub fn is_valid(&self) -> bool {
        self.is_sealed()
            && self
                .calculate_hash()
                .is_ok_and(|hash| hash == self.hash)
    }

    pub fn is_sealed(&self) -> bool {
        !self.hash.is_empty()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// First `len` characters of the hash followed by `...`. A stored hash
    /// is not trusted to be hex.
    pub fn short_hash(&self, len: usize) -> String {
        let prefix: String = self.hash.chars().take(len).collect();
        format!("{}...", prefix)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_default()
    }
}
