use crate::blockchain::{audit_chain, is_chain_valid, Block, ChainAudit, ChainStore};
use crate::config::Config;
use crate::error::LedgerError;
use crate::miner::ProofOfWorkMiner;
use crate::persistence::{Database, InMemoryPersistence, Persistence};
use crate::transaction::{Transaction, TransactionId, TransactionKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::account::{
    Account, AccountId, AccountLedger, AccountStats, TransactionQuery, TransactionStats,
};
use super::transfer::{TransferCoordinator, TransferReceipt};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockchainStats {
    pub total_blocks: usize,
    pub latest_index: Option<u64>,
    pub latest_hash_prefix: Option<String>,
    pub chain_valid: bool,
    pub difficulty: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionWithBlock {
    pub transaction: Transaction,
    pub block: Option<Block>,
    pub blockchain_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairReport {
    pub total_blocks: usize,
    /// Indices the audit flagged before the rewrite.
    pub previously_broken: Vec<u64>,
    /// Indices of blocks the rewrite changed.
    pub rewritten: Vec<u64>,
}

/// The ledger's public operation set.
pub struct LedgerService {
    chain: Arc<ChainStore>,
    accounts: Arc<AccountLedger>,
    transfers: TransferCoordinator,
    persistence: Arc<dyn Persistence>,
}

impl LedgerService {
    /// Restores the ledger held by `persistence`.
    pub fn open(
        persistence: Arc<dyn Persistence>,
        miner: ProofOfWorkMiner,
    ) -> Result<Self, LedgerError> {
        let snapshot = persistence.load()?;
        let chain = Arc::new(ChainStore::from_blocks(snapshot.blocks, miner));
        let accounts = Arc::new(AccountLedger::restore(
            chain.clone(),
            persistence.clone(),
            snapshot.accounts,
            snapshot.transactions,
        )?);
        info!(
            "Ledger loaded: {} block(s), difficulty {}",
            chain.len(),
            miner.difficulty()
        );
        Ok(Self {
            transfers: TransferCoordinator::new(accounts.clone()),
            chain,
            accounts,
            persistence,
        })
    }

    /// Opens the SQLite ledger named by the configuration.
    pub fn from_config(config: &Config) -> Result<Self, LedgerError> {
        let db = Database::open(&config.database.path)?;
        Self::open(Arc::new(db), config.mining.miner()?)
    }

    pub fn in_memory(miner: ProofOfWorkMiner) -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        let chain = Arc::new(ChainStore::new(miner));
        let accounts = Arc::new(AccountLedger::new(chain.clone(), persistence.clone()));
        Self {
            transfers: TransferCoordinator::new(accounts.clone()),
            chain,
            accounts,
            persistence,
        }
    }

    pub fn open_account(&self, owner_id: u64, initial_balance: Decimal) -> Result<Account, LedgerError> {
        self.accounts.open(owner_id, initial_balance)
    }

    pub fn activate_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.accounts.set_active(account_id, true)
    }

    pub fn deactivate_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.accounts.set_active(account_id, false)
    }

    pub fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        self.accounts.deposit(account_id, amount, description)
    }

    pub fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        self.accounts.withdraw(account_id, amount, description)
    }

    pub fn transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<TransferReceipt, LedgerError> {
        self.transfers
            .transfer(from_account_id, to_account_id, amount, description)
    }

    pub fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.accounts.account(account_id)
    }

    pub fn get_account_by_code(&self, code: &str) -> Option<Account> {
        self.accounts.account_by_code(code)
    }

    pub fn get_owner_accounts(&self, owner_id: u64) -> Vec<Account> {
        self.accounts.accounts_for_owner(owner_id)
    }

    pub fn get_owner_active_accounts(&self, owner_id: u64) -> Vec<Account> {
        self.accounts.active_accounts_for_owner(owner_id)
    }

    pub fn get_owner_total_balance(&self, owner_id: u64) -> Result<Decimal, LedgerError> {
        self.accounts.total_balance_for_owner(owner_id)
    }

    pub fn get_balance(&self, account_id: AccountId) -> Result<Decimal, LedgerError> {
        self.accounts.balance(account_id)
    }

    pub fn get_account_stats(&self, account_id: AccountId) -> Result<AccountStats, LedgerError> {
        self.accounts.stats(account_id)
    }

    pub fn get_account_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.accounts.transactions(account_id, limit)
    }

    pub fn get_account_transaction_stats(
        &self,
        account_id: AccountId,
    ) -> Result<TransactionStats, LedgerError> {
        self.accounts.transaction_stats(account_id)
    }

    pub fn get_transaction(&self, transaction_id: TransactionId) -> Option<Transaction> {
        self.accounts.transaction(transaction_id)
    }

    /// Newest first, across every account of the owner.
    pub fn get_owner_transactions(&self, owner_id: u64, limit: usize) -> Vec<Transaction> {
        self.accounts.query(&TransactionQuery {
            owner_id: Some(owner_id),
            limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn get_transactions_by_kind(&self, kind: TransactionKind, limit: usize) -> Vec<Transaction> {
        self.accounts.query(&TransactionQuery {
            kind: Some(kind),
            limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn get_recent_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.accounts.query(&TransactionQuery {
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Transactions created within `[start, end]`, newest first, optionally
    /// restricted to one account.
    pub fn get_transactions_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        account_id: Option<AccountId>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        if let Some(id) = account_id {
            self.accounts.account(id)?;
        }
        Ok(self.accounts.query(&TransactionQuery {
            account_id,
            from: Some(start),
            to: Some(end),
            ..Default::default()
        }))
    }

    /// Every transaction, newest first.
    pub fn get_all_transactions(&self) -> Vec<Transaction> {
        self.accounts.query(&TransactionQuery::default())
    }

    pub fn get_transaction_with_block(&self, transaction_id: TransactionId) -> Option<TransactionWithBlock> {
        let transaction = self.accounts.transaction(transaction_id)?;
        let block = self.chain.find_by_transaction(transaction_id);
        let blockchain_verified = block.as_ref().is_some_and(Block::is_valid);
        Some(TransactionWithBlock {
            transaction,
            block,
            blockchain_verified,
        })
    }

    pub fn find_block_by_transaction(&self, transaction_id: TransactionId) -> Option<Block> {
        self.chain.find_by_transaction(transaction_id)
    }

    pub fn verify_chain(&self) -> bool {
        is_chain_valid(&self.chain.all_ordered())
    }

    pub fn audit_chain(&self) -> ChainAudit {
        audit_chain(&self.chain.all_ordered())
    }

    /// `Ok` if the chain verifies, otherwise the first broken block.
    pub fn ensure_chain_valid(&self) -> Result<(), LedgerError> {
        match self.audit_chain().broken.first() {
            None => Ok(()),
            Some(broken) => Err(LedgerError::ChainIntegrityViolation {
                index: broken.index,
                reason: format!("{:?}", broken.reason),
            }),
        }
    }

    pub fn get_blockchain_stats(&self) -> BlockchainStats {
        let latest = self.chain.latest();
        BlockchainStats {
            total_blocks: self.chain.len(),
            latest_index: latest.as_ref().map(|b| b.index),
            latest_hash_prefix: latest.as_ref().map(|b| b.short_hash(8)),
            chain_valid: self.verify_chain(),
            difficulty: self.chain.difficulty(),
        }
    }

    /// Blocks by descending index.
    pub fn recent_blocks(&self, limit: usize) -> Vec<Block> {
        self.chain.recent(limit)
    }

    pub fn all_blocks(&self) -> Vec<Block> {
        self.chain.all_ordered()
    }

    pub fn difficulty(&self) -> u32 {
        self.chain.difficulty()
    }

    pub fn set_difficulty(&self, difficulty: u32) -> Result<(), LedgerError> {
        self.chain.set_difficulty(difficulty)
    }

    /// Maintenance only: rewrites the stored chain so that it verifies.
    ///
    /// Links are re-derived from genesis and every block is re-mined over its
    /// current content. Whatever tampering the chain recorded is made
    /// permanent and undetectable; the audit taken beforehand is returned and
    /// each rewritten index is logged. Never called by any other operation.
    pub fn repair_chain(&self) -> Result<RepairReport, LedgerError> {
        let writer = self.chain.writer();
        let before = audit_chain(writer.committed());
        let repaired = writer.repaired_chain()?;
        let rewritten: Vec<u64> = repaired
            .iter()
            .zip(writer.committed())
            .filter(|(new, old)| new != old)
            .map(|(new, _)| new.index)
            .collect();

        self.persistence.replace_blocks(&repaired)?;
        warn!(
            "Chain repair rewrote {} of {} block(s); previously broken: {:?}",
            rewritten.len(),
            repaired.len(),
            before.broken_indices()
        );
        for index in &rewritten {
            warn!("Chain repair rewrote block {}", index);
        }

        let report = RepairReport {
            total_blocks: repaired.len(),
            previously_broken: before.broken_indices(),
            rewritten,
        };
        writer.replace(repaired);
        Ok(report)
    }
}
