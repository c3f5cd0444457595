use crate::blockchain::{ChainStore, ChainWriter};
use crate::error::LedgerError;
use crate::persistence::{LedgerBatch, Persistence};
use crate::transaction::{
    apply_movement, checked_sum, normalize_amount, normalize_opening_balance, Transaction,
    TransactionId, TransactionKind,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type AccountId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub code: String,
    pub owner_id: u64,
    pub balance: Decimal,
    pub initial_balance: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// `ACC-` followed by the zero-padded id.
    pub fn code_for(id: AccountId) -> String {
        format!("ACC-{:08}", id)
    }

    pub fn status(&self) -> &'static str {
        if self.active {
            "Active"
        } else {
            "Inactive"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountStats {
    pub account_code: String,
    pub current_balance: Decimal,
    pub initial_balance: Decimal,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub net_change: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionStats {
    pub total_transactions: usize,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub net_amount: Decimal,
    pub deposit_count: usize,
    pub withdrawal_count: usize,
}

/// Filters for [`AccountLedger::query`]. Unset fields match everything;
/// `from` and `to` are inclusive.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub account_id: Option<AccountId>,
    pub owner_id: Option<u64>,
    pub kind: Option<TransactionKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

struct Totals {
    deposits: Decimal,
    withdrawals: Decimal,
    deposit_count: usize,
    withdrawal_count: usize,
}

#[derive(Default)]
struct TransactionLog {
    by_id: HashMap<TransactionId, Transaction>,
    by_account: HashMap<AccountId, Vec<TransactionId>>,
}

impl TransactionLog {
    fn insert(&mut self, tx: Transaction) {
        self.by_account.entry(tx.account_id).or_default().push(tx.id);
        self.by_id.insert(tx.id, tx);
    }

    fn for_account(&self, account_id: AccountId) -> impl Iterator<Item = &Transaction> {
        self.by_account
            .get(&account_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.by_id.get(id))
    }

    fn totals(&self, account_id: AccountId) -> Result<Totals, LedgerError> {
        let (deposits, withdrawals): (Vec<&Transaction>, Vec<&Transaction>) =
            self.for_account(account_id).partition(|tx| tx.is_deposit());
        Ok(Totals {
            deposits: checked_sum(deposits.iter().map(|tx| tx.amount))?,
            withdrawals: checked_sum(withdrawals.iter().map(|tx| tx.amount))?,
            deposit_count: deposits.len(),
            withdrawal_count: withdrawals.len(),
        })
    }
}

/// A validated movement: the account state after it and its record.
#[derive(Debug, Clone)]
pub(crate) struct Movement {
    pub account: Account,
    pub transaction: Transaction,
}

/// Staged effects of one ledger operation, holding the chain lock.
///
/// Nothing is visible to readers or durable until [`AccountLedger::commit`].
pub(crate) struct LedgerUnit<'a> {
    writer: ChainWriter<'a>,
    batch: LedgerBatch,
}

impl LedgerUnit<'_> {
    /// Appends the movement's block and queues its writes.
    pub fn record(&mut self, movement: &Movement) -> Result<(), LedgerError> {
        let snapshot = movement.transaction.snapshot(&movement.account.code);
        self.writer.append(snapshot)?;
        self.batch.accounts.push(movement.account.clone());
        self.batch.transactions.push(movement.transaction.clone());
        Ok(())
    }

    /// Discards everything staged so far.
    pub fn rollback(self) {
        let discarded = self.writer.rollback();
        debug!(
            "Rolled back unit: {} transaction(s), {} block(s)",
            self.batch.transactions.len(),
            discarded
        );
    }
}

/// Owns account balances and their transaction history.
///
/// Every balance change goes through [`AccountLedger::deposit`] or
/// [`AccountLedger::withdraw`] (or a transfer built from the same parts), which
/// commit the new balance, the transaction and its block as one unit.
///
/// Lock order: account locks by ascending id, then the chain lock, then the
/// history lock.
pub struct AccountLedger {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Account>>>>,
    codes: RwLock<HashMap<String, AccountId>>,
    history: RwLock<TransactionLog>,
    chain: Arc<ChainStore>,
    persistence: Arc<dyn Persistence>,
    next_account_id: AtomicU64,
    next_transaction_id: AtomicU64,
}

impl AccountLedger {
    pub fn new(chain: Arc<ChainStore>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
            history: RwLock::new(TransactionLog::default()),
            chain,
            persistence,
            next_account_id: AtomicU64::new(1),
            next_transaction_id: AtomicU64::new(1),
        }
    }

    /// Rebuilds the ledger from stored accounts and transactions.
    ///
    /// Fails with `InconsistentState` if any record does not balance or an
    /// account's balance disagrees with its history.
    pub fn restore(
        chain: Arc<ChainStore>,
        persistence: Arc<dyn Persistence>,
        accounts: Vec<Account>,
        transactions: Vec<Transaction>,
    ) -> Result<Self, LedgerError> {
        let ledger = Self::new(chain, persistence);
        let mut max_tx = 0;
        {
            let mut history = ledger.history.write();
            for tx in transactions {
                tx.validate_arithmetic()?;
                max_tx = max_tx.max(tx.id);
                history.insert(tx);
            }
        }

        let mut max_account = 0;
        for account in accounts {
            let totals = ledger.history.read().totals(account.id)?;
            let expected = account
                .initial_balance
                .checked_add(totals.deposits)
                .and_then(|v| v.checked_sub(totals.withdrawals));
            if expected != Some(account.balance) || account.balance < Decimal::ZERO {
                return Err(LedgerError::InconsistentState(format!(
                    "account {} holds {} but its history gives {:?}",
                    account.code, account.balance, expected
                )));
            }
            max_account = max_account.max(account.id);
            ledger.codes.write().insert(account.code.clone(), account.id);
            ledger
                .accounts
                .write()
                .insert(account.id, Arc::new(Mutex::new(account)));
        }

        ledger.next_account_id.store(max_account + 1, Ordering::SeqCst);
        ledger.next_transaction_id.store(max_tx + 1, Ordering::SeqCst);
        Ok(ledger)
    }

    pub fn open(&self, owner_id: u64, initial_balance: Decimal) -> Result<Account, LedgerError> {
        let initial_balance = normalize_opening_balance(initial_balance)?;
        let id = self.next_account_id.fetch_add(1, Ordering::SeqCst);
        let account = Account {
            id,
            code: Account::code_for(id),
            owner_id,
            balance: initial_balance,
            initial_balance,
            active: true,
            created_at: Utc::now(),
        };
        self.persistence.save_account(&account)?;
        self.codes.write().insert(account.code.clone(), id);
        self.accounts
            .write()
            .insert(id, Arc::new(Mutex::new(account.clone())));
        info!("Opened account {} for owner {} with {}", account.code, owner_id, initial_balance);
        Ok(account)
    }

    pub(crate) fn handle(&self, id: AccountId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    pub fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        Ok(self.handle(id)?.lock().clone())
    }

    pub fn account_by_code(&self, code: &str) -> Option<Account> {
        let id = *self.codes.read().get(code)?;
        self.account(id).ok()
    }

    pub fn accounts_for_owner(&self, owner_id: u64) -> Vec<Account> {
        let handles: Vec<_> = self.accounts.read().values().cloned().collect();
        let mut owned: Vec<Account> = handles
            .iter()
            .map(|h| h.lock().clone())
            .filter(|a| a.owner_id == owner_id)
            .collect();
        owned.sort_by_key(|a| a.id);
        owned
    }

    pub fn active_accounts_for_owner(&self, owner_id: u64) -> Vec<Account> {
        let mut owned = self.accounts_for_owner(owner_id);
        owned.retain(|a| a.active);
        owned
    }

    pub fn total_balance_for_owner(&self, owner_id: u64) -> Result<Decimal, LedgerError> {
        checked_sum(self.accounts_for_owner(owner_id).iter().map(|a| a.balance))
    }

    pub fn set_active(&self, id: AccountId, active: bool) -> Result<Account, LedgerError> {
        let handle = self.handle(id)?;
        let mut account = handle.lock();
        let mut updated = account.clone();
        updated.active = active;
        self.persistence.save_account(&updated)?;
        *account = updated;
        info!("Account {} is now {}", account.code, account.status());
        Ok(account.clone())
    }

    pub fn deposit(
        &self,
        id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        self.execute(id, TransactionKind::Deposit, amount, description)
    }

    pub fn withdraw(
        &self,
        id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        self.execute(id, TransactionKind::Withdrawal, amount, description)
    }

    fn execute(
        &self,
        id: AccountId,
        kind: TransactionKind,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        let handle = self.handle(id)?;
        let mut account = handle.lock();
        let movement = self.plan(&account, kind, amount, description)?;

        let mut unit = self.begin();
        if let Err(err) = unit.record(&movement) {
            unit.rollback();
            return Err(err);
        }
        self.commit(unit, &mut [&mut *account])?;

        info!(
            "{} of {} on {}: {} -> {}",
            kind, movement.transaction.amount, account.code,
            movement.transaction.balance_before, movement.transaction.balance_after
        );
        Ok(movement.transaction)
    }

    /// Validates a movement against the account's current state and computes
    /// its effects. Mutates nothing but the transaction id counter.
    pub(crate) fn plan(
        &self,
        account: &Account,
        kind: TransactionKind,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Movement, LedgerError> {
        let amount = normalize_amount(amount)?;
        if !account.active {
            return Err(LedgerError::AccountInactive(account.code.clone()));
        }

        let balance_before = account.balance;
        let balance_after = apply_movement(kind, balance_before, amount)?;

        let transaction = Transaction {
            id: self.next_transaction_id.fetch_add(1, Ordering::SeqCst),
            account_id: account.id,
            kind,
            amount,
            balance_before,
            balance_after,
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        let mut updated = account.clone();
        updated.balance = balance_after;
        Ok(Movement {
            account: updated,
            transaction,
        })
    }

    /// Opens a unit of work; takes the chain lock.
    pub(crate) fn begin(&self) -> LedgerUnit<'_> {
        LedgerUnit {
            writer: self.chain.writer(),
            batch: LedgerBatch::default(),
        }
    }

    /// Makes a unit durable, then publishes it to the in-memory state.
    ///
    /// `targets` are the locked accounts the unit touched; they receive
    /// their new state only after the durable commit succeeded.
    pub(crate) fn commit(
        &self,
        unit: LedgerUnit<'_>,
        targets: &mut [&mut Account],
    ) -> Result<(), LedgerError> {
        let LedgerUnit { writer, mut batch } = unit;
        batch.blocks = writer.staged().to_vec();
        if let Err(err) = self.persistence.commit(&batch) {
            let discarded = writer.rollback();
            warn!(
                "Commit failed, discarded {} transaction(s) and {} block(s): {}",
                batch.transactions.len(),
                discarded,
                err
            );
            return Err(err);
        }

        {
            let mut history = self.history.write();
            for tx in &batch.transactions {
                history.insert(tx.clone());
            }
        }
        for target in targets.iter_mut() {
            if let Some(updated) = batch.accounts.iter().rev().find(|a| a.id == target.id) {
                **target = updated.clone();
            }
        }
        writer.publish();
        Ok(())
    }

    pub fn balance(&self, id: AccountId) -> Result<Decimal, LedgerError> {
        Ok(self.handle(id)?.lock().balance)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.history.read().by_id.get(&id).cloned()
    }

    /// Newest first.
    pub fn transactions(&self, account_id: AccountId, limit: usize) -> Result<Vec<Transaction>, LedgerError> {
        self.handle(account_id)?;
        let history = self.history.read();
        let mut txs: Vec<Transaction> = history.for_account(account_id).cloned().collect();
        txs.sort_by(|a, b| b.id.cmp(&a.id));
        txs.truncate(limit);
        Ok(txs)
    }

    /// Every transaction matching `query`, newest first.
    pub fn query(&self, query: &TransactionQuery) -> Vec<Transaction> {
        // owner ids never change, so resolve them before taking the history lock
        let owned: Option<Vec<AccountId>> = query
            .owner_id
            .map(|owner| self.accounts_for_owner(owner).iter().map(|a| a.id).collect());

        let history = self.history.read();
        let mut txs: Vec<Transaction> = history
            .by_id
            .values()
            .filter(|tx| query.account_id.map_or(true, |id| tx.account_id == id))
            .filter(|tx| owned.as_ref().map_or(true, |ids| ids.contains(&tx.account_id)))
            .filter(|tx| query.kind.map_or(true, |kind| tx.kind == kind))
            .filter(|tx| query.from.map_or(true, |from| tx.created_at >= from))
            .filter(|tx| query.to.map_or(true, |to| tx.created_at <= to))
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(limit) = query.limit {
            txs.truncate(limit);
        }
        txs
    }

    pub fn stats(&self, id: AccountId) -> Result<AccountStats, LedgerError> {
        let account = self.account(id)?;
        let totals = self.history.read().totals(id)?;
        Ok(AccountStats {
            account_code: account.code.clone(),
            current_balance: account.balance,
            initial_balance: account.initial_balance,
            total_deposits: totals.deposits,
            total_withdrawals: totals.withdrawals,
            net_change: account.balance - account.initial_balance,
            is_active: account.active,
        })
    }

    pub fn transaction_stats(&self, id: AccountId) -> Result<TransactionStats, LedgerError> {
        self.handle(id)?;
        let totals = self.history.read().totals(id)?;
        let net_amount = totals
            .deposits
            .checked_sub(totals.withdrawals)
            .ok_or_else(|| LedgerError::AmountOverflow(format!("net amount of account {}", id)))?;
        Ok(TransactionStats {
            total_transactions: totals.deposit_count + totals.withdrawal_count,
            total_deposits: totals.deposits,
            total_withdrawals: totals.withdrawals,
            net_amount,
            deposit_count: totals.deposit_count,
            withdrawal_count: totals.withdrawal_count,
        })
    }

    pub fn chain(&self) -> &Arc<ChainStore> {
        &self.chain
    }
}
