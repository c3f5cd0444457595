//! Database persistence layer for SecroChain

use crate::blockchain::{Block, BlockData};
use crate::error::LedgerError;
use crate::ledger::Account;
use crate::transaction::{Transaction, TransactionKind};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, error};

/// Everything the ledger keeps durably.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub blocks: Vec<Block>,
}

/// The writes of one ledger operation: new account states, the
/// transactions recorded and the blocks sealed for them.
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub blocks: Vec<Block>,
}

/// Abstraction for persistence backends.
///
/// `commit` and `replace_blocks` must be all-or-nothing. A backend that
/// cannot undo a partial write reports `LedgerError::RollbackFailed`.
pub trait Persistence: Send + Sync {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError>;
    fn save_account(&self, account: &Account) -> Result<(), LedgerError>;
    fn commit(&self, batch: &LedgerBatch) -> Result<(), LedgerError>;
    fn replace_blocks(&self, blocks: &[Block]) -> Result<(), LedgerError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        owner_id INTEGER NOT NULL,
        balance TEXT NOT NULL,
        initial_balance TEXT NOT NULL,
        active INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY,
        account_id INTEGER NOT NULL REFERENCES accounts(id),
        kind TEXT NOT NULL,
        amount TEXT NOT NULL,
        balance_before TEXT NOT NULL,
        balance_after TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS transactions_account ON transactions(account_id);
    CREATE TABLE IF NOT EXISTS blocks (
        idx INTEGER NOT NULL UNIQUE,
        timestamp INTEGER NOT NULL,
        data TEXT NOT NULL,
        previous_hash TEXT NOT NULL,
        hash TEXT NOT NULL,
        nonce INTEGER NOT NULL,
        transaction_id INTEGER UNIQUE REFERENCES transactions(id)
    );
    CREATE INDEX IF NOT EXISTS blocks_hash ON blocks(hash);
";

impl Database {
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| LedgerError::Database(format!("Failed to create schema: {}", e)))?;
        debug!("Opened ledger database at {}", path);
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Database("Mutex poisoned".to_string()))
    }

    /// Runs `write` inside one SQLite transaction.
    ///
    /// A failed write or commit is rolled back; if the rollback itself
    /// fails the error is `RollbackFailed`.
    fn atomically<F>(&self, what: &str, write: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<(), LedgerError>,
    {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            LedgerError::Database(format!("Failed to start transaction: {}", e))
        })?;

        if let Err(err) = write(&tx) {
            if let Err(rb) = tx.rollback() {
                error!("Rollback of {} failed: {}", what, rb);
                return Err(LedgerError::RollbackFailed(format!(
                    "{} failed ({}) and rollback failed ({})",
                    what, err, rb
                )));
            }
            return Err(err);
        }

        if let Err(err) = tx.commit() {
            // A failed COMMIT can leave the transaction open.
            if !conn.is_autocommit() {
                if let Err(rb) = conn.execute_batch("ROLLBACK") {
                    error!("Rollback of {} failed: {}", what, rb);
                    return Err(LedgerError::RollbackFailed(format!(
                        "commit of {} failed ({}) and rollback failed ({})",
                        what, err, rb
                    )));
                }
            }
            return Err(LedgerError::Database(format!(
                "Failed to commit {}: {}",
                what, err
            )));
        }
        Ok(())
    }

    pub fn save_account(&self, account: &Account) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        upsert_account(&conn, account)
    }

    /// Atomically saves account states, transactions and blocks.
    pub fn commit(&self, batch: &LedgerBatch) -> Result<(), LedgerError> {
        self.atomically("ledger batch", |tx| {
            for account in &batch.accounts {
                upsert_account(tx, account)?;
            }
            for transaction in &batch.transactions {
                insert_transaction(tx, transaction)?;
            }
            for block in &batch.blocks {
                insert_block(tx, block)?;
            }
            Ok(())
        })
    }

    pub fn replace_blocks(&self, blocks: &[Block]) -> Result<(), LedgerError> {
        self.atomically("chain rewrite", |tx| {
            tx.execute("DELETE FROM blocks", [])
                .map_err(|e| LedgerError::Database(format!("Failed to clear blocks: {}", e)))?;
            for block in blocks {
                insert_block(tx, block)?;
            }
            Ok(())
        })
    }

    pub fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        let conn = self.conn()?;
        Ok(LedgerSnapshot {
            accounts: load_accounts(&conn)?,
            transactions: load_transactions(&conn)?,
            blocks: load_blocks(&conn)?,
        })
    }
}

fn upsert_account(conn: &Connection, account: &Account) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO accounts (id, code, owner_id, balance, initial_balance, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET balance = excluded.balance, active = excluded.active",
        params![
            account.id as i64,
            account.code,
            account.owner_id as i64,
            account.balance.to_string(),
            account.initial_balance.to_string(),
            account.active,
            account.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| LedgerError::Database(format!("Failed to save account {}: {}", account.code, e)))?;
    Ok(())
}

fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO transactions (id, account_id, kind, amount, balance_before, balance_after, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            tx.id as i64,
            tx.account_id as i64,
            tx.kind.as_str(),
            tx.amount.to_string(),
            tx.balance_before.to_string(),
            tx.balance_after.to_string(),
            tx.description,
            tx.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| LedgerError::Database(format!("Failed to save transaction {}: {}", tx.id, e)))?;
    Ok(())
}

fn insert_block(conn: &Connection, block: &Block) -> Result<(), LedgerError> {
    if !block.is_sealed() {
        return Err(LedgerError::Database(format!(
            "Refusing to persist unsealed block {}",
            block.index
        )));
    }
    let data = serde_json::to_string(&block.data)?;
    conn.execute(
        "INSERT INTO blocks (idx, timestamp, data, previous_hash, hash, nonce, transaction_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            block.index as i64,
            block.timestamp,
            data,
            block.previous_hash,
            block.hash,
            block.nonce as i64,
            block.transaction_id.map(|id| id as i64),
        ],
    )
    .map_err(|e| LedgerError::Database(format!("Failed to save block {}: {}", block.index, e)))?;
    Ok(())
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn datetime_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn load_accounts(conn: &Connection) -> Result<Vec<Account>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT id, code, owner_id, balance, initial_balance, active, created_at
         FROM accounts ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Account {
            id: row.get::<_, i64>(0)? as u64,
            code: row.get(1)?,
            owner_id: row.get::<_, i64>(2)? as u64,
            balance: decimal_at(row, 3)?,
            initial_balance: decimal_at(row, 4)?,
            active: row.get(5)?,
            created_at: datetime_at(row, 6)?,
        })
    })?;
    let accounts = rows
        .map(|r| r.map_err(|e| LedgerError::Database(format!("Failed to load account: {}", e))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accounts)
}

fn load_transactions(conn: &Connection) -> Result<Vec<Transaction>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, kind, amount, balance_before, balance_after, description, created_at
         FROM transactions ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let kind: String = row.get(2)?;
        let kind = TransactionKind::parse(&kind).ok_or_else(|| {
            conversion_error(
                2,
                LedgerError::Database(format!("unknown transaction kind '{}'", kind)),
            )
        })?;
        Ok(Transaction {
            id: row.get::<_, i64>(0)? as u64,
            account_id: row.get::<_, i64>(1)? as u64,
            kind,
            amount: decimal_at(row, 3)?,
            balance_before: decimal_at(row, 4)?,
            balance_after: decimal_at(row, 5)?,
            description: row.get(6)?,
            created_at: datetime_at(row, 7)?,
        })
    })?;
    let transactions = rows
        .map(|r| r.map_err(|e| LedgerError::Database(format!("Failed to load transaction: {}", e))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transactions)
}

fn load_blocks(conn: &Connection) -> Result<Vec<Block>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT idx, timestamp, data, previous_hash, hash, nonce, transaction_id
         FROM blocks ORDER BY idx ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let data: String = row.get(2)?;
        let data: BlockData = serde_json::from_str(&data).map_err(|e| conversion_error(2, e))?;
        Ok(Block {
            index: row.get::<_, i64>(0)? as u64,
            timestamp: row.get(1)?,
            data,
            previous_hash: row.get(3)?,
            hash: row.get(4)?,
            nonce: row.get::<_, i64>(5)? as u64,
            transaction_id: row.get::<_, Option<i64>>(6)?.map(|id| id as u64),
        })
    })?;
    let blocks = rows
        .map(|r| r.map_err(|e| LedgerError::Database(format!("Failed to load block: {}", e))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(blocks)
}

// Implement the Persistence trait for the rusqlite-backed Database
impl Persistence for Database {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        Database::load(self)
    }

    fn save_account(&self, account: &Account) -> Result<(), LedgerError> {
        Database::save_account(self, account)
    }

    fn commit(&self, batch: &LedgerBatch) -> Result<(), LedgerError> {
        Database::commit(self, batch)
    }

    fn replace_blocks(&self, blocks: &[Block]) -> Result<(), LedgerError> {
        Database::replace_blocks(self, blocks)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryPersistence {
    state: Mutex<LedgerSnapshot>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, LedgerSnapshot>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Database("Mutex poisoned".to_string()))
    }
}

fn upsert_in_memory(accounts: &mut Vec<Account>, account: &Account) {
    match accounts.iter_mut().find(|a| a.id == account.id) {
        Some(existing) => *existing = account.clone(),
        None => accounts.push(account.clone()),
    }
}

impl Persistence for InMemoryPersistence {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.state()?.clone())
    }

    fn save_account(&self, account: &Account) -> Result<(), LedgerError> {
        upsert_in_memory(&mut self.state()?.accounts, account);
        Ok(())
    }

    fn commit(&self, batch: &LedgerBatch) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        if let Some(block) = batch.blocks.iter().find(|b| !b.is_sealed()) {
            return Err(LedgerError::Database(format!(
                "Refusing to persist unsealed block {}",
                block.index
            )));
        }
        for account in &batch.accounts {
            upsert_in_memory(&mut state.accounts, account);
        }
        state.transactions.extend(batch.transactions.iter().cloned());
        state.blocks.extend(batch.blocks.iter().cloned());
        Ok(())
    }

    fn replace_blocks(&self, blocks: &[Block]) -> Result<(), LedgerError> {
        self.state()?.blocks = blocks.to_vec();
        Ok(())
    }
}
