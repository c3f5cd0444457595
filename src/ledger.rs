//! Account balances, transfers and the operation set exposed to callers.
//!
//! - [`account`] - balances, transaction history, deposit / withdraw units
//! - [`transfer`] - two-leg transfers committed as one unit
//! - [`service`] - the public operations, wired to a chain and a store

pub mod account;
pub mod service;
pub mod transfer;

pub use account::{
    Account, AccountId, AccountLedger, AccountStats, TransactionQuery, TransactionStats,
};
pub use service::{BlockchainStats, LedgerService, RepairReport, TransactionWithBlock};
pub use transfer::{TransferCoordinator, TransferReceipt};
