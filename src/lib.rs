//! SecroChain - an account ledger whose every balance change is recorded in a
//! hash-chained, proof-of-work sealed block log
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, the chain store and chain validation
//! - [`transaction`] - Transaction records and amount validation
//!
//! ## Consensus
//! - [`miner`] - Proof-of-work mining
//!
//! ## Accounts
//! - [`ledger`] - Balances, transfers and the public operation set
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Accounts
// ============================================================================
pub mod ledger;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::LedgerError;
pub use ledger::LedgerService;
