/// Transaction types for SecroChain
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One balance movement on one account. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: u64,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_deposit(&self) -> bool {
        self.kind == TransactionKind::Deposit
    }

    /// Signed amount as shown in statements, e.g. `+ 50.00`.
    pub fn formatted_amount(&self) -> String {
        let sign = if self.is_deposit() { '+' } else { '-' };
        format!("{} {}", sign, self.amount)
    }

    /// The frozen copy of this transaction that goes into a block.
    pub fn snapshot(&self, account_code: &str) -> TransactionSnapshot {
        TransactionSnapshot {
            transaction_id: self.id,
            kind: self.kind,
            amount: self.amount,
            account_code: account_code.to_string(),
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            description: self.description.clone(),
            timestamp: self.created_at.timestamp(),
        }
    }
}

/// Transaction fields as they were when the block was built.
///
/// Field order is the canonical JSON order used for hashing; do not reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub account_code: String,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub timestamp: i64,
}
