use crate::error::LedgerError;
use crate::transaction::{Transaction, TransactionKind};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::account::{Account, AccountId, AccountLedger};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReceipt {
    pub withdrawal: Transaction,
    pub deposit: Transaction,
    pub from_account: Account,
    pub to_account: Account,
}

/// Moves funds between two accounts as a single unit: both legs and both
/// blocks commit together or not at all.
pub struct TransferCoordinator {
    ledger: Arc<AccountLedger>,
}

fn leg_description(prefix: &str, code: &str, description: Option<&str>) -> String {
    match description {
        Some(text) if !text.is_empty() => format!("{} {}: {}", prefix, code, text),
        _ => format!("{} {}", prefix, code),
    }
}

impl TransferCoordinator {
    pub fn new(ledger: Arc<AccountLedger>) -> Self {
        Self { ledger }
    }

    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<TransferReceipt, LedgerError> {
        if from == to {
            return Err(LedgerError::SameAccount);
        }
        let from_handle = self.ledger.handle(from)?;
        let to_handle = self.ledger.handle(to)?;

        // Lower id first so opposing transfers cannot deadlock.
        let (mut source, mut target) = if from < to {
            let s = from_handle.lock();
            let t = to_handle.lock();
            (s, t)
        } else {
            let t = to_handle.lock();
            let s = from_handle.lock();
            (s, t)
        };

        let withdrawal_note = leg_description("Transfer to", &target.code, description);
        let deposit_note = leg_description("Transfer from", &source.code, description);

        let withdrawal = self.ledger.plan(
            &source,
            TransactionKind::Withdrawal,
            amount,
            Some(withdrawal_note.as_str()),
        )?;

        let mut unit = self.ledger.begin();
        if let Err(err) = unit.record(&withdrawal) {
            unit.rollback();
            return Err(err);
        }

        let deposit = self
            .ledger
            .plan(
                &target,
                TransactionKind::Deposit,
                amount,
                Some(deposit_note.as_str()),
            )
            .and_then(|deposit| unit.record(&deposit).map(|_| deposit));
        let deposit = match deposit {
            Ok(deposit) => deposit,
            Err(err) => {
                warn!(
                    "Transfer {} -> {} failed after the withdrawal leg, rolling back: {}",
                    source.code, target.code, err
                );
                unit.rollback();
                return Err(err);
            }
        };

        self.ledger
            .commit(unit, &mut [&mut *source, &mut *target])?;

        info!(
            "Transferred {} from {} to {}",
            withdrawal.transaction.amount, source.code, target.code
        );
        Ok(TransferReceipt {
            withdrawal: withdrawal.transaction,
            deposit: deposit.transaction,
            from_account: source.clone(),
            to_account: target.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{is_chain_valid, ChainStore};
    use crate::ledger::test_support::{dec, FlakyPersistence};
    use crate::miner::ProofOfWorkMiner;
    use crate::persistence::{InMemoryPersistence, Persistence};

    fn setup_with(persistence: Arc<dyn Persistence>) -> (Arc<AccountLedger>, TransferCoordinator) {
        let chain = Arc::new(ChainStore::new(ProofOfWorkMiner::new(1, None).unwrap()));
        let ledger = Arc::new(AccountLedger::new(chain, persistence));
        let transfers = TransferCoordinator::new(ledger.clone());
        (ledger, transfers)
    }

    fn setup() -> (Arc<AccountLedger>, TransferCoordinator) {
        setup_with(Arc::new(InMemoryPersistence::new()))
    }

    #[test]
    fn test_transfer_moves_funds_and_appends_two_blocks() {
        let (ledger, transfers) = setup();
        let x = ledger.open(1, dec("100.00")).unwrap();
        let y = ledger.open(2, dec("20.00")).unwrap();

        let receipt = transfers.transfer(x.id, y.id, dec("40.00"), Some("rent")).unwrap();
        assert_eq!(receipt.from_account.balance, dec("60.00"));
        assert_eq!(receipt.to_account.balance, dec("60.00"));
        assert_eq!(
            receipt.withdrawal.description.as_deref(),
            Some("Transfer to ACC-00000002: rent")
        );
        assert_eq!(
            receipt.deposit.description.as_deref(),
            Some("Transfer from ACC-00000001: rent")
        );

        let blocks = ledger.chain().all_ordered();
        assert_eq!(blocks.len(), 3);
        assert!(is_chain_valid(&blocks));
        assert_eq!(blocks[1].transaction_id, Some(receipt.withdrawal.id));
        assert_eq!(blocks[2].transaction_id, Some(receipt.deposit.id));
    }

    #[test]
    fn test_description_defaults_to_counterparty() {
        let (ledger, transfers) = setup();
        let x = ledger.open(1, dec("10.00")).unwrap();
        let y = ledger.open(1, Decimal::ZERO).unwrap();
        let receipt = transfers.transfer(y.id, x.id, Decimal::ZERO, None);
        assert!(matches!(receipt, Err(LedgerError::InvalidAmount(_))));

        let receipt = transfers.transfer(x.id, y.id, dec("1"), None).unwrap();
        assert_eq!(receipt.withdrawal.description.as_deref(), Some("Transfer to ACC-00000002"));
    }

    #[test]
    fn test_same_account_and_missing_account() {
        let (ledger, transfers) = setup();
        let x = ledger.open(1, dec("10.00")).unwrap();
        assert_eq!(
            transfers.transfer(x.id, x.id, dec("1"), None).unwrap_err(),
            LedgerError::SameAccount
        );
        assert!(matches!(
            transfers.transfer(x.id, 42, dec("1"), None),
            Err(LedgerError::AccountNotFound(_))
        ));
        assert!(matches!(
            transfers.transfer(42, x.id, dec("1"), None),
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_failed_deposit_leg_reverts_withdrawal() {
        let (ledger, transfers) = setup();
        let x = ledger.open(1, dec("100.00")).unwrap();
        let y = ledger.open(2, dec("0.00")).unwrap();
        ledger.set_active(y.id, false).unwrap();

        let err = transfers.transfer(x.id, y.id, dec("30.00"), None).unwrap_err();
        assert!(matches!(err, LedgerError::AccountInactive(_)));

        assert_eq!(ledger.balance(x.id).unwrap(), dec("100.00"));
        assert_eq!(ledger.balance(y.id).unwrap(), dec("0.00"));
        assert!(ledger.transactions(x.id, 10).unwrap().is_empty());
        assert!(ledger.chain().is_empty());
    }

    #[test]
    fn test_failed_commit_keeps_totals() {
        let persistence = Arc::new(FlakyPersistence::new());
        let (ledger, transfers) = setup_with(persistence.clone());
        let x = ledger.open(1, dec("100.00")).unwrap();
        let y = ledger.open(2, dec("50.00")).unwrap();

        persistence.fail_commits(1);
        assert!(transfers.transfer(x.id, y.id, dec("30.00"), None).is_err());
        let total = ledger.balance(x.id).unwrap() + ledger.balance(y.id).unwrap();
        assert_eq!(total, dec("150.00"));
        assert_eq!(ledger.balance(x.id).unwrap(), dec("100.00"));
        assert!(persistence.load().unwrap().blocks.is_empty());
    }

    #[test]
    fn test_insufficient_funds_rejected_before_staging() {
        let (ledger, transfers) = setup();
        let x = ledger.open(1, dec("10.00")).unwrap();
        let y = ledger.open(2, dec("0.00")).unwrap();
        assert!(matches!(
            transfers.transfer(x.id, y.id, dec("10.01"), None),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert!(ledger.chain().is_empty());
    }

    #[test]
    fn test_opposing_transfers_do_not_deadlock() {
        let (ledger, transfers) = setup();
        let transfers = Arc::new(transfers);
        let x = ledger.open(1, dec("1000.00")).unwrap();
        let y = ledger.open(2, dec("1000.00")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let transfers = transfers.clone();
                let (from, to) = if i % 2 == 0 { (x.id, y.id) } else { (y.id, x.id) };
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        transfers.transfer(from, to, dec("1.00"), None).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ledger.balance(x.id).unwrap(), dec("1000.00"));
        assert_eq!(ledger.balance(y.id).unwrap(), dec("1000.00"));
        let blocks = ledger.chain().all_ordered();
        assert_eq!(blocks.len(), 81);
        assert!(is_chain_valid(&blocks));
    }
}
