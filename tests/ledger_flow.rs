use rust_decimal::Decimal;
use secrochain::config::{parse_config, Config};
use secrochain::miner::ProofOfWorkMiner;
use secrochain::{LedgerError, LedgerService};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn config_in(dir: &TempDir) -> Config {
    let path = dir.path().join("ledger.db");
    let text = format!(
        "[database]\npath = {:?}\n\n[mining]\ndifficulty = 2\n",
        path.to_str().unwrap()
    );
    parse_config(&text).unwrap()
}

#[test]
fn test_deposit_withdraw_reject_and_reopen() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let acc = {
        let ledger = LedgerService::from_config(&config).unwrap();
        let acc = ledger.open_account(1, dec("100.00")).unwrap();
        ledger.deposit(acc.id, dec("50.00"), Some("salary")).unwrap();
        ledger.withdraw(acc.id, dec("30.00"), None).unwrap();
        let err = ledger.withdraw(acc.id, dec("500.00"), None).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.get_blockchain_stats().total_blocks, 3);
        acc
    };

    let ledger = LedgerService::from_config(&config).unwrap();
    assert_eq!(ledger.get_balance(acc.id).unwrap(), dec("120.00"));
    assert_eq!(ledger.get_account_by_code("ACC-00000001").unwrap().id, acc.id);
    assert!(ledger.verify_chain());
    assert!(ledger.ensure_chain_valid().is_ok());

    let history = ledger.get_account_transactions(acc.id, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].description.as_deref(), Some("salary"));

    let stats = ledger.get_account_stats(acc.id).unwrap();
    assert_eq!(stats.total_deposits, dec("50.00"));
    assert_eq!(stats.total_withdrawals, dec("30.00"));
    assert_eq!(stats.net_change, dec("20.00"));

    for tx in &history {
        let block = ledger.find_block_by_transaction(tx.id).unwrap();
        assert_eq!(block.transaction_id, Some(tx.id));
    }
}

#[test]
fn test_every_movement_adds_one_block() {
    let ledger = LedgerService::in_memory(ProofOfWorkMiner::default());
    let a = ledger.open_account(1, dec("100")).unwrap();
    let b = ledger.open_account(2, dec("100")).unwrap();

    let mut movements = 0;
    for i in 0..5 {
        ledger.deposit(a.id, dec("1.25"), None).unwrap();
        ledger.withdraw(b.id, dec("0.50"), None).unwrap();
        movements += 2;
        if i % 2 == 0 {
            ledger.transfer(a.id, b.id, dec("3.00"), None).unwrap();
            movements += 2;
        }
    }

    let blocks = ledger.all_blocks();
    assert_eq!(blocks.len(), movements + 1);
    assert!(blocks[0].is_genesis());
    assert!(ledger.verify_chain());
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.index, i as u64);
        assert!(block.hash.starts_with("00"));
    }

    let total = ledger.get_balance(a.id).unwrap() + ledger.get_balance(b.id).unwrap();
    assert_eq!(total, dec("200.00") + dec("6.25") - dec("2.50"));
}

#[test]
fn test_tampered_block_fails_verification() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let acc = {
        let ledger = LedgerService::from_config(&config).unwrap();
        let acc = ledger.open_account(1, dec("10.00")).unwrap();
        ledger.deposit(acc.id, dec("50.00"), None).unwrap();
        ledger.deposit(acc.id, dec("5.00"), None).unwrap();
        acc
    };

    let conn = rusqlite::Connection::open(&config.database.path).unwrap();
    let changed = conn
        .execute(
            "UPDATE blocks SET data = replace(data, '\"50.00\"', '\"5000.00\"') WHERE idx = 1",
            [],
        )
        .unwrap();
    assert_eq!(changed, 1);
    drop(conn);

    let ledger = LedgerService::from_config(&config).unwrap();
    assert!(!ledger.verify_chain());
    assert!(!ledger.get_blockchain_stats().chain_valid);
    assert_eq!(ledger.audit_chain().broken_indices(), vec![1]);
    assert!(matches!(
        ledger.ensure_chain_valid(),
        Err(LedgerError::ChainIntegrityViolation { index: 1, .. })
    ));

    let tx = ledger.get_account_transactions(acc.id, 10).unwrap()[1].clone();
    let found = ledger.get_transaction_with_block(tx.id).unwrap();
    assert!(!found.blockchain_verified);

    // reads keep working, and so do new movements
    assert_eq!(ledger.get_balance(acc.id).unwrap(), dec("65.00"));
    ledger.deposit(acc.id, dec("1.00"), None).unwrap();
    assert!(!ledger.verify_chain());

    let report = ledger.repair_chain().unwrap();
    assert_eq!(report.previously_broken, vec![1]);
    assert!(ledger.verify_chain());
    drop(ledger);

    let reopened = LedgerService::from_config(&config).unwrap();
    assert!(reopened.verify_chain());
    assert_eq!(reopened.all_blocks().len(), 5);
}

#[test]
fn test_edited_transaction_reference_fails_verification() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let (t1, t2) = {
        let ledger = LedgerService::from_config(&config).unwrap();
        let acc = ledger.open_account(1, dec("10.00")).unwrap();
        let t1 = ledger.deposit(acc.id, dec("1.00"), None).unwrap();
        let t2 = ledger.deposit(acc.id, dec("2.00"), None).unwrap();
        (t1.id, t2.id)
    };

    let conn = rusqlite::Connection::open(&config.database.path).unwrap();
    conn.execute("UPDATE blocks SET transaction_id = NULL WHERE idx = 2", [])
        .unwrap();
    conn.execute(
        "UPDATE blocks SET transaction_id = ?1 WHERE idx = 1",
        [t2 as i64],
    )
    .unwrap();
    drop(conn);

    let ledger = LedgerService::from_config(&config).unwrap();
    assert!(!ledger.verify_chain());
    assert_eq!(ledger.audit_chain().broken_indices(), vec![1, 2]);

    // lookups follow the hashed data, not the edited column
    assert_eq!(ledger.find_block_by_transaction(t1).unwrap().index, 1);
    assert_eq!(ledger.find_block_by_transaction(t2).unwrap().index, 2);

    let report = ledger.repair_chain().unwrap();
    assert_eq!(report.rewritten, vec![1, 2]);
    drop(ledger);

    let reopened = LedgerService::from_config(&config).unwrap();
    assert!(reopened.verify_chain());
    assert_eq!(reopened.find_block_by_transaction(t2).unwrap().transaction_id, Some(t2));
}

#[test]
fn test_non_ascii_hash_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    {
        let ledger = LedgerService::from_config(&config).unwrap();
        let acc = ledger.open_account(1, dec("10.00")).unwrap();
        ledger.deposit(acc.id, dec("1.00"), None).unwrap();
    }

    let conn = rusqlite::Connection::open(&config.database.path).unwrap();
    conn.execute("UPDATE blocks SET hash = 'abcdefgé0000' WHERE idx = 1", [])
        .unwrap();
    drop(conn);

    let ledger = LedgerService::from_config(&config).unwrap();
    let stats = ledger.get_blockchain_stats();
    assert!(!stats.chain_valid);
    assert_eq!(stats.latest_hash_prefix.as_deref(), Some("abcdefgé..."));
}

#[test]
fn test_concurrent_deposits_serialize() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let ledger = Arc::new(LedgerService::from_config(&config).unwrap());
    let accounts: Vec<_> = (0..3)
        .map(|owner| ledger.open_account(owner, Decimal::ZERO).unwrap())
        .collect();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let ledger = ledger.clone();
            let id = accounts[i % 3].id;
            std::thread::spawn(move || {
                for _ in 0..5 {
                    ledger.deposit(id, dec("2.00"), None).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for acc in &accounts {
        assert_eq!(ledger.get_balance(acc.id).unwrap(), dec("20.00"));
        assert_eq!(ledger.get_account_transaction_stats(acc.id).unwrap().deposit_count, 10);
    }
    assert_eq!(ledger.all_blocks().len(), 31);
    assert!(ledger.verify_chain());

    let recent = ledger.recent_blocks(3);
    assert_eq!(recent.iter().map(|b| b.index).collect::<Vec<_>>(), vec![30, 29, 28]);
}

#[test]
fn test_inactive_account_and_owner_queries() {
    let ledger = LedgerService::in_memory(ProofOfWorkMiner::default());
    let a = ledger.open_account(9, dec("5")).unwrap();
    let b = ledger.open_account(9, dec("7.50")).unwrap();
    ledger.open_account(10, dec("1")).unwrap();

    assert_eq!(ledger.get_owner_accounts(9).len(), 2);
    assert_eq!(ledger.get_owner_total_balance(9).unwrap(), dec("12.50"));

    ledger.deactivate_account(b.id).unwrap();
    assert!(matches!(
        ledger.transfer(a.id, b.id, dec("1"), None),
        Err(LedgerError::AccountInactive(_))
    ));
    assert!(matches!(
        ledger.deposit(a.id, dec("0.001"), None),
        Err(LedgerError::InvalidAmount(_))
    ));
    assert_eq!(ledger.get_balance(a.id).unwrap(), dec("5.00"));
    assert!(ledger.all_blocks().is_empty());

    ledger.activate_account(b.id).unwrap();
    let receipt = ledger.transfer(a.id, b.id, dec("1"), Some("loan")).unwrap();
    assert_eq!(receipt.to_account.balance, dec("8.50"));
    assert_eq!(ledger.get_owner_total_balance(9).unwrap(), dec("12.50"));
}
