#![forbid(unsafe_code)]
//! Command-line front end for a SecroChain ledger

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use rust_decimal::Decimal;
use secrochain::blockchain::{Block, BlockData};
use secrochain::config::{load_config, DEFAULT_CONFIG_PATH};
use secrochain::ledger::{Account, AccountId};
use secrochain::transaction::{Transaction, TransactionKind};
use secrochain::{LedgerError, LedgerService};
use std::process::ExitCode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Opens a new account
    Open {
        owner: u64,
        #[arg(long, default_value = "0")]
        initial: Decimal,
    },
    /// Credits an account
    Deposit {
        /// Account id or ACC- code
        account: String,
        amount: Decimal,
        #[arg(long)]
        description: Option<String>,
    },
    /// Debits an account
    Withdraw {
        account: String,
        amount: Decimal,
        #[arg(long)]
        description: Option<String>,
    },
    /// Moves funds between two accounts
    Transfer {
        from: String,
        to: String,
        amount: Decimal,
        #[arg(long)]
        description: Option<String>,
    },
    /// Shows an account's balance
    Balance { account: String },
    /// Shows an account's totals
    Stats { account: String },
    /// Lists an account's most recent transactions
    History {
        account: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Lists every account of an owner
    Owner {
        owner: u64,
        #[arg(long)]
        active_only: bool,
    },
    /// Shows one transaction
    Tx { transaction: u64 },
    /// Lists the most recent transactions across an owner's accounts
    OwnerHistory {
        owner: u64,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Lists the most recent deposits or withdrawals
    ByKind {
        #[arg(value_parser = parse_kind)]
        kind: TransactionKind,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Lists the most recent transactions of the whole ledger
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Lists transactions created between two instants (RFC 3339 or YYYY-MM-DD)
    Range {
        #[arg(long, value_parser = parse_instant)]
        from: DateTime<Utc>,
        #[arg(long, value_parser = parse_instant)]
        to: DateTime<Utc>,
        #[arg(long)]
        account: Option<String>,
    },
    /// Lists every transaction
    AllTx,
    Activate { account: String },
    Deactivate { account: String },
    /// Verifies the whole chain
    Verify {
        /// List every broken block instead of a single verdict
        #[arg(long)]
        full: bool,
    },
    /// Shows chain statistics
    ChainStats,
    /// Lists the most recent blocks
    Blocks {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Shows the block recording a transaction
    BlockForTx { transaction: u64 },
    /// Re-links and re-mines the stored chain so that it verifies again
    Repair {
        /// Required: the rewrite makes any tampering permanent
        #[arg(long)]
        yes_rewrite_history: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_fatal() => {
            eprintln!("{} {}", "✗ FATAL:".red().bold(), err);
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("{} {}", "✗".red().bold(), err.to_string().red());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), LedgerError> {
    let config = load_config(&cli.config)?;
    let ledger = LedgerService::from_config(&config)?;

    match cli.command {
        Commands::Open { owner, initial } => {
            let account = ledger.open_account(owner, initial)?;
            println!(
                "{} {} for owner {} with {}",
                "✓ Opened".bright_green(),
                account.code.bright_yellow(),
                owner,
                account.balance
            );
        }
        Commands::Deposit {
            account,
            amount,
            description,
        } => {
            let id = resolve(&ledger, &account)?;
            let tx = ledger.deposit(id, amount, description.as_deref())?;
            println!(
                "{} {} → balance {}",
                "✓".bright_green(),
                tx.formatted_amount().green(),
                tx.balance_after.to_string().bold()
            );
        }
        Commands::Withdraw {
            account,
            amount,
            description,
        } => {
            let id = resolve(&ledger, &account)?;
            let tx = ledger.withdraw(id, amount, description.as_deref())?;
            println!(
                "{} {} → balance {}",
                "✓".bright_green(),
                tx.formatted_amount().red(),
                tx.balance_after.to_string().bold()
            );
        }
        Commands::Transfer {
            from,
            to,
            amount,
            description,
        } => {
            let from = resolve(&ledger, &from)?;
            let to = resolve(&ledger, &to)?;
            let receipt = ledger.transfer(from, to, amount, description.as_deref())?;
            println!(
                "{} {} from {} ({}) to {} ({})",
                "✓ Transferred".bright_green(),
                receipt.withdrawal.amount,
                receipt.from_account.code.bright_yellow(),
                receipt.from_account.balance,
                receipt.to_account.code.bright_yellow(),
                receipt.to_account.balance
            );
        }
        Commands::Balance { account } => {
            let id = resolve(&ledger, &account)?;
            let account = ledger.get_account(id)?;
            println!(
                "{}: {} ({})",
                account.code.bright_yellow(),
                account.balance.to_string().bold(),
                account.status()
            );
        }
        Commands::Stats { account } => {
            let id = resolve(&ledger, &account)?;
            let stats = ledger.get_account_stats(id)?;
            let tx_stats = ledger.get_account_transaction_stats(id)?;
            let mut table = new_table(&["Field", "Value"]);
            table.add_row(vec!["Account", stats.account_code.as_str()]);
            table.add_row(vec!["Balance".to_string(), stats.current_balance.to_string()]);
            table.add_row(vec!["Initial".to_string(), stats.initial_balance.to_string()]);
            table.add_row(vec![
                "Deposits".to_string(),
                format!("{} ({})", stats.total_deposits, tx_stats.deposit_count),
            ]);
            table.add_row(vec![
                "Withdrawals".to_string(),
                format!("{} ({})", stats.total_withdrawals, tx_stats.withdrawal_count),
            ]);
            table.add_row(vec!["Net change".to_string(), stats.net_change.to_string()]);
            table.add_row(vec!["Active".to_string(), stats.is_active.to_string()]);
            println!("{}", table);
        }
        Commands::History { account, limit } => {
            let id = resolve(&ledger, &account)?;
            print_transactions(&ledger, &ledger.get_account_transactions(id, limit)?);
        }
        Commands::Owner { owner, active_only } => {
            let accounts = if active_only {
                ledger.get_owner_active_accounts(owner)
            } else {
                ledger.get_owner_accounts(owner)
            };
            let mut table = new_table(&["Code", "Balance", "Status"]);
            for account in &accounts {
                table.add_row(account_row(account));
            }
            println!("{}", table);
            println!(
                "Total: {}",
                ledger.get_owner_total_balance(owner)?.to_string().bold()
            );
        }
        Commands::Tx { transaction } => match ledger.get_transaction(transaction) {
            Some(tx) => print_transactions(&ledger, &[tx]),
            None => println!("{}", format!("Transaction {} not found", transaction).yellow()),
        },
        Commands::OwnerHistory { owner, limit } => {
            print_transactions(&ledger, &ledger.get_owner_transactions(owner, limit));
        }
        Commands::ByKind { kind, limit } => {
            print_transactions(&ledger, &ledger.get_transactions_by_kind(kind, limit));
        }
        Commands::Recent { limit } => {
            print_transactions(&ledger, &ledger.get_recent_transactions(limit));
        }
        Commands::Range { from, to, account } => {
            let account = match account {
                Some(reference) => Some(resolve(&ledger, &reference)?),
                None => None,
            };
            print_transactions(
                &ledger,
                &ledger.get_transactions_by_date_range(from, to, account)?,
            );
        }
        Commands::AllTx => {
            print_transactions(&ledger, &ledger.get_all_transactions());
        }
        Commands::Activate { account } => {
            let id = resolve(&ledger, &account)?;
            let account = ledger.activate_account(id)?;
            println!("{} {} is active", "✓".bright_green(), account.code);
        }
        Commands::Deactivate { account } => {
            let id = resolve(&ledger, &account)?;
            let account = ledger.deactivate_account(id)?;
            println!("{} {} is inactive", "✓".bright_green(), account.code);
        }
        Commands::Verify { full } => {
            if full {
                let audit = ledger.audit_chain();
                for broken in &audit.broken {
                    println!("{} block {}: {:?}", "✗".red(), broken.index, broken.reason);
                }
                print_verdict(audit.is_valid(), audit.blocks_checked);
            } else {
                print_verdict(ledger.verify_chain(), ledger.all_blocks().len());
            }
        }
        Commands::ChainStats => {
            let stats = ledger.get_blockchain_stats();
            let mut table = new_table(&["Field", "Value"]);
            table.add_row(vec!["Blocks".to_string(), stats.total_blocks.to_string()]);
            table.add_row(vec![
                "Latest index".to_string(),
                stats.latest_index.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
            ]);
            table.add_row(vec![
                "Latest hash".to_string(),
                stats.latest_hash_prefix.unwrap_or_else(|| "-".to_string()),
            ]);
            table.add_row(vec!["Valid".to_string(), stats.chain_valid.to_string()]);
            table.add_row(vec!["Difficulty".to_string(), stats.difficulty.to_string()]);
            println!("{}", table);
        }
        Commands::Blocks { limit } => {
            let mut table = new_table(&["Index", "Time", "Record", "Nonce", "Hash"]);
            for block in ledger.recent_blocks(limit) {
                table.add_row(block_row(&block));
            }
            println!("{}", table);
        }
        Commands::BlockForTx { transaction } => {
            let Some(found) = ledger.get_transaction_with_block(transaction) else {
                println!("{}", format!("Transaction {} not found", transaction).yellow());
                return Ok(());
            };
            match found.block {
                Some(block) => {
                    println!("{}", serde_json::to_string_pretty(&block)?);
                    let verdict = if found.blockchain_verified {
                        "block hash verified".bright_green()
                    } else {
                        "block hash does NOT verify".red().bold()
                    };
                    println!("{}", verdict);
                }
                None => println!("{}", "No block records this transaction".red()),
            }
        }
        Commands::Repair {
            yes_rewrite_history,
        } => {
            if !yes_rewrite_history {
                eprintln!(
                    "{}",
                    "Repair rewrites every block hash and hides any tampering for good.".yellow()
                );
                eprintln!("Re-run with --yes-rewrite-history to proceed.");
                return Ok(());
            }
            let report = ledger.repair_chain()?;
            println!(
                "{} {} block(s), {} rewritten, previously broken: {:?}",
                "Repaired".bright_yellow(),
                report.total_blocks,
                report.rewritten.len(),
                report.previously_broken
            );
        }
    }

    Ok(())
}

/// Accepts a numeric id or an `ACC-` code.
fn resolve(ledger: &LedgerService, reference: &str) -> Result<AccountId, LedgerError> {
    if let Ok(id) = reference.parse::<AccountId>() {
        return Ok(id);
    }
    ledger
        .get_account_by_code(reference)
        .map(|a| a.id)
        .ok_or_else(|| LedgerError::AccountNotFound(reference.to_string()))
}

fn parse_kind(s: &str) -> Result<TransactionKind, String> {
    TransactionKind::parse(s).ok_or_else(|| format!("expected deposit or withdrawal, got {}", s))
}

/// RFC 3339, or a bare date meaning its first instant (UTC).
fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got {}", s))
}

fn print_transactions(ledger: &LedgerService, txs: &[Transaction]) {
    if txs.is_empty() {
        println!("{}", "No transactions.".yellow());
        return;
    }
    let mut table = new_table(&["Id", "Account", "Time", "Amount", "Balance", "Block", "Description"]);
    for tx in txs {
        let color = match tx.kind {
            TransactionKind::Deposit => TableColor::Green,
            TransactionKind::Withdrawal => TableColor::Red,
        };
        let block = ledger
            .find_block_by_transaction(tx.id)
            .map(|b| format!("#{}", b.index))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(tx.id),
            Cell::new(Account::code_for(tx.account_id)),
            Cell::new(tx.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(tx.formatted_amount()).fg(color),
            Cell::new(tx.balance_after),
            Cell::new(block),
            Cell::new(tx.description.as_deref().unwrap_or("")),
        ]);
    }
    println!("{}", table);
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(TableColor::Cyan)),
        );
    table
}

fn account_row(account: &Account) -> Vec<Cell> {
    let status_color = if account.active {
        TableColor::Green
    } else {
        TableColor::DarkGrey
    };
    vec![
        Cell::new(&account.code),
        Cell::new(account.balance),
        Cell::new(account.status()).fg(status_color),
    ]
}

fn block_row(block: &Block) -> Vec<Cell> {
    let record = match &block.data {
        BlockData::Genesis { message, .. } => message.clone(),
        BlockData::Transaction(snapshot) => format!(
            "#{} {} {} {}",
            snapshot.transaction_id, snapshot.account_code, snapshot.kind, snapshot.amount
        ),
    };
    vec![
        Cell::new(block.index),
        Cell::new(block.created_at().format("%Y-%m-%d %H:%M:%S")),
        Cell::new(record),
        Cell::new(block.nonce),
        Cell::new(block.short_hash(16)),
    ]
}

fn print_verdict(valid: bool, blocks: usize) {
    if valid {
        println!("{} chain of {} block(s) verifies", "✓".bright_green(), blocks);
    } else {
        println!("{} chain of {} block(s) is broken", "✗".red().bold(), blocks);
    }
}
