/// Validation logic for transactions separated from type definitions
use crate::error::LedgerError;
use crate::transaction::types::{Transaction, TransactionKind};
use rust_decimal::Decimal;

/// Number of fractional digits every stored amount carries.
pub const AMOUNT_SCALE: u32 = 2;

/// Validates a movement amount and brings it to the canonical scale.
///
/// Rejects zero, negative, and sub-cent amounts.
pub fn normalize_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    rescale(amount)
}

/// Like [`normalize_amount`] but admits zero, for opening balances.
pub fn normalize_opening_balance(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "initial balance cannot be negative, got {}",
            amount
        )));
    }
    rescale(amount)
}

fn rescale(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount.round_dp(AMOUNT_SCALE) != amount {
        return Err(LedgerError::InvalidAmount(format!(
            "{} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }
    at_scale(amount).ok_or_else(|| {
        LedgerError::InvalidAmount(format!("{} is too large to carry cents", amount))
    })
}

/// `value` at [`AMOUNT_SCALE`], or `None` if its mantissa cannot hold the
/// extra digits. `Decimal::rescale` silently keeps a smaller scale then.
fn at_scale(value: Decimal) -> Option<Decimal> {
    let mut scaled = value;
    scaled.rescale(AMOUNT_SCALE);
    (scaled.scale() == AMOUNT_SCALE && scaled == value).then_some(scaled)
}

/// The balance after moving `amount` in direction `kind`.
///
/// Overflow, or a result that no longer fits two decimal places, is an
/// `InvalidAmount`; a withdrawal below zero is `InsufficientBalance`.
pub fn apply_movement(
    kind: TransactionKind,
    balance: Decimal,
    amount: Decimal,
) -> Result<Decimal, LedgerError> {
    let after = match kind {
        TransactionKind::Deposit => balance.checked_add(amount),
        TransactionKind::Withdrawal => {
            if balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    available: balance.to_string(),
                    requested: amount.to_string(),
                });
            }
            balance.checked_sub(amount)
        }
    };
    after.and_then(at_scale).ok_or_else(|| {
        LedgerError::InvalidAmount(format!(
            "{} of {} on a balance of {} overflows",
            kind, amount, balance
        ))
    })
}

/// Sum of `values` at [`AMOUNT_SCALE`].
///
/// Fails with `AmountOverflow` when the sum overflows or would have to drop
/// cents to fit.
pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal, LedgerError> {
    values.into_iter().try_fold(Decimal::ZERO, |acc, v| {
        acc.checked_add(v)
            .and_then(at_scale)
            .ok_or_else(|| LedgerError::AmountOverflow(format!("{} + {}", acc, v)))
    })
}

impl Transaction {
    /// Checks `balance_after = balance_before ± amount` for this record.
    pub fn validate_arithmetic(&self) -> Result<(), LedgerError> {
        let expected = match self.kind {
            TransactionKind::Deposit => self.balance_before.checked_add(self.amount),
            TransactionKind::Withdrawal => self.balance_before.checked_sub(self.amount),
        };
        if self.amount <= Decimal::ZERO || expected != Some(self.balance_after) {
            return Err(LedgerError::InconsistentState(format!(
                "transaction {} does not balance: {} {} {} != {}",
                self.id, self.balance_before, self.kind, self.amount, self.balance_after
            )));
        }
        Ok(())
    }
}
