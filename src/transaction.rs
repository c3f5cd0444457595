//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::{
    apply_movement, checked_sum, normalize_amount, normalize_opening_balance, AMOUNT_SCALE,
};
