// core.rs splits responsibilities into submodules: block values, the
// serialized chain store, and chain verification.
pub mod block;
pub mod chain;
pub mod validation;

pub use block::*;
pub use chain::*;
pub use validation::*;
