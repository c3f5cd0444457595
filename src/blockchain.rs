// Thin re-export module: implementation is in `blockchain/core.rs`, split
// into block construction, chain storage and verification.

pub mod core;
pub use core::*;
