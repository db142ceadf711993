//! Execution units: ALU, data cache, and predictors.

/// RV32IM integer arithmetic.
pub mod alu;
/// Branch, return-address, and memory-dependence predictors.
pub mod bpred;
/// Set-associative data cache (the timing side channel).
pub mod cache;
