//! Application layer: the transaction engine, the loan workflow, and the
//! per-key lock map both use to serialize conflicting atomic units.

pub mod engine;
pub mod loans;
pub mod locks;
