//! svbank is the money-movement core of a demo banking application.
//!
//! Balance mutation and ledger append always happen together inside one
//! atomic unit: an operation either fully applies (balance update plus
//! ledger row) or not at all, and replaying an account's ledger always
//! reproduces its balance. The loan workflow shares the same unit for
//! approval plus disbursement. HTTP routing, authentication and UI are
//! external collaborators and live outside this crate.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
