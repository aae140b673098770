//! Domain types: money, accounts, the append-only ledger, loans, and the
//! store ports everything is built against.

pub mod account;
pub mod ledger;
pub mod loan;
pub mod money;
pub mod ports;
