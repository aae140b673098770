use crate::error::{BankError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Open,
    Deposit,
    Withdraw,
    Transfer,
    Loan,
    Approve,
    Reject,
}

/// One row of the operations file. Only `op` is always present; the other
/// columns are per-operation (empty fields deserialize to `None`).
#[derive(Debug, Deserialize, Clone)]
pub struct Operation {
    pub op: OpKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub months: Option<u32>,
}

/// Reads operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record
/// lengths, yielding a lazy iterator of `Result<Operation>` so large
/// files stream without loading fully into memory.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BankError::from))
    }
}
