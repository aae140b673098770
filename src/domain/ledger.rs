use super::account::AccountId;
use super::money::{Amount, Balance};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Monotonic ledger entry id; also the tie-breaker for entries that share
/// a timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
    LoanDisbursement,
}

impl EntryKind {
    /// Whether this kind increases the account balance.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Deposit | Self::TransferIn | Self::LoanDisbursement
        )
    }
}

/// An immutable ledger row. Entries are append-only: the stores expose no
/// update or delete operation for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub kind: EntryKind,
    /// Always positive; the sign is carried by `kind`.
    pub amount: Amount,
    /// The account balance at the instant this entry was committed.
    pub balance_after: Balance,
    pub counterparty: Option<AccountId>,
    pub created_at: OffsetDateTime,
}

impl Entry {
    /// The amount with its sign applied: positive for credits, negative
    /// for debits.
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_credit() {
            self.amount.value()
        } else {
            -self.amount.value()
        }
    }
}

/// Accumulates signed amounts over entries in creation order. For a full
/// ledger of one account this must reproduce the current balance exactly.
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Balance {
    entries
        .into_iter()
        .fold(Balance::ZERO, |acc, entry| {
            Balance::new(acc.value() + entry.signed_amount())
        })
}
