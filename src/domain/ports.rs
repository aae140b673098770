//! Store ports for the transactional core.
//!
//! The engine and the loan workflow only ever see these traits; concrete
//! backends live in `infrastructure`. All balance mutation goes through
//! [`UnitOfWork::commit`], which applies an [`AtomicUnit`] entirely or not
//! at all.

use super::account::{Account, AccountId, AccountNumber, AccountType, UserId};
use super::ledger::{Entry, EntryKind};
use super::loan::{Loan, LoanId, LoanType};
use super::money::{Amount, Balance};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use time::Date;

/// Parameters for opening an account; the store assigns id, number and
/// creation time. Accounts always open with a zero balance.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: UserId,
    pub account_type: AccountType,
}

/// Parameters for recording a loan application; the store assigns id and
/// creation time and sets the status to `Pending`.
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub borrower: UserId,
    pub loan_type: LoanType,
    pub principal: Amount,
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub due_date: Option<Date>,
    pub monthly_payment: Decimal,
}

/// One balance movement inside an atomic unit. The amount is always
/// positive; `kind` determines the sign.
#[derive(Debug, Clone)]
pub struct Posting {
    pub account_id: AccountId,
    pub kind: EntryKind,
    pub amount: Amount,
    pub counterparty: Option<AccountId>,
}

/// A loan status transition committed together with its postings. The
/// store must fail the whole unit with `AlreadyProcessed` when the loan is
/// no longer pending.
#[derive(Debug, Clone)]
pub enum LoanDecision {
    Approve { loan_id: LoanId, staff: UserId },
    Reject { loan_id: LoanId, staff: UserId },
}

/// The all-or-nothing unit of work: a set of postings plus an optional
/// loan decision. Either every posting is applied, every ledger entry
/// written and the decision recorded, or nothing is.
#[derive(Debug, Clone, Default)]
pub struct AtomicUnit {
    pub postings: Vec<Posting>,
    pub loan: Option<LoanDecision>,
}

impl AtomicUnit {
    pub fn single(posting: Posting) -> Self {
        Self {
            postings: vec![posting],
            loan: None,
        }
    }
}

/// What a successful commit produced: the appended entries (in commit
/// order) and the new balance of every touched account.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub entries: Vec<Entry>,
    pub balances: HashMap<AccountId, Balance>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn open_account(&self, new: NewAccount) -> Result<Account>;
    async fn account(&self, id: AccountId) -> Result<Option<Account>>;
    async fn account_by_number(&self, number: &AccountNumber) -> Result<Option<Account>>;
    /// The owner's primary (oldest) account, used for loan disbursement.
    async fn account_for_owner(&self, owner: UserId) -> Result<Option<Account>>;
    /// All accounts ordered by id.
    async fn all_accounts(&self) -> Result<Vec<Account>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Entries for one account, newest first, ties broken by descending
    /// entry id.
    async fn recent_entries(
        &self,
        account_id: AccountId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Entry>>;
    async fn entry_count(&self, account_id: AccountId) -> Result<u64>;
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn create_loan(&self, new: NewLoan) -> Result<Loan>;
    async fn loan(&self, id: LoanId) -> Result<Option<Loan>>;
    /// Pending loans oldest first (FIFO processing queue).
    async fn pending_loans(&self) -> Result<Vec<Loan>>;
}

/// Minimal identity lookup so pending loans can be joined with borrower
/// display names. Credentials and roles are an external concern.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn register_user(&self, name: &str) -> Result<UserId>;
    async fn display_name(&self, id: UserId) -> Result<Option<String>>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Applies the unit atomically. Validation (missing accounts,
    /// overdraw, non-pending loan) happens before any mutation; on error
    /// no balance changes and no entry is written.
    async fn commit(&self, unit: AtomicUnit) -> Result<CommitReceipt>;
}

/// Umbrella trait for a backend that implements every port.
pub trait BankStore:
    AccountStore + LedgerStore + LoanStore + UserDirectory + UnitOfWork
{
}

impl<T> BankStore for T where
    T: AccountStore + LedgerStore + LoanStore + UserDirectory + UnitOfWork
{
}

pub type SharedStore = Arc<dyn BankStore>;
