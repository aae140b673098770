use crate::domain::account::{Account, AccountId, AccountNumber, UserId};
use crate::domain::ledger::{Entry, EntryId, EntryKind};
use crate::domain::loan::{Loan, LoanId, LoanStatus};
use crate::domain::money::Balance;
use crate::domain::ports::{
    AccountStore, AtomicUnit, CommitReceipt, LedgerStore, LoanDecision, LoanStore, NewAccount,
    NewLoan, UnitOfWork, UserDirectory,
};
use crate::error::{BankError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory bank state behind tokio `RwLock`s.
///
/// Implements every store port on one struct. `commit` stages and
/// validates the whole unit before touching anything, so a failed unit
/// leaves balances, ledger and loans exactly as they were. Loans live in
/// a `BTreeMap` so iteration order is creation order.
#[derive(Default)]
pub struct InMemoryBank {
    accounts: RwLock<HashMap<AccountId, Account>>,
    by_number: RwLock<HashMap<AccountNumber, AccountId>>,
    ledger: RwLock<HashMap<AccountId, Vec<Entry>>>,
    loans: RwLock<BTreeMap<LoanId, Loan>>,
    users: RwLock<HashMap<UserId, String>>,
    next_account: AtomicU64,
    next_entry: AtomicU64,
    next_loan: AtomicU64,
    next_user: AtomicU64,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryBank {
    async fn open_account(&self, new: NewAccount) -> Result<Account> {
        let id = AccountId(self.next_account.fetch_add(1, Ordering::SeqCst) + 1);
        let account = Account {
            id,
            owner: new.owner,
            number: AccountNumber::from_sequence(id.0),
            account_type: new.account_type,
            balance: Balance::ZERO,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut accounts = self.accounts.write().await;
        let mut by_number = self.by_number.write().await;
        by_number.insert(account.number.clone(), id);
        accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id).cloned())
    }

    async fn account_by_number(&self, number: &AccountNumber) -> Result<Option<Account>> {
        let id = {
            let by_number = self.by_number.read().await;
            by_number.get(number).copied()
        };
        match id {
            Some(id) => self.account(id).await,
            None => Ok(None),
        }
    }

    async fn account_for_owner(&self, owner: UserId) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .filter(|account| account.owner == owner)
            .min_by_key(|account| account.id)
            .cloned())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        let mut all: Vec<Account> = accounts.values().cloned().collect();
        all.sort_by_key(|account| account.id);
        Ok(all)
    }
}

#[async_trait]
impl LedgerStore for InMemoryBank {
    async fn recent_entries(
        &self,
        account_id: AccountId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Entry>> {
        let ledger = self.ledger.read().await;
        let entries = match ledger.get(&account_id) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        // Appended in commit order, so reverse iteration is newest first.
        Ok(entries
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn entry_count(&self, account_id: AccountId) -> Result<u64> {
        let ledger = self.ledger.read().await;
        Ok(ledger.get(&account_id).map_or(0, |entries| entries.len() as u64))
    }
}

#[async_trait]
impl LoanStore for InMemoryBank {
    async fn create_loan(&self, new: NewLoan) -> Result<Loan> {
        let id = LoanId(self.next_loan.fetch_add(1, Ordering::SeqCst) + 1);
        let loan = Loan {
            id,
            borrower: new.borrower,
            loan_type: new.loan_type,
            principal: new.principal,
            interest_rate: new.interest_rate,
            term_months: new.term_months,
            due_date: new.due_date,
            monthly_payment: new.monthly_payment,
            status: LoanStatus::Pending,
            approved_by: None,
            approved_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut loans = self.loans.write().await;
        loans.insert(id, loan.clone());
        Ok(loan)
    }

    async fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        let loans = self.loans.read().await;
        Ok(loans.get(&id).cloned())
    }

    async fn pending_loans(&self) -> Result<Vec<Loan>> {
        let loans = self.loans.read().await;
        Ok(loans
            .values()
            .filter(|loan| loan.status == LoanStatus::Pending)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserDirectory for InMemoryBank {
    async fn register_user(&self, name: &str) -> Result<UserId> {
        let id = UserId(self.next_user.fetch_add(1, Ordering::SeqCst) + 1);
        let mut users = self.users.write().await;
        users.insert(id, name.to_string());
        Ok(id)
    }

    async fn display_name(&self, id: UserId) -> Result<Option<String>> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryBank {
    async fn commit(&self, unit: AtomicUnit) -> Result<CommitReceipt> {
        // Fixed acquisition order: accounts, loans, ledger.
        let mut accounts = self.accounts.write().await;
        let mut loans = self.loans.write().await;
        let mut ledger = self.ledger.write().await;

        // Validate everything before mutating anything.
        if let Some(decision) = &unit.loan {
            let loan_id = match decision {
                LoanDecision::Approve { loan_id, .. } | LoanDecision::Reject { loan_id, .. } => {
                    *loan_id
                }
            };
            let loan = loans.get(&loan_id).ok_or(BankError::LoanNotFound)?;
            if loan.status != LoanStatus::Pending {
                return Err(BankError::AlreadyProcessed);
            }
        }

        let mut staged: HashMap<AccountId, Balance> = HashMap::new();
        let mut plan = Vec::with_capacity(unit.postings.len());
        for posting in &unit.postings {
            let current = staged
                .get(&posting.account_id)
                .copied()
                .or_else(|| accounts.get(&posting.account_id).map(|a| a.balance));
            let current = match current {
                Some(balance) => balance,
                None if posting.kind == EntryKind::TransferIn => {
                    return Err(BankError::RecipientNotFound);
                }
                None => return Err(BankError::AccountNotFound),
            };
            let delta = Balance::from(posting.amount);
            let next = if posting.kind.is_credit() {
                current + delta
            } else {
                current - delta
            };
            if next < Balance::ZERO {
                return Err(BankError::InsufficientFunds);
            }
            staged.insert(posting.account_id, next);
            plan.push((posting.clone(), next));
        }

        // Apply.
        let now = OffsetDateTime::now_utc();
        let mut entries = Vec::with_capacity(plan.len());
        for (posting, balance_after) in plan {
            let account = accounts.get_mut(&posting.account_id).ok_or_else(|| {
                BankError::StoreUnavailable("account vanished mid-commit".to_string())
            })?;
            account.balance = balance_after;
            let entry = Entry {
                id: EntryId(self.next_entry.fetch_add(1, Ordering::SeqCst) + 1),
                account_id: posting.account_id,
                kind: posting.kind,
                amount: posting.amount,
                balance_after,
                counterparty: posting.counterparty,
                created_at: now,
            };
            ledger
                .entry(posting.account_id)
                .or_default()
                .push(entry.clone());
            entries.push(entry);
        }

        if let Some(decision) = unit.loan {
            match decision {
                LoanDecision::Approve { loan_id, staff } => {
                    if let Some(loan) = loans.get_mut(&loan_id) {
                        loan.status = LoanStatus::Approved;
                        loan.approved_by = Some(staff);
                        loan.approved_at = Some(now);
                    }
                }
                LoanDecision::Reject { loan_id, staff } => {
                    if let Some(loan) = loans.get_mut(&loan_id) {
                        loan.status = LoanStatus::Rejected;
                        loan.approved_by = Some(staff);
                    }
                }
            }
        }

        Ok(CommitReceipt {
            entries,
            balances: staged,
        })
    }
}
