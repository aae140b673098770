use super::locks::LockMap;
use crate::domain::account::{AccountId, UserId};
use crate::domain::ledger::EntryKind;
use crate::domain::loan::{self, Loan, LoanId, LoanStatus, LoanTerm, LoanType};
use crate::domain::money::Amount;
use crate::domain::ports::{AtomicUnit, LoanDecision, NewLoan, Posting, SharedStore};
use crate::error::{BankError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Staff,
}

/// Pre-authenticated caller identity, supplied by the (external)
/// authenticator. The workflow trusts the role as given.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn customer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn staff(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Staff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanAction {
    Approve,
    Reject,
}

/// A borrower's loan application, validated by [`LoanWorkflow::apply`].
#[derive(Debug, Clone)]
pub struct LoanApplication {
    pub loan_type: LoanType,
    pub principal: Decimal,
    pub interest_rate: Decimal,
    pub term: LoanTerm,
}

/// A pending loan joined with the borrower's display name, as shown in
/// the staff processing queue.
#[derive(Debug, Clone)]
pub struct PendingLoan {
    pub loan: Loan,
    pub borrower_name: String,
}

/// Loan application, staff decision and disbursement.
///
/// Approval flips the status and credits the borrower's primary account
/// in one atomic unit; the two are never separately visible. Decisions on
/// the same loan serialize on a per-loan lock, disbursements share the
/// engine's per-account locks.
pub struct LoanWorkflow {
    store: SharedStore,
    account_locks: Arc<LockMap<AccountId>>,
    loan_locks: LockMap<LoanId>,
}

impl LoanWorkflow {
    pub fn new(store: SharedStore, account_locks: Arc<LockMap<AccountId>>) -> Self {
        Self {
            store,
            account_locks,
            loan_locks: LockMap::new(),
        }
    }

    /// Records a loan application in `Pending` state. Validates principal,
    /// rate and term, and derives the amortized monthly payment.
    pub async fn apply(&self, borrower: UserId, application: LoanApplication) -> Result<Loan> {
        let principal = Amount::new(application.principal)?;
        let rate = application.interest_rate;
        if rate <= Decimal::ZERO || rate > Decimal::from(100) {
            return Err(BankError::InvalidAmount(
                "interest rate must be greater than 0 and at most 100".to_string(),
            ));
        }
        let today = OffsetDateTime::now_utc().date();
        let (term_months, due_date) = match application.term {
            LoanTerm::Months(0) => {
                return Err(BankError::InvalidAmount(
                    "loan term must be at least one month".to_string(),
                ));
            }
            LoanTerm::Months(months) => (months, None),
            LoanTerm::DueDate(date) => {
                if date <= today {
                    return Err(BankError::InvalidAmount(
                        "loan due date must be in the future".to_string(),
                    ));
                }
                (loan::months_until(today, date), Some(date))
            }
        };
        let monthly_payment = loan::monthly_payment(principal.value(), rate, term_months);
        let loan = self
            .store
            .create_loan(NewLoan {
                borrower,
                loan_type: application.loan_type,
                principal,
                interest_rate: rate,
                term_months,
                due_date,
                monthly_payment,
            })
            .await?;
        info!(
            loan = %loan.id,
            borrower = %borrower,
            principal = %principal,
            months = term_months,
            payment = %monthly_payment,
            "loan application recorded"
        );
        Ok(loan)
    }

    /// The pending queue, oldest application first. Staff only.
    pub async fn list_pending(&self, caller: &Caller) -> Result<Vec<PendingLoan>> {
        self.require_staff(caller)?;
        self.pending().await
    }

    /// Approves or rejects a pending loan and returns the refreshed
    /// queue. Approval credits the borrower's primary account by the
    /// principal and appends a `loan_disbursement` entry, all in the same
    /// atomic unit as the status change.
    pub async fn process(
        &self,
        caller: &Caller,
        loan_id: LoanId,
        action: LoanAction,
    ) -> Result<Vec<PendingLoan>> {
        self.require_staff(caller)?;
        let result = {
            let _loan_guard = self.loan_locks.acquire(loan_id).await;
            let loan = self
                .store
                .loan(loan_id)
                .await?
                .ok_or(BankError::LoanNotFound)?;
            if loan.status != LoanStatus::Pending {
                return Err(BankError::AlreadyProcessed);
            }
            match action {
                LoanAction::Reject => {
                    self.store
                        .commit(AtomicUnit {
                            postings: Vec::new(),
                            loan: Some(LoanDecision::Reject {
                                loan_id,
                                staff: caller.user_id,
                            }),
                        })
                        .await
                }
                LoanAction::Approve => {
                    let account = self
                        .store
                        .account_for_owner(loan.borrower)
                        .await?
                        .ok_or(BankError::AccountNotFound)?;
                    let _account_guard = self.account_locks.acquire(account.id).await;
                    self.store
                        .commit(AtomicUnit {
                            postings: vec![Posting {
                                account_id: account.id,
                                kind: EntryKind::LoanDisbursement,
                                amount: loan.principal,
                                counterparty: None,
                            }],
                            loan: Some(LoanDecision::Approve {
                                loan_id,
                                staff: caller.user_id,
                            }),
                        })
                        .await
                }
            }
        };
        match result {
            Ok(_) => {
                info!(loan = %loan_id, staff = %caller.user_id, ?action, "loan processed");
                self.pending().await
            }
            Err(err) => {
                warn!(loan = %loan_id, kind = err.kind(), "loan decision failed");
                Err(err)
            }
        }
    }

    fn require_staff(&self, caller: &Caller) -> Result<()> {
        if caller.role != Role::Staff {
            return Err(BankError::Forbidden);
        }
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PendingLoan>> {
        let loans = self.store.pending_loans().await?;
        let mut queue = Vec::with_capacity(loans.len());
        for loan in loans {
            let borrower_name = self
                .store
                .display_name(loan.borrower)
                .await?
                .unwrap_or_default();
            queue.push(PendingLoan {
                loan,
                borrower_name,
            });
        }
        Ok(queue)
    }
}
