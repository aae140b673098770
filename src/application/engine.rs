use super::locks::LockMap;
use crate::domain::account::{Account, AccountId, AccountNumber, AccountType, UserId};
use crate::domain::ledger::{Entry, EntryKind};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{AtomicUnit, CommitReceipt, NewAccount, Posting, SharedStore};
use crate::error::{BankError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// How many recent entries a successful mutation returns.
pub const RECENT_LIMIT: u32 = 10;
/// Default page size for transaction history.
pub const DEFAULT_PAGE_SIZE: u32 = 30;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Result of a successful balance mutation: the committed balance and the
/// account's most recent ledger entries, newest first.
#[derive(Debug, Clone)]
pub struct TxnOutcome {
    pub balance: Balance,
    pub transactions: Vec<Entry>,
}

/// One page of transaction history.
#[derive(Debug, Clone)]
pub struct TxnPage {
    pub transactions: Vec<Entry>,
    pub total_count: u64,
    pub page: u32,
    pub limit: u32,
}

/// Applies deposit, withdraw and transfer operations atomically against
/// the account and ledger stores.
///
/// The engine validates parameters before anything is mutated, serializes
/// conflicting operations with per-account locks, and commits exactly one
/// [`AtomicUnit`] per operation. It holds no state of its own beyond the
/// injected store handle and the lock map.
pub struct TransactionEngine {
    store: SharedStore,
    locks: Arc<LockMap<AccountId>>,
}

impl TransactionEngine {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            locks: Arc::new(LockMap::new()),
        }
    }

    /// The per-account lock map, shared with the loan workflow so
    /// disbursements serialize with ordinary transactions.
    pub fn account_locks(&self) -> Arc<LockMap<AccountId>> {
        self.locks.clone()
    }

    /// Opens an account for `owner`. The account is created empty; a
    /// nonzero opening deposit is routed through [`Self::deposit`] so the
    /// ledger replays to the balance from the very first entry.
    pub async fn open_account(
        &self,
        owner: UserId,
        account_type: AccountType,
        opening_deposit: Decimal,
    ) -> Result<Account> {
        if !opening_deposit.is_zero() {
            // Validate before the account row exists.
            Amount::new(opening_deposit)?;
        }
        let mut account = self
            .store
            .open_account(NewAccount {
                owner,
                account_type,
            })
            .await?;
        info!(account = %account.number, owner = %owner, "account opened");
        if !opening_deposit.is_zero() {
            let outcome = self.deposit(account.id, opening_deposit).await?;
            account.balance = outcome.balance;
        }
        Ok(account)
    }

    pub async fn deposit(&self, account_id: AccountId, amount: Decimal) -> Result<TxnOutcome> {
        let amount = Amount::new(amount)?;
        let guard = self.locks.acquire(account_id).await;
        let receipt = self
            .store
            .commit(AtomicUnit::single(Posting {
                account_id,
                kind: EntryKind::Deposit,
                amount,
                counterparty: None,
            }))
            .await?;
        let outcome = self.outcome(account_id, &receipt).await?;
        drop(guard);
        info!(account = %account_id, %amount, "deposit committed");
        Ok(outcome)
    }

    pub async fn withdraw(&self, account_id: AccountId, amount: Decimal) -> Result<TxnOutcome> {
        let amount = Amount::new(amount)?;
        let guard = self.locks.acquire(account_id).await;
        let receipt = self
            .store
            .commit(AtomicUnit::single(Posting {
                account_id,
                kind: EntryKind::Withdrawal,
                amount,
                counterparty: None,
            }))
            .await;
        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(account = %account_id, %amount, kind = err.kind(), "withdrawal rejected");
                return Err(err);
            }
        };
        let outcome = self.outcome(account_id, &receipt).await?;
        drop(guard);
        info!(account = %account_id, %amount, "withdrawal committed");
        Ok(outcome)
    }

    /// Moves `amount` from `from` to the account addressed by its public
    /// number. Debit and credit commit as one unit: either both ledger
    /// entries are written or neither is.
    pub async fn transfer(
        &self,
        from: AccountId,
        to_number: &AccountNumber,
        amount: Decimal,
    ) -> Result<TxnOutcome> {
        let amount = Amount::new(amount)?;
        let sender = self
            .store
            .account(from)
            .await?
            .ok_or(BankError::AccountNotFound)?;
        let recipient = self
            .store
            .account_by_number(to_number)
            .await?
            .ok_or(BankError::RecipientNotFound)?;
        if recipient.id == sender.id {
            return Err(BankError::InvalidRecipient);
        }

        let unit = AtomicUnit {
            postings: vec![
                Posting {
                    account_id: sender.id,
                    kind: EntryKind::TransferOut,
                    amount,
                    counterparty: Some(recipient.id),
                },
                Posting {
                    account_id: recipient.id,
                    kind: EntryKind::TransferIn,
                    amount,
                    counterparty: Some(sender.id),
                },
            ],
            loan: None,
        };
        let guards = self.locks.acquire_pair(sender.id, recipient.id).await;
        let receipt = match self.store.commit(unit).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(
                    from = %sender.number,
                    to = %recipient.number,
                    %amount,
                    kind = err.kind(),
                    "transfer rejected"
                );
                return Err(err);
            }
        };
        let outcome = self.outcome(sender.id, &receipt).await?;
        drop(guards);
        info!(from = %sender.number, to = %recipient.number, %amount, "transfer committed");
        Ok(outcome)
    }

    /// Read-only page of the account's history, newest first. Page and
    /// limit are defaulted and clamped to positive values.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<TxnPage> {
        self.store
            .account(account_id)
            .await?
            .ok_or(BankError::AccountNotFound)?;
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page - 1) * u64::from(limit);
        let transactions = self.store.recent_entries(account_id, limit, offset).await?;
        let total_count = self.store.entry_count(account_id).await?;
        Ok(TxnPage {
            transactions,
            total_count,
            page,
            limit,
        })
    }

    /// Builds the post-mutation view. Called with the account's lock still
    /// held, so the balance and the entry list describe the same instant.
    async fn outcome(&self, account_id: AccountId, receipt: &CommitReceipt) -> Result<TxnOutcome> {
        let balance = receipt.balances.get(&account_id).copied().ok_or_else(|| {
            BankError::StoreUnavailable("commit receipt missing account balance".to_string())
        })?;
        let transactions = self.store.recent_entries(account_id, RECENT_LIMIT, 0).await?;
        Ok(TxnOutcome {
            balance,
            transactions,
        })
    }
}
