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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// Column family for account rows.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column family for ledger entries, keyed `(account_id BE, entry_id BE)`.
pub const CF_LEDGER: &str = "ledger";
/// Column family for loan rows.
pub const CF_LOANS: &str = "loans";
/// Column family for user display names.
pub const CF_USERS: &str = "users";
/// Column family for id counters.
pub const CF_META: &str = "meta";

const META_NEXT_ACCOUNT: &[u8] = b"next_account";
const META_NEXT_ENTRY: &[u8] = b"next_entry";
const META_NEXT_LOAN: &[u8] = b"next_loan";
const META_NEXT_USER: &[u8] = b"next_user";

/// Persistent store implementation using RocksDB.
///
/// Each atomic unit becomes a single `WriteBatch` spanning the account,
/// ledger, loan and meta column families, so a unit is durable entirely or
/// not at all. Callers (the engine and the loan workflow) serialize
/// conflicting units; this adapter only locks around meta counter writes.
/// Units on unrelated accounts may land in either order, so the persisted
/// counters are the current high-water mark of the in-process allocators,
/// written under `meta_guard`, never one unit's own ids.
#[derive(Clone)]
pub struct RocksDbBank {
    db: Arc<DB>,
    next_account: Arc<AtomicU64>,
    next_entry: Arc<AtomicU64>,
    next_loan: Arc<AtomicU64>,
    next_user: Arc<AtomicU64>,
    meta_guard: Arc<Mutex<()>>,
}

impl RocksDbBank {
    /// Opens or creates the database, ensuring all column families exist
    /// and recovering the id counters from the meta column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ACCOUNTS, CF_LEDGER, CF_LOANS, CF_USERS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let next_account = Arc::new(AtomicU64::new(read_counter(&db, META_NEXT_ACCOUNT)?));
        let next_entry = Arc::new(AtomicU64::new(read_counter(&db, META_NEXT_ENTRY)?));
        let next_loan = Arc::new(AtomicU64::new(read_counter(&db, META_NEXT_LOAN)?));
        let next_user = Arc::new(AtomicU64::new(read_counter(&db, META_NEXT_USER)?));

        Ok(Self {
            db: Arc::new(db),
            next_account,
            next_entry,
            next_loan,
            next_user,
            meta_guard: Arc::new(Mutex::new(())),
        })
    }

    fn lock_meta(&self) -> std::sync::MutexGuard<'_, ()> {
        self.meta_guard.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| BankError::StoreUnavailable(format!("{name} column family not found")))
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        // Keys are big-endian ids, so iteration order is id order.
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            accounts.push(serde_json::from_slice(&value)?);
        }
        Ok(accounts)
    }
}

fn read_counter(db: &DB, key: &[u8]) -> Result<u64> {
    let cf = db
        .cf_handle(CF_META)
        .ok_or_else(|| BankError::StoreUnavailable("meta column family not found".to_string()))?;
    match db.get_cf(cf, key)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                BankError::StoreUnavailable("corrupt counter in meta column family".to_string())
            })?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

fn ledger_key(account_id: AccountId, entry_id: EntryId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&account_id.0.to_be_bytes());
    key[8..].copy_from_slice(&entry_id.0.to_be_bytes());
    key
}

#[async_trait]
impl AccountStore for RocksDbBank {
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
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            id.0.to_be_bytes(),
            serde_json::to_vec(&account)?,
        );
        let _meta = self.lock_meta();
        batch.put_cf(
            self.cf(CF_META)?,
            META_NEXT_ACCOUNT,
            self.next_account.load(Ordering::SeqCst).to_be_bytes(),
        );
        self.db.write(batch)?;
        Ok(account)
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.get_account(id)
    }

    async fn account_by_number(&self, number: &AccountNumber) -> Result<Option<Account>> {
        Ok(self
            .scan_accounts()?
            .into_iter()
            .find(|account| &account.number == number))
    }

    async fn account_for_owner(&self, owner: UserId) -> Result<Option<Account>> {
        Ok(self
            .scan_accounts()?
            .into_iter()
            .find(|account| account.owner == owner))
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.scan_accounts()
    }
}

#[async_trait]
impl LedgerStore for RocksDbBank {
    async fn recent_entries(
        &self,
        account_id: AccountId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Entry>> {
        let cf = self.cf(CF_LEDGER)?;
        let upper = ledger_key(account_id, EntryId(u64::MAX));
        let prefix = account_id.0.to_be_bytes();
        let mut entries = Vec::new();
        let mut skipped = 0u64;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            entries.push(serde_json::from_slice(&value)?);
            if entries.len() as u32 >= limit {
                break;
            }
        }
        Ok(entries)
    }

    async fn entry_count(&self, account_id: AccountId) -> Result<u64> {
        let cf = self.cf(CF_LEDGER)?;
        let lower = ledger_key(account_id, EntryId(0));
        let prefix = account_id.0.to_be_bytes();
        let mut count = 0u64;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&lower, Direction::Forward))
        {
            let (key, _value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl LoanStore for RocksDbBank {
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
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_LOANS)?,
            id.0.to_be_bytes(),
            serde_json::to_vec(&loan)?,
        );
        let _meta = self.lock_meta();
        batch.put_cf(
            self.cf(CF_META)?,
            META_NEXT_LOAN,
            self.next_loan.load(Ordering::SeqCst).to_be_bytes(),
        );
        self.db.write(batch)?;
        Ok(loan)
    }

    async fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        let cf = self.cf(CF_LOANS)?;
        match self.db.get_cf(cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn pending_loans(&self) -> Result<Vec<Loan>> {
        let cf = self.cf(CF_LOANS)?;
        let mut pending = Vec::new();
        // Ascending id order doubles as application order.
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let loan: Loan = serde_json::from_slice(&value)?;
            if loan.status == LoanStatus::Pending {
                pending.push(loan);
            }
        }
        Ok(pending)
    }
}

#[async_trait]
impl UserDirectory for RocksDbBank {
    async fn register_user(&self, name: &str) -> Result<UserId> {
        let id = UserId(self.next_user.fetch_add(1, Ordering::SeqCst) + 1);
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_USERS)?,
            id.0.to_be_bytes(),
            serde_json::to_vec(name)?,
        );
        let _meta = self.lock_meta();
        batch.put_cf(
            self.cf(CF_META)?,
            META_NEXT_USER,
            self.next_user.load(Ordering::SeqCst).to_be_bytes(),
        );
        self.db.write(batch)?;
        Ok(id)
    }

    async fn display_name(&self, id: UserId) -> Result<Option<String>> {
        let cf = self.cf(CF_USERS)?;
        match self.db.get_cf(cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UnitOfWork for RocksDbBank {
    async fn commit(&self, unit: AtomicUnit) -> Result<CommitReceipt> {
        // Validate against current state before staging the batch.
        let loan = match &unit.loan {
            Some(decision) => {
                let loan_id = match decision {
                    LoanDecision::Approve { loan_id, .. }
                    | LoanDecision::Reject { loan_id, .. } => *loan_id,
                };
                let loan = self.loan(loan_id).await?.ok_or(BankError::LoanNotFound)?;
                if loan.status != LoanStatus::Pending {
                    return Err(BankError::AlreadyProcessed);
                }
                Some(loan)
            }
            None => None,
        };

        let mut touched: HashMap<AccountId, Account> = HashMap::new();
        let mut plan = Vec::with_capacity(unit.postings.len());
        for posting in &unit.postings {
            let account = match touched.get(&posting.account_id) {
                Some(account) => account.clone(),
                None => match self.get_account(posting.account_id)? {
                    Some(account) => account,
                    None if posting.kind == EntryKind::TransferIn => {
                        return Err(BankError::RecipientNotFound);
                    }
                    None => return Err(BankError::AccountNotFound),
                },
            };
            let delta = Balance::from(posting.amount);
            let next = if posting.kind.is_credit() {
                account.balance + delta
            } else {
                account.balance - delta
            };
            if next < Balance::ZERO {
                return Err(BankError::InsufficientFunds);
            }
            let mut updated = account;
            updated.balance = next;
            touched.insert(posting.account_id, updated);
            plan.push((posting.clone(), next));
        }

        // Stage the whole unit as one batch.
        let now = OffsetDateTime::now_utc();
        let mut batch = WriteBatch::default();
        let mut entries = Vec::with_capacity(plan.len());
        for (posting, balance_after) in plan {
            let id = EntryId(self.next_entry.fetch_add(1, Ordering::SeqCst) + 1);
            let entry = Entry {
                id,
                account_id: posting.account_id,
                kind: posting.kind,
                amount: posting.amount,
                balance_after,
                counterparty: posting.counterparty,
                created_at: now,
            };
            batch.put_cf(
                self.cf(CF_LEDGER)?,
                ledger_key(entry.account_id, entry.id),
                serde_json::to_vec(&entry)?,
            );
            entries.push(entry);
        }
        for account in touched.values() {
            batch.put_cf(
                self.cf(CF_ACCOUNTS)?,
                account.id.0.to_be_bytes(),
                serde_json::to_vec(account)?,
            );
        }
        if let (Some(decision), Some(mut loan)) = (unit.loan, loan) {
            match decision {
                LoanDecision::Approve { staff, .. } => {
                    loan.status = LoanStatus::Approved;
                    loan.approved_by = Some(staff);
                    loan.approved_at = Some(now);
                }
                LoanDecision::Reject { staff, .. } => {
                    loan.status = LoanStatus::Rejected;
                    loan.approved_by = Some(staff);
                }
            }
            batch.put_cf(
                self.cf(CF_LOANS)?,
                loan.id.0.to_be_bytes(),
                serde_json::to_vec(&loan)?,
            );
        }
        // Counter writes must be monotonic: concurrent units on unrelated
        // accounts can reach `db.write` out of allocation order, so each
        // batch persists the allocator's current value under the guard
        // rather than its own last id.
        let _meta = self.lock_meta();
        if !entries.is_empty() {
            batch.put_cf(
                self.cf(CF_META)?,
                META_NEXT_ENTRY,
                self.next_entry.load(Ordering::SeqCst).to_be_bytes(),
            );
        }
        self.db.write(batch)?;

        let balances = touched
            .into_iter()
            .map(|(id, account)| (id, account.balance))
            .collect();
        Ok(CommitReceipt { entries, balances })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountType;
    use crate::domain::money::Amount;
    use crate::domain::ports::Posting;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn posting(account_id: AccountId, kind: EntryKind, amount: rust_decimal::Decimal) -> Posting {
        Posting {
            account_id,
            kind,
            amount: Amount::new(amount).unwrap(),
            counterparty: None,
        }
    }

    #[tokio::test]
    async fn open_creates_column_families() {
        let dir = tempdir().unwrap();
        let bank = RocksDbBank::open(dir.path()).expect("failed to open RocksDB");
        for name in [CF_ACCOUNTS, CF_LEDGER, CF_LOANS, CF_USERS, CF_META] {
            assert!(bank.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn unit_survives_reopen() {
        let dir = tempdir().unwrap();
        let account_id = {
            let bank = RocksDbBank::open(dir.path()).unwrap();
            let owner = bank.register_user("Asha").await.unwrap();
            let account = bank
                .open_account(NewAccount {
                    owner,
                    account_type: AccountType::Savings,
                })
                .await
                .unwrap();
            bank.commit(AtomicUnit::single(posting(
                account.id,
                EntryKind::Deposit,
                dec!(150.00),
            )))
            .await
            .unwrap();
            account.id
        };

        let bank = RocksDbBank::open(dir.path()).unwrap();
        let account = bank.account(account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(150.00)));
        assert_eq!(bank.entry_count(account_id).await.unwrap(), 1);

        // Counters recovered: the next account gets a fresh id and number.
        let owner = bank.register_user("Ravi").await.unwrap();
        let second = bank
            .open_account(NewAccount {
                owner,
                account_type: AccountType::Savings,
            })
            .await
            .unwrap();
        assert_eq!(second.number.as_str(), "SV00000002");
    }

    #[tokio::test]
    async fn concurrent_units_never_reuse_entry_ids_after_reopen() {
        let dir = tempdir().unwrap();
        let (a_id, b_id) = {
            let bank = RocksDbBank::open(dir.path()).unwrap();
            let owner = bank.register_user("Asha").await.unwrap();
            let a = bank
                .open_account(NewAccount {
                    owner,
                    account_type: AccountType::Savings,
                })
                .await
                .unwrap();
            let b = bank
                .open_account(NewAccount {
                    owner,
                    account_type: AccountType::Savings,
                })
                .await
                .unwrap();

            // Units on unrelated accounts commit concurrently, so their
            // batches may reach the WAL out of allocation order.
            let mut handles = Vec::new();
            for i in 0..10u64 {
                let bank = bank.clone();
                let target = if i % 2 == 0 { a.id } else { b.id };
                handles.push(tokio::spawn(async move {
                    bank.commit(AtomicUnit::single(posting(
                        target,
                        EntryKind::Deposit,
                        dec!(1.00),
                    )))
                    .await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
            (a.id, b.id)
        };

        // A regressed counter would hand out an already-used entry id and
        // overwrite an existing ledger row under the same key.
        let bank = RocksDbBank::open(dir.path()).unwrap();
        bank.commit(AtomicUnit::single(posting(
            a_id,
            EntryKind::Deposit,
            dec!(1.00),
        )))
        .await
        .unwrap();
        assert_eq!(bank.entry_count(a_id).await.unwrap(), 6);
        assert_eq!(bank.entry_count(b_id).await.unwrap(), 5);
        assert_eq!(
            bank.account(a_id).await.unwrap().unwrap().balance,
            Balance::new(dec!(6.00))
        );
    }

    #[tokio::test]
    async fn failed_unit_writes_nothing() {
        let dir = tempdir().unwrap();
        let bank = RocksDbBank::open(dir.path()).unwrap();
        let owner = bank.register_user("Asha").await.unwrap();
        let a = bank
            .open_account(NewAccount {
                owner,
                account_type: AccountType::Savings,
            })
            .await
            .unwrap();
        let b = bank
            .open_account(NewAccount {
                owner,
                account_type: AccountType::Savings,
            })
            .await
            .unwrap();

        let err = bank
            .commit(AtomicUnit {
                postings: vec![
                    posting(a.id, EntryKind::TransferOut, dec!(5.00)),
                    posting(b.id, EntryKind::TransferIn, dec!(5.00)),
                ],
                loan: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BankError::InsufficientFunds));
        assert_eq!(bank.entry_count(a.id).await.unwrap(), 0);
        assert_eq!(bank.entry_count(b.id).await.unwrap(), 0);
        assert_eq!(bank.account(b.id).await.unwrap().unwrap().balance, Balance::ZERO);
    }

    #[tokio::test]
    async fn recent_entries_iterate_newest_first() {
        let dir = tempdir().unwrap();
        let bank = RocksDbBank::open(dir.path()).unwrap();
        let owner = bank.register_user("Asha").await.unwrap();
        let account = bank
            .open_account(NewAccount {
                owner,
                account_type: AccountType::Savings,
            })
            .await
            .unwrap();
        for i in 1..=4u32 {
            bank.commit(AtomicUnit::single(posting(
                account.id,
                EntryKind::Deposit,
                rust_decimal::Decimal::from(i),
            )))
            .await
            .unwrap();
        }
        let top = bank.recent_entries(account.id, 2, 1).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].amount.value(), dec!(3));
        assert_eq!(top[1].amount.value(), dec!(2));
    }
}
