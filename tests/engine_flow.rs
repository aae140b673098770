use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use svbank::application::engine::TransactionEngine;
use svbank::domain::account::{Account, AccountId, AccountNumber, AccountType, UserId};
use svbank::domain::ledger::{Entry, EntryKind, replay};
use svbank::domain::loan::{Loan, LoanId};
use svbank::domain::money::Balance;
use svbank::domain::ports::{
    AccountStore, AtomicUnit, CommitReceipt, LedgerStore, LoanStore, NewAccount, NewLoan,
    SharedStore, UnitOfWork, UserDirectory,
};
use svbank::error::{BankError, Result};
use svbank::infrastructure::in_memory::InMemoryBank;

async fn setup() -> (TransactionEngine, Account, Account) {
    let store: SharedStore = Arc::new(InMemoryBank::new());
    let asha = store.register_user("Asha").await.unwrap();
    let ravi = store.register_user("Ravi").await.unwrap();
    let engine = TransactionEngine::new(store);
    let sender = engine
        .open_account(asha, AccountType::Savings, dec!(1000.00))
        .await
        .unwrap();
    let recipient = engine
        .open_account(ravi, AccountType::Savings, dec!(300.00))
        .await
        .unwrap();
    (engine, sender, recipient)
}

async fn full_ledger_oldest_first(
    engine: &TransactionEngine,
    account: &Account,
) -> Vec<svbank::domain::ledger::Entry> {
    let page = engine
        .list_transactions(account.id, Some(1), Some(100))
        .await
        .unwrap();
    let mut entries = page.transactions;
    entries.reverse();
    entries
}

#[tokio::test]
async fn deposit_withdraw_transfer_scenario() {
    let (engine, sender, recipient) = setup().await;
    assert_eq!(sender.number.as_str(), "SV00000001");
    assert_eq!(recipient.number.as_str(), "SV00000002");

    // Deposit 250 on top of the 1000 opening balance.
    let outcome = engine.deposit(sender.id, dec!(250.00)).await.unwrap();
    assert_eq!(outcome.balance, Balance::new(dec!(1250.00)));
    assert_eq!(outcome.transactions[0].kind, EntryKind::Deposit);
    assert_eq!(
        outcome.transactions[0].balance_after,
        Balance::new(dec!(1250.00))
    );

    // Overdraw attempt changes nothing.
    let err = engine.withdraw(sender.id, dec!(2000.00)).await.unwrap_err();
    assert!(matches!(err, BankError::InsufficientFunds));
    let page = engine
        .list_transactions(sender.id, None, None)
        .await
        .unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.transactions[0].balance_after, Balance::new(dec!(1250.00)));

    // Transfer 500 to the recipient by account number.
    let outcome = engine
        .transfer(sender.id, &recipient.number, dec!(500.00))
        .await
        .unwrap();
    assert_eq!(outcome.balance, Balance::new(dec!(750.00)));

    let sender_entries = full_ledger_oldest_first(&engine, &sender).await;
    let out_entry = sender_entries.last().unwrap();
    assert_eq!(out_entry.kind, EntryKind::TransferOut);
    assert_eq!(out_entry.balance_after, Balance::new(dec!(750.00)));
    assert_eq!(out_entry.counterparty, Some(recipient.id));

    let recipient_entries = full_ledger_oldest_first(&engine, &recipient).await;
    let in_entry = recipient_entries.last().unwrap();
    assert_eq!(in_entry.kind, EntryKind::TransferIn);
    assert_eq!(in_entry.balance_after, Balance::new(dec!(800.00)));
    assert_eq!(in_entry.counterparty, Some(sender.id));
}

#[tokio::test]
async fn ledger_replay_reproduces_balances() {
    let (engine, sender, recipient) = setup().await;
    engine.deposit(sender.id, dec!(250.00)).await.unwrap();
    let _ = engine.withdraw(sender.id, dec!(2000.00)).await;
    engine
        .transfer(sender.id, &recipient.number, dec!(500.00))
        .await
        .unwrap();
    engine.withdraw(recipient.id, dec!(123.45)).await.unwrap();

    for account in [&sender, &recipient] {
        let entries = full_ledger_oldest_first(&engine, account).await;
        let replayed = replay(&entries);
        let page = engine
            .list_transactions(account.id, None, None)
            .await
            .unwrap();
        assert_eq!(replayed, page.transactions[0].balance_after);
    }
}

#[tokio::test]
async fn failed_transfer_writes_no_entries() {
    let (engine, sender, recipient) = setup().await;

    // Insufficient funds.
    let err = engine
        .transfer(sender.id, &recipient.number, dec!(5000.00))
        .await
        .unwrap_err();
    assert!(matches!(err, BankError::InsufficientFunds));

    // Unknown recipient.
    let err = engine
        .transfer(sender.id, &AccountNumber::from("SV99999999"), dec!(10.00))
        .await
        .unwrap_err();
    assert!(matches!(err, BankError::RecipientNotFound));

    // Each account still has only its opening deposit entry.
    for account in [&sender, &recipient] {
        let page = engine
            .list_transactions(account.id, None, None)
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
    }
    let page = engine
        .list_transactions(sender.id, None, None)
        .await
        .unwrap();
    assert_eq!(page.transactions[0].balance_after, Balance::new(dec!(1000.00)));
}

#[tokio::test]
async fn listing_is_repeatable_and_ordered() {
    let (engine, sender, _) = setup().await;
    for i in 1..=7u32 {
        engine
            .deposit(sender.id, rust_decimal::Decimal::from(i))
            .await
            .unwrap();
    }

    let first = engine
        .list_transactions(sender.id, Some(1), Some(5))
        .await
        .unwrap();
    let second = engine
        .list_transactions(sender.id, Some(1), Some(5))
        .await
        .unwrap();
    assert_eq!(first.transactions, second.transactions);
    assert_eq!(first.total_count, second.total_count);

    // Newest first, ids strictly descending.
    for pair in first.transactions.windows(2) {
        assert!(pair[0].id > pair[1].id);
        assert!(pair[0].created_at >= pair[1].created_at);
    }

    // Pages tile the ledger without overlap.
    let page_two = engine
        .list_transactions(sender.id, Some(2), Some(5))
        .await
        .unwrap();
    assert_eq!(first.transactions.len(), 5);
    assert_eq!(page_two.transactions.len(), 3);
    assert!(page_two.transactions[0].id < first.transactions[4].id);
}

/// Forwards every port to an in-memory bank but can be armed to fail the
/// next commit, as a crashed or unreachable backend would after the unit
/// was validated.
struct FlakyStore {
    inner: InMemoryBank,
    fail_next_commit: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryBank::new(),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn open_account(&self, new: NewAccount) -> Result<Account> {
        self.inner.open_account(new).await
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.inner.account(id).await
    }

    async fn account_by_number(&self, number: &AccountNumber) -> Result<Option<Account>> {
        self.inner.account_by_number(number).await
    }

    async fn account_for_owner(&self, owner: UserId) -> Result<Option<Account>> {
        self.inner.account_for_owner(owner).await
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.inner.all_accounts().await
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn recent_entries(
        &self,
        account_id: AccountId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Entry>> {
        self.inner.recent_entries(account_id, limit, offset).await
    }

    async fn entry_count(&self, account_id: AccountId) -> Result<u64> {
        self.inner.entry_count(account_id).await
    }
}

#[async_trait]
impl LoanStore for FlakyStore {
    async fn create_loan(&self, new: NewLoan) -> Result<Loan> {
        self.inner.create_loan(new).await
    }

    async fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        self.inner.loan(id).await
    }

    async fn pending_loans(&self) -> Result<Vec<Loan>> {
        self.inner.pending_loans().await
    }
}

#[async_trait]
impl UserDirectory for FlakyStore {
    async fn register_user(&self, name: &str) -> Result<UserId> {
        self.inner.register_user(name).await
    }

    async fn display_name(&self, id: UserId) -> Result<Option<String>> {
        self.inner.display_name(id).await
    }
}

#[async_trait]
impl UnitOfWork for FlakyStore {
    async fn commit(&self, unit: AtomicUnit) -> Result<CommitReceipt> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(BankError::StoreUnavailable(
                "simulated write failure".to_string(),
            ));
        }
        self.inner.commit(unit).await
    }
}

#[tokio::test]
async fn store_failure_mid_transfer_moves_no_funds() {
    let flaky = Arc::new(FlakyStore::new());
    let store: SharedStore = flaky.clone();
    let asha = store.register_user("Asha").await.unwrap();
    let ravi = store.register_user("Ravi").await.unwrap();
    let engine = TransactionEngine::new(store);
    let sender = engine
        .open_account(asha, AccountType::Savings, dec!(1000.00))
        .await
        .unwrap();
    let recipient = engine
        .open_account(ravi, AccountType::Savings, dec!(300.00))
        .await
        .unwrap();

    // This transfer passes validation and dies at the write.
    flaky.arm();
    let err = engine
        .transfer(sender.id, &recipient.number, dec!(500.00))
        .await
        .unwrap_err();
    assert!(matches!(err, BankError::StoreUnavailable(_)));

    // Neither side moved and neither gained an entry: still exactly the
    // opening deposit on each.
    let sender_page = engine
        .list_transactions(sender.id, None, None)
        .await
        .unwrap();
    assert_eq!(sender_page.total_count, 1);
    assert_eq!(
        sender_page.transactions[0].balance_after,
        Balance::new(dec!(1000.00))
    );
    let recipient_page = engine
        .list_transactions(recipient.id, None, None)
        .await
        .unwrap();
    assert_eq!(recipient_page.total_count, 1);
    assert_eq!(
        recipient_page.transactions[0].balance_after,
        Balance::new(dec!(300.00))
    );

    // The failure is transient: the identical transfer succeeds on retry,
    // producing the usual pair of entries.
    let outcome = engine
        .transfer(sender.id, &recipient.number, dec!(500.00))
        .await
        .unwrap();
    assert_eq!(outcome.balance, Balance::new(dec!(500.00)));
    assert_eq!(
        engine
            .list_transactions(recipient.id, None, None)
            .await
            .unwrap()
            .total_count,
        2
    );
}
