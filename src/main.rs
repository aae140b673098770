use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use rust_decimal::Decimal;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use svbank::application::engine::TransactionEngine;
use svbank::application::loans::{Caller, LoanAction, LoanApplication, LoanWorkflow};
use svbank::domain::account::{Account, AccountNumber, AccountType, UserId};
use svbank::domain::loan::{LoanTerm, LoanType};
use svbank::domain::ports::SharedStore;
use svbank::infrastructure::in_memory::InMemoryBank;
use svbank::interfaces::csv::operation_reader::{OpKind, Operation, OperationReader};
use svbank::interfaces::csv::summary_writer::SummaryWriter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match &cli.db_path {
        Some(path) => open_persistent(path)?,
        None => Arc::new(InMemoryBank::new()) as SharedStore,
    };
    let engine = TransactionEngine::new(store.clone());
    let loans = LoanWorkflow::new(store.clone(), engine.account_locks());
    // The CLI acts as its own branch staff when processing loans.
    let staff = Caller::staff(UserId(0));

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                if let Err(e) = apply(&store, &engine, &loans, &staff, op).await {
                    eprintln!("Error processing operation: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {e}");
            }
        }
    }

    let accounts = store.all_accounts().await.into_diagnostic()?;
    let mut owners = Vec::with_capacity(accounts.len());
    for account in &accounts {
        let name = store
            .display_name(account.owner)
            .await
            .into_diagnostic()?
            .unwrap_or_default();
        owners.push(name);
    }

    let stdout = std::io::stdout();
    let mut writer = SummaryWriter::new(stdout.lock());
    writer
        .write_accounts(accounts.iter().zip(owners.iter().map(String::as_str)))
        .into_diagnostic()?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_persistent(path: &std::path::Path) -> Result<SharedStore> {
    let bank = svbank::infrastructure::rocksdb::RocksDbBank::open(path).into_diagnostic()?;
    Ok(Arc::new(bank))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_persistent(_path: &std::path::Path) -> Result<SharedStore> {
    Err(miette!(
        "this build does not include persistent storage; rebuild with --features storage-rocksdb"
    ))
}

async fn apply(
    store: &SharedStore,
    engine: &TransactionEngine,
    loans: &LoanWorkflow,
    staff: &Caller,
    op: Operation,
) -> Result<()> {
    match op.op {
        OpKind::Open => {
            let name = op
                .name
                .as_deref()
                .ok_or_else(|| miette!("open requires a customer name"))?;
            let owner = store.register_user(name).await.into_diagnostic()?;
            let opening = op.amount.unwrap_or(Decimal::ZERO);
            engine
                .open_account(owner, AccountType::Savings, opening)
                .await
                .into_diagnostic()?;
        }
        OpKind::Deposit => {
            let account = resolve(store, op.account.as_deref()).await?;
            engine
                .deposit(account.id, required_amount(&op)?)
                .await
                .into_diagnostic()?;
        }
        OpKind::Withdraw => {
            let account = resolve(store, op.account.as_deref()).await?;
            engine
                .withdraw(account.id, required_amount(&op)?)
                .await
                .into_diagnostic()?;
        }
        OpKind::Transfer => {
            let from = resolve(store, op.account.as_deref()).await?;
            let to = op
                .to
                .as_deref()
                .ok_or_else(|| miette!("transfer requires a recipient account number"))?;
            engine
                .transfer(from.id, &AccountNumber::from(to), required_amount(&op)?)
                .await
                .into_diagnostic()?;
        }
        OpKind::Loan => {
            let account = resolve(store, op.account.as_deref()).await?;
            let rate = op
                .rate
                .ok_or_else(|| miette!("loan requires an interest rate"))?;
            let months = op
                .months
                .ok_or_else(|| miette!("loan requires a term in months"))?;
            loans
                .apply(
                    account.owner,
                    LoanApplication {
                        loan_type: LoanType::Personal,
                        principal: required_amount(&op)?,
                        interest_rate: rate,
                        term: LoanTerm::Months(months),
                    },
                )
                .await
                .into_diagnostic()?;
        }
        OpKind::Approve | OpKind::Reject => {
            let account = resolve(store, op.account.as_deref()).await?;
            let queue = loans.list_pending(staff).await.into_diagnostic()?;
            // Oldest pending loan of this account's owner.
            let target = queue
                .iter()
                .find(|pending| pending.loan.borrower == account.owner)
                .ok_or_else(|| miette!("no pending loan for account {}", account.number))?;
            let action = if op.op == OpKind::Approve {
                LoanAction::Approve
            } else {
                LoanAction::Reject
            };
            loans
                .process(staff, target.loan.id, action)
                .await
                .into_diagnostic()?;
        }
    }
    Ok(())
}

fn required_amount(op: &Operation) -> Result<Decimal> {
    op.amount
        .ok_or_else(|| miette!("operation requires an amount"))
}

async fn resolve(store: &SharedStore, number: Option<&str>) -> Result<Account> {
    let number = number.ok_or_else(|| miette!("operation requires an account number"))?;
    store
        .account_by_number(&AccountNumber::from(number))
        .await
        .into_diagnostic()?
        .ok_or_else(|| miette!("no account with number {number}"))
}
