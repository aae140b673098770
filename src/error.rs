use thiserror::Error;

pub type Result<T> = std::result::Result<T, BankError>;

/// Failure taxonomy for the transactional core.
///
/// Validation failures are detected before any mutation and never leave
/// partial state behind. `StoreUnavailable` covers transient infrastructure
/// failures; callers may retry those, the engine itself never does.
#[derive(Error, Debug)]
pub enum BankError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("account not found")]
    AccountNotFound,
    #[error("recipient account not found")]
    RecipientNotFound,
    #[error("cannot transfer to the same account")]
    InvalidRecipient,
    #[error("loan not found")]
    LoanNotFound,
    #[error("loan has already been processed")]
    AlreadyProcessed,
    #[error("operation requires the staff role")]
    Forbidden,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BankError {
    /// Stable machine-readable kind, independent of the display message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InsufficientFunds => "insufficient_funds",
            Self::AccountNotFound => "account_not_found",
            Self::RecipientNotFound => "recipient_not_found",
            Self::InvalidRecipient => "invalid_recipient",
            Self::LoanNotFound => "loan_not_found",
            Self::AlreadyProcessed => "already_processed",
            Self::Forbidden => "forbidden",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Csv(_) => "csv",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for BankError {
    fn from(err: rocksdb::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<serde_json::Error> for BankError {
    fn from(err: serde_json::Error) -> Self {
        Self::StoreUnavailable(format!("codec error: {err}"))
    }
}
