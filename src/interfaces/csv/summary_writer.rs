use crate::domain::account::Account;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct SummaryRow<'a> {
    account: &'a str,
    owner: &'a str,
    balance: String,
}

/// Writes final account summaries as CSV: `account,owner,balance`.
pub struct SummaryWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SummaryWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts<'a, I>(&mut self, accounts: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a Account, &'a str)>,
    {
        for (account, owner) in accounts {
            self.writer.serialize(SummaryRow {
                account: account.number.as_str(),
                owner,
                balance: account.balance.to_string(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{AccountId, AccountNumber, AccountType, UserId};
    use crate::domain::money::Balance;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    #[test]
    fn writes_header_and_rows() {
        let account = Account {
            id: AccountId(1),
            owner: UserId(1),
            number: AccountNumber::from_sequence(1),
            account_type: AccountType::Savings,
            balance: Balance::new(dec!(750.00)),
            created_at: datetime!(2025-01-01 00:00:00 UTC),
        };
        let mut out = Vec::new();
        SummaryWriter::new(&mut out)
            .write_accounts([(&account, "Asha")])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("account,owner,balance"));
        assert!(text.contains("SV00000001,Asha,750.00"));
    }
}
