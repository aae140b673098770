use super::account::UserId;
use super::money::{Amount, MONEY_SCALE};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Date, OffsetDateTime};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LoanId(pub u64);

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loan lifecycle. A loan leaves `Pending` at most once; `Approved` and
/// `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanType {
    Personal,
    Home,
    Auto,
    Education,
}

/// Requested repayment term: either an explicit number of months or a due
/// date, which is converted to whole months remaining (minimum one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanTerm {
    Months(u32),
    DueDate(Date),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: UserId,
    pub loan_type: LoanType,
    pub principal: Amount,
    /// Annual rate in percent, in (0, 100].
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub due_date: Option<Date>,
    pub monthly_payment: Decimal,
    pub status: LoanStatus,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Fixed amortized payment: `P * r * (1+r)^n / ((1+r)^n - 1)` with
/// `r = rate / 100 / 12`. Computed entirely in decimal arithmetic and
/// rounded to cents, midpoint away from zero.
pub fn monthly_payment(principal: Decimal, annual_rate_percent: Decimal, months: u32) -> Decimal {
    let rate = annual_rate_percent / Decimal::from(1200);
    let payment = if rate.is_zero() {
        principal / Decimal::from(months)
    } else {
        let mut growth = Decimal::ONE;
        for _ in 0..months {
            growth *= Decimal::ONE + rate;
        }
        principal * rate * growth / (growth - Decimal::ONE)
    };
    payment.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Whole months from `from` until `to`, clamped to at least one. A partial
/// trailing month (day-of-month not yet reached) does not count.
pub fn months_until(from: Date, to: Date) -> u32 {
    let mut months = (to.year() - from.year()) * 12
        + i32::from(u8::from(to.month()))
        - i32::from(u8::from(from.month()));
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(1) as u32
}
