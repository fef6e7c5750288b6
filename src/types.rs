//! Core types and data structures for the billing system

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::money::Centavos;
use crate::penalty::PenaltyPolicy;

/// Obligation streams billed against a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamType {
    /// Recurring association dues
    Dues,
    /// Metered utility bills (water, electricity)
    Utility,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Dues => write!(f, "dues"),
            StreamType::Utility => write!(f, "utility"),
        }
    }
}

impl FromStr for StreamType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dues" => Ok(StreamType::Dues),
            "utility" => Ok(StreamType::Utility),
            other => Err(BillingError::Validation(format!(
                "Unknown obligation stream '{}'",
                other
            ))),
        }
    }
}

/// Billing period, ordered by year then month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

/// Unchecked wire form of [`Period`]
#[derive(Deserialize)]
struct RawPeriod {
    year: i32,
    month: u32,
}

impl TryFrom<RawPeriod> for Period {
    type Error = BillingError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        Period::new(raw.year, raw.month)
    }
}

impl Period {
    /// Create a period, rejecting months outside 1..=12
    pub fn new(year: i32, month: u32) -> BillingResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(BillingError::Validation(format!(
                "Invalid period month: {}",
                month
            )));
        }
        Ok(Self { year, month })
    }

    /// Re-check a period whose fields were set directly
    pub fn validate(&self) -> BillingResult<()> {
        Period::new(self.year, self.month).map(|_| ())
    }

    /// The period a calendar date falls in
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BillingError::Validation(format!("Invalid period '{}', expected YYYY-MM", s));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Period::new(year, month)
    }
}

/// Meter readings backing a utility bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterReading {
    pub meter_id: String,
    pub previous_reading: u64,
    pub current_reading: u64,
}

impl MeterReading {
    /// Units consumed during the billing period
    pub fn consumption(&self) -> u64 {
        self.current_reading.saturating_sub(self.previous_reading)
    }
}

/// Kind-specific data of an obligation.
///
/// The planner only ever looks at the common projection on [`Obligation`];
/// the variant payload is carried for statements and audits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationKind {
    Dues,
    Utility(MeterReading),
}

impl ObligationKind {
    pub fn stream(&self) -> StreamType {
        match self {
            ObligationKind::Dues => StreamType::Dues,
            ObligationKind::Utility(_) => StreamType::Utility,
        }
    }
}

/// Payment state of an obligation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObligationStatus {
    Unpaid,
    Partial,
    Paid,
}

impl ObligationStatus {
    /// Status as a pure function of what has been paid against what is owed
    pub fn from_amounts(paid: Centavos, owed: Centavos) -> Self {
        if paid >= owed {
            ObligationStatus::Paid
        } else if paid.is_zero() {
            ObligationStatus::Unpaid
        } else {
            ObligationStatus::Partial
        }
    }
}

/// A billable unit with its running credit balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for the unit
    pub id: String,
    /// Human-readable label (e.g. "Unit 4B")
    pub name: String,
    /// Streams currently billed to this unit
    pub active_streams: Vec<StreamType>,
    /// Unapplied funds; negative means the unit owes outside any obligation
    pub credit_balance: Centavos,
    /// Penalty terms overriding the engine default
    pub penalty_policy: Option<PenaltyPolicy>,
    /// Optimistic concurrency token, bumped on every write
    pub version: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new account billed for dues and utilities with no credit
    pub fn new(id: String, name: String) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id,
            name,
            active_streams: vec![StreamType::Dues, StreamType::Utility],
            credit_balance: Centavos::ZERO,
            penalty_policy: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_credit(mut self, credit_balance: Centavos) -> Self {
        self.credit_balance = credit_balance;
        self
    }

    pub fn with_streams(mut self, streams: Vec<StreamType>) -> Self {
        self.active_streams = streams;
        self
    }

    pub fn with_penalty_policy(mut self, policy: PenaltyPolicy) -> Self {
        self.penalty_policy = Some(policy);
        self
    }

    pub fn bills_stream(&self, stream: StreamType) -> bool {
        self.active_streams.contains(&stream)
    }
}

/// One billable charge for one account, stream and period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    pub account_id: String,
    pub kind: ObligationKind,
    pub period: Period,
    pub due_date: NaiveDate,
    /// Charge before penalties
    pub base_charge: Centavos,
    /// Penalty accrued so far
    pub penalty: Centavos,
    pub base_paid: Centavos,
    pub penalty_paid: Centavos,
    pub status: ObligationStatus,
    pub version: u64,
}

impl Obligation {
    /// Create an unpaid obligation
    pub fn new(
        id: String,
        account_id: String,
        kind: ObligationKind,
        period: Period,
        due_date: NaiveDate,
        base_charge: Centavos,
    ) -> Self {
        let mut obligation = Self {
            id,
            account_id,
            kind,
            period,
            due_date,
            base_charge,
            penalty: Centavos::ZERO,
            base_paid: Centavos::ZERO,
            penalty_paid: Centavos::ZERO,
            status: ObligationStatus::Unpaid,
            version: 1,
        };
        obligation.refresh_status();
        obligation
    }

    pub fn stream(&self) -> StreamType {
        self.kind.stream()
    }

    pub fn base_remaining(&self) -> Centavos {
        self.base_charge - self.base_paid
    }

    pub fn penalty_remaining(&self) -> Centavos {
        self.penalty - self.penalty_paid
    }

    /// Total still owed, base plus penalty
    pub fn owed_remaining(&self) -> Centavos {
        self.base_remaining() + self.penalty_remaining()
    }

    pub fn total_charge(&self) -> Centavos {
        self.base_charge + self.penalty
    }

    pub fn total_paid(&self) -> Centavos {
        self.base_paid + self.penalty_paid
    }

    pub fn refresh_status(&mut self) {
        self.status = ObligationStatus::from_amounts(self.total_paid(), self.total_charge());
    }

    /// Check the monetary invariants of this record
    pub fn check_invariants(&self) -> BillingResult<()> {
        let amounts = [
            ("base charge", self.base_charge),
            ("penalty", self.penalty),
            ("base paid", self.base_paid),
            ("penalty paid", self.penalty_paid),
        ];
        for (label, amount) in amounts {
            if amount.is_negative() {
                return Err(BillingError::InvariantViolation(format!(
                    "Obligation {} has negative {}: {}",
                    self.id, label, amount
                )));
            }
        }
        if self.base_charge.checked_add(self.penalty).is_none() {
            return Err(BillingError::InvariantViolation(format!(
                "Obligation {} total charge {} + {} is out of range",
                self.id, self.base_charge, self.penalty
            )));
        }
        if self.base_paid > self.base_charge || self.penalty_paid > self.penalty {
            return Err(BillingError::InvariantViolation(format!(
                "Obligation {} is overpaid: paid {} + {} against {} + {}",
                self.id, self.base_paid, self.penalty_paid, self.base_charge, self.penalty
            )));
        }
        let expected = ObligationStatus::from_amounts(self.total_paid(), self.total_charge());
        if self.status != expected {
            return Err(BillingError::InvariantViolation(format!(
                "Obligation {} has status {:?} but amounts imply {:?}",
                self.id, self.status, expected
            )));
        }
        Ok(())
    }

    /// Monetary state and version token
    pub fn snapshot(&self) -> ObligationSnapshot {
        ObligationSnapshot {
            obligation_id: self.id.clone(),
            penalty: self.penalty,
            base_paid: self.base_paid,
            penalty_paid: self.penalty_paid,
            status: self.status,
            version: self.version,
        }
    }

    pub fn matches_snapshot(&self, snapshot: &ObligationSnapshot) -> bool {
        self.snapshot() == *snapshot
    }
}

/// Mutable fields of an obligation captured at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationSnapshot {
    pub obligation_id: String,
    pub penalty: Centavos,
    pub base_paid: Centavos,
    pub penalty_paid: Centavos,
    pub status: ObligationStatus,
    pub version: u64,
}

/// Restricts a payment to one period and/or one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub period: Option<Period>,
    pub stream: Option<StreamType>,
}

impl ScopeFilter {
    pub fn period(period: Period) -> Self {
        Self {
            period: Some(period),
            stream: None,
        }
    }

    pub fn stream(stream: StreamType) -> Self {
        Self {
            period: None,
            stream: Some(stream),
        }
    }

    /// A filter must restrict something, and its period must be a real month
    pub fn validate(&self) -> BillingResult<()> {
        if self.period.is_none() && self.stream.is_none() {
            return Err(BillingError::Validation(
                "Scope filter must restrict a period or a stream".to_string(),
            ));
        }
        if let Some(period) = &self.period {
            period.validate()?;
        }
        Ok(())
    }

    pub fn matches(&self, obligation: &Obligation) -> bool {
        self.period.is_none_or(|p| obligation.period == p)
            && self.stream.is_none_or(|s| obligation.stream() == s)
    }
}

/// One inbound payment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub account_id: String,
    pub amount: Centavos,
    pub date: NaiveDate,
    pub scope: Option<ScopeFilter>,
    /// Caller-supplied reference used to make commits idempotent
    pub idempotency_key: Option<String>,
}

impl PaymentRequest {
    pub fn new(account_id: String, amount: Centavos, date: NaiveDate) -> Self {
        Self {
            account_id,
            amount,
            date,
            scope: None,
            idempotency_key: None,
        }
    }

    pub fn with_scope(mut self, scope: ScopeFilter) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_idempotency_key(mut self, key: String) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// One line item of a distribution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub obligation_id: String,
    pub stream: StreamType,
    pub period: Period,
    pub base_amount: Centavos,
    pub penalty_amount: Centavos,
    /// Obligation penalty after recomputation as of the payment date
    pub penalty_assessed: Centavos,
    pub resulting_status: ObligationStatus,
}

impl Allocation {
    pub fn total(&self) -> Centavos {
        self.base_amount + self.penalty_amount
    }
}

/// Why the credit balance moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditEntryKind {
    Payment,
    Reversal,
}

/// A credit-balance change, paired 1:1 with a payment or its reversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub id: String,
    pub account_id: String,
    pub transaction_id: String,
    pub kind: CreditEntryKind,
    /// Signed change applied to the balance
    pub amount: Centavos,
    pub balance_after: Centavos,
    pub recorded_at: NaiveDateTime,
}

/// Durable record binding a payment to its allocations; the unit of reversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub account_id: String,
    pub idempotency_key: Option<String>,
    pub payment_amount: Centavos,
    pub payment_date: NaiveDate,
    pub scope: Option<ScopeFilter>,
    pub allocations: Vec<Allocation>,
    pub net_credit_delta: Centavos,
    pub resulting_credit_balance: Centavos,
    /// Monetary state of each touched obligation before the commit
    pub obligations_before: Vec<ObligationSnapshot>,
    /// Version of each touched obligation written by the commit
    pub obligation_versions: BTreeMap<String, u64>,
    pub created_at: NaiveDateTime,
}

impl TransactionRecord {
    pub fn allocated_total(&self) -> Centavos {
        self.allocations.iter().map(Allocation::total).sum()
    }

    /// True if `request` describes the same payment this record was made from
    pub fn same_payment_as(&self, request: &PaymentRequest) -> bool {
        self.account_id == request.account_id
            && self.payment_amount == request.amount
            && self.payment_date == request.date
            && self.scope == request.scope
    }
}

/// Errors that can occur in the billing system
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Obligation not found: {0}")]
    ObligationNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Conflict on {entity}: expected version {expected}, found {found} (retryable)")]
    Conflict {
        entity: String,
        expected: u64,
        found: u64,
    },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Only concurrent-modification conflicts are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BillingError::AccountNotFound(_)
                | BillingError::ObligationNotFound(_)
                | BillingError::TransactionNotFound(_)
        )
    }
}

/// Result type for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn dues(base: i64) -> Obligation {
        Obligation::new(
            "ob1".to_string(),
            "unit-1".to_string(),
            ObligationKind::Dues,
            Period::new(2024, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            Centavos::new(base),
        )
    }

    #[test]
    fn test_period_parse_and_order() {
        let march: Period = "2024-03".parse().unwrap();
        let december: Period = "2023-12".parse().unwrap();
        assert!(december < march);
        assert_eq!(march.to_string(), "2024-03");
        assert!("2024-13".parse::<Period>().is_err());
        assert!("2024/03".parse::<Period>().is_err());
        assert!("24-03".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_deserialization_rejects_invalid_month() {
        let period: Period = serde_json::from_str(r#"{"year":2024,"month":3}"#).unwrap();
        assert_eq!(period, Period::new(2024, 3).unwrap());

        assert!(serde_json::from_str::<Period>(r#"{"year":2024,"month":13}"#).is_err());
        assert!(serde_json::from_str::<ScopeFilter>(r#"{"period":{"year":2024,"month":0}}"#).is_err());
    }

    #[test]
    fn test_scope_filter_validation() {
        assert!(ScopeFilter::stream(StreamType::Dues).validate().is_ok());
        let empty = ScopeFilter {
            period: None,
            stream: None,
        };
        assert!(matches!(empty.validate(), Err(BillingError::Validation(_))));
        let bad_month = ScopeFilter {
            period: Some(Period {
                year: 2024,
                month: 13,
            }),
            stream: Some(StreamType::Dues),
        };
        assert!(matches!(bad_month.validate(), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_status_follows_amounts() {
        let mut obligation = dues(95_000);
        assert_eq!(obligation.status, ObligationStatus::Unpaid);

        obligation.base_paid = Centavos::new(10_000);
        obligation.refresh_status();
        assert_eq!(obligation.status, ObligationStatus::Partial);

        obligation.base_paid = Centavos::new(95_000);
        obligation.refresh_status();
        assert_eq!(obligation.status, ObligationStatus::Paid);
        assert!(obligation.check_invariants().is_ok());
    }

    #[test]
    fn test_zero_charge_is_paid() {
        let obligation = dues(0);
        assert_eq!(obligation.status, ObligationStatus::Paid);
        assert_eq!(obligation.owed_remaining(), Centavos::ZERO);
    }

    #[test]
    fn test_overpaid_obligation_violates_invariants() {
        let mut obligation = dues(95_000);
        obligation.base_paid = Centavos::new(95_001);
        obligation.refresh_status();
        assert!(matches!(
            obligation.check_invariants(),
            Err(BillingError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_scope_filter_matching() {
        let obligation = dues(95_000);
        assert!(ScopeFilter::stream(StreamType::Dues).matches(&obligation));
        assert!(!ScopeFilter::stream(StreamType::Utility).matches(&obligation));
        assert!(ScopeFilter::period(Period::new(2024, 3).unwrap()).matches(&obligation));
        assert!(!ScopeFilter::period(Period::new(2024, 4).unwrap()).matches(&obligation));
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = BillingError::Conflict {
            entity: "account unit-1".to_string(),
            expected: 1,
            found: 2,
        };
        assert!(conflict.is_retryable());
        assert!(!BillingError::Validation("bad".to_string()).is_retryable());
        assert!(BillingError::TransactionNotFound("t".to_string()).is_not_found());
    }
}
