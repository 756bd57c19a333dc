//! Core types and data structures for payment reconciliation

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a payment record entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Row of an uploaded bank statement or spreadsheet
    FileImport,
    /// Manually entered cash book / ledger row
    LedgerEntry,
    /// Transaction pulled from an external bank synchronization
    SyncedTransaction,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::FileImport => "file_import",
            SourceType::LedgerEntry => "ledger_entry",
            SourceType::SyncedTransaction => "synced_transaction",
        }
    }

    pub fn all() -> [SourceType; 3] {
        [
            SourceType::FileImport,
            SourceType::LedgerEntry,
            SourceType::SyncedTransaction,
        ]
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical representation of one money movement, whatever its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Unique identifier for the payment
    pub id: String,
    /// Signed amount; positive values are inbound
    pub amount: BigDecimal,
    /// Booking or value date
    pub occurred_on: NaiveDate,
    /// Normalized IBAN of the paying party
    pub counterpart_iban: Option<String>,
    /// Name of the paying party as it appeared in the source
    pub counterpart_name: Option<String>,
    /// Free-text memo / remittance information
    pub purpose: Option<String>,
    pub source_type: SourceType,
    /// Identifier in the originating system, used for dedupe
    pub external_id: Option<String>,
    /// Obligor reference the payment was explicitly attributed to
    #[serde(default)]
    pub obligor_hint: Option<String>,
    /// Sum of all live allocations of this payment
    pub allocated_amount: BigDecimal,
    /// Optimistic concurrency counter, bumped on every committed change
    pub version: u64,
    pub created_at: NaiveDateTime,
}

impl PaymentRecord {
    /// Create a new unallocated payment with a generated id
    pub fn new(amount: BigDecimal, occurred_on: NaiveDate, source_type: SourceType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            amount,
            occurred_on,
            counterpart_iban: None,
            counterpart_name: None,
            purpose: None,
            source_type,
            external_id: None,
            obligor_hint: None,
            allocated_amount: BigDecimal::zero(),
            version: 0,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_counterpart_iban(mut self, iban: impl Into<String>) -> Self {
        self.counterpart_iban = Some(iban.into());
        self
    }

    pub fn with_counterpart_name(mut self, name: impl Into<String>) -> Self {
        self.counterpart_name = Some(name.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_obligor_hint(mut self, reference: impl Into<String>) -> Self {
        self.obligor_hint = Some(reference.into());
        self
    }

    /// Only inbound payments can settle charges
    pub fn is_inbound(&self) -> bool {
        self.amount > BigDecimal::zero()
    }

    /// Portion of the payment not yet bound to any charge
    pub fn unallocated(&self) -> BigDecimal {
        let rest = &self.amount - &self.allocated_amount;
        if rest < BigDecimal::zero() {
            BigDecimal::zero()
        } else {
            rest
        }
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.allocated_amount >= self.amount
    }
}

/// Lifecycle of a charge
///
/// `Overdue` is a time-derived overlay of `Open` / `PartiallyPaid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Open,
    PartiallyPaid,
    Paid,
    Overdue,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Open => "OPEN",
            ChargeStatus::PartiallyPaid => "PARTIALLY_PAID",
            ChargeStatus::Paid => "PAID",
            ChargeStatus::Overdue => "OVERDUE",
        }
    }

    /// Whether the charge can still receive allocations
    pub fn accepts_payments(&self) -> bool {
        !matches!(self, ChargeStatus::Paid)
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A billing obligation owed by an obligor for a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    /// Unique identifier for the charge
    pub id: String,
    /// Property owner the charge belongs to
    pub owner_id: String,
    /// Reference to the obligor (tenant) who owes the charge
    pub obligor_reference: String,
    /// Reference to the leased unit
    pub location_reference: String,
    /// Amount billed; never altered by reconciliation
    pub amount_due: BigDecimal,
    /// Sum of all live allocations against this charge
    pub amount_paid: BigDecimal,
    pub due_on: NaiveDate,
    pub status: ChargeStatus,
    pub description: Option<String>,
    /// Optimistic concurrency counter, bumped on every committed change
    pub version: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Charge {
    /// Create a new open charge
    pub fn new(
        id: String,
        owner_id: String,
        obligor_reference: String,
        location_reference: String,
        amount_due: BigDecimal,
        due_on: NaiveDate,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id,
            owner_id,
            obligor_reference,
            location_reference,
            amount_due,
            amount_paid: BigDecimal::zero(),
            due_on,
            status: ChargeStatus::Open,
            description: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Outstanding balance, never negative
    pub fn remaining(&self) -> BigDecimal {
        let rest = &self.amount_due - &self.amount_paid;
        if rest < BigDecimal::zero() {
            BigDecimal::zero()
        } else {
            rest
        }
    }

    pub fn is_settled(&self) -> bool {
        self.amount_paid >= self.amount_due
    }

    /// Past due and not yet settled as of the given date
    pub fn is_past_due(&self, as_of: NaiveDate) -> bool {
        self.due_on < as_of && !self.is_settled()
    }
}

/// Person responsible for a charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligor {
    pub reference: String,
    pub first_name: String,
    pub last_name: String,
    pub iban: Option<String>,
}

impl Obligor {
    pub fn new(reference: String, first_name: String, last_name: String) -> Self {
        Self {
            reference,
            first_name,
            last_name,
            iban: None,
        }
    }

    pub fn with_iban(mut self, iban: impl Into<String>) -> Self {
        self.iban = Some(iban.into());
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Leased unit a charge relates to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub reference: String,
    pub label: String,
}

impl Location {
    pub fn new(reference: String, label: String) -> Self {
        Self { reference, label }
    }
}

/// A charge together with the read-only context needed to score it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeContext {
    pub charge: Charge,
    pub obligor: Option<Obligor>,
    pub location: Option<Location>,
}

/// Filter for the set of charges a batch reconciles against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeScope {
    pub owner_id: Option<String>,
    pub obligor_reference: Option<String>,
    /// Inclusive lower bound on the due date
    pub period_from: Option<NaiveDate>,
    /// Inclusive upper bound on the due date
    pub period_to: Option<NaiveDate>,
}

impl ChargeScope {
    /// Scope covering every charge
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn contains(&self, charge: &Charge) -> bool {
        self.owner_id.as_ref().is_none_or(|o| &charge.owner_id == o)
            && self
                .obligor_reference
                .as_ref()
                .is_none_or(|r| &charge.obligor_reference == r)
            && self.period_from.is_none_or(|from| charge.due_on >= from)
            && self.period_to.is_none_or(|to| charge.due_on <= to)
    }
}

/// Binding of (part of) a payment to a charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub payment_id: String,
    pub charge_id: String,
    /// Portion of the payment applied to the charge, always positive
    pub allocated_amount: BigDecimal,
    pub is_automatic: bool,
    /// Human-readable rationale: score, confidence and warnings
    pub note: String,
    /// Charge status before this match was applied
    pub prior_charge_status: ChargeStatus,
    pub created_at: NaiveDateTime,
}

/// Classification of one resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Matched,
    NoMatch,
    Ambiguous,
    Skipped,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Matched => "matched",
            AttemptOutcome::NoMatch => "no_match",
            AttemptOutcome::Ambiguous => "ambiguous",
            AttemptOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-signal contribution to a match score, in points
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub identity: f64,
    pub name: f64,
    pub amount: f64,
    pub date: f64,
    pub purpose: f64,
    pub combination_bonus: f64,
}

impl SignalBreakdown {
    /// Raw sum of all contributions before clamping
    pub fn total(&self) -> f64 {
        self.identity + self.name + self.amount + self.date + self.purpose + self.combination_bonus
    }
}

/// Append-only audit row describing how a payment was resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptLog {
    pub id: String,
    pub payment_id: String,
    pub charge_id: Option<String>,
    pub outcome: AttemptOutcome,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub signals: SignalBreakdown,
    /// Highest scoring charge when the outcome is ambiguous
    pub best_charge_id: Option<String>,
    pub note: String,
    pub created_at: NaiveDateTime,
}

/// Original header of an uploaded file and the column it is stored under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub header: String,
    pub column: String,
}

/// Handle to an uploaded table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    /// Logical table name derived from the upload id
    pub table_name: String,
    pub upload_id: String,
    /// Column mappings in original header order
    pub columns: Vec<ColumnMapping>,
    pub row_count: usize,
}

impl TableRef {
    /// Sanitized column for an original header, if present
    pub fn column_for(&self, header: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|m| m.header == header)
            .map(|m| m.column.as_str())
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|m| m.header.clone()).collect()
    }
}

/// One stored cell of an uploaded table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub upload_id: String,
    pub row_index: usize,
    pub column: String,
    pub value: String,
}

/// Errors that can occur during reconciliation
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Parse error in row {row}: {message}")]
    Parse { row: usize, message: String },
    #[error("Over-allocation rejected: {0}")]
    OverAllocationRejected(String),
    #[error("Failed to apply match: {0}")]
    ApplyFailure(String),
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("Charge not found: {0}")]
    ChargeNotFound(String),
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),
    #[error("Match not found: {0}")]
    MatchNotFound(String),
    #[error("Upload not found: {0}")]
    UploadNotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReconError {
    /// Errors that must abort a running batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconError::Storage(_))
    }
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;

/// Render an amount with two decimals, e.g. `300.00`
pub fn format_amount(amount: &BigDecimal) -> String {
    amount.with_scale_round(2, RoundingMode::HalfUp).to_string()
}
