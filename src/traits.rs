//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Read and write access to charges and their scoring context
///
/// The reconciliation engine never creates or deletes charges; it only reads
/// the open ones and updates balances through [`ReconciliationStorage`]
/// commits. `save_*` methods exist so that tests and hosts can seed data.
#[async_trait]
pub trait ObligationRepository: Send + Sync {
    /// Save or replace a charge
    async fn save_charge(&mut self, charge: &Charge) -> ReconResult<()>;

    /// Get a charge by ID
    async fn get_charge(&self, charge_id: &str) -> ReconResult<Option<Charge>>;

    /// Get a charge with its obligor and location context
    async fn get_charge_context(&self, charge_id: &str) -> ReconResult<Option<ChargeContext>>;

    /// List all charges in scope that can still receive allocations
    async fn list_open_charges(&self, scope: &ChargeScope) -> ReconResult<Vec<ChargeContext>>;

    /// Save or replace an obligor
    async fn save_obligor(&mut self, obligor: &Obligor) -> ReconResult<()>;

    /// Save or replace a location
    async fn save_location(&mut self, location: &Location) -> ReconResult<()>;

    /// Change a charge's status if its version still matches
    async fn update_charge_status(
        &mut self,
        charge_id: &str,
        status: ChargeStatus,
        expected_version: u64,
    ) -> ReconResult<Charge>;
}

/// Storage for canonical payment records
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a new payment
    async fn save_payment(&mut self, payment: &PaymentRecord) -> ReconResult<()>;

    /// Get a payment by ID
    async fn get_payment(&self, payment_id: &str) -> ReconResult<Option<PaymentRecord>>;

    /// Look up a payment by its identifier in the originating system
    async fn find_by_external_id(
        &self,
        source_type: SourceType,
        external_id: &str,
    ) -> ReconResult<Option<PaymentRecord>>;

    /// List inbound payments with an unallocated remainder
    async fn list_unallocated_payments(
        &self,
        source_type: Option<SourceType>,
    ) -> ReconResult<Vec<PaymentRecord>>;
}

/// Append-only audit trail of resolution attempts
#[async_trait]
pub trait AttemptLogStore: Send + Sync {
    /// Append one attempt row
    async fn append_attempt(&mut self, attempt: &AttemptLog) -> ReconResult<()>;

    /// List attempts, optionally for one payment, oldest first
    async fn list_attempts(&self, payment_id: Option<&str>) -> ReconResult<Vec<AttemptLog>>;
}

/// Wide cell store for uploads with unknown column layout
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Store an upload, replacing any earlier upload with the same id
    async fn replace_upload(&mut self, table: &TableRef, cells: Vec<Cell>) -> ReconResult<()>;

    /// Get the table handle of an upload
    async fn get_upload(&self, upload_id: &str) -> ReconResult<Option<TableRef>>;

    /// Load cells of the first `max_rows` rows (all rows when `None`)
    async fn load_cells(&self, upload_id: &str, max_rows: Option<usize>)
        -> ReconResult<Vec<Cell>>;

    /// Remove an upload; returns whether anything was removed
    async fn drop_upload(&mut self, upload_id: &str) -> ReconResult<bool>;
}

/// Everything one allocation changes, committed atomically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCommit {
    pub match_record: Match,
    /// Charge state after the allocation
    pub charge: Charge,
    pub expected_charge_version: u64,
    /// Payment state after the allocation
    pub payment: PaymentRecord,
    pub expected_payment_version: u64,
}

/// Everything one reversal changes, committed atomically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalCommit {
    pub match_id: String,
    /// Charge state after the reversal
    pub charge: Charge,
    pub expected_charge_version: u64,
    /// Payment state after the reversal
    pub payment: PaymentRecord,
    pub expected_payment_version: u64,
}

/// Storage abstraction for the reconciliation engine
///
/// This trait allows the engine to work with any storage backend
/// (PostgreSQL, SQLite, in-memory, etc.). Commits must be atomic and must
/// fail with [`ReconError::Conflict`] when a stored version differs from the
/// expected one.
#[async_trait]
pub trait ReconciliationStorage:
    ObligationRepository + PaymentRepository + AttemptLogStore + TabularStore
{
    /// Persist a match together with the updated charge and payment
    async fn commit_allocation(&mut self, commit: &AllocationCommit) -> ReconResult<()>;

    /// Delete a match and persist the restored charge and payment
    async fn commit_reversal(&mut self, commit: &ReversalCommit) -> ReconResult<()>;

    /// Get a match by ID
    async fn get_match(&self, match_id: &str) -> ReconResult<Option<Match>>;

    /// List live matches of a charge
    async fn list_matches_for_charge(&self, charge_id: &str) -> ReconResult<Vec<Match>>;

    /// List live matches of a payment
    async fn list_matches_for_payment(&self, payment_id: &str) -> ReconResult<Vec<Match>>;
}

/// Trait for implementing custom payment validation rules
pub trait PaymentValidator: Send + Sync {
    /// Validate a normalized payment before it is stored
    fn validate_payment(&self, payment: &PaymentRecord) -> ReconResult<()>;
}

/// Default payment validator with basic rules
pub struct DefaultPaymentValidator;

impl PaymentValidator for DefaultPaymentValidator {
    fn validate_payment(&self, payment: &PaymentRecord) -> ReconResult<()> {
        if payment.id.trim().is_empty() {
            return Err(ReconError::Validation(
                "Payment ID cannot be empty".to_string(),
            ));
        }

        if payment
            .external_id
            .as_ref()
            .is_some_and(|e| e.trim().is_empty())
        {
            return Err(ReconError::Validation(
                "External ID cannot be blank".to_string(),
            ));
        }

        Ok(())
    }
}
