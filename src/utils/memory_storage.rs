//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct Tables {
    charges: HashMap<String, Charge>,
    obligors: HashMap<String, Obligor>,
    locations: HashMap<String, Location>,
    payments: HashMap<String, PaymentRecord>,
    matches: HashMap<String, Match>,
    attempts: Vec<AttemptLog>,
    uploads: HashMap<String, (TableRef, Vec<Cell>)>,
}

impl Tables {
    fn context_for(&self, charge: &Charge) -> ChargeContext {
        ChargeContext {
            charge: charge.clone(),
            obligor: self.obligors.get(&charge.obligor_reference).cloned(),
            location: self.locations.get(&charge.location_reference).cloned(),
        }
    }

    fn check_versions(
        &self,
        charge_id: &str,
        expected_charge_version: u64,
        payment_id: &str,
        expected_payment_version: u64,
    ) -> ReconResult<()> {
        let charge = self
            .charges
            .get(charge_id)
            .ok_or_else(|| ReconError::ChargeNotFound(charge_id.to_string()))?;
        if charge.version != expected_charge_version {
            return Err(ReconError::Conflict(format!(
                "charge {charge_id} is at version {}, expected {expected_charge_version}",
                charge.version
            )));
        }

        let payment = self
            .payments
            .get(payment_id)
            .ok_or_else(|| ReconError::PaymentNotFound(payment_id.to_string()))?;
        if payment.version != expected_payment_version {
            return Err(ReconError::Conflict(format!(
                "payment {payment_id} is at version {}, expected {expected_payment_version}",
                payment.version
            )));
        }
        Ok(())
    }
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same tables, so a clone handed to a component sees every
/// write made through another clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> ReconResult<()> {
        *self.write()? = Tables::default();
        Ok(())
    }

    fn read(&self) -> ReconResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| ReconError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> ReconResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| ReconError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObligationRepository for MemoryStorage {
    async fn save_charge(&mut self, charge: &Charge) -> ReconResult<()> {
        self.write()?
            .charges
            .insert(charge.id.clone(), charge.clone());
        Ok(())
    }

    async fn get_charge(&self, charge_id: &str) -> ReconResult<Option<Charge>> {
        Ok(self.read()?.charges.get(charge_id).cloned())
    }

    async fn get_charge_context(&self, charge_id: &str) -> ReconResult<Option<ChargeContext>> {
        let tables = self.read()?;
        Ok(tables
            .charges
            .get(charge_id)
            .map(|charge| tables.context_for(charge)))
    }

    async fn list_open_charges(&self, scope: &ChargeScope) -> ReconResult<Vec<ChargeContext>> {
        let tables = self.read()?;
        let mut open: Vec<ChargeContext> = tables
            .charges
            .values()
            .filter(|c| c.status.accepts_payments() && !c.is_settled() && scope.contains(c))
            .map(|c| tables.context_for(c))
            .collect();
        open.sort_by(|a, b| {
            a.charge
                .due_on
                .cmp(&b.charge.due_on)
                .then_with(|| a.charge.id.cmp(&b.charge.id))
        });
        Ok(open)
    }

    async fn save_obligor(&mut self, obligor: &Obligor) -> ReconResult<()> {
        self.write()?
            .obligors
            .insert(obligor.reference.clone(), obligor.clone());
        Ok(())
    }

    async fn save_location(&mut self, location: &Location) -> ReconResult<()> {
        self.write()?
            .locations
            .insert(location.reference.clone(), location.clone());
        Ok(())
    }

    async fn update_charge_status(
        &mut self,
        charge_id: &str,
        status: ChargeStatus,
        expected_version: u64,
    ) -> ReconResult<Charge> {
        let mut tables = self.write()?;
        let charge = tables
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| ReconError::ChargeNotFound(charge_id.to_string()))?;
        if charge.version != expected_version {
            return Err(ReconError::Conflict(format!(
                "charge {charge_id} is at version {}, expected {expected_version}",
                charge.version
            )));
        }

        charge.status = status;
        charge.version += 1;
        charge.updated_at = chrono::Utc::now().naive_utc();
        Ok(charge.clone())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStorage {
    async fn save_payment(&mut self, payment: &PaymentRecord) -> ReconResult<()> {
        self.write()?
            .payments
            .insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn get_payment(&self, payment_id: &str) -> ReconResult<Option<PaymentRecord>> {
        Ok(self.read()?.payments.get(payment_id).cloned())
    }

    async fn find_by_external_id(
        &self,
        source_type: SourceType,
        external_id: &str,
    ) -> ReconResult<Option<PaymentRecord>> {
        Ok(self
            .read()?
            .payments
            .values()
            .find(|p| p.source_type == source_type && p.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list_unallocated_payments(
        &self,
        source_type: Option<SourceType>,
    ) -> ReconResult<Vec<PaymentRecord>> {
        let tables = self.read()?;
        let mut payments: Vec<PaymentRecord> = tables
            .payments
            .values()
            .filter(|p| p.is_inbound() && !p.is_fully_allocated())
            .filter(|p| source_type.is_none_or(|s| p.source_type == s))
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.occurred_on
                .cmp(&b.occurred_on)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(payments)
    }
}

#[async_trait]
impl AttemptLogStore for MemoryStorage {
    async fn append_attempt(&mut self, attempt: &AttemptLog) -> ReconResult<()> {
        self.write()?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, payment_id: Option<&str>) -> ReconResult<Vec<AttemptLog>> {
        Ok(self
            .read()?
            .attempts
            .iter()
            .filter(|a| payment_id.is_none_or(|id| a.payment_id == id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TabularStore for MemoryStorage {
    async fn replace_upload(&mut self, table: &TableRef, cells: Vec<Cell>) -> ReconResult<()> {
        self.write()?
            .uploads
            .insert(table.upload_id.clone(), (table.clone(), cells));
        Ok(())
    }

    async fn get_upload(&self, upload_id: &str) -> ReconResult<Option<TableRef>> {
        Ok(self
            .read()?
            .uploads
            .get(upload_id)
            .map(|(table, _)| table.clone()))
    }

    async fn load_cells(
        &self,
        upload_id: &str,
        max_rows: Option<usize>,
    ) -> ReconResult<Vec<Cell>> {
        let tables = self.read()?;
        let (_, cells) = tables
            .uploads
            .get(upload_id)
            .ok_or_else(|| ReconError::UploadNotFound(upload_id.to_string()))?;
        Ok(cells
            .iter()
            .filter(|c| max_rows.is_none_or(|max| c.row_index < max))
            .cloned()
            .collect())
    }

    async fn drop_upload(&mut self, upload_id: &str) -> ReconResult<bool> {
        Ok(self.write()?.uploads.remove(upload_id).is_some())
    }
}

#[async_trait]
impl ReconciliationStorage for MemoryStorage {
    async fn commit_allocation(&mut self, commit: &AllocationCommit) -> ReconResult<()> {
        let mut tables = self.write()?;
        tables.check_versions(
            &commit.charge.id,
            commit.expected_charge_version,
            &commit.payment.id,
            commit.expected_payment_version,
        )?;
        if tables.matches.contains_key(&commit.match_record.id) {
            return Err(ReconError::Validation(format!(
                "match {} already exists",
                commit.match_record.id
            )));
        }

        tables
            .matches
            .insert(commit.match_record.id.clone(), commit.match_record.clone());
        tables
            .charges
            .insert(commit.charge.id.clone(), commit.charge.clone());
        tables
            .payments
            .insert(commit.payment.id.clone(), commit.payment.clone());
        Ok(())
    }

    async fn commit_reversal(&mut self, commit: &ReversalCommit) -> ReconResult<()> {
        let mut tables = self.write()?;
        if !tables.matches.contains_key(&commit.match_id) {
            return Err(ReconError::MatchNotFound(commit.match_id.clone()));
        }
        tables.check_versions(
            &commit.charge.id,
            commit.expected_charge_version,
            &commit.payment.id,
            commit.expected_payment_version,
        )?;

        tables.matches.remove(&commit.match_id);
        tables
            .charges
            .insert(commit.charge.id.clone(), commit.charge.clone());
        tables
            .payments
            .insert(commit.payment.id.clone(), commit.payment.clone());
        Ok(())
    }

    async fn get_match(&self, match_id: &str) -> ReconResult<Option<Match>> {
        Ok(self.read()?.matches.get(match_id).cloned())
    }

    async fn list_matches_for_charge(&self, charge_id: &str) -> ReconResult<Vec<Match>> {
        let mut matches: Vec<Match> = self
            .read()?
            .matches
            .values()
            .filter(|m| m.charge_id == charge_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matches)
    }

    async fn list_matches_for_payment(&self, payment_id: &str) -> ReconResult<Vec<Match>> {
        let mut matches: Vec<Match> = self
            .read()?
            .matches
            .values()
            .filter(|m| m.payment_id == payment_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matches)
    }
}
