//! Atomic application and reversal of matches

use bigdecimal::{BigDecimal, Zero};
use tracing::{debug, info};

use crate::config::AllocationPolicy;
use crate::reconciliation::allocation;
use crate::scoring::AmountBands;
use crate::traits::*;
use crate::types::*;

/// Match applier for creating and reversing allocations
pub struct MatchApplier<S: ReconciliationStorage> {
    storage: S,
    amounts: AmountBands,
    policy: AllocationPolicy,
}

impl<S: ReconciliationStorage> MatchApplier<S> {
    /// Create a new match applier
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            amounts: AmountBands::default(),
            policy: AllocationPolicy::default(),
        }
    }

    /// Create a new match applier with custom tolerance rules
    pub fn with_policy(storage: S, amounts: AmountBands, policy: AllocationPolicy) -> Self {
        Self {
            storage,
            amounts,
            policy,
        }
    }

    /// Allocate part of a payment to a charge and commit everything atomically
    ///
    /// Automatic matches never exceed the remaining balance. Manual matches
    /// may use the tolerated overpayment margin when the policy allows it.
    pub async fn apply(
        &mut self,
        payment: &PaymentRecord,
        charge: &Charge,
        amount: &BigDecimal,
        is_automatic: bool,
        note: String,
    ) -> ReconResult<AllocationCommit> {
        let margin = if !is_automatic && self.policy.allow_manual_overpayment {
            self.amounts.overpayment_margin(&charge.remaining())
        } else {
            BigDecimal::zero()
        };

        let commit = allocation::allocate(payment, charge, amount, is_automatic, note, &margin)?;
        self.storage.commit_allocation(&commit).await?;

        info!(
            match_id = %commit.match_record.id,
            payment_id = %payment.id,
            charge_id = %charge.id,
            amount = %format_amount(amount),
            status = %commit.charge.status,
            automatic = is_automatic,
            "match applied"
        );
        Ok(commit)
    }

    /// Reverse a single match, restoring charge and payment totals
    pub async fn reverse(&mut self, match_id: &str) -> ReconResult<ReversalCommit> {
        let match_record = self
            .storage
            .get_match(match_id)
            .await?
            .ok_or_else(|| ReconError::MatchNotFound(match_id.to_string()))?;
        let payment = self
            .storage
            .get_payment(&match_record.payment_id)
            .await?
            .ok_or_else(|| ReconError::PaymentNotFound(match_record.payment_id.clone()))?;
        let charge = self
            .storage
            .get_charge(&match_record.charge_id)
            .await?
            .ok_or_else(|| ReconError::ChargeNotFound(match_record.charge_id.clone()))?;

        let commit = allocation::reverse(&match_record, &payment, &charge)?;
        self.storage.commit_reversal(&commit).await?;

        info!(
            match_id,
            charge_id = %charge.id,
            status = %commit.charge.status,
            "match reversed"
        );
        Ok(commit)
    }

    /// Reverse every match of a charge, newest first
    ///
    /// Returns `false` when the charge had no matches.
    pub async fn unmatch_charge(&mut self, charge_id: &str) -> ReconResult<bool> {
        if self.storage.get_charge(charge_id).await?.is_none() {
            return Err(ReconError::ChargeNotFound(charge_id.to_string()));
        }

        let mut matches = self.storage.list_matches_for_charge(charge_id).await?;
        if matches.is_empty() {
            debug!(charge_id, "no matches to reverse");
            return Ok(false);
        }

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for m in &matches {
            self.reverse(&m.id).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStorage;
    use chrono::NaiveDate;

    async fn seeded() -> (MemoryStorage, PaymentRecord, Charge) {
        let mut storage = MemoryStorage::new();
        let charge = Charge::new(
            "c1".to_string(),
            "owner".to_string(),
            "t1".to_string(),
            "u1".to_string(),
            BigDecimal::from(500),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        );
        let payment = PaymentRecord::new(
            BigDecimal::from(300),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            SourceType::LedgerEntry,
        );
        storage.save_charge(&charge).await.unwrap();
        storage.save_payment(&payment).await.unwrap();
        (storage, payment, charge)
    }

    #[tokio::test]
    async fn test_apply_and_reverse_roundtrip() {
        let (storage, payment, charge) = seeded().await;
        let mut applier = MatchApplier::new(storage.clone());

        let commit = applier
            .apply(&payment, &charge, &BigDecimal::from(300), true, "auto".to_string())
            .await
            .unwrap();
        let stored = storage.get_charge("c1").await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, BigDecimal::from(300));
        assert_eq!(stored.status, ChargeStatus::PartiallyPaid);

        applier.reverse(&commit.match_record.id).await.unwrap();
        let stored = storage.get_charge("c1").await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, BigDecimal::from(0));
        assert_eq!(stored.status, ChargeStatus::Open);
        let stored_payment = storage.get_payment(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored_payment.allocated_amount, BigDecimal::from(0));
        assert!(storage.get_match(&commit.match_record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_charge_is_a_conflict() {
        let (storage, payment, charge) = seeded().await;
        let mut applier = MatchApplier::new(storage.clone());

        applier
            .apply(&payment, &charge, &BigDecimal::from(100), true, String::new())
            .await
            .unwrap();

        // same snapshots again: both versions are stale now
        let result = applier
            .apply(&payment, &charge, &BigDecimal::from(100), true, String::new())
            .await;
        assert!(matches!(result, Err(ReconError::Conflict(_))));
        let stored = storage.get_charge("c1").await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, BigDecimal::from(100));
    }

    #[tokio::test]
    async fn test_unmatch_charge() {
        let (storage, payment, charge) = seeded().await;
        let mut applier = MatchApplier::new(storage.clone());
        assert!(!applier.unmatch_charge("c1").await.unwrap());

        applier
            .apply(&payment, &charge, &BigDecimal::from(300), false, String::new())
            .await
            .unwrap();
        assert!(applier.unmatch_charge("c1").await.unwrap());
        assert!(storage.list_matches_for_charge("c1").await.unwrap().is_empty());

        let result = applier.unmatch_charge("missing").await;
        assert!(matches!(result, Err(ReconError::ChargeNotFound(_))));
    }

    #[tokio::test]
    async fn test_manual_overpayment_needs_policy() {
        let (storage, _, charge) = seeded().await;
        let mut big = PaymentRecord::new(
            BigDecimal::from(550),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            SourceType::LedgerEntry,
        );
        big.id = "big".to_string();
        let mut writable = storage.clone();
        writable.save_payment(&big).await.unwrap();

        let mut strict = MatchApplier::new(storage.clone());
        let result = strict
            .apply(&big, &charge, &BigDecimal::from(550), false, String::new())
            .await;
        assert!(matches!(result, Err(ReconError::ApplyFailure(_))));

        let mut lenient = MatchApplier::with_policy(
            storage.clone(),
            AmountBands::default(),
            AllocationPolicy {
                allow_manual_overpayment: true,
            },
        );
        let commit = lenient
            .apply(&big, &charge, &BigDecimal::from(550), false, String::new())
            .await
            .unwrap();
        assert_eq!(commit.charge.status, ChargeStatus::Paid);
    }
}
