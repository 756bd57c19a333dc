//! Pure allocation state transitions
//!
//! These functions compute the records an allocation or reversal produces
//! without touching storage. [`MatchApplier`](super::MatchApplier) commits
//! their output atomically.

use bigdecimal::{BigDecimal, Zero};

use crate::traits::{AllocationCommit, ReversalCommit};
use crate::types::*;

/// Status of a charge after its paid amount changed through an allocation
pub fn status_after_allocation(charge: &Charge) -> ChargeStatus {
    if charge.is_settled() {
        ChargeStatus::Paid
    } else if charge.status == ChargeStatus::Overdue {
        ChargeStatus::Overdue
    } else {
        ChargeStatus::PartiallyPaid
    }
}

/// Status of a charge after one of its matches was reversed
///
/// Restores `Overdue` when the match had been applied over an overdue charge.
pub fn status_after_reversal(charge: &Charge, prior: ChargeStatus) -> ChargeStatus {
    if charge.is_settled() {
        ChargeStatus::Paid
    } else if prior == ChargeStatus::Overdue || charge.status == ChargeStatus::Overdue {
        ChargeStatus::Overdue
    } else if charge.amount_paid > BigDecimal::zero() {
        ChargeStatus::PartiallyPaid
    } else {
        ChargeStatus::Open
    }
}

/// Compute the records produced by allocating `amount` of a payment to a charge
///
/// `overpayment_margin` is how far the charge may be paid beyond its
/// amount due. All precondition failures are [`ReconError::ApplyFailure`].
pub fn allocate(
    payment: &PaymentRecord,
    charge: &Charge,
    amount: &BigDecimal,
    is_automatic: bool,
    note: String,
    overpayment_margin: &BigDecimal,
) -> ReconResult<AllocationCommit> {
    if *amount <= BigDecimal::zero() {
        return Err(ReconError::ApplyFailure(
            "allocated amount must be positive".to_string(),
        ));
    }
    if !payment.is_inbound() {
        return Err(ReconError::ApplyFailure(format!(
            "payment {} is not an inbound payment",
            payment.id
        )));
    }
    if *amount > payment.unallocated() {
        return Err(ReconError::ApplyFailure(format!(
            "{} exceeds the unallocated {} of payment {}",
            format_amount(amount),
            format_amount(&payment.unallocated()),
            payment.id
        )));
    }
    if !charge.status.accepts_payments() || charge.is_settled() {
        return Err(ReconError::ApplyFailure(format!(
            "charge {} is already paid",
            charge.id
        )));
    }
    let ceiling = &charge.amount_due + overpayment_margin;
    if &charge.amount_paid + amount > ceiling {
        return Err(ReconError::ApplyFailure(format!(
            "{} exceeds the remaining {} of charge {}",
            format_amount(amount),
            format_amount(&charge.remaining()),
            charge.id
        )));
    }

    let now = chrono::Utc::now().naive_utc();
    let match_record = Match {
        id: uuid::Uuid::new_v4().to_string(),
        payment_id: payment.id.clone(),
        charge_id: charge.id.clone(),
        allocated_amount: amount.clone(),
        is_automatic,
        note,
        prior_charge_status: charge.status,
        created_at: now,
    };

    let mut updated_charge = charge.clone();
    updated_charge.amount_paid += amount;
    updated_charge.status = status_after_allocation(&updated_charge);
    updated_charge.version += 1;
    updated_charge.updated_at = now;

    let mut updated_payment = payment.clone();
    updated_payment.allocated_amount += amount;
    updated_payment.version += 1;

    Ok(AllocationCommit {
        match_record,
        charge: updated_charge,
        expected_charge_version: charge.version,
        payment: updated_payment,
        expected_payment_version: payment.version,
    })
}

/// Compute the records produced by reversing a match
///
/// Totals are clamped at zero so inconsistent history cannot drive them
/// negative.
pub fn reverse(
    match_record: &Match,
    payment: &PaymentRecord,
    charge: &Charge,
) -> ReconResult<ReversalCommit> {
    if match_record.payment_id != payment.id || match_record.charge_id != charge.id {
        return Err(ReconError::Validation(format!(
            "match {} does not link payment {} and charge {}",
            match_record.id, payment.id, charge.id
        )));
    }

    let now = chrono::Utc::now().naive_utc();
    let mut updated_charge = charge.clone();
    updated_charge.amount_paid = clamp_at_zero(&charge.amount_paid - &match_record.allocated_amount);
    updated_charge.status = status_after_reversal(&updated_charge, match_record.prior_charge_status);
    updated_charge.version += 1;
    updated_charge.updated_at = now;

    let mut updated_payment = payment.clone();
    updated_payment.allocated_amount =
        clamp_at_zero(&payment.allocated_amount - &match_record.allocated_amount);
    updated_payment.version += 1;

    Ok(ReversalCommit {
        match_id: match_record.id.clone(),
        charge: updated_charge,
        expected_charge_version: charge.version,
        payment: updated_payment,
        expected_payment_version: payment.version,
    })
}

fn clamp_at_zero(value: BigDecimal) -> BigDecimal {
    if value < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        value
    }
}
