// Property-based tests for allocation bookkeeping and amount scoring.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use proptest::prelude::*;
use reconciliation_core::reconciliation::allocation::{allocate, reverse};
use reconciliation_core::scoring::{amount_signal, AmountBands, ScoringWeights};
use reconciliation_core::{Charge, ChargeStatus, Match, PaymentRecord, SourceType};

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn cents(value: i64) -> BigDecimal {
    BigDecimal::new(value.into(), 2)
}

fn charge(due_cents: i64) -> Charge {
    Charge::new(
        "c1".to_string(),
        "owner".to_string(),
        "t1".to_string(),
        "u1".to_string(),
        cents(due_cents),
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
    )
}

#[derive(Debug, Clone)]
enum Op {
    /// Allocate `amount` cents of payment `payment`
    Apply { payment: usize, amount: i64 },
    /// Reverse the live match at this position (modulo the live count)
    Reverse { index: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..3, 1i64..40_000).prop_map(|(payment, amount)| Op::Apply { payment, amount }),
        1 => (0usize..8).prop_map(|index| Op::Reverse { index }),
    ]
}

proptest! {
    #![proptest_config(config())]

    #[test]
    fn amount_paid_equals_sum_of_live_matches(
        due in 10_000i64..100_000,
        payment_cents in prop::collection::vec(1_000i64..60_000, 3),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let mut charge = charge(due);
        let mut payments: Vec<PaymentRecord> = payment_cents
            .iter()
            .map(|&amount| {
                PaymentRecord::new(
                    cents(amount),
                    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                    SourceType::LedgerEntry,
                )
            })
            .collect();
        let mut live: Vec<Match> = Vec::new();

        for op in ops {
            match op {
                Op::Apply { payment, amount } => {
                    let p = &payments[payment];
                    let commit = allocate(p, &charge, &cents(amount), false, String::new(), &BigDecimal::zero());
                    if let Ok(commit) = commit {
                        charge = commit.charge;
                        payments[payment] = commit.payment;
                        live.push(commit.match_record);
                    }
                }
                Op::Reverse { index } => {
                    if live.is_empty() {
                        continue;
                    }
                    let m = live.remove(index % live.len());
                    let position = payments.iter().position(|p| p.id == m.payment_id).unwrap();
                    let commit = reverse(&m, &payments[position], &charge).unwrap();
                    charge = commit.charge;
                    payments[position] = commit.payment;
                }
            }

            let allocated: BigDecimal = live.iter().map(|m| &m.allocated_amount).sum();
            prop_assert_eq!(&charge.amount_paid, &allocated);
            prop_assert!(charge.amount_paid <= charge.amount_due);

            for p in &payments {
                let own: BigDecimal = live
                    .iter()
                    .filter(|m| m.payment_id == p.id)
                    .map(|m| &m.allocated_amount)
                    .sum();
                prop_assert_eq!(&p.allocated_amount, &own);
                prop_assert!(p.allocated_amount <= p.amount);
            }

            let expected = if charge.is_settled() {
                ChargeStatus::Paid
            } else if live.is_empty() {
                ChargeStatus::Open
            } else {
                ChargeStatus::PartiallyPaid
            };
            prop_assert_eq!(charge.status, expected);
        }
    }

    #[test]
    fn reverse_undoes_apply(
        due in 1_000i64..100_000,
        paid in 1i64..100_000,
        amount in 1i64..100_000,
    ) {
        let charge = charge(due);
        let payment = PaymentRecord::new(
            cents(paid),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            SourceType::FileImport,
        );
        if let Ok(commit) = allocate(&payment, &charge, &cents(amount), true, String::new(), &BigDecimal::zero()) {
            let undone = reverse(&commit.match_record, &commit.payment, &commit.charge).unwrap();
            prop_assert_eq!(&undone.charge.amount_paid, &charge.amount_paid);
            prop_assert_eq!(undone.charge.status, charge.status);
            prop_assert_eq!(&undone.payment.allocated_amount, &payment.allocated_amount);
        }
    }

    #[test]
    fn underpayment_score_grows_with_precision(
        a in 1i64..=50_000,
        b in 1i64..=50_000,
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let charge = charge(50_000);
        let bands = AmountBands::default();
        let weights = ScoringWeights::default();

        let far = amount_signal(&cents(low), &charge, &bands, &weights).unwrap();
        let near = amount_signal(&cents(high), &charge, &bands, &weights).unwrap();
        prop_assert!(near.result.points >= far.result.points);
    }

    #[test]
    fn overpayment_score_shrinks_with_excess(
        a in 50_000i64..=60_000,
        b in 50_000i64..=60_000,
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let charge = charge(50_000);
        let bands = AmountBands::default();
        let weights = ScoringWeights::default();

        let near = amount_signal(&cents(low), &charge, &bands, &weights).unwrap();
        let far = amount_signal(&cents(high), &charge, &bands, &weights).unwrap();
        prop_assert!(near.result.points >= far.result.points);
    }
}
