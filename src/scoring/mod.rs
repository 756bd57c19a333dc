//! Multi-signal match scoring between one payment and one charge

pub mod signals;
pub mod weights;

pub use signals::*;
pub use weights::*;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::config::{NameMatchConfig, ReconConfig};
use crate::types::*;

/// Scored candidate charge for a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub charge_id: String,
    /// Clamped to 0..=100
    pub score: f64,
    /// `score / 100`
    pub confidence: f64,
    pub signals: SignalBreakdown,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    /// Portion of the payment an automatic match would allocate
    pub allocatable: BigDecimal,
}

impl ScoreCard {
    /// Rationale stored on a match, e.g.
    /// `Auto-Match (Score: 81.95, Confidence: 82%) | 300.00 paid, ...`
    pub fn rationale(&self, label: &str) -> String {
        let mut note = format!(
            "{label} (Score: {:.2}, Confidence: {:.0}%)",
            self.score,
            self.confidence * 100.0
        );
        for warning in &self.warnings {
            note.push_str(" | ");
            note.push_str(warning);
        }
        note
    }
}

/// Computes [`ScoreCard`]s from injectable weights
#[derive(Debug, Clone, Default)]
pub struct SignalScorer {
    weights: ScoringWeights,
    amounts: AmountBands,
    names: NameMatchConfig,
}

impl SignalScorer {
    pub fn new(weights: ScoringWeights, amounts: AmountBands, names: NameMatchConfig) -> Self {
        Self {
            weights,
            amounts,
            names,
        }
    }

    pub fn from_config(config: &ReconConfig) -> Self {
        Self::new(
            config.weights.clone(),
            config.amount.clone(),
            config.names.clone(),
        )
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn amount_bands(&self) -> &AmountBands {
        &self.amounts
    }

    /// Score a payment's unallocated remainder against a charge
    ///
    /// Returns [`ReconError::OverAllocationRejected`] when the charge cannot
    /// take the payment at all; callers drop such candidates.
    pub fn score(&self, payment: &PaymentRecord, context: &ChargeContext) -> ReconResult<ScoreCard> {
        let charge = &context.charge;
        let obligor = context.obligor.as_ref();

        let amount = amount_signal(&payment.unallocated(), charge, &self.amounts, &self.weights)?;
        let identity = identity_signal(
            payment.obligor_hint.as_deref(),
            &charge.obligor_reference,
            payment.counterpart_iban.as_deref(),
            obligor.and_then(|o| o.iban.as_deref()),
            &self.weights,
        );
        let name = name_signal(
            payment.counterpart_name.as_deref(),
            payment.purpose.as_deref(),
            obligor,
            &self.weights,
            &self.names,
        );
        let date = date_signal(payment.occurred_on, charge.due_on, &self.weights);
        let purpose = purpose_signal(
            payment.purpose.as_deref(),
            charge.due_on,
            context.location.as_ref(),
            &self.weights,
        );

        let mut signals = SignalBreakdown {
            identity: identity.points,
            name: name.points,
            amount: amount.result.points,
            date: date.points,
            purpose: purpose.points,
            combination_bonus: 0.0,
        };
        signals.combination_bonus = combination_bonus(&signals, &self.weights);

        let score = signals.total().clamp(0.0, 100.0);
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();
        for result in [identity, name, amount.result, date, purpose] {
            reasons.extend(result.reason);
            warnings.extend(result.warnings);
        }
        if signals.combination_bonus > 0.0 {
            reasons.push(format!(
                "{:.0} bonus points for several strong signals",
                signals.combination_bonus
            ));
        }

        Ok(ScoreCard {
            charge_id: charge.id.clone(),
            score,
            confidence: score / 100.0,
            signals,
            reasons,
            warnings,
            allocatable: amount.allocatable,
        })
    }
}
