//! Candidate resolution across all open charges for a payment

use std::cmp::Ordering;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::scoring::{ScoreCard, SignalScorer};
use crate::types::*;

/// Result of resolving one payment against a set of charges
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A unique best candidate passed the threshold
    Matched(ScoreCard),
    /// Several candidates passed and none leads clearly; never auto-applied
    Ambiguous {
        best_charge_id: String,
        candidates: Vec<ScoreCard>,
    },
    /// Nothing passed the threshold; carries the best rejected candidate
    NoMatch { best: Option<ScoreCard> },
}

impl Resolution {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Resolution::Matched(_) => AttemptOutcome::Matched,
            Resolution::Ambiguous { .. } => AttemptOutcome::Ambiguous,
            Resolution::NoMatch { .. } => AttemptOutcome::NoMatch,
        }
    }
}

/// Applies a confidence threshold to scored candidates
#[derive(Debug, Clone, Default)]
pub struct CandidateResolver {
    scorer: SignalScorer,
    config: ResolverConfig,
}

impl CandidateResolver {
    pub fn new(scorer: SignalScorer, config: ResolverConfig) -> Self {
        Self { scorer, config }
    }

    pub fn scorer(&self) -> &SignalScorer {
        &self.scorer
    }

    /// Score every candidate, best first
    ///
    /// Candidates the scorer rejects are dropped. Equal scores keep the
    /// earlier due date first, then the lower charge id.
    pub fn rank(&self, payment: &PaymentRecord, candidates: &[ChargeContext]) -> Vec<ScoreCard> {
        let mut ranked: Vec<(ScoreCard, &ChargeContext)> = candidates
            .iter()
            .filter_map(|context| match self.scorer.score(payment, context) {
                Ok(card) => Some((card, context)),
                Err(err) => {
                    debug!(
                        payment_id = %payment.id,
                        charge_id = %context.charge.id,
                        reason = %err,
                        "candidate rejected"
                    );
                    None
                }
            })
            .collect();

        ranked.sort_by(|(a, ca), (b, cb)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| ca.charge.due_on.cmp(&cb.charge.due_on))
                .then_with(|| ca.charge.id.cmp(&cb.charge.id))
        });
        ranked.into_iter().map(|(card, _)| card).collect()
    }

    /// Pick a unique best match, flag ambiguity, or report no match
    pub fn resolve(
        &self,
        payment: &PaymentRecord,
        candidates: &[ChargeContext],
        threshold: f64,
    ) -> Resolution {
        let ranked = self.rank(payment, candidates);
        self.classify(ranked, threshold)
    }

    /// Classify an already ranked candidate list
    pub fn classify(&self, ranked: Vec<ScoreCard>, threshold: f64) -> Resolution {
        let (passing, rest): (Vec<ScoreCard>, Vec<ScoreCard>) = ranked
            .into_iter()
            .partition(|card| card.confidence >= threshold);

        let mut passing = passing.into_iter();
        let Some(best) = passing.next() else {
            return Resolution::NoMatch {
                best: rest.into_iter().next(),
            };
        };
        let Some(runner_up) = passing.next() else {
            return Resolution::Matched(best);
        };
        if best.score - runner_up.score >= self.config.ambiguity_margin {
            return Resolution::Matched(best);
        }

        let best_charge_id = best.charge_id.clone();
        let mut candidates = vec![best, runner_up];
        candidates.extend(passing);
        Resolution::Ambiguous {
            best_charge_id,
            candidates,
        }
    }
}
