//! Append-only audit trail of resolution attempts

use tracing::error;

use crate::reconciliation::resolver::Resolution;
use crate::scoring::ScoreCard;
use crate::traits::AttemptLogStore;
use crate::types::*;

/// Records every resolution outcome with its signal breakdown
///
/// Storage failures are logged and swallowed; auditing never fails a batch.
pub struct AttemptLogger<S: AttemptLogStore> {
    storage: S,
}

impl<S: AttemptLogStore> AttemptLogger<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Log how a payment was resolved
    ///
    /// Ambiguous outcomes produce one row per passing candidate, all naming
    /// the same best charge. `note` overrides the generated note.
    pub async fn log_resolution(
        &mut self,
        payment: &PaymentRecord,
        resolution: &Resolution,
        note: Option<&str>,
    ) -> usize {
        let rows = match resolution {
            Resolution::Matched(card) => vec![attempt_from_card(
                payment,
                Some(card),
                AttemptOutcome::Matched,
                None,
                note.map(str::to_string)
                    .unwrap_or_else(|| card.rationale("Auto-Match")),
            )],
            Resolution::Ambiguous {
                best_charge_id,
                candidates,
            } => candidates
                .iter()
                .map(|card| {
                    attempt_from_card(
                        payment,
                        Some(card),
                        AttemptOutcome::Ambiguous,
                        Some(best_charge_id.clone()),
                        note.map(str::to_string).unwrap_or_else(|| {
                            format!(
                                "{} candidates above threshold, best {best_charge_id}",
                                candidates.len()
                            )
                        }),
                    )
                })
                .collect(),
            Resolution::NoMatch { best } => vec![attempt_from_card(
                payment,
                best.as_ref(),
                AttemptOutcome::NoMatch,
                None,
                note.map(str::to_string).unwrap_or_else(|| match best {
                    Some(card) => format!(
                        "best candidate {} below threshold (Score: {:.2})",
                        card.charge_id, card.score
                    ),
                    None => "no open charge could take this payment".to_string(),
                }),
            )],
        };

        let mut written = 0;
        for row in rows {
            if self.append(row).await {
                written += 1;
            }
        }
        written
    }

    /// Log a payment that was not evaluated
    pub async fn log_skipped(&mut self, payment: &PaymentRecord, note: &str) -> bool {
        let row = attempt_from_card(payment, None, AttemptOutcome::Skipped, None, note.to_string());
        self.append(row).await
    }

    /// Log a manual match outside of a batch
    pub async fn log_manual(&mut self, payment: &PaymentRecord, match_record: &Match) -> bool {
        let mut row = attempt_from_card(
            payment,
            None,
            AttemptOutcome::Matched,
            None,
            match_record.note.clone(),
        );
        row.charge_id = Some(match_record.charge_id.clone());
        row.confidence = 1.0;
        self.append(row).await
    }

    /// Attempt history, optionally for one payment
    pub async fn history(&self, payment_id: Option<&str>) -> ReconResult<Vec<AttemptLog>> {
        self.storage.list_attempts(payment_id).await
    }

    async fn append(&mut self, row: AttemptLog) -> bool {
        match self.storage.append_attempt(&row).await {
            Ok(()) => true,
            Err(err) => {
                error!(
                    payment_id = %row.payment_id,
                    outcome = %row.outcome,
                    error = %err,
                    "failed to write attempt log"
                );
                false
            }
        }
    }
}

fn attempt_from_card(
    payment: &PaymentRecord,
    card: Option<&ScoreCard>,
    outcome: AttemptOutcome,
    best_charge_id: Option<String>,
    note: String,
) -> AttemptLog {
    AttemptLog {
        id: uuid::Uuid::new_v4().to_string(),
        payment_id: payment.id.clone(),
        charge_id: card.map(|c| c.charge_id.clone()),
        outcome,
        confidence: card.map(|c| c.confidence).unwrap_or(0.0),
        signals: card.map(|c| c.signals).unwrap_or_default(),
        best_charge_id,
        note,
        created_at: chrono::Utc::now().naive_utc(),
    }
}
