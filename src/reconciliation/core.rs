//! Main reconciliation orchestrator that coordinates ingestion, scoring and allocation

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::ReconConfig;
use crate::import::{ImportedRow, TabularImporter};
use crate::normalize::{Normalizer, PaymentInput};
use crate::reconciliation::{AttemptLogger, CandidateResolver, MatchApplier, Resolution};
use crate::scoring::{ScoreCard, SignalScorer};
use crate::traits::*;
use crate::types::*;
use crate::utils::validate_positive_amount;

/// Per-batch overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Replaces the per-source thresholds for this batch
    pub threshold: Option<f64>,
    /// Resolve and report without applying matches or writing attempts
    pub dry_run: bool,
}

/// Outcome of one payment within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub payment_id: String,
    /// Matched charge, or the best candidate for the other outcomes
    pub charge_id: Option<String>,
    pub outcome: AttemptOutcome,
    pub score: f64,
    pub confidence: f64,
    /// Amount actually allocated; `None` unless a match was committed
    pub allocated: Option<BigDecimal>,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    /// Why a resolved match could not be applied
    pub error: Option<String>,
}

impl MatchDetail {
    fn from_card(payment: &PaymentRecord, outcome: AttemptOutcome, card: Option<&ScoreCard>) -> Self {
        Self {
            payment_id: payment.id.clone(),
            charge_id: card.map(|c| c.charge_id.clone()),
            outcome,
            score: card.map(|c| c.score).unwrap_or(0.0),
            confidence: card.map(|c| c.confidence).unwrap_or(0.0),
            allocated: None,
            reasons: card.map(|c| c.reasons.clone()).unwrap_or_default(),
            warnings: card.map(|c| c.warnings.clone()).unwrap_or_default(),
            error: None,
        }
    }
}

/// Per-source counters of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub processed: usize,
    pub matched: usize,
}

/// Summary of a reconciliation batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed: usize,
    pub matched: usize,
    pub no_match: usize,
    pub ambiguous: usize,
    pub skipped: usize,
    /// Resolved matches that could not be applied
    pub errors: usize,
    /// Upload rows that never became payments
    pub parse_errors: usize,
    pub details: Vec<MatchDetail>,
    pub sources: BTreeMap<SourceType, SourceSummary>,
}

impl BatchResult {
    fn push(&mut self, detail: MatchDetail) {
        match detail.outcome {
            AttemptOutcome::Matched => self.matched += 1,
            AttemptOutcome::NoMatch => self.no_match += 1,
            AttemptOutcome::Ambiguous => self.ambiguous += 1,
            AttemptOutcome::Skipped => self.skipped += 1,
        }
        self.details.push(detail);
    }

    /// Matched payments as a share of processed payments
    pub fn match_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.matched as f64 / self.processed as f64
        }
    }
}

/// Outcome of storing normalized payments
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Newly stored payments, in input order
    pub stored: Vec<PaymentRecord>,
    /// Payments already known by source and external id
    pub duplicates: usize,
    /// Rows or records rejected by normalization or validation
    pub failures: Vec<ReconError>,
}

/// Main reconciliation system that orchestrates all matching operations
pub struct Reconciler<S: ReconciliationStorage + Clone> {
    storage: S,
    config: ReconConfig,
    normalizer: Normalizer,
    resolver: CandidateResolver,
    applier: MatchApplier<S>,
    logger: AttemptLogger<S>,
    importer: TabularImporter<S>,
    validator: Box<dyn PaymentValidator>,
}

impl<S: ReconciliationStorage + Clone> Reconciler<S> {
    /// Create a new reconciler with default configuration
    pub fn new(storage: S) -> Self {
        Self::build(storage, ReconConfig::default(), Box::new(DefaultPaymentValidator))
    }

    /// Create a new reconciler with a custom configuration
    pub fn with_config(storage: S, config: ReconConfig) -> ReconResult<Self> {
        config.validate()?;
        Ok(Self::build(storage, config, Box::new(DefaultPaymentValidator)))
    }

    /// Create a new reconciler with a custom configuration and payment validator
    pub fn with_validator(
        storage: S,
        config: ReconConfig,
        validator: Box<dyn PaymentValidator>,
    ) -> ReconResult<Self> {
        config.validate()?;
        Ok(Self::build(storage, config, validator))
    }

    fn build(storage: S, config: ReconConfig, validator: Box<dyn PaymentValidator>) -> Self {
        let scorer = SignalScorer::from_config(&config);
        Self {
            normalizer: Normalizer::new(config.normalizer.clone()),
            resolver: CandidateResolver::new(scorer, config.resolver.clone()),
            applier: MatchApplier::with_policy(
                storage.clone(),
                config.amount.clone(),
                config.allocation.clone(),
            ),
            logger: AttemptLogger::new(storage.clone()),
            importer: TabularImporter::new(storage.clone()),
            storage,
            config,
            validator,
        }
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // Ingestion
    /// Normalize typed records and store the new ones
    pub async fn ingest(&mut self, inputs: Vec<PaymentInput>) -> ReconResult<IngestReport> {
        let mut payments = Vec::with_capacity(inputs.len());
        let mut failures = Vec::new();
        for input in &inputs {
            match self.normalizer.normalize(input) {
                Ok(payment) => payments.push(payment),
                Err(err) => failures.push(err),
            }
        }

        let mut report = self.ingest_payments(payments).await?;
        report.failures.extend(failures);
        Ok(report)
    }

    /// Validate and store canonical payments, skipping known ones
    ///
    /// A payment is known when another payment of the same source carries
    /// the same external id.
    pub async fn ingest_payments(&mut self, payments: Vec<PaymentRecord>) -> ReconResult<IngestReport> {
        let mut report = IngestReport::default();
        for payment in payments {
            if let Err(err) = self.validator.validate_payment(&payment) {
                warn!(payment_id = %payment.id, error = %err, "payment rejected");
                report.failures.push(err);
                continue;
            }

            if let Some(external_id) = &payment.external_id {
                if let Some(existing) = self
                    .storage
                    .find_by_external_id(payment.source_type, external_id)
                    .await?
                {
                    debug!(
                        external_id = %external_id,
                        existing = %existing.id,
                        "skipping known payment"
                    );
                    report.duplicates += 1;
                    continue;
                }
            }

            self.storage.save_payment(&payment).await?;
            report.stored.push(payment);
        }

        info!(
            stored = report.stored.len(),
            duplicates = report.duplicates,
            failures = report.failures.len(),
            "payments ingested"
        );
        Ok(report)
    }

    /// Store an upload with arbitrary headers
    pub async fn import_upload(
        &mut self,
        upload_id: &str,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> ReconResult<TableRef> {
        self.importer.import(upload_id, headers, rows).await
    }

    /// Parse delimited text and store it as an upload
    pub async fn import_delimited(&mut self, upload_id: &str, content: &str) -> ReconResult<TableRef> {
        self.importer.import_delimited(upload_id, content).await
    }

    /// Read back rows of an upload by original header
    pub async fn query_upload(
        &self,
        table_ref: &TableRef,
        upload_id: &str,
        limit: Option<usize>,
    ) -> ReconResult<Vec<ImportedRow>> {
        self.importer.query(table_ref, upload_id, limit).await
    }

    /// Remove an upload
    pub async fn drop_upload(&mut self, upload_id: &str) -> ReconResult<bool> {
        self.importer.drop_upload(upload_id).await
    }

    /// Normalize the rows of a stored upload and store the resulting payments
    ///
    /// Ingesting the same upload twice stores nothing the second time.
    pub async fn ingest_upload(&mut self, upload_id: &str) -> ReconResult<IngestReport> {
        let (table, rows) = self.importer.load(upload_id).await?;
        let batch = self
            .normalizer
            .normalize_table(&table.headers(), &rows, Some(upload_id));

        let mut report = self.ingest_payments(batch.payments).await?;
        report.failures.extend(batch.failures);
        Ok(report)
    }

    // Reconciliation
    /// Reconcile payments against the open charges in scope
    ///
    /// Open charges are loaded once; matches applied earlier in the batch
    /// are visible to later payments. Only storage failures abort the batch.
    pub async fn reconcile(
        &mut self,
        payments: &[PaymentRecord],
        scope: &ChargeScope,
        options: &BatchOptions,
    ) -> ReconResult<BatchResult> {
        let mut working = self.storage.list_open_charges(scope).await?;
        info!(
            payments = payments.len(),
            charges = working.len(),
            dry_run = options.dry_run,
            "starting reconciliation batch"
        );

        let mut result = BatchResult::default();
        for payment in payments {
            result.processed += 1;
            result.sources.entry(payment.source_type).or_default().processed += 1;

            if !payment.is_inbound() {
                self.skip(payment, "outbound payment", options, &mut result).await;
                continue;
            }
            if payment.is_fully_allocated() {
                self.skip(payment, "payment already fully allocated", options, &mut result)
                    .await;
                continue;
            }

            let threshold = options
                .threshold
                .unwrap_or_else(|| self.config.thresholds.for_source(payment.source_type));
            let resolution = self.resolver.resolve(payment, &working, threshold);
            debug!(payment_id = %payment.id, outcome = %resolution.outcome(), "payment resolved");

            match resolution {
                Resolution::Matched(card) if options.dry_run => {
                    result.push(MatchDetail::from_card(payment, AttemptOutcome::Matched, Some(&card)));
                    result.sources.entry(payment.source_type).or_default().matched += 1;
                }
                Resolution::Matched(card) => {
                    match self.apply_card(payment, card.clone(), threshold, &mut working).await {
                        Ok((commit, card)) => {
                            self.logger
                                .log_resolution(
                                    payment,
                                    &Resolution::Matched(card.clone()),
                                    Some(&commit.match_record.note),
                                )
                                .await;

                            let mut detail =
                                MatchDetail::from_card(payment, AttemptOutcome::Matched, Some(&card));
                            detail.allocated = Some(commit.match_record.allocated_amount);
                            result.push(detail);
                            result.sources.entry(payment.source_type).or_default().matched += 1;
                        }
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            warn!(
                                payment_id = %payment.id,
                                charge_id = %card.charge_id,
                                error = %err,
                                "match could not be applied"
                            );
                            self.logger
                                .log_skipped(payment, &format!("apply failed: {err}"))
                                .await;

                            let mut detail =
                                MatchDetail::from_card(payment, AttemptOutcome::Skipped, Some(&card));
                            detail.error = Some(err.to_string());
                            result.errors += 1;
                            result.details.push(detail);
                        }
                    }
                }
                Resolution::Ambiguous {
                    ref best_charge_id,
                    ref candidates,
                } => {
                    if !options.dry_run {
                        self.logger.log_resolution(payment, &resolution, None).await;
                    }
                    let best = candidates.iter().find(|c| &c.charge_id == best_charge_id);
                    result.push(MatchDetail::from_card(payment, AttemptOutcome::Ambiguous, best));
                }
                Resolution::NoMatch { ref best } => {
                    if !options.dry_run {
                        self.logger.log_resolution(payment, &resolution, None).await;
                    }
                    result.push(MatchDetail::from_card(payment, AttemptOutcome::NoMatch, best.as_ref()));
                }
            }
        }

        info!(
            processed = result.processed,
            matched = result.matched,
            no_match = result.no_match,
            ambiguous = result.ambiguous,
            skipped = result.skipped,
            errors = result.errors,
            "reconciliation batch finished"
        );
        Ok(result)
    }

    /// Reconcile every stored payment with an unallocated remainder
    pub async fn reconcile_pending(
        &mut self,
        scope: &ChargeScope,
        source_type: Option<SourceType>,
        options: &BatchOptions,
    ) -> ReconResult<BatchResult> {
        let payments = self.storage.list_unallocated_payments(source_type).await?;
        self.reconcile(&payments, scope, options).await
    }

    /// Ingest a stored upload and reconcile the newly stored payments
    pub async fn reconcile_upload(
        &mut self,
        upload_id: &str,
        scope: &ChargeScope,
        options: &BatchOptions,
    ) -> ReconResult<BatchResult> {
        let report = self.ingest_upload(upload_id).await?;
        let mut result = self.reconcile(&report.stored, scope, options).await?;
        result.parse_errors = report
            .failures
            .iter()
            .filter(|e| matches!(e, ReconError::Parse { .. }))
            .count();
        Ok(result)
    }

    /// Ranked candidates for manual review, best first
    pub async fn suggest(
        &self,
        payment_id: &str,
        scope: &ChargeScope,
        min_confidence: f64,
    ) -> ReconResult<Vec<ScoreCard>> {
        let payment = self.load_payment(payment_id).await?;
        let candidates = self.storage.list_open_charges(scope).await?;
        Ok(self
            .resolver
            .rank(&payment, &candidates)
            .into_iter()
            .filter(|card| card.confidence >= min_confidence)
            .collect())
    }

    // Manual operations
    /// Apply a user-chosen allocation
    pub async fn apply_manual(
        &mut self,
        payment_id: &str,
        charge_id: &str,
        amount: BigDecimal,
        note: Option<String>,
    ) -> ReconResult<Match> {
        validate_positive_amount(&amount)?;
        let payment = self.load_payment(payment_id).await?;
        let charge = self
            .storage
            .get_charge(charge_id)
            .await?
            .ok_or_else(|| ReconError::ChargeNotFound(charge_id.to_string()))?;

        let note = note.unwrap_or_else(|| format!("Manual match of {}", format_amount(&amount)));
        let commit = self
            .applier
            .apply(&payment, &charge, &amount, false, note)
            .await?;
        self.logger
            .log_manual(&commit.payment, &commit.match_record)
            .await;
        Ok(commit.match_record)
    }

    /// Reverse a single match; returns the restored charge
    pub async fn reverse_match(&mut self, match_id: &str) -> ReconResult<Charge> {
        let commit = self.applier.reverse(match_id).await?;
        Ok(commit.charge)
    }

    /// Reverse every match of a charge
    pub async fn unmatch(&mut self, charge_id: &str) -> ReconResult<bool> {
        self.applier.unmatch_charge(charge_id).await
    }

    /// Mark unpaid charges past their due date as overdue
    ///
    /// Charges modified concurrently are left for the next run.
    pub async fn refresh_overdue(&mut self, scope: &ChargeScope, as_of: NaiveDate) -> ReconResult<usize> {
        let open = self.storage.list_open_charges(scope).await?;
        let mut marked = 0;
        for context in open {
            let charge = context.charge;
            if charge.status == ChargeStatus::Overdue || !charge.is_past_due(as_of) {
                continue;
            }
            match self
                .storage
                .update_charge_status(&charge.id, ChargeStatus::Overdue, charge.version)
                .await
            {
                Ok(_) => marked += 1,
                Err(ReconError::Conflict(reason)) => {
                    warn!(charge_id = %charge.id, %reason, "overdue update skipped");
                }
                Err(err) => return Err(err),
            }
        }

        info!(marked, %as_of, "overdue charges refreshed");
        Ok(marked)
    }

    // Queries
    /// Attempt history, optionally for one payment
    pub async fn attempts(&self, payment_id: Option<&str>) -> ReconResult<Vec<AttemptLog>> {
        self.logger.history(payment_id).await
    }

    /// Live matches of a charge
    pub async fn matches_for_charge(&self, charge_id: &str) -> ReconResult<Vec<Match>> {
        self.storage.list_matches_for_charge(charge_id).await
    }

    /// Live matches of a payment
    pub async fn matches_for_payment(&self, payment_id: &str) -> ReconResult<Vec<Match>> {
        self.storage.list_matches_for_payment(payment_id).await
    }

    async fn load_payment(&self, payment_id: &str) -> ReconResult<PaymentRecord> {
        self.storage
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| ReconError::PaymentNotFound(payment_id.to_string()))
    }

    async fn skip(
        &mut self,
        payment: &PaymentRecord,
        reason: &str,
        options: &BatchOptions,
        result: &mut BatchResult,
    ) {
        debug!(payment_id = %payment.id, reason, "payment skipped");
        if !options.dry_run {
            self.logger.log_skipped(payment, reason).await;
        }
        let mut detail = MatchDetail::from_card(payment, AttemptOutcome::Skipped, None);
        detail.reasons.push(reason.to_string());
        result.push(detail);
    }

    /// Commit a resolved match, rescoring once against fresh state on conflict
    async fn apply_card(
        &mut self,
        payment: &PaymentRecord,
        card: ScoreCard,
        threshold: f64,
        working: &mut Vec<ChargeContext>,
    ) -> ReconResult<(AllocationCommit, ScoreCard)> {
        let Some(index) = working.iter().position(|c| c.charge.id == card.charge_id) else {
            return Err(ReconError::ChargeNotFound(card.charge_id));
        };

        let note = card.rationale("Auto-Match");
        let attempt = self
            .applier
            .apply(payment, &working[index].charge, &card.allocatable, true, note)
            .await;

        let (commit, card) = match attempt {
            Ok(commit) => (commit, card),
            Err(ReconError::Conflict(reason)) => {
                warn!(
                    payment_id = %payment.id,
                    charge_id = %card.charge_id,
                    %reason,
                    "stale state, rescoring once"
                );
                let fresh_payment = self.load_payment(&payment.id).await?;
                let fresh = self
                    .storage
                    .get_charge_context(&card.charge_id)
                    .await?
                    .ok_or_else(|| ReconError::ChargeNotFound(card.charge_id.clone()))?;

                if !fresh.charge.status.accepts_payments() || fresh.charge.is_settled() {
                    working.remove(index);
                    return Err(ReconError::Conflict(format!(
                        "charge {} was settled concurrently",
                        card.charge_id
                    )));
                }
                working[index] = fresh.clone();

                let rescored = self.resolver.scorer().score(&fresh_payment, &fresh)?;
                if rescored.confidence < threshold {
                    return Err(ReconError::Conflict(format!(
                        "charge {} no longer qualifies after concurrent change",
                        card.charge_id
                    )));
                }
                let note = rescored.rationale("Auto-Match");
                let commit = self
                    .applier
                    .apply(&fresh_payment, &fresh.charge, &rescored.allocatable, true, note)
                    .await?;
                (commit, rescored)
            }
            Err(err) => return Err(err),
        };

        if commit.charge.is_settled() {
            working.remove(index);
        } else {
            working[index].charge = commit.charge.clone();
        }
        Ok((commit, card))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{LedgerEntry, SyncedTransaction};
    use crate::utils::MemoryStorage;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seeded() -> MemoryStorage {
        let mut storage = MemoryStorage::new();
        storage
            .save_obligor(
                &Obligor::new("t1".to_string(), "Anna".to_string(), "Schmidt".to_string())
                    .with_iban("DE89370400440532013000"),
            )
            .await
            .unwrap();
        storage
            .save_charge(&Charge::new(
                "c1".to_string(),
                "owner".to_string(),
                "t1".to_string(),
                "u1".to_string(),
                BigDecimal::from(500),
                date(2024, 3, 5),
            ))
            .await
            .unwrap();
        storage
    }

    fn synced(id: &str, amount: i64) -> PaymentInput {
        PaymentInput::Synced(SyncedTransaction {
            transaction_id: id.to_string(),
            amount: BigDecimal::from(amount),
            booking_date: date(2024, 3, 4),
            counterpart_iban: Some("DE89 3704 0044 0532 0130 00".to_string()),
            counterpart_name: Some("Anna Schmidt".to_string()),
            remittance_info: Some("Miete März 2024".to_string()),
        })
    }

    #[tokio::test]
    async fn test_ingest_deduplicates_by_external_id() {
        let mut reconciler = Reconciler::new(seeded().await);
        let first = reconciler.ingest(vec![synced("tx-1", 500)]).await.unwrap();
        assert_eq!(first.stored.len(), 1);

        let second = reconciler
            .ingest(vec![synced("tx-1", 500), synced("tx-2", 20)])
            .await
            .unwrap();
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.stored.len(), 1);
        assert_eq!(second.stored[0].external_id.as_deref(), Some("tx-2"));
    }

    #[tokio::test]
    async fn test_validator_rejections_are_reported() {
        let mut reconciler = Reconciler::new(seeded().await);
        let report = reconciler
            .ingest(vec![PaymentInput::Ledger(LedgerEntry {
                entry_id: Some("   ".to_string()),
                amount: BigDecimal::from(10),
                entry_date: date(2024, 3, 1),
                description: None,
                counterpart: None,
                obligor_hint: None,
            })])
            .await
            .unwrap();
        assert!(report.stored.is_empty());
        assert!(matches!(report.failures[0], ReconError::Validation(_)));
    }

    #[tokio::test]
    async fn test_dry_run_applies_nothing() {
        let storage = seeded().await;
        let mut reconciler = Reconciler::new(storage.clone());
        let report = reconciler.ingest(vec![synced("tx-1", 500)]).await.unwrap();

        let options = BatchOptions {
            dry_run: true,
            ..BatchOptions::default()
        };
        let result = reconciler
            .reconcile(&report.stored, &ChargeScope::all(), &options)
            .await
            .unwrap();
        assert_eq!(result.matched, 1);
        assert_eq!(result.details[0].allocated, None);

        let charge = storage.get_charge("c1").await.unwrap().unwrap();
        assert_eq!(charge.status, ChargeStatus::Open);
        assert!(reconciler.attempts(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_rescored_once() {
        let storage = seeded().await;
        let mut reconciler = Reconciler::new(storage.clone());
        let report = reconciler.ingest(vec![synced("tx-1", 200)]).await.unwrap();

        // the charge changes behind the batch's back before it applies
        let mut writer = storage.clone();
        writer
            .update_charge_status("c1", ChargeStatus::Overdue, 0)
            .await
            .unwrap();
        let mut stale = storage.list_open_charges(&ChargeScope::all()).await.unwrap();
        stale[0].charge.version = 0;

        let card = reconciler
            .resolver
            .scorer()
            .score(&report.stored[0], &stale[0])
            .unwrap();
        let (commit, _) = reconciler
            .apply_card(&report.stored[0], card, 0.4, &mut stale)
            .await
            .unwrap();

        assert_eq!(commit.charge.amount_paid, BigDecimal::from(200));
        assert_eq!(commit.charge.status, ChargeStatus::Overdue);
        assert_eq!(commit.expected_charge_version, 1);
        assert_eq!(stale[0].charge.version, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = ReconConfig::default();
        config.thresholds.ledger_entry = 1.5;
        assert!(matches!(
            Reconciler::with_config(MemoryStorage::new(), config),
            Err(ReconError::Config(_))
        ));
    }
}
