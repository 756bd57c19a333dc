//! Conversion of heterogeneous payment evidence into [`PaymentRecord`]s

pub mod headers;
pub mod text;
pub mod values;

pub use headers::*;
pub use text::*;
pub use values::*;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::NormalizerConfig;
use crate::types::*;

/// Manually entered cash book row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Option<String>,
    pub amount: BigDecimal,
    pub entry_date: NaiveDate,
    pub description: Option<String>,
    /// Free-text counterpart as typed by the user
    pub counterpart: Option<String>,
    /// Obligor the user attributed the entry to, if any
    pub obligor_hint: Option<Obligor>,
}

/// Transaction delivered by an external bank synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedTransaction {
    pub transaction_id: String,
    pub amount: BigDecimal,
    pub booking_date: NaiveDate,
    pub counterpart_iban: Option<String>,
    pub counterpart_name: Option<String>,
    pub remittance_info: Option<String>,
}

/// Payment evidence that arrives as typed records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaymentInput {
    Ledger(LedgerEntry),
    Synced(SyncedTransaction),
}

/// Outcome of normalizing a set of uploaded rows
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub payments: Vec<PaymentRecord>,
    /// Row-level failures; the batch itself never fails on bad rows
    pub failures: Vec<ReconError>,
}

/// Pure transform from source-specific rows to canonical payments
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalize a typed record
    pub fn normalize(&self, input: &PaymentInput) -> ReconResult<PaymentRecord> {
        match input {
            PaymentInput::Ledger(entry) => Ok(self.normalize_ledger_entry(entry)),
            PaymentInput::Synced(tx) => Ok(self.normalize_synced(tx)),
        }
    }

    pub fn normalize_ledger_entry(&self, entry: &LedgerEntry) -> PaymentRecord {
        let mut payment = PaymentRecord::new(
            entry.amount.clone(),
            entry.entry_date,
            SourceType::LedgerEntry,
        );
        payment.external_id = entry.entry_id.clone();
        payment.purpose = non_blank(entry.description.as_deref());
        payment.counterpart_name = non_blank(entry.counterpart.as_deref());

        // the attributed obligor fills gaps the user left
        if let Some(hint) = &entry.obligor_hint {
            payment.obligor_hint = non_blank(Some(&hint.reference));
            if payment.counterpart_name.is_none() {
                payment.counterpart_name = non_blank(Some(&hint.full_name()));
            }
            payment.counterpart_iban = hint.iban.as_deref().map(normalize_iban);
        }
        payment
    }

    pub fn normalize_synced(&self, tx: &SyncedTransaction) -> PaymentRecord {
        let mut payment = PaymentRecord::new(
            tx.amount.clone(),
            tx.booking_date,
            SourceType::SyncedTransaction,
        );
        payment.external_id = Some(tx.transaction_id.clone());
        payment.counterpart_iban = non_blank(tx.counterpart_iban.as_deref())
            .map(|iban| normalize_iban(&iban));
        payment.counterpart_name = non_blank(tx.counterpart_name.as_deref());
        payment.purpose = non_blank(tx.remittance_info.as_deref());
        payment
    }

    /// Normalize one uploaded row using detected column roles
    ///
    /// `row_index` is used for error reporting. With an `upload_id` the
    /// external id is `"{upload_id}:{row_index}:{fingerprint}"`, so a
    /// replaced upload with different row content yields new payments.
    pub fn normalize_file_row(
        &self,
        columns: &ColumnMap,
        row: &[String],
        row_index: usize,
        upload_id: Option<&str>,
    ) -> ReconResult<PaymentRecord> {
        let cell = |role: ColumnRole| {
            columns
                .get(role)
                .and_then(|i| row.get(i))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let raw_amount = cell(ColumnRole::Amount).ok_or_else(|| ReconError::Parse {
            row: row_index,
            message: "amount is missing".to_string(),
        })?;
        let amount = parse_amount(raw_amount).ok_or_else(|| ReconError::Parse {
            row: row_index,
            message: format!("unreadable amount '{raw_amount}'"),
        })?;

        let occurred_on = match cell(ColumnRole::Date) {
            Some(raw) => match parse_date(raw, &self.config.date_formats) {
                Some(date) => date,
                None => self.date_fallback(row_index, raw)?,
            },
            None => self.date_fallback(row_index, "")?,
        };

        let mut payment = PaymentRecord::new(amount, occurred_on, SourceType::FileImport);
        payment.counterpart_iban = cell(ColumnRole::Iban).map(normalize_iban);
        payment.counterpart_name = cell(ColumnRole::Name).map(str::to_string);
        payment.purpose = cell(ColumnRole::Purpose).map(str::to_string);
        payment.external_id =
            upload_id.map(|id| format!("{id}:{row_index}:{}", row_fingerprint(row)));
        Ok(payment)
    }

    /// Normalize all rows of an upload; bad rows are collected, not fatal
    pub fn normalize_table(
        &self,
        headers: &[String],
        rows: &[Vec<String>],
        upload_id: Option<&str>,
    ) -> NormalizedBatch {
        let columns = detect_columns(headers);
        debug!(?columns, rows = rows.len(), "detected column roles");

        let mut batch = NormalizedBatch::default();
        for (index, row) in rows.iter().enumerate() {
            if row.iter().all(|v| v.trim().is_empty()) {
                continue;
            }
            match self.normalize_file_row(&columns, row, index, upload_id) {
                Ok(payment) => batch.payments.push(payment),
                Err(err) => {
                    warn!(row = index, error = %err, "skipping unreadable row");
                    batch.failures.push(err);
                }
            }
        }
        batch
    }

    fn date_fallback(&self, row_index: usize, raw: &str) -> ReconResult<NaiveDate> {
        if self.config.fallback_to_today {
            warn!(row = row_index, raw, "unparseable date, using today");
            Ok(chrono::Utc::now().date_naive())
        } else {
            Err(ReconError::Parse {
                row: row_index,
                message: format!("unreadable date '{raw}'"),
            })
        }
    }
}

/// Short SHA-256 digest of the trimmed cells of a row
pub fn row_fingerprint(row: &[String]) -> String {
    let mut hasher = Sha256::new();
    for cell in row {
        hasher.update(cell.trim().as_bytes());
        hasher.update([0x1f]);
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_normalize_table_collects_failures() {
        let normalizer = Normalizer::default();
        let headers = row(&["Buchungstag", "Betrag", "IBAN", "Verwendungszweck"]);
        let rows = vec![
            row(&["04.03.2024", "500,00", "DE89 3704 0044 0532 0130 00", "Miete März"]),
            row(&["05.03.2024", "abc", "", ""]),
            row(&["", "", "", ""]),
            row(&["06.03.2024", "-12,50", "", "Kontoführung"]),
        ];

        let batch = normalizer.normalize_table(&headers, &rows, Some("up-1"));
        assert_eq!(batch.payments.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert!(matches!(batch.failures[0], ReconError::Parse { row: 1, .. }));

        let first = &batch.payments[0];
        assert_eq!(first.amount, BigDecimal::from(500));
        assert_eq!(first.counterpart_iban.as_deref(), Some("DE89370400440532013000"));
        assert_eq!(first.purpose.as_deref(), Some("Miete März"));
        assert_eq!(
            first.external_id,
            Some(format!("up-1:0:{}", row_fingerprint(&rows[0])))
        );
        assert_eq!(first.source_type, SourceType::FileImport);

        assert!(!batch.payments[1].is_inbound());
    }

    #[test]
    fn test_row_fingerprint_tracks_content() {
        let a = row(&["04.03.2024", "500,00"]);
        let b = row(&[" 04.03.2024 ", "500,00"]);
        let c = row(&["04.03.2024", "320,00"]);
        assert_eq!(row_fingerprint(&a), row_fingerprint(&b));
        assert_ne!(row_fingerprint(&a), row_fingerprint(&c));
        assert_eq!(row_fingerprint(&a).len(), 16);
        // cell boundaries count
        assert_ne!(
            row_fingerprint(&row(&["ab", "c"])),
            row_fingerprint(&row(&["a", "bc"]))
        );
    }

    #[test]
    fn test_unreadable_date_falls_back_to_today() {
        let normalizer = Normalizer::default();
        let headers = row(&["Datum", "Betrag"]);
        let before = chrono::Utc::now().date_naive();
        let batch = normalizer.normalize_table(&headers, &[row(&["someday", "10,00"])], None);
        let after = chrono::Utc::now().date_naive();

        assert!(batch.failures.is_empty());
        assert_eq!(batch.payments.len(), 1);
        let date = batch.payments[0].occurred_on;
        assert!(date == before || date == after);
        assert_eq!(batch.payments[0].amount, BigDecimal::from(10));
    }

    #[test]
    fn test_strict_date_handling() {
        let normalizer = Normalizer::new(NormalizerConfig {
            fallback_to_today: false,
            ..NormalizerConfig::default()
        });
        let headers = row(&["Datum", "Betrag"]);
        let batch = normalizer.normalize_table(&headers, &[row(&["someday", "10"])], None);
        assert!(batch.payments.is_empty());
        assert_eq!(batch.failures.len(), 1);
    }

    #[test]
    fn test_ledger_entry_uses_obligor_hint() {
        let normalizer = Normalizer::default();
        let entry = LedgerEntry {
            entry_id: Some("cb-7".to_string()),
            amount: BigDecimal::from_str("450.00").unwrap(),
            entry_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            description: Some("Barzahlung Miete".to_string()),
            counterpart: None,
            obligor_hint: Some(
                Obligor::new("t1".to_string(), "Anna".to_string(), "Schmidt".to_string())
                    .with_iban("de12 5001 0517 0648 4898 90"),
            ),
        };

        let payment = normalizer
            .normalize(&PaymentInput::Ledger(entry))
            .unwrap();
        assert_eq!(payment.source_type, SourceType::LedgerEntry);
        assert_eq!(payment.counterpart_name.as_deref(), Some("Anna Schmidt"));
        assert_eq!(payment.counterpart_iban.as_deref(), Some("DE12500105170648489890"));
        assert_eq!(payment.external_id.as_deref(), Some("cb-7"));
        assert_eq!(payment.obligor_hint.as_deref(), Some("t1"));
    }

    #[test]
    fn test_synced_transaction_normalizes_iban() {
        let normalizer = Normalizer::default();
        let tx = SyncedTransaction {
            transaction_id: "tx-1".to_string(),
            amount: BigDecimal::from(500),
            booking_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            counterpart_iban: Some(" de89 3704 0044 0532 0130 00".to_string()),
            counterpart_name: Some("  ".to_string()),
            remittance_info: Some("Miete".to_string()),
        };
        let payment = normalizer.normalize(&PaymentInput::Synced(tx)).unwrap();
        assert_eq!(payment.counterpart_iban.as_deref(), Some("DE89370400440532013000"));
        assert_eq!(payment.counterpart_name, None);
        assert_eq!(payment.external_id.as_deref(), Some("tx-1"));
    }
}
