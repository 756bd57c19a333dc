//! Engine configuration, loadable from TOML

use serde::{Deserialize, Serialize};

use crate::scoring::{AmountBands, ScoringWeights};
use crate::types::*;

/// Complete reconciliation configuration
///
/// Every section is optional in TOML and falls back to its defaults:
///
/// ```toml
/// [weights]
/// identity = 40.0
///
/// [thresholds]
/// ledger_entry = 0.35
///
/// [resolver]
/// ambiguity_margin = 15.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub weights: ScoringWeights,
    pub amount: AmountBands,
    pub names: NameMatchConfig,
    pub thresholds: ThresholdConfig,
    pub resolver: ResolverConfig,
    pub allocation: AllocationPolicy,
    pub normalizer: NormalizerConfig,
}

/// Minimum confidence for an automatic match, per payment source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub file_import: f64,
    pub ledger_entry: f64,
    pub synced_transaction: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            file_import: 0.6,
            ledger_entry: 0.4,
            synced_transaction: 0.6,
        }
    }
}

impl ThresholdConfig {
    pub fn for_source(&self, source_type: SourceType) -> f64 {
        match source_type {
            SourceType::FileImport => self.file_import,
            SourceType::LedgerEntry => self.ledger_entry,
            SourceType::SyncedTransaction => self.synced_transaction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Score lead (in points) the best candidate needs over the runner-up
    /// to be matched despite other candidates passing the threshold
    pub ambiguity_margin: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ambiguity_margin: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameMatchConfig {
    /// Name parts shorter than this are ignored
    pub min_token_len: usize,
    /// Minimum normalized edit-distance similarity for a fuzzy name hit
    pub fuzzy_threshold: f64,
}

impl Default for NameMatchConfig {
    fn default() -> Self {
        Self {
            min_token_len: 2,
            fuzzy_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationPolicy {
    /// Allow manual matches to exceed the remaining balance up to the
    /// tolerated overpayment margin
    pub allow_manual_overpayment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// `chrono` format strings tried in order
    pub date_formats: Vec<String>,
    /// Use today's date when no format matches instead of failing the row
    pub fallback_to_today: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            date_formats: [
                "%d.%m.%Y", "%d.%m.%y", "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y%m%d", "%d-%m-%Y",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
            fallback_to_today: true,
        }
    }
}

impl ReconConfig {
    pub fn from_toml(input: &str) -> ReconResult<Self> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReconResult<()> {
        self.weights.validate()?;
        self.amount.validate()?;

        for source in SourceType::all() {
            let threshold = self.thresholds.for_source(source);
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ReconError::Config(format!(
                    "threshold for {source} must be in [0, 1], got {threshold}"
                )));
            }
        }

        if !self.resolver.ambiguity_margin.is_finite() || self.resolver.ambiguity_margin < 0.0 {
            return Err(ReconError::Config(
                "ambiguity_margin must be non-negative".to_string(),
            ));
        }

        if self.names.min_token_len == 0 {
            return Err(ReconError::Config(
                "min_token_len must be at least 1".to_string(),
            ));
        }
        if !(self.names.fuzzy_threshold > 0.0 && self.names.fuzzy_threshold <= 1.0) {
            return Err(ReconError::Config(format!(
                "fuzzy_threshold must be in (0, 1], got {}",
                self.names.fuzzy_threshold
            )));
        }

        if self.normalizer.date_formats.is_empty() {
            return Err(ReconError::Config(
                "at least one date format is required".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = ReconConfig::from_toml("").unwrap();
        assert_eq!(config, ReconConfig::default());
        assert_eq!(config.thresholds.for_source(SourceType::LedgerEntry), 0.4);
        assert_eq!(config.resolver.ambiguity_margin, 20.0);
    }

    #[test]
    fn test_partial_override() {
        let input = r#"
[weights]
purpose = 8.0

[thresholds]
synced_transaction = 0.7

[amount]
overpayment_ceiling = "50.00"
"#;
        let config = ReconConfig::from_toml(input).unwrap();
        assert_eq!(config.weights.purpose, 8.0);
        assert_eq!(config.weights.identity, 40.0);
        assert_eq!(config.thresholds.synced_transaction, 0.7);
        assert_eq!(config.thresholds.file_import, 0.6);
        assert_eq!(
            config.amount.overpayment_ceiling,
            bigdecimal::BigDecimal::from(50)
        );
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = ReconConfig::from_toml("[thresholds]\nfile_import = 1.5\n").unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = ReconConfig::from_toml("[weights\nidentity = ").unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));
    }

    #[test]
    fn test_empty_date_formats_rejected() {
        let err = ReconConfig::from_toml("[normalizer]\ndate_formats = []\n").unwrap_err();
        assert!(err.to_string().contains("date format"));
    }
}
