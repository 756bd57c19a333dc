//! Signal weights and amount tolerance bands

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Maximum points each signal can contribute to a match score
///
/// The weights are deliberately oversubscribed; the final score is clamped
/// to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Exact IBAN match
    pub identity: f64,
    pub name: f64,
    pub amount: f64,
    pub date: f64,
    pub purpose: f64,
    /// Upper bound of the bonus for several strong signals
    pub combination_bonus_cap: f64,
    /// Bonus points per strong signal beyond the second
    pub combination_step: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            identity: 40.0,
            name: 30.0,
            amount: 30.0,
            date: 15.0,
            purpose: 10.0,
            combination_bonus_cap: 8.0,
            combination_step: 3.0,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> ReconResult<()> {
        let all = [
            ("identity", self.identity),
            ("name", self.name),
            ("amount", self.amount),
            ("date", self.date),
            ("purpose", self.purpose),
            ("combination_bonus_cap", self.combination_bonus_cap),
            ("combination_step", self.combination_step),
        ];
        for (label, value) in all {
            if !value.is_finite() || value < 0.0 {
                return Err(ReconError::Config(format!(
                    "weight '{label}' must be a non-negative number, got {value}"
                )));
            }
        }

        // identity > name/amount > date > purpose
        if self.identity < self.name || self.identity < self.amount {
            return Err(ReconError::Config(
                "identity weight must not be lower than name or amount".to_string(),
            ));
        }
        if self.name.min(self.amount) < self.date {
            return Err(ReconError::Config(
                "date weight must not exceed name or amount".to_string(),
            ));
        }
        if self.date < self.purpose {
            return Err(ReconError::Config(
                "purpose weight must not exceed date".to_string(),
            ));
        }

        Ok(())
    }
}

/// One step of an amount tolerance table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountBand {
    /// Inclusive upper bound of the deviation ratio this band covers
    pub max_ratio: f64,
    /// Fraction of the amount weight awarded inside this band
    pub factor: f64,
}

impl AmountBand {
    pub const fn new(max_ratio: f64, factor: f64) -> Self {
        Self { max_ratio, factor }
    }
}

/// Tolerance rules for comparing a payment with a charge's remaining balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountBands {
    /// Deviation treated as an exact match
    pub exact_ratio: f64,
    /// Bands for payments below the remaining balance, by deficit ratio
    pub underpayment: Vec<AmountBand>,
    /// Bands for payments above the remaining balance, by excess ratio
    pub overpayment: Vec<AmountBand>,
    /// Overpayments beyond this multiple of the remaining balance are rejected
    pub overpayment_ratio_cap: f64,
    /// Absolute ceiling on tolerated overpayment
    pub overpayment_ceiling: BigDecimal,
}

impl Default for AmountBands {
    fn default() -> Self {
        Self {
            exact_ratio: 0.01,
            underpayment: vec![
                AmountBand::new(0.20, 0.9),
                AmountBand::new(0.50, 0.8),
                AmountBand::new(0.80, 0.6),
            ],
            overpayment: vec![
                AmountBand::new(0.20, 0.8),
                AmountBand::new(0.50, 0.6),
                AmountBand::new(1.00, 0.4),
                AmountBand::new(f64::MAX, 0.2),
            ],
            overpayment_ratio_cap: 2.0,
            overpayment_ceiling: BigDecimal::from(100),
        }
    }
}

impl AmountBands {
    /// Largest tolerated overpayment for a charge with the given remaining balance
    pub fn overpayment_margin(&self, remaining: &BigDecimal) -> BigDecimal {
        let relative = remaining * BigDecimal::try_from(self.overpayment_ratio_cap)
            .unwrap_or_else(|_| BigDecimal::from(0));
        if relative < self.overpayment_ceiling {
            relative
        } else {
            self.overpayment_ceiling.clone()
        }
    }

    /// Factor for a deviation ratio, `None` when no band covers it
    pub fn factor_for(bands: &[AmountBand], ratio: f64) -> Option<f64> {
        bands
            .iter()
            .find(|band| ratio <= band.max_ratio)
            .map(|band| band.factor)
    }

    pub fn validate(&self) -> ReconResult<()> {
        if !(0.0..1.0).contains(&self.exact_ratio) {
            return Err(ReconError::Config(format!(
                "exact_ratio must be in [0, 1), got {}",
                self.exact_ratio
            )));
        }
        validate_bands("underpayment", &self.underpayment)?;
        validate_bands("overpayment", &self.overpayment)?;

        if !self.overpayment_ratio_cap.is_finite() || self.overpayment_ratio_cap < 0.0 {
            return Err(ReconError::Config(
                "overpayment_ratio_cap must be non-negative".to_string(),
            ));
        }
        if self.overpayment_ceiling < BigDecimal::from(0) {
            return Err(ReconError::Config(
                "overpayment_ceiling must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

// Bands must widen while their factor never grows, which keeps the amount
// signal monotonic in precision.
fn validate_bands(label: &str, bands: &[AmountBand]) -> ReconResult<()> {
    let mut previous: Option<&AmountBand> = None;
    for band in bands {
        if !(0.0..=1.0).contains(&band.factor) {
            return Err(ReconError::Config(format!(
                "{label} band factor must be in [0, 1], got {}",
                band.factor
            )));
        }
        if let Some(prev) = previous {
            if band.max_ratio <= prev.max_ratio {
                return Err(ReconError::Config(format!(
                    "{label} bands must be sorted by ascending max_ratio"
                )));
            }
            if band.factor > prev.factor {
                return Err(ReconError::Config(format!(
                    "{label} band factors must not increase with the deviation"
                )));
            }
        }
        previous = Some(band);
    }
    Ok(())
}
