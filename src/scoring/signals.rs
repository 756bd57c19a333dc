//! Individual match signals
//!
//! Every signal returns its contribution in points, bounded by its weight,
//! together with human-readable reasons and warnings.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{Datelike, NaiveDate};

use crate::config::NameMatchConfig;
use crate::normalize::{name_parts, normalize_text, similarity, tokens};
use crate::scoring::weights::{AmountBands, ScoringWeights};
use crate::types::*;

const RENT_KEYWORDS: &[&str] = &[
    "miete",
    "mietzahlung",
    "mieter",
    "rent",
];

const GENERIC_LOCATION_WORDS: &[&str] = &[
    "wohnung", "apartment", "unit", "einheit", "nr", "no", "number", "app", "whg",
];

const MONTH_NAMES: [&[&str]; 12] = [
    &["januar", "january", "jan"],
    &["februar", "february", "feb"],
    &["marz", "maerz", "march"],
    &["april", "apr"],
    &["mai", "may"],
    &["juni", "june", "jun"],
    &["juli", "july", "jul"],
    &["august", "aug"],
    &["september", "sept", "sep"],
    &["oktober", "october", "okt", "oct"],
    &["november", "nov"],
    &["dezember", "december", "dez", "dec"],
];

/// Contribution of a single signal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalResult {
    pub points: f64,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl SignalResult {
    fn new(points: f64, reason: impl Into<String>) -> Self {
        Self {
            points,
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }

    fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Amount signal plus the portion of the payment that can be allocated
#[derive(Debug, Clone, PartialEq)]
pub struct AmountSignal {
    pub result: SignalResult,
    pub allocatable: BigDecimal,
}

/// Explicit obligor attribution, else exact IBAN comparison
///
/// Missing data scores zero, never negative.
pub fn identity_signal(
    attributed_to: Option<&str>,
    obligor_reference: &str,
    payment_iban: Option<&str>,
    obligor_iban: Option<&str>,
    weights: &ScoringWeights,
) -> SignalResult {
    match attributed_to {
        Some(reference) if reference == obligor_reference => {
            return SignalResult::new(
                weights.identity,
                format!("payment attributed to obligor {obligor_reference}"),
            );
        }
        Some(reference) => {
            return SignalResult::new(0.0, format!("payment attributed to obligor {reference}"))
                .with_warning(format!(
                    "payment was attributed to {reference}, not {obligor_reference}"
                ));
        }
        None => {}
    }

    match (payment_iban, obligor_iban) {
        (None, _) => SignalResult::new(0.0, "payment carries no IBAN"),
        (_, None) => SignalResult::new(0.0, "no IBAN on file for obligor"),
        (Some(paid), Some(known)) => {
            if crate::normalize::normalize_iban(paid) == crate::normalize::normalize_iban(known) {
                SignalResult::new(weights.identity, "IBAN matches obligor")
            } else {
                SignalResult::new(0.0, "IBAN differs from obligor")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NameHit {
    Full,
    Surname,
    Partial,
    Fuzzy(f64),
}

struct NameProfile {
    full: String,
    surname: String,
    parts: Vec<String>,
}

impl NameProfile {
    fn new(obligor: &Obligor, min_len: usize) -> Self {
        let mut parts: Vec<String> = name_parts(&obligor.last_name, min_len)
            .into_iter()
            .skip(1)
            .collect();
        for part in name_parts(&obligor.first_name, min_len) {
            if !parts.contains(&part) {
                parts.push(part);
            }
        }
        Self {
            full: normalize_text(&obligor.full_name()),
            surname: normalize_text(&obligor.last_name),
            parts,
        }
    }

    fn locate(&self, text: &str, config: &NameMatchConfig) -> Option<NameHit> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return None;
        }
        let padded = format!(" {normalized} ");
        let contains_words = |needle: &str| !needle.is_empty() && padded.contains(&format!(" {needle} "));

        if contains_words(&self.full) {
            return Some(NameHit::Full);
        }
        if contains_words(&self.surname) {
            return Some(NameHit::Surname);
        }
        if self.parts.iter().any(|p| contains_words(p)) {
            return Some(NameHit::Partial);
        }

        let surname_parts: Vec<&str> = self
            .surname
            .split(' ')
            .filter(|p| p.chars().count() >= config.min_token_len.max(4))
            .collect();
        let best = tokens(&normalized)
            .iter()
            .flat_map(|token| surname_parts.iter().map(move |part| similarity(token, part)))
            .fold(0.0_f64, f64::max);
        (best >= config.fuzzy_threshold).then_some(NameHit::Fuzzy(best))
    }
}

/// Obligor name against the counterpart name and memo
pub fn name_signal(
    counterpart_name: Option<&str>,
    purpose: Option<&str>,
    obligor: Option<&Obligor>,
    weights: &ScoringWeights,
    config: &NameMatchConfig,
) -> SignalResult {
    let Some(obligor) = obligor else {
        return SignalResult::new(0.0, "charge has no obligor");
    };
    if counterpart_name.is_none() && purpose.is_none() {
        return SignalResult::new(0.0, "payment carries no name");
    }

    let profile = NameProfile::new(obligor, config.min_token_len);
    let in_name = counterpart_name.and_then(|n| profile.locate(n, config));
    let in_memo = purpose.and_then(|p| profile.locate(p, config));

    // reference scale is a name weight of 30 points
    let scale = weights.name / 30.0;
    let name_points = match in_name {
        Some(NameHit::Full) => 30.0,
        Some(NameHit::Surname) => 25.0,
        Some(NameHit::Partial) => 18.0,
        Some(NameHit::Fuzzy(sim)) => 15.0 * sim,
        None => 0.0,
    };
    let memo_points = match in_memo {
        Some(NameHit::Full) | Some(NameHit::Surname) => 20.0,
        Some(NameHit::Partial) => 15.0,
        Some(NameHit::Fuzzy(sim)) => 10.0 * sim,
        None => 0.0,
    };
    let both = if in_name.is_some() && in_memo.is_some() {
        5.0
    } else {
        0.0
    };
    let points = ((name_points.max(memo_points) + both) * scale).min(weights.name);

    let best = match (in_name, in_memo) {
        (Some(hit), _) => Some((hit, "counterpart name")),
        (None, Some(hit)) => Some((hit, "memo")),
        (None, None) => None,
    };
    let full_name = obligor.full_name();
    match best {
        None => SignalResult::new(0.0, format!("name {full_name} not found")),
        Some((NameHit::Full, place)) => {
            SignalResult::new(points, format!("name {full_name} found in {place}"))
        }
        Some((NameHit::Surname, place)) => SignalResult::new(
            points,
            format!("surname {} found in {place}", obligor.last_name),
        ),
        Some((NameHit::Partial, place)) => SignalResult::new(
            points,
            format!("part of name {full_name} found in {place}"),
        )
        .with_warning(format!("name incomplete: only part of {full_name} found")),
        Some((NameHit::Fuzzy(sim), place)) => SignalResult::new(
            points,
            format!("similar name found in {place}"),
        )
        .with_warning(format!(
            "name deviates from {full_name} (similarity {:.0}%)",
            sim * 100.0
        )),
    }
}

/// Payment against the charge's remaining balance
///
/// Fails with [`ReconError::OverAllocationRejected`] when the charge is
/// settled or the payment exceeds the tolerated overpayment margin.
pub fn amount_signal(
    paid: &BigDecimal,
    charge: &Charge,
    bands: &AmountBands,
    weights: &ScoringWeights,
) -> ReconResult<AmountSignal> {
    let remaining = charge.remaining();
    if remaining <= BigDecimal::zero() {
        return Err(ReconError::OverAllocationRejected(format!(
            "charge {} is already settled",
            charge.id
        )));
    }
    if *paid <= BigDecimal::zero() {
        return Err(ReconError::OverAllocationRejected(
            "payment has nothing left to allocate".to_string(),
        ));
    }

    let difference = paid - &remaining;
    let ratio = (difference.abs() / &remaining).to_f64().unwrap_or(f64::MAX);
    let allocatable = if *paid < remaining {
        paid.clone()
    } else {
        remaining.clone()
    };
    let paid_text = format_amount(paid);
    let remaining_text = format_amount(&remaining);

    if difference < BigDecimal::zero() {
        let warning = format!(
            "{paid_text} paid, {} still outstanding (due {remaining_text})",
            format_amount(&difference.abs())
        );
        let result = if ratio <= bands.exact_ratio {
            SignalResult::new(weights.amount, "amount matches remaining balance")
        } else {
            match AmountBands::factor_for(&bands.underpayment, ratio) {
                Some(factor) => SignalResult::new(
                    weights.amount * factor,
                    format!("partial payment of {paid_text} towards {remaining_text}"),
                ),
                None => SignalResult::new(
                    0.0,
                    format!("amount does not fit: {paid_text} vs {remaining_text}"),
                ),
            }
        };
        return Ok(AmountSignal {
            result: result.with_warning(warning),
            allocatable,
        });
    }

    if difference.is_zero() {
        return Ok(AmountSignal {
            result: SignalResult::new(weights.amount, "amount matches remaining balance"),
            allocatable,
        });
    }

    let margin = bands.overpayment_margin(&remaining);
    if difference > margin {
        return Err(ReconError::OverAllocationRejected(format!(
            "{paid_text} exceeds remaining {remaining_text} of charge {} by more than {}",
            charge.id,
            format_amount(&margin)
        )));
    }

    let warning = format!(
        "{paid_text} paid, {} overpaid (due {remaining_text})",
        format_amount(&difference)
    );
    let factor = if ratio <= bands.exact_ratio {
        1.0
    } else {
        AmountBands::factor_for(&bands.overpayment, ratio).unwrap_or(0.0)
    };
    Ok(AmountSignal {
        result: SignalResult::new(
            weights.amount * factor,
            format!("overpayment of {paid_text} towards {remaining_text}"),
        )
        .with_warning(warning),
        allocatable,
    })
}

/// Step decay on the distance between payment date and due date
pub fn date_signal(occurred_on: NaiveDate, due_on: NaiveDate, weights: &ScoringWeights) -> SignalResult {
    let offset = (occurred_on - due_on).num_days();
    let days = offset.abs();
    let factor = match days {
        0 => 1.0,
        1..=2 => 0.93,
        3..=5 => 0.8,
        6..=7 => 0.67,
        8..=14 => 0.53,
        15..=21 => 0.33,
        22..=30 => 0.2,
        _ => 0.07,
    };
    let reason = match offset {
        0 => "paid on due date".to_string(),
        o if o < 0 => format!("paid {days} days before due date"),
        _ => format!("paid {days} days after due date"),
    };
    SignalResult::new(weights.date * factor, reason)
}

/// Rent keywords, the due month and location tokens in the memo
pub fn purpose_signal(
    purpose: Option<&str>,
    due_on: NaiveDate,
    location: Option<&Location>,
    weights: &ScoringWeights,
) -> SignalResult {
    let Some(purpose) = purpose else {
        return SignalResult::new(0.0, "payment carries no memo");
    };
    let memo = tokens(purpose);
    if memo.is_empty() {
        return SignalResult::new(0.0, "payment carries no memo");
    }

    // reference scale is a purpose weight of 10 points
    let scale = weights.purpose / 10.0;
    let mut points = 0.0;
    let mut found = Vec::new();

    if memo.iter().any(|token| {
        RENT_KEYWORDS
            .iter()
            .any(|k| token == k || token.starts_with(k) || token.ends_with(k))
    }) {
        points += 4.0;
        found.push("rent keyword".to_string());
    }

    if mentions_month(&memo, due_on) {
        points += 3.0;
        found.push("due month".to_string());
    }

    if let Some(location) = location {
        let hits = tokens(&location.label)
            .into_iter()
            .filter(|t| !GENERIC_LOCATION_WORDS.contains(&t.as_str()))
            .filter(|t| t.chars().count() >= 2 || t.chars().all(|c| c.is_ascii_digit()))
            .filter(|t| memo.contains(t))
            .count();
        if hits > 0 {
            points += (2.5 * hits as f64).min(5.0);
            found.push(format!("location {}", location.label));
        }
    }

    let points = (points * scale).min(weights.purpose);
    if found.is_empty() {
        SignalResult::new(0.0, "memo does not reference the charge")
    } else {
        SignalResult::new(points, format!("memo mentions {}", found.join(", ")))
    }
}

fn mentions_month(memo: &[String], due_on: NaiveDate) -> bool {
    let month = due_on.month();
    let names = MONTH_NAMES[month as usize - 1];
    if memo.iter().any(|t| names.contains(&t.as_str())) {
        return true;
    }

    // numeric forms such as "03/2024" or "3.24" survive normalization as two tokens
    let year = due_on.year();
    memo.windows(2).any(|pair| {
        let month_hit = pair[0].parse::<u32>().is_ok_and(|m| m == month);
        let year_hit = pair[1]
            .parse::<i32>()
            .is_ok_and(|y| y == year || y == year % 100);
        month_hit && year_hit
    })
}

/// Points awarded when several signals are strong at once
pub fn combination_bonus(signals: &SignalBreakdown, weights: &ScoringWeights) -> f64 {
    let strong = |points: f64, weight: f64, share: f64| weight > 0.0 && points >= weight * share;
    let count = [
        strong(signals.identity, weights.identity, 0.875),
        strong(signals.name, weights.name, 0.66),
        strong(signals.amount, weights.amount, 0.8),
        strong(signals.date, weights.date, 0.66),
        strong(signals.purpose, weights.purpose, 0.5),
    ]
    .iter()
    .filter(|s| **s)
    .count();

    if count >= 3 {
        ((count - 2) as f64 * weights.combination_step).min(weights.combination_bonus_cap)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn charge(due: &str) -> Charge {
        Charge::new(
            "c1".to_string(),
            "owner".to_string(),
            "t1".to_string(),
            "u1".to_string(),
            dec(due),
            date(2024, 3, 5),
        )
    }

    fn obligor(first: &str, last: &str) -> Obligor {
        Obligor::new("t1".to_string(), first.to_string(), last.to_string())
    }

    #[test]
    fn test_identity_signal() {
        let w = ScoringWeights::default();
        let hit = identity_signal(
            None,
            "t1",
            Some("DE89370400440532013000"),
            Some("de89 3704 0044 0532 0130 00"),
            &w,
        );
        assert_eq!(hit.points, 40.0);
        assert_eq!(identity_signal(None, "t1", None, Some("DE89"), &w).points, 0.0);
        assert_eq!(identity_signal(None, "t1", Some("DE89"), None, &w).points, 0.0);
        assert_eq!(identity_signal(None, "t1", Some("DE89"), Some("DE12"), &w).points, 0.0);
    }

    #[test]
    fn test_attribution_counts_as_identity() {
        let w = ScoringWeights::default();
        let own = identity_signal(Some("t1"), "t1", None, None, &w);
        assert_eq!(own.points, 40.0);
        assert!(own.warnings.is_empty());

        // attribution elsewhere outranks a matching IBAN
        let other = identity_signal(Some("t2"), "t1", Some("DE89"), Some("DE89"), &w);
        assert_eq!(other.points, 0.0);
        assert_eq!(other.warnings.len(), 1);
    }

    #[test]
    fn test_flat_words_are_not_rent_keywords() {
        let w = ScoringWeights::default();
        let due = date(2024, 3, 5);
        for memo in ["Wohnung Umzug", "apartment deposit", "unit 4 repair"] {
            assert_eq!(purpose_signal(Some(memo), due, None, &w).points, 0.0, "{memo}");
        }
        assert_eq!(purpose_signal(Some("Mietzahlung"), due, None, &w).points, 4.0);
    }

    #[test]
    fn test_name_signal_levels() {
        let w = ScoringWeights::default();
        let c = NameMatchConfig::default();
        let o = obligor("Anna", "Schmidt");

        let full = name_signal(Some("Anna Schmidt"), None, Some(&o), &w, &c);
        assert_eq!(full.points, 30.0);

        let surname = name_signal(Some("SCHMIDT"), None, Some(&o), &w, &c);
        assert_eq!(surname.points, 25.0);

        let both = name_signal(Some("Schmidt"), Some("Miete Schmidt"), Some(&o), &w, &c);
        assert_eq!(both.points, 30.0);

        let memo_only = name_signal(None, Some("Miete A. Schmidt"), Some(&o), &w, &c);
        assert_eq!(memo_only.points, 20.0);

        let fuzzy = name_signal(Some("Schmitt"), None, Some(&o), &w, &c);
        assert!(fuzzy.points > 0.0 && fuzzy.points <= 15.0);
        assert_eq!(fuzzy.warnings.len(), 1);

        let none = name_signal(Some("Meyer"), None, Some(&o), &w, &c);
        assert_eq!(none.points, 0.0);
    }

    #[test]
    fn test_name_signal_hyphenated_surname() {
        let w = ScoringWeights::default();
        let c = NameMatchConfig::default();
        let o = obligor("Deniz", "Oßmann-Cavrar");
        let partial = name_signal(Some("D. Ossmann"), None, Some(&o), &w, &c);
        assert_eq!(partial.points, 18.0);
        assert!(partial.warnings[0].contains("name incomplete"));
    }

    #[test]
    fn test_amount_signal_exact_and_partial() {
        let w = ScoringWeights::default();
        let bands = AmountBands::default();
        let c = charge("500");

        let exact = amount_signal(&dec("500.00"), &c, &bands, &w).unwrap();
        assert_eq!(exact.result.points, 30.0);
        assert_eq!(exact.allocatable, dec("500"));
        assert!(exact.result.warnings.is_empty());

        let partial = amount_signal(&dec("300.00"), &c, &bands, &w).unwrap();
        assert_eq!(partial.result.points, 24.0);
        assert_eq!(partial.allocatable, dec("300"));
        assert!(partial.result.warnings[0].contains("300.00 paid, 200.00 still outstanding"));

        let tiny = amount_signal(&dec("50.00"), &c, &bands, &w).unwrap();
        assert_eq!(tiny.result.points, 0.0);
    }

    #[test]
    fn test_amount_signal_overpayment() {
        let w = ScoringWeights::default();
        let bands = AmountBands::default();
        let c = charge("500");

        let over = amount_signal(&dec("550.00"), &c, &bands, &w).unwrap();
        assert_eq!(over.result.points, 24.0);
        assert_eq!(over.allocatable, dec("500"));
        assert!(over.result.warnings[0].contains("550.00 paid, 50.00 overpaid"));

        let rejected = amount_signal(&dec("650.00"), &c, &bands, &w);
        assert!(matches!(rejected, Err(ReconError::OverAllocationRejected(_))));
    }

    #[test]
    fn test_amount_signal_settled_charge_rejected() {
        let mut c = charge("500");
        c.amount_paid = dec("500");
        let result = amount_signal(&dec("500"), &c, &AmountBands::default(), &ScoringWeights::default());
        assert!(matches!(result, Err(ReconError::OverAllocationRejected(_))));
    }

    #[test]
    fn test_date_signal_decay() {
        let w = ScoringWeights::default();
        let due = date(2024, 3, 5);
        assert_eq!(date_signal(due, due, &w).points, 15.0);
        let near = date_signal(date(2024, 3, 4), due, &w).points;
        let week = date_signal(date(2024, 3, 12), due, &w).points;
        let far = date_signal(date(2024, 6, 1), due, &w).points;
        assert!(near > week && week > far && far > 0.0);
    }

    #[test]
    fn test_purpose_signal() {
        let w = ScoringWeights::default();
        let due = date(2024, 3, 5);
        let location = Location::new("u1".to_string(), "Wohnung 3 links".to_string());

        let result = purpose_signal(Some("Miete März"), due, None, &w);
        assert_eq!(result.points, 7.0);

        let numeric = purpose_signal(Some("Kaltmiete 03/2024"), due, None, &w);
        assert_eq!(numeric.points, 7.0);

        let capped = purpose_signal(Some("Miete März Whg 3 links"), due, Some(&location), &w);
        assert_eq!(capped.points, 10.0);

        assert_eq!(purpose_signal(Some("Rechnung 4711"), due, None, &w).points, 0.0);
        assert_eq!(purpose_signal(None, due, None, &w).points, 0.0);
    }

    #[test]
    fn test_combination_bonus() {
        let w = ScoringWeights::default();
        let signals = SignalBreakdown {
            identity: 0.0,
            name: 25.0,
            amount: 30.0,
            date: 13.95,
            purpose: 7.0,
            combination_bonus: 0.0,
        };
        assert_eq!(combination_bonus(&signals, &w), 6.0);

        let weak = SignalBreakdown {
            amount: 30.0,
            date: 15.0,
            ..SignalBreakdown::default()
        };
        assert_eq!(combination_bonus(&weak, &w), 0.0);

        let all = SignalBreakdown {
            identity: 40.0,
            name: 30.0,
            amount: 30.0,
            date: 15.0,
            purpose: 10.0,
            combination_bonus: 0.0,
        };
        assert_eq!(combination_bonus(&all, &w), 8.0);
    }
}
