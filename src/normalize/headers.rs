//! Column role detection for uploaded statements with unknown layout
//!
//! Detection is driven by [`HEADER_RULES`], a priority-ordered table. Each
//! rule is tried in three passes: exact aliases first, then substring
//! patterns, then looser fallback patterns for roles still unresolved. A
//! column claimed by one role is never reused by another.

use serde::{Deserialize, Serialize};

use crate::normalize::text::normalize_text;

/// Semantic meaning of an uploaded column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Date,
    Amount,
    Iban,
    Name,
    Purpose,
}

/// Matching rule for one column role; all patterns are in normalized form
#[derive(Debug, Clone, Copy)]
pub struct HeaderRule {
    pub role: ColumnRole,
    /// Whole-header aliases, highest priority first
    pub exact: &'static [&'static str],
    /// Substrings accepted when no alias matched
    pub contains: &'static [&'static str],
    /// Substrings that disqualify a header for this role
    pub excludes: &'static [&'static str],
    /// Looser substrings tried in the last pass
    pub fallback: &'static [&'static str],
}

pub const HEADER_RULES: &[HeaderRule] = &[
    HeaderRule {
        role: ColumnRole::Date,
        exact: &[
            "buchungstag",
            "buchungsdatum",
            "valutadatum",
            "datum",
            "date",
            "booking date",
            "value date",
            "transaction date",
        ],
        contains: &["buchungstag", "buchungsdatum", "valuta", "booking date"],
        excludes: &[],
        fallback: &["datum", "date"],
    },
    HeaderRule {
        role: ColumnRole::Amount,
        exact: &["betrag", "amount", "betrag eur", "amount eur", "umsatz"],
        contains: &["betrag", "amount"],
        excludes: &["lastschrift", "ursprungsbetrag", "original amount"],
        fallback: &["summe", "total", "wert", "value"],
    },
    HeaderRule {
        role: ColumnRole::Iban,
        exact: &[
            "iban",
            "kontonummer iban",
            "iban auftraggeber",
            "iban zahlungspflichtiger",
            "counterparty iban",
        ],
        contains: &["iban"],
        excludes: &["eigene", "own"],
        fallback: &["kontonummer", "account number", "konto"],
    },
    HeaderRule {
        role: ColumnRole::Name,
        exact: &[
            "begunstigter zahlungspflichtiger",
            "beguenstigter zahlungspflichtiger",
            "begunstigter",
            "beguenstigter",
            "zahlungspflichtiger",
            "auftraggeber",
            "name",
            "empfaenger",
            "empfanger",
            "payer",
            "counterparty",
        ],
        contains: &[
            "name",
            "begunstigter",
            "beguenstigter",
            "zahlungspflichtiger",
            "empfanger",
        ],
        excludes: &["bank", "kontoinhaber"],
        fallback: &["sender", "absender", "auftraggeber", "payee"],
    },
    HeaderRule {
        role: ColumnRole::Purpose,
        exact: &[
            "verwendungszweck",
            "purpose",
            "reference",
            "remittance information",
            "memo",
            "description",
        ],
        contains: &["verwendungszweck", "purpose", "remittance"],
        excludes: &[],
        fallback: &["buchungstext", "zweck", "info", "text", "memo", "beschreibung"],
    },
];

/// Column index per detected role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub date: Option<usize>,
    pub amount: Option<usize>,
    pub iban: Option<usize>,
    pub name: Option<usize>,
    pub purpose: Option<usize>,
}

impl ColumnMap {
    pub fn get(&self, role: ColumnRole) -> Option<usize> {
        match role {
            ColumnRole::Date => self.date,
            ColumnRole::Amount => self.amount,
            ColumnRole::Iban => self.iban,
            ColumnRole::Name => self.name,
            ColumnRole::Purpose => self.purpose,
        }
    }

    fn set(&mut self, role: ColumnRole, index: usize) {
        let slot = match role {
            ColumnRole::Date => &mut self.date,
            ColumnRole::Amount => &mut self.amount,
            ColumnRole::Iban => &mut self.iban,
            ColumnRole::Name => &mut self.name,
            ColumnRole::Purpose => &mut self.purpose,
        };
        *slot = Some(index);
    }
}

/// Assign column roles using the default rule table
pub fn detect_columns(headers: &[String]) -> ColumnMap {
    detect_columns_with(HEADER_RULES, headers)
}

/// Assign column roles using a custom rule table
pub fn detect_columns_with(rules: &[HeaderRule], headers: &[String]) -> ColumnMap {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_text(h)).collect();
    let mut claimed = vec![false; headers.len()];
    let mut map = ColumnMap::default();

    let excluded = |rule: &HeaderRule, header: &str| {
        rule.excludes.iter().any(|pattern| header.contains(pattern))
    };

    // exact aliases
    for rule in rules {
        let hit = rule.exact.iter().find_map(|alias| {
            normalized
                .iter()
                .enumerate()
                .find(|(i, h)| !claimed[*i] && h.as_str() == *alias)
                .map(|(i, _)| i)
        });
        if let Some(index) = hit {
            claimed[index] = true;
            map.set(rule.role, index);
        }
    }

    // substring patterns, then fallbacks
    for pass in 0..2 {
        for rule in rules {
            if map.get(rule.role).is_some() {
                continue;
            }
            let patterns = if pass == 0 { rule.contains } else { rule.fallback };
            let hit = patterns.iter().find_map(|pattern| {
                normalized
                    .iter()
                    .enumerate()
                    .find(|(i, h)| {
                        !claimed[*i] && h.contains(pattern) && !excluded(rule, h.as_str())
                    })
                    .map(|(i, _)| i)
            });
            if let Some(index) = hit {
                claimed[index] = true;
                map.set(rule.role, index);
            }
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_german_bank_export() {
        let map = detect_columns(&headers(&[
            "Auftragskonto",
            "Buchungstag",
            "Valutadatum",
            "Buchungstext",
            "Verwendungszweck",
            "Beguenstigter/Zahlungspflichtiger",
            "Kontonummer/IBAN",
            "Betrag",
            "Waehrung",
        ]));
        assert_eq!(map.date, Some(1));
        assert_eq!(map.purpose, Some(4));
        assert_eq!(map.name, Some(5));
        assert_eq!(map.iban, Some(6));
        assert_eq!(map.amount, Some(7));
    }

    #[test]
    fn test_exact_alias_beats_substring() {
        // "Ursprungsbetrag" must not be taken for the amount
        let map = detect_columns(&headers(&["Ursprungsbetrag", "Datum", "Betrag (€)"]));
        assert_eq!(map.amount, Some(2));
        assert_eq!(map.date, Some(1));
    }

    #[test]
    fn test_english_headers() {
        let map = detect_columns(&headers(&["Booking Date", "Amount", "IBAN", "Purpose"]));
        assert_eq!(map.date, Some(0));
        assert_eq!(map.amount, Some(1));
        assert_eq!(map.iban, Some(2));
        assert_eq!(map.purpose, Some(3));
        assert_eq!(map.name, None);
    }

    #[test]
    fn test_fallback_patterns() {
        let map = detect_columns(&headers(&["Wertstellungsdatum", "Summe", "Absender", "Info"]));
        assert_eq!(map.date, Some(0));
        assert_eq!(map.amount, Some(1));
        assert_eq!(map.name, Some(2));
        assert_eq!(map.purpose, Some(3));
    }

    #[test]
    fn test_umlaut_name_headers_hit_exact_aliases() {
        let map = detect_columns(&headers(&["Begünstigter", "Name"]));
        assert_eq!(map.name, Some(0));

        let map = detect_columns(&headers(&["Name", "Begünstigter/Zahlungspflichtiger"]));
        assert_eq!(map.name, Some(1));
    }

    #[test]
    fn test_duplicate_headers_resolve_to_first() {
        let map = detect_columns(&headers(&["Betrag", "Betrag"]));
        assert_eq!(map.amount, Some(0));
    }
}
