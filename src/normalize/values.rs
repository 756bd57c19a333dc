//! Lenient parsing of amounts and dates from untrusted text

use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate};
use std::str::FromStr;

const CURRENCY_MARKERS: &[&str] = &["EUR", "USD", "GBP", "CHF", "€", "$", "£"];

/// Parse a monetary amount as written in bank exports
///
/// Accepts `.` or `,` as decimal separator, thousands separators, a leading
/// `+`/`-`, a trailing minus, parentheses for negatives and currency markers.
/// When only commas are present a single comma is the decimal separator.
pub fn parse_amount(raw: &str) -> Option<BigDecimal> {
    let mut text = raw.trim().to_uppercase();
    for marker in CURRENCY_MARKERS {
        text = text.replace(marker, "");
    }
    let mut text: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'')
        .collect();
    if text.is_empty() {
        return None;
    }

    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }
    if let Some(rest) = text.strip_suffix('-') {
        negative = !negative;
        text = rest.to_string();
    }
    if let Some(rest) = text.strip_prefix('-') {
        negative = !negative;
        text = rest.to_string();
    } else if let Some(rest) = text.strip_prefix('+') {
        text = rest.to_string();
    }

    let canonical = canonical_decimal(&text)?;
    let value = BigDecimal::from_str(&canonical).ok()?;
    Some(if negative { -value } else { value })
}

fn canonical_decimal(text: &str) -> Option<String> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }

    let last_dot = text.rfind('.');
    let last_comma = text.rfind(',');
    let canonical = match (last_dot, last_comma) {
        // both present: whichever comes last is the decimal separator
        (Some(dot), Some(comma)) if dot > comma => text.replace(',', ""),
        (Some(_), Some(_)) => text.replace('.', "").replace(',', "."),
        (None, Some(_)) if text.matches(',').count() == 1 => text.replace(',', "."),
        (None, Some(_)) => text.replace(',', ""),
        (Some(_), None) if text.matches('.').count() > 1 => text.replace('.', ""),
        _ => text.to_string(),
    };

    if canonical.is_empty() || canonical == "." {
        None
    } else {
        Some(canonical)
    }
}

/// Parse a date trying each `chrono` format in order
///
/// A trailing time component (`2024-03-04 10:15:00`, `2024-03-04T10:15`) is
/// ignored. Four-digit year formats also accept two digits, so results
/// before 1900 are skipped in favour of a later format.
pub fn parse_date<S: AsRef<str>>(raw: &str, formats: &[S]) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    let date_part = text
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()
        .unwrap_or(text);

    formats.iter().find_map(|format| {
        NaiveDate::parse_from_str(text, format.as_ref())
            .or_else(|_| NaiveDate::parse_from_str(date_part, format.as_ref()))
            .ok()
            .filter(|date| date.year() >= 1900)
    })
}
