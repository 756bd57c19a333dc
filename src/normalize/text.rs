//! Text normalization and similarity helpers

use regex::Regex;
use std::sync::OnceLock;

fn non_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]|_").expect("invalid non-word regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid whitespace regex"))
}

fn fold_char(c: char, out: &mut String) {
    match c {
        'ä' | 'á' | 'à' | 'â' | 'ã' | 'å' => out.push('a'),
        'ö' | 'ó' | 'ò' | 'ô' | 'õ' | 'ø' => out.push('o'),
        'ü' | 'ú' | 'ù' | 'û' => out.push('u'),
        'é' | 'è' | 'ê' | 'ë' => out.push('e'),
        'í' | 'ì' | 'î' | 'ï' => out.push('i'),
        'ç' => out.push('c'),
        'ñ' => out.push('n'),
        'ß' => out.push_str("ss"),
        other => out.push(other),
    }
}

/// Lowercase, fold diacritics, turn punctuation into spaces and collapse
/// whitespace: `"Oßmann-Cavrar, Miete März"` becomes `"ossmann cavrar miete marz"`.
pub fn normalize_text(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        fold_char(c, &mut folded);
    }
    let spaced = non_word_regex().replace_all(&folded, " ");
    whitespace_regex()
        .replace_all(&spaced, " ")
        .trim()
        .to_string()
}

/// Strip all whitespace and uppercase
pub fn normalize_iban(iban: &str) -> String {
    iban.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// Normalized whitespace-separated tokens of a text
pub fn tokens(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// The normalized full name followed by its hyphen/space separated parts,
/// dropping parts shorter than `min_len` and duplicates.
pub fn name_parts(name: &str, min_len: usize) -> Vec<String> {
    let full = normalize_text(name);
    if full.is_empty() {
        return Vec::new();
    }

    let mut parts = vec![full.clone()];
    for part in full.split(' ') {
        if part.chars().count() >= min_len && !parts.iter().any(|p| p == part) {
            parts.push(part.to_string());
        }
    }
    parts
}

/// Levenshtein edit distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1] derived from the edit distance
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}
