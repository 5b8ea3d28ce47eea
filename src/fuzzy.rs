//! # Fuzzy matching
//!
//! Approximate string comparison used to resolve free-text terms against schema
//! vocabulary. All scores are on a 0-100 scale (100 = identical, case-insensitive).
//!
//! - [`ratio`]: normalised Levenshtein similarity of the two whole strings.
//! - [`partial_ratio`]: best [`ratio`] of the shorter string against every equally long
//!   window of the longer one.
//! - [`weighted_ratio`]: [`ratio`] for strings of similar length, otherwise the better of
//!   [`ratio`] and a scaled-down [`partial_ratio`], so that `salary` scores well against
//!   `employees.annual_salary` without an exact hit outranking everything.
//! - [`extract`]: rank candidates by [`weighted_ratio`].
//! - [`map_term_to_columns`]: rank every `table.column` of a schema snapshot.

use serde::Serialize;

use crate::catalog::SchemaSnapshot;

/// Length ratio above which partial matches are considered.
const PARTIAL_LENGTH_RATIO: f64 = 1.5;
/// Length ratio above which partial matches are discounted more heavily.
const LONG_PARTIAL_LENGTH_RATIO: f64 = 8.0;
const PARTIAL_SCALE: f64 = 0.9;
const LONG_PARTIAL_SCALE: f64 = 0.6;

/// A candidate and its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatch {
    pub choice: String,
    pub score: f64,
}

/// Case-insensitive Levenshtein edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().flat_map(char::to_lowercase).collect();
    let b: Vec<char> = b.chars().flat_map(char::to_lowercase).collect();
    levenshtein_chars(&a, &b)
}

fn levenshtein_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two rolling rows instead of the full matrix.
    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr_row[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr_row[j] = (prev_row[j] + 1)
                .min(curr_row[j - 1] + 1)
                .min(prev_row[j - 1] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 100.0;
    }
    let distance = levenshtein_chars(a, b);
    100.0 * (longest - distance) as f64 / longest as f64
}

fn lowered(s: &str) -> Vec<char> {
    s.chars().flat_map(char::to_lowercase).collect()
}

/// Normalised Levenshtein similarity, 0-100.
pub fn ratio(a: &str, b: &str) -> f64 {
    ratio_chars(&lowered(a), &lowered(b))
}

/// Best [`ratio`] of the shorter string against any window of the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (a, b) = (lowered(a), lowered(b));
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }

    long.windows(short.len())
        .map(|window| ratio_chars(&short, window))
        .fold(0.0, f64::max)
}

/// Length-aware blend of [`ratio`] and [`partial_ratio`], 0-100.
pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let (la, lb) = (lowered(a), lowered(b));
    if la.is_empty() || lb.is_empty() {
        return 0.0;
    }

    let base = ratio_chars(&la, &lb);
    let length_ratio = la.len().max(lb.len()) as f64 / la.len().min(lb.len()) as f64;
    if length_ratio < PARTIAL_LENGTH_RATIO {
        return base;
    }

    let scale = if length_ratio < LONG_PARTIAL_LENGTH_RATIO {
        PARTIAL_SCALE
    } else {
        LONG_PARTIAL_SCALE
    };
    base.max(partial_ratio(a, b) * scale)
}

/// Rank `choices` by [`weighted_ratio`] against `term`, best first, at most `limit`.
/// Equal scores keep the order of `choices`.
pub fn extract<I, S>(term: &str, choices: I, limit: usize) -> Vec<FuzzyMatch>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut matches: Vec<FuzzyMatch> = choices
        .into_iter()
        .map(|choice| {
            let choice = choice.into();
            FuzzyMatch {
                score: weighted_ratio(term, &choice),
                choice,
            }
        })
        .collect();
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(limit);
    matches
}

/// Best match for `term` among `choices` if it reaches `threshold`.
pub fn best_match<I, S>(term: &str, choices: I, threshold: f64) -> Option<FuzzyMatch>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    extract(term, choices, 1)
        .into_iter()
        .next()
        .filter(|m| m.score >= threshold)
}

/// Best match for `term` among `choices` by whole-string [`ratio`] if it reaches
/// `threshold`. Unlike [`best_match`], a short choice never scores highly just because it
/// occurs inside `term`.
pub fn best_whole_match<I, S>(term: &str, choices: I, threshold: f64) -> Option<FuzzyMatch>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    choices
        .into_iter()
        .map(|choice| {
            let choice = choice.into();
            FuzzyMatch {
                score: ratio(term, &choice),
                choice,
            }
        })
        .filter(|m| m.score >= threshold)
        .fold(None, |best: Option<FuzzyMatch>, m| match best {
            Some(b) if b.score >= m.score => Some(b),
            _ => Some(m),
        })
}

/// Rank every `table.column` in `schema` by similarity to a natural-language term.
pub fn map_term_to_columns(term: &str, schema: &SchemaSnapshot, top_n: usize) -> Vec<FuzzyMatch> {
    let choices = schema.iter().flat_map(|(table, meta)| {
        meta.columns
            .iter()
            .map(move |column| format!("{}.{}", table, column.name))
    });
    extract(term, choices, top_n)
}
