//! Deterministic text reducers shared by the consensus algorithms
//!
//! `synthesize` merges several texts by frequency-ranked clause extraction;
//! `similarity` is the token-overlap measure used for majority grouping.
//! Neither aims at prose quality, only at a stable, testable aggregate.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// Clauses must be longer than this many characters to be kept
pub const MIN_CLAUSE_CHARS: usize = 10;

/// Number of clauses kept in a synthesized paragraph
pub const MAX_SYNTHESIS_CLAUSES: usize = 5;

/// Clauses opening with these are treated as hedging and dropped
const HEDGES: &[&str] = &[
    "maybe",
    "perhaps",
    "possibly",
    "might",
    "probably",
    "i think",
    "i guess",
    "it seems",
    "not sure",
    "could be",
];

static CLAUSE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?;\n]+").expect("CLAUSE_BOUNDARY regex should compile"));

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9_]+").expect("TOKEN regex should compile"));

fn normalize(clause: &str) -> String {
    clause
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_hedged(normalized: &str) -> bool {
    HEDGES.iter().any(|hedge| {
        normalized
            .strip_prefix(hedge)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', ',']))
    })
}

/// Short declarative clauses of `text`, in order of appearance.
pub fn extract_clauses(text: &str) -> Vec<String> {
    CLAUSE_BOUNDARY
        .split(text)
        .map(str::trim)
        .filter(|clause| clause.chars().count() > MIN_CLAUSE_CHARS)
        .filter(|clause| !is_hedged(&normalize(clause)))
        .map(|clause| clause.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

/// Merge texts into one paragraph of their most frequent clauses.
///
/// Clauses are counted case- and whitespace-insensitively across all inputs;
/// the top [`MAX_SYNTHESIS_CLAUSES`] by frequency are kept, ties broken by
/// first appearance. Returns `None` when no input yields a usable clause.
pub fn synthesize<'a, I>(texts: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    // normalized clause -> (count, first index, original wording)
    let mut counts: HashMap<String, (usize, usize, String)> = HashMap::new();
    let mut next_index = 0usize;

    for text in texts {
        for clause in extract_clauses(text) {
            let key = normalize(&clause);
            let entry = counts.entry(key).or_insert_with(|| {
                next_index += 1;
                (0, next_index, clause)
            });
            entry.0 += 1;
        }
    }

    if counts.is_empty() {
        return None;
    }

    let mut ranked: Vec<(usize, usize, String)> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let paragraph = ranked
        .into_iter()
        .take(MAX_SYNTHESIS_CLAUSES)
        .map(|(_, _, clause)| clause)
        .collect::<Vec<_>>()
        .join(". ");

    Some(format!("{paragraph}."))
}

fn tokens(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Jaccard overlap of the lowercase word sets of `a` and `b`.
///
/// Two texts without any tokens are considered identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_drops_short_and_hedged_clauses() {
        let clauses = extract_clauses(
            "Use a bounded channel. Ok. Maybe switch to rayon later; \
             Validate input before parsing!",
        );
        assert_eq!(
            clauses,
            vec!["Use a bounded channel", "Validate input before parsing"]
        );
    }

    #[test]
    fn test_hedge_needs_word_boundary() {
        // "mighty" is not the hedge "might"
        let clauses = extract_clauses("Mighty refactors need tests first.");
        assert_eq!(clauses.len(), 1);
    }

    #[test]
    fn test_synthesize_ranks_by_frequency() {
        let merged = synthesize([
            "Cache the parsed config. Add retries to the client.",
            "add retries to  the client. Log every failure loudly.",
            "Add retries to the client.",
        ])
        .unwrap();
        assert!(merged.starts_with("Add retries to the client."));
        assert!(merged.contains("Cache the parsed config"));
        assert!(merged.ends_with('.'));
    }

    #[test]
    fn test_synthesize_caps_clause_count() {
        let text = "First clause here. Second clause here. Third clause here. \
                    Fourth clause here. Fifth clause here. Sixth clause here.";
        let merged = synthesize([text]).unwrap();
        assert_eq!(merged.matches(". ").count(), MAX_SYNTHESIS_CLAUSES - 1);
        assert!(!merged.contains("Sixth"));
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let inputs = ["Alpha beta gamma delta. Epsilon zeta eta theta."; 3];
        assert_eq!(synthesize(inputs), synthesize(inputs));
    }

    #[test]
    fn test_synthesize_empty_inputs() {
        assert_eq!(synthesize(["ok.", "short"]), None);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("the same words", "The same words!"), 1.0);
        assert_eq!(similarity("alpha beta", "gamma delta"), 0.0);
        assert_eq!(similarity("", "  "), 1.0);
        let partial = similarity("a b c d", "a b c e");
        assert!((partial - 0.6).abs() < 1e-9);
    }
}
