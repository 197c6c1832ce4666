//! Normalized key signatures for near-duplicate lookups.
//!
//! A signature covers the model and user prompt of a key (see
//! [`prompt_key`](crate::prompt_key)), lower-cased and split on
//! non-alphanumerics. Tokens with a digit in them are kept as an ordered
//! sequence that has to match exactly; the rest, minus stop words, form a
//! word set compared with Jaccard similarity.

use crate::key::distinguishing_text;
use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "in", "on", "for", "的", "是", "在", "和", "了",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    numbers: Vec<String>,
    words: BTreeSet<String>,
}

impl Signature {
    pub fn of(key: &str) -> Self {
        let lower = distinguishing_text(key).to_lowercase();
        let mut numbers = Vec::new();
        let mut words = BTreeSet::new();

        for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            if token.chars().any(|c| c.is_ascii_digit()) {
                numbers.push(token.to_string());
            } else if !STOP_WORDS.contains(&token) {
                words.insert(token.to_string());
            }
        }

        Self { numbers, words }
    }

    /// Similarity in `[0, 1]`, or `None` when the numeric tokens differ.
    pub fn similarity(&self, other: &Signature) -> Option<f64> {
        if self.numbers != other.numbers {
            return None;
        }
        let union = self.words.union(&other.words).count();
        if union == 0 {
            return Some(1.0);
        }
        let shared = self.words.intersection(&other.words).count();
        Some(shared as f64 / union as f64)
    }
}

/// Pick the best candidate scoring at least `threshold`.
///
/// Ties go to the earliest candidate.
pub fn best_match<'a, I>(wanted: &Signature, candidates: I, threshold: f64) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a Signature)>,
{
    let mut best: Option<(&str, f64)> = None;
    for (key, sig) in candidates {
        let Some(score) = wanted.similarity(sig) else {
            continue;
        };
        if score < threshold {
            continue;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((key, score));
        }
    }
    best.map(|(key, _)| key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::prompt_key;

    #[test]
    fn test_case_and_spacing_variants_match() {
        let a = Signature::of("Topic: Rust Ownership\nWrite slide 3 of 10.");
        let b = Signature::of("topic:   rust   ownership write SLIDE 3 of 10");
        assert_eq!(a.similarity(&b), Some(1.0));
    }

    #[test]
    fn test_stop_words_and_system_section_are_ignored() {
        let a = Signature::of(&prompt_key("m", "Shared rules, version 1", "Topic: the Rust book"));
        let b = Signature::of(&prompt_key("m", "Other rules entirely", "topic: rust book"));
        assert_eq!(a.similarity(&b), Some(1.0));

        let other_model = Signature::of(&prompt_key("gpt-4o", "", "topic: rust book"));
        assert!(a.similarity(&other_model).unwrap_or(0.0) < 1.0);
    }

    #[test]
    fn test_numbers_must_match_in_order() {
        let a = Signature::of("write slide 1 of 2");
        let b = Signature::of("write slide 2 of 1");
        let c = Signature::of("write slide 3 of 2");
        assert_eq!(a.similarity(&b), None);
        assert_eq!(a.similarity(&c), None);
    }

    #[test]
    fn test_jaccard_threshold() {
        let a = Signature::of("the quick brown fox jumps");
        let b = Signature::of("the quick brown fox leaps");
        let score = a.similarity(&b).unwrap();
        assert!((score - 4.0 / 6.0).abs() < 1e-9);

        let sigs = [("k1", &b)];
        assert_eq!(best_match(&a, sigs.iter().map(|(k, s)| (*k, *s)), 0.92), None);
        assert_eq!(best_match(&a, sigs.iter().map(|(k, s)| (*k, *s)), 0.5), Some("k1"));
    }

    #[test]
    fn test_best_candidate_wins() {
        let wanted = Signature::of("alpha beta gamma delta");
        let near = Signature::of("alpha beta gamma delta epsilon");
        let exact = Signature::of("Delta gamma beta alpha");
        let candidates = vec![("near", &near), ("exact", &exact)];
        assert_eq!(best_match(&wanted, candidates, 0.5), Some("exact"));
    }
}
