//! Trigram similarity
//!
//! Follows the PostgreSQL `pg_trgm` model: text is lower-cased and split
//! into alphanumeric words, each word is padded with two leading blanks and
//! one trailing blank, and every 3-character window is a trigram. Similarity
//! is the Jaccard ratio of the two trigram sets, in `[0.0, 1.0]`.
//!
//! The same extraction feeds the persisted `recall_trigrams` index, so a
//! candidate found through the index is always scoreable.

use std::collections::BTreeSet;

/// Extract the set of trigrams for `text`
pub fn trigrams(text: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();

    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.chars().flat_map(char::to_lowercase))
            .chain(std::iter::once(' '))
            .collect();

        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }

    set
}

/// Similarity of two trigram sets
pub fn set_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Similarity of two strings
pub fn similarity(a: &str, b: &str) -> f64 {
    set_similarity(&trigrams(a), &trigrams(b))
}

/// Best similarity between `query` and any of `fields` (missing fields score 0)
pub fn best_field_similarity<'a, I>(query: &BTreeSet<String>, fields: I) -> f64
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    fields
        .into_iter()
        .flatten()
        .map(|field| set_similarity(query, &trigrams(field)))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigrams_of_single_word() {
        let set = trigrams("Cat");
        let expected: BTreeSet<String> = ["  c", " ca", "cat", "at "]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_trigrams_split_on_punctuation() {
        assert_eq!(trigrams("a-b"), trigrams("a b"));
        assert!(trigrams("   ").is_empty());
        assert!(trigrams("").is_empty());
    }

    #[test]
    fn test_identical_strings_score_one() {
        assert!((similarity("Baby Stroller", "baby stroller") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disjoint_strings_score_zero() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("", "xyz"), 0.0);
    }

    #[test]
    fn test_partial_overlap_is_between_bounds() {
        let score = similarity("stroller", "baby stroller recall");
        assert!(score > 0.3 && score < 1.0, "score was {}", score);
    }

    #[test]
    fn test_typo_still_scores_above_default_threshold() {
        let score = similarity("strollr", "Baby Stroller");
        assert!(score > 0.08, "score was {}", score);
    }

    #[test]
    fn test_best_field_similarity_takes_max() {
        let query = trigrams("acme");
        let score = best_field_similarity(&query, [None, Some("Acme"), Some("unrelated text")]);
        assert!((score - 1.0).abs() < f64::EPSILON);
        assert_eq!(best_field_similarity(&query, [None, None]), 0.0);
    }
}
