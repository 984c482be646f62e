//! Topic-name similarity used for near-duplicate detection.
//!
//! Names are compared on a canonical form: lowercase, punctuation folded to
//! spaces, whitespace collapsed. The score is the larger of normalized edit
//! similarity and token-set Jaccard overlap, so both typos ("Travle") and
//! reordering ("Plans Travel") score high.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static NON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid non-word regex"));

/// Canonical comparison form of a topic name.
pub fn canonical_name(name: &str) -> String {
    NON_WORD_RE
        .replace_all(&name.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Similarity in `[0, 1]`; `1` for names equal after canonicalization.
pub fn name_similarity(left: &str, right: &str) -> f64 {
    let left = canonical_name(left);
    let right = canonical_name(right);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    if left == right {
        return 1.0;
    }
    edit_similarity(&left, &right).max(token_jaccard(&left, &right))
}

/// `1 - levenshtein / max_len`, over chars.
fn edit_similarity(left: &str, right: &str) -> f64 {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    let max_len = left.len().max(right.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(&left, &right);
    1.0 - distance as f64 / max_len as f64
}

fn levenshtein(left: &[char], right: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0; right.len() + 1];
    for (i, lc) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, rc) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(lc != rc);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

fn token_jaccard(left: &str, right: &str) -> f64 {
    let left: BTreeSet<&str> = left.split(' ').filter(|t| !t.is_empty()).collect();
    let right: BTreeSet<&str> = right.split(' ').filter(|t| !t.is_empty()).collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}
