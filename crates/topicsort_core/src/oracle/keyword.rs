//! Deterministic lexical oracle.
//!
//! Scores each existing topic by how many of its name tokens occur in the
//! entry text, and offers one new-topic option built from the most frequent
//! salient term. Intended for offline runs and as a fallback when no remote
//! oracle is configured.

use super::{OracleRequest, OracleResult, SuggestionOracle};
use crate::model::suggestion::{EntrySuggestions, TopicSuggestion};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex"));

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "are", "as", "at", "be", "been", "but",
    "by", "can", "for", "from", "had", "has", "have", "i", "in", "into", "is", "it", "its", "me",
    "my", "need", "not", "of", "on", "or", "our", "so", "that", "the", "their", "then", "there",
    "this", "to", "up", "was", "we", "were", "will", "with", "you", "your",
];

const MIN_TERM_CHARS: usize = 3;
const EXISTING_BASE_CONFIDENCE: f64 = 0.4;
const EXISTING_SPAN_CONFIDENCE: f64 = 0.55;
const NEW_TOPIC_CONFIDENCE: f64 = 0.35;

#[derive(Debug, Clone, Default)]
pub struct KeywordOracle;

impl KeywordOracle {
    pub fn new() -> Self {
        Self
    }

    /// Suggestions for one piece of free text.
    pub fn suggest_text(&self, text: &str, request: &OracleRequest) -> Vec<TopicSuggestion> {
        let tokens = tokenize(text);
        let token_set: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
        let mut suggestions = Vec::new();

        for topic in &request.snapshot.topics {
            let name_tokens: BTreeSet<String> = tokenize(&topic.name).into_iter().collect();
            if name_tokens.is_empty() {
                continue;
            }
            let hits = name_tokens
                .iter()
                .filter(|token| token_set.contains(token.as_str()))
                .count();
            if hits == 0 {
                continue;
            }
            let coverage = hits as f64 / name_tokens.len() as f64;
            suggestions.push(TopicSuggestion::existing(
                topic.id,
                topic.name.clone(),
                EXISTING_BASE_CONFIDENCE + EXISTING_SPAN_CONFIDENCE * coverage,
            ));
        }

        if let Some(term) = salient_term(&tokens) {
            suggestions.push(TopicSuggestion::propose_new(
                title_case(&term),
                NEW_TOPIC_CONFIDENCE,
            ));
        }
        suggestions
    }
}

impl SuggestionOracle for KeywordOracle {
    fn oracle_id(&self) -> &str {
        "keyword"
    }

    fn suggest(&self, request: &OracleRequest) -> OracleResult<Vec<EntrySuggestions>> {
        Ok(request
            .entries
            .iter()
            .map(|entry| {
                EntrySuggestions::new(entry.id, self.suggest_text(&entry.content, request))
            })
            .collect())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|token| token.as_str().to_lowercase())
        .collect()
}

/// Most frequent non-stopword term; ties go to the lexically smallest.
fn salient_term(tokens: &[String]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for token in tokens {
        if token.chars().count() < MIN_TERM_CHARS
            || STOPWORDS.contains(&token.as_str())
            || token.chars().all(|ch| ch.is_numeric())
        {
            continue;
        }
        *counts.entry(token.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(left_term, left), (right_term, right)| {
            left.cmp(right).then_with(|| right_term.cmp(left_term))
        })
        .map(|(term, _)| term.to_string())
}

fn title_case(term: &str) -> String {
    let mut chars = term.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{salient_term, tokenize, KeywordOracle};
    use crate::model::entry::Entry;
    use crate::model::topic::{TaxonomySnapshot, Topic};
    use crate::oracle::{OracleRequest, SuggestionOracle};
    use std::sync::Arc;

    fn request(entries: Vec<Entry>) -> OracleRequest {
        OracleRequest {
            entries,
            snapshot: Arc::new(TaxonomySnapshot {
                owner_id: 1,
                version: 0,
                topics: vec![Topic {
                    id: 2,
                    owner_id: 1,
                    name: "Work Projects".to_string(),
                    created_at: 0,
                    entry_count: 0,
                }],
                uncategorized_count: 0,
            }),
            instructions: None,
        }
    }

    fn entry(id: i64, content: &str) -> Entry {
        Entry {
            id,
            owner_id: 1,
            content: content.to_string(),
            topic_id: None,
            created_at: 0,
        }
    }

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(
            tokenize("Flight to PARIS, tomorrow!"),
            vec!["flight", "to", "paris", "tomorrow"]
        );
    }

    #[test]
    fn salient_term_skips_stopwords_and_prefers_frequency() {
        let tokens = tokenize("the garden and the garden shed");
        assert_eq!(salient_term(&tokens).as_deref(), Some("garden"));
        assert_eq!(salient_term(&tokenize("to do it")), None);
    }

    #[test]
    fn suggest_scores_existing_topics_by_name_coverage() {
        let oracle = KeywordOracle::new();
        let req = request(vec![
            entry(1, "finish the work report"),
            entry(2, "pick up milk, more milk"),
        ]);
        let output = oracle.suggest(&req).expect("keyword oracle never fails");

        assert_eq!(output.len(), 2);
        let first = &output[0].suggestions;
        assert_eq!(first[0].target.topic_id(), Some(2));
        assert!(first[0].confidence > 0.6 && first[0].confidence < 0.7);
        assert!(output[1]
            .suggestions
            .iter()
            .all(|suggestion| suggestion.target.is_new()));
        assert_eq!(output[1].suggestions[0].name, "Milk");
    }
}
