//! Scored full-text search.

use crate::{Record, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use strsim::normalized_levenshtein;

const SUBSTRING_SCORE: f64 = 10.0;
const PREFIX_SCORE: f64 = 5.0;
const WORD_SCORE: f64 = 3.0;
const FUZZY_WEIGHT: f64 = 5.0;
const FUZZY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Add a similarity bonus for near-miss terms
    #[serde(default)]
    pub fuzzy: bool,
    /// Hits scoring below this are dropped
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    pub limit: Option<usize>,
}

fn default_min_score() -> f64 {
    1.0
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            fuzzy: false,
            min_score: default_min_score(),
            limit: None,
        }
    }
}

impl SearchOptions {
    pub fn fuzzy(mut self) -> Self {
        self.fuzzy = true;
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: RecordId,
    pub score: f64,
    pub record: Record,
}

/// Lowercased whitespace-separated terms.
pub fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Score one term against one field value (already lowercased).
pub fn score_term(term: &str, text: &str, fuzzy: bool) -> f64 {
    let mut score = 0.0;
    if text.contains(term) {
        score += SUBSTRING_SCORE;
        if text.starts_with(term) {
            score += PREFIX_SCORE;
        }
        if text.split(|c: char| !c.is_alphanumeric()).any(|word| word == term) {
            score += WORD_SCORE;
        }
    }
    if fuzzy {
        let similarity = normalized_levenshtein(term, text);
        if similarity > FUZZY_THRESHOLD {
            score += similarity * FUZZY_WEIGHT;
        }
    }
    score
}

/// Total score of a record over all terms and fields.
pub fn score_record(record: &Record, terms: &[String], fields: &[&str], fuzzy: bool) -> f64 {
    fields
        .iter()
        .filter_map(|field| record.get(field).and_then(searchable_text))
        .map(|text| {
            terms
                .iter()
                .map(|term| score_term(term, &text, fuzzy))
                .sum::<f64>()
        })
        .sum()
}

/// Highest score first, then by id.
pub fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn searchable_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(searchable_text).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_word_beats_prefix_only() {
        let exact = score_term("car", "car", false);
        let prefix = score_term("car", "cartridge", false);
        assert_eq!(exact, 18.0);
        assert_eq!(prefix, 15.0);
    }

    #[test]
    fn word_boundary_inside_text() {
        // substring + word, not prefix
        assert_eq!(score_term("car", "red car wash", false), 13.0);
        // substring only
        assert_eq!(score_term("car", "scary", false), 10.0);
        assert_eq!(score_term("car", "bus", false), 0.0);
    }

    #[test]
    fn fuzzy_adds_similarity_bonus() {
        let plain = score_term("doctor", "docter", false);
        let fuzzy = score_term("doctor", "docter", true);
        assert_eq!(plain, 0.0);
        assert!(fuzzy > 3.5 && fuzzy < 5.0, "{fuzzy}");
        // too dissimilar: no bonus
        assert_eq!(score_term("doctor", "nurse", true), 0.0);
    }

    #[test]
    fn scores_sum_over_terms_and_fields() {
        let record = Record::from_value(json!({
            "title": "Car insurance",
            "tags": ["car", "policy"],
            "body": 42
        }))
        .unwrap();
        let terms = tokenize("CAR policy");
        let score = score_record(&record, &terms, &["title", "tags", "missing"], false);
        // title: car 18; tags "car policy": car 18 + policy 13
        assert_eq!(score, 49.0);
    }

    #[test]
    fn ranking_is_stable_by_id() {
        let hit = |id: &str, score| SearchHit {
            id: id.into(),
            score,
            record: Record::new(),
        };
        let mut hits = vec![hit("b", 5.0), hit("c", 9.0), hit("a", 5.0)];
        rank(&mut hits);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
