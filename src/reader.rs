//! Extractive answer selection.
//!
//! Given the analyzed query and one retrieved passage, [`SpanReader`] picks
//! the sentence that best supports the query and widens it into a context
//! window. Scores are in `[0, 1]`: mostly the share of query terms the
//! sentence covers, plus a bonus for query terms that appear next to each
//! other in the same order.

use std::collections::HashSet;

use serde::Serialize;
use tantivy::tokenizer::TextAnalyzer;

use crate::{
    chunking::Passage,
    extract::SourceMeta,
    tantivy_index::{analyze, en_stem_analyzer},
    text_util::{DEFAULT_CONTEXT_CHARS, context_window, split_sentences},
};

/// Weight of term coverage in a span score; the rest rewards adjacency.
const COVERAGE_WEIGHT: f32 = 0.8;

/// Terms ignored when scoring spans, unless the query has nothing else.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "ar", "are", "as", "at", "be", "by", "de", "do", "doe",
    "for", "from", "how", "in", "is", "it", "of", "on", "or", "that", "the",
    "thi", "this", "to", "was", "what", "when", "where", "which", "who", "whi",
    "why", "with",
];

/// An answer extracted from one passage.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// The supporting sentence.
    pub answer: String,
    /// The sentence with surrounding text, whitespace-normalized.
    pub context: String,
    /// Reader confidence in `[0, 1]`.
    pub score: f32,
    /// BM25 score of the passage the answer came from.
    pub retrieval_score: f32,
    pub meta: SourceMeta,
    /// Position of the source passage within its document.
    pub passage_position: usize,
}

/// Query terms prepared once per search.
#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    terms: Vec<String>,
}

impl AnalyzedQuery {
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    start: usize,
    end: usize,
    score: f32,
}

pub struct SpanReader {
    analyzer: TextAnalyzer,
    context_chars: usize,
}

impl Default for SpanReader {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_CHARS)
    }
}

impl SpanReader {
    pub fn new(context_chars: usize) -> Self {
        Self {
            analyzer: en_stem_analyzer(),
            context_chars,
        }
    }

    /// Analyze a query the same way passage bodies are indexed, dropping
    /// stop words when anything else remains.
    pub fn analyze_query(&mut self, query: &str) -> AnalyzedQuery {
        let mut seen = HashSet::new();
        let all: Vec<String> = analyze(&mut self.analyzer, query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let content: Vec<String> = all
            .iter()
            .filter(|t| !STOP_WORDS.contains(&t.as_str()))
            .cloned()
            .collect();

        AnalyzedQuery {
            terms: if content.is_empty() { all } else { content },
        }
    }

    /// Extract the best-supported span of `passage`, or `None` when no
    /// sentence contains any query term.
    pub fn read(
        &mut self,
        query: &AnalyzedQuery,
        passage: &Passage,
        retrieval_score: f32,
    ) -> Option<Answer> {
        let span = self.best_span(query, &passage.text)?;
        let text = &passage.text;

        Some(Answer {
            answer: text[span.start..span.end].to_string(),
            context: context_window(
                text,
                (span.start, span.end),
                self.context_chars,
            ),
            score: span.score,
            retrieval_score,
            meta: passage.meta.clone(),
            passage_position: passage.position,
        })
    }

    fn best_span(&mut self, query: &AnalyzedQuery, text: &str) -> Option<Span> {
        if query.is_empty() {
            return None;
        }

        let mut best: Option<Span> = None;
        for sentence in split_sentences(text) {
            let tokens = analyze(&mut self.analyzer, sentence);
            let score = score_tokens(query.terms(), &tokens);
            if score <= 0.0 {
                continue;
            }
            if best.is_none_or(|b| score > b.score) {
                let start = sentence.as_ptr() as usize - text.as_ptr() as usize;
                best = Some(Span {
                    start,
                    end: start + sentence.len(),
                    score,
                });
            }
        }
        best
    }
}

impl std::fmt::Debug for SpanReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanReader")
            .field("context_chars", &self.context_chars)
            .finish_non_exhaustive()
    }
}

fn score_tokens(query: &[String], tokens: &[String]) -> f32 {
    let matches_at = |term: &str| -> Vec<usize> {
        tokens
            .iter()
            .enumerate()
            .filter(|(_, tok)| terms_match(term, tok.as_str()))
            .map(|(i, _)| i)
            .collect()
    };

    let positions: Vec<Vec<usize>> =
        query.iter().map(|t| matches_at(t.as_str())).collect();
    let covered = positions.iter().filter(|p| !p.is_empty()).count();
    if covered == 0 {
        return 0.0;
    }
    let coverage = covered as f32 / query.len() as f32;

    if query.len() < 2 {
        return coverage;
    }

    let adjacent = positions
        .windows(2)
        .filter(|pair| {
            pair[0]
                .iter()
                .any(|&i| pair[1].contains(&(i + 1)))
        })
        .count();
    let adjacency = adjacent as f32 / (query.len() - 1) as f32;

    COVERAGE_WEIGHT * coverage + (1.0 - COVERAGE_WEIGHT) * adjacency
}

/// Exact match, or one edit apart for terms of three or more characters.
fn terms_match(query_term: &str, token: &str) -> bool {
    query_term == token
        || (query_term.chars().count() >= 3 && within_one_edit(query_term, token))
}

fn within_one_edit(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if long.len() - short.len() > 1 {
        return false;
    }

    let prefix = short
        .iter()
        .zip(long.iter())
        .take_while(|(x, y)| x == y)
        .count();

    if short.len() == long.len() {
        if prefix == short.len() || short[prefix + 1..] == long[prefix + 1..] {
            return true;
        }
        // Neighbours swapped.
        prefix + 1 < short.len()
            && short[prefix] == long[prefix + 1]
            && short[prefix + 1] == long[prefix]
            && short[prefix + 2..] == long[prefix + 2..]
    } else {
        short[prefix..] == long[prefix + 1..]
    }
}
