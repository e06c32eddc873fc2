//! Lexical retrieval over a small corpus of schema notes and query idioms.
//!
//! The corpus is a plain text file whose paragraphs (separated by a blank
//! line) are the retrievable units. Scoring is token overlap after
//! normalisation, stop-word removal and stemming, plus a substring bonus and
//! a bonus for shared SQL keywords. Lookups are local and synchronous.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rust_stemmers::{Algorithm, Stemmer};
use stop_words::{get, LANGUAGE};
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

/// Bonus when the whole lowercased query appears in a document
const SUBSTRING_BONUS: u32 = 10;
/// Bonus per domain keyword present in both query and document
const KEYWORD_BONUS: u32 = 2;
/// SQL verbs that signal the same kind of query
const DOMAIN_KEYWORDS: &[&str] = &["select", "sum", "count", "avg", "group", "where", "order"];

/// Context returned when nothing in the corpus is relevant
pub const FALLBACK_CONTEXT: &str = "Database Schema:
Table: sales
Columns: id (INTEGER), date (DATE), amount (DECIMAL), product (VARCHAR), region (VARCHAR), quantity (INTEGER), customer_type (VARCHAR)

Common patterns:
- Total: SELECT SUM(amount) FROM sales
- By product: SELECT product, SUM(amount) FROM sales GROUP BY product
- By region: SELECT region, SUM(amount) FROM sales GROUP BY region";

struct Document {
    text: String,
    lowered: String,
    tokens: HashSet<String>,
    words: HashSet<String>,
}

/// Ranked lookup over the retrieval corpus
pub struct RetrievalIndex {
    documents: Vec<Document>,
    loaded: bool,
    stopwords: HashSet<String>,
    stemmer: Stemmer,
}

impl RetrievalIndex {
    fn with_corpus(text: Option<&str>) -> Self {
        let stopwords: HashSet<String> = get(LANGUAGE::English).iter().map(ToString::to_string).collect();
        let mut index = Self {
            documents: Vec::new(),
            loaded: false,
            stopwords,
            stemmer: Stemmer::create(Algorithm::English),
        };

        if let Some(text) = text {
            index.documents = paragraphs(text).iter().map(|p| index.document(p)).collect();
            index.loaded = !index.documents.is_empty();
        }
        index
    }

    /// Index the paragraphs of a text
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let index = Self::with_corpus(Some(text));
        debug!(documents = index.len(), "Retrieval corpus indexed");
        index
    }

    /// Load a corpus file; a missing or unreadable file leaves the index in
    /// fallback mode instead of failing
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => {
                let index = Self::with_corpus(Some(&text));
                info!(path = %path.display(), documents = index.len(), "Retrieval corpus loaded");
                index
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Retrieval corpus unavailable; using fallback context");
                Self::with_corpus(None)
            }
        }
    }

    /// An index with no corpus, always answering with the fallback context
    #[must_use]
    pub fn empty() -> Self {
        Self::with_corpus(None)
    }

    /// Whether a non-empty corpus was loaded
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of documents in the corpus
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when the corpus holds no documents
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Top-`k` documents with a positive score, best first
    #[must_use]
    pub fn search(&self, query: &str, k: usize) -> Vec<&str> {
        self.search_scored(query, k).into_iter().map(|(_, text)| text).collect()
    }

    /// Like [`search`](Self::search), with each document's score
    #[must_use]
    pub fn search_scored(&self, query: &str, k: usize) -> Vec<(u32, &str)> {
        let query_lowered = query.to_lowercase();
        let query_tokens = self.tokenize(query);
        let query_words = Self::words(query);

        let mut scored: Vec<(u32, &str)> = self
            .documents
            .iter()
            .map(|doc| (Self::score(&query_lowered, &query_tokens, &query_words, doc), doc.text.as_str()))
            .filter(|(score, _)| *score > 0)
            .collect();

        // Stable: equal scores keep corpus order
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(k);

        debug!(query, matches = scored.len(), "Retrieval search");
        scored
    }

    /// Retrieved documents formatted as a context block, or the fallback
    #[must_use]
    pub fn get_context(&self, query: &str, k: usize) -> String {
        let results = self.search(query, k);
        if results.is_empty() {
            return FALLBACK_CONTEXT.to_string();
        }

        let blocks: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("[Context {}]\n{doc}", i + 1))
            .collect();
        format!("Database Schema Context:\n\n{}", blocks.join("\n\n"))
    }

    fn score(query_lowered: &str, query_tokens: &HashSet<String>, query_words: &HashSet<String>, doc: &Document) -> u32 {
        let overlap = u32::try_from(query_tokens.intersection(&doc.tokens).count()).unwrap_or(u32::MAX);
        let mut score = overlap;

        if !query_lowered.trim().is_empty() && doc.lowered.contains(query_lowered) {
            score += SUBSTRING_BONUS;
        }

        for keyword in DOMAIN_KEYWORDS {
            if query_words.contains(*keyword) && doc.words.contains(*keyword) {
                score += KEYWORD_BONUS;
            }
        }
        score
    }

    fn document(&self, text: &str) -> Document {
        Document {
            text: text.to_string(),
            lowered: text.to_lowercase(),
            tokens: self.tokenize(text),
            words: Self::words(text),
        }
    }

    fn normalize(text: &str) -> String {
        text.nfc()
            .flat_map(char::to_lowercase)
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
            .collect()
    }

    /// Lowercased words, without stop-word removal or stemming
    fn words(text: &str) -> HashSet<String> {
        Self::normalize(text).split_whitespace().map(ToString::to_string).collect()
    }

    /// Normalised, stop-word-free, stemmed token set
    fn tokenize(&self, text: &str) -> HashSet<String> {
        Self::normalize(text)
            .split_whitespace()
            .filter(|w| !self.stopwords.contains(*w))
            .map(|w| self.stemmer.stem(w).into_owned())
            .collect()
    }
}

/// Split on blank lines; whitespace-only lines and CRLF endings count as blank
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}
