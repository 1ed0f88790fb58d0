pub mod data;
pub mod games;
pub mod offline;
pub mod preferences;
pub mod schedule;
pub mod session;
#[cfg(feature = "web")]
pub mod web;

pub use data::{DatasetError, TermRecord, VersionInfo, describe_version};

use data::{BUNDLED_DATASET, parse_records, read_records};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Number of ranked hits shown as suggestions while typing.
pub const SUGGESTION_LIMIT: usize = 8;

const SCORE_EXACT: u32 = 100;
const SCORE_PREFIX: u32 = 50;
const SCORE_CONTAINS: u32 = 20;
const SCORE_TRANSLATION: u32 = 15;
const SCORE_DEFINITION: u32 = 5;

static BUNDLED_STORE: Lazy<TermStore> = Lazy::new(|| {
    TermStore::from_json(BUNDLED_DATASET.as_bytes()).unwrap_or_else(|err| {
        warn!(error = %err, "bundled dataset failed to load");
        TermStore::default()
    })
});

/// A glossary entry. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub term: String,
    pub translation: String,
    pub definition: String,
    pub example: String,
    pub category: String,
}

impl From<TermRecord> for Term {
    fn from(record: TermRecord) -> Self {
        Self {
            term: record.term,
            translation: record.translation,
            definition: record.definition,
            example: record.example,
            category: record.category.trim().to_lowercase(),
        }
    }
}

/// Lower-cased copies of the searchable fields, computed once at load.
#[derive(Debug, Clone, Default)]
struct FoldedTerm {
    term: String,
    translation: String,
    definition: String,
}

impl FoldedTerm {
    fn new(term: &Term) -> Self {
        Self {
            term: term.term.to_lowercase(),
            translation: term.translation.to_lowercase(),
            definition: term.definition.to_lowercase(),
        }
    }

    fn score(&self, query: &str) -> u32 {
        let mut score = 0;
        if self.term == query {
            score += SCORE_EXACT;
        } else if self.term.starts_with(query) {
            score += SCORE_PREFIX;
        } else if self.term.contains(query) {
            score += SCORE_CONTAINS;
        }
        if self.translation.contains(query) {
            score += SCORE_TRANSLATION;
        }
        if self.definition.contains(query) {
            score += SCORE_DEFINITION;
        }
        score
    }
}

/// A term that matched a query, with its additive relevance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchHit<'a> {
    pub term: &'a Term,
    pub score: u32,
}

/// Ordered, deduplicated set of glossary entries.
#[derive(Debug, Clone, Default)]
pub struct TermStore {
    terms: Vec<Term>,
    folded: Vec<FoldedTerm>,
}

impl TermStore {
    /// Builds a store keeping the first occurrence of every case-insensitive
    /// `(term, translation)` pair.
    pub fn load<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TermRecord>,
    {
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        let mut duplicates = 0usize;
        for record in records {
            let key = (record.term.to_lowercase(), record.translation.to_lowercase());
            if !seen.insert(key) {
                duplicates += 1;
                continue;
            }
            terms.push(Term::from(record));
        }
        debug!(terms = terms.len(), duplicates, "term store loaded");
        let folded = terms.iter().map(FoldedTerm::new).collect();
        Self { terms, folded }
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, DatasetError> {
        parse_records(raw).map(Self::load)
    }

    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        read_records(path).map(Self::load)
    }

    /// The dataset compiled into the crate.
    pub fn bundled() -> &'static TermStore {
        &BUNDLED_STORE
    }

    pub fn all(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Scores every term against `query` and returns the positive hits,
    /// best first. Ties keep dataset order.
    pub fn rank(&self, query: &str) -> Vec<SearchHit<'_>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<_> = self
            .terms
            .iter()
            .zip(&self.folded)
            .filter_map(|(term, folded)| {
                let score = folded.score(&query);
                (score > 0).then_some(SearchHit { term, score })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits
    }

    /// Returns at most `limit` ranked hits for the suggestion list.
    pub fn suggestions(&self, query: &str, limit: usize) -> Vec<SearchHit<'_>> {
        let mut hits = self.rank(query);
        hits.truncate(limit);
        hits
    }

    /// Resolves submitted text: the first exact (case-insensitive) term match,
    /// or else every term whose term or translation contains the text.
    pub fn lookup(&self, text: &str) -> Vec<&Term> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        if let Some(idx) = self.folded.iter().position(|f| f.term == needle) {
            return vec![&self.terms[idx]];
        }
        self.terms
            .iter()
            .zip(&self.folded)
            .filter(|(_, f)| f.term.contains(&needle) || f.translation.contains(&needle))
            .map(|(term, _)| term)
            .collect()
    }

    /// Terms tagged with `category`, sorted by term in collation order.
    pub fn filter_by_category(&self, category: &str) -> Vec<&Term> {
        let category = category.trim().to_lowercase();
        let mut rows: Vec<_> = self
            .terms
            .iter()
            .filter(|term| term.category == category)
            .collect();
        rows.sort_by(|a, b| collate(&a.term, &b.term));
        rows
    }

    /// Distinct category tags in sorted order.
    pub fn categories(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .terms
            .iter()
            .map(|term| term.category.as_str())
            .filter(|category| !category.is_empty())
            .collect();
        set.into_iter().collect()
    }
}

/// Sorted distinct upper-cased first letters of `terms`. Empty when there is
/// fewer than two letters to choose from.
pub fn alphabetic_index(terms: &[&Term]) -> Vec<String> {
    let letters: BTreeSet<String> = terms
        .iter()
        .filter_map(|term| term.term.chars().next())
        .map(|first| first.to_uppercase().collect())
        .collect();
    if letters.len() <= 1 {
        return Vec::new();
    }
    letters.into_iter().collect()
}

/// Fixed tagline shown above a category listing.
pub fn category_tagline(category: &str) -> Option<&'static str> {
    match category {
        "arquitectura" => Some("🌇 Estructuras que sostienen el mundo digital."),
        "informatica" => Some("🧑‍💻 El lenguaje de los bits y sistemas."),
        "programacion" => Some("🧠 Donde la lógica se convierte en realidad."),
        _ => None,
    }
}

/// Compares two strings the way a human-facing list is sorted: accents and
/// case are ignored first, then accents break ties, then lowercase sorts
/// before uppercase.
pub fn collate(a: &str, b: &str) -> Ordering {
    let primary = |s: &str| -> Vec<char> {
        s.nfd()
            .filter(|ch| !is_combining_mark(*ch))
            .flat_map(char::to_lowercase)
            .collect()
    };
    primary(a)
        .cmp(&primary(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| b.cmp(a))
}

/// A slice of a rendered string, flagged when it matched the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub matched: bool,
}

/// Splits `text` around case-insensitive literal occurrences of `query`.
pub fn highlight<'a>(text: &'a str, query: &str) -> Vec<Segment<'a>> {
    let needle: Vec<char> = query.trim().chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return vec![Segment {
            text,
            matched: false,
        }];
    }
    let mut segments = Vec::new();
    let mut plain_start = 0;
    let mut cursor = 0;
    while cursor < text.len() {
        match match_len(&text[cursor..], &needle) {
            Some(len) => {
                if plain_start < cursor {
                    segments.push(Segment {
                        text: &text[plain_start..cursor],
                        matched: false,
                    });
                }
                segments.push(Segment {
                    text: &text[cursor..cursor + len],
                    matched: true,
                });
                cursor += len;
                plain_start = cursor;
            }
            None => {
                cursor += text[cursor..].chars().next().map_or(1, char::len_utf8);
            }
        }
    }
    if plain_start < text.len() {
        segments.push(Segment {
            text: &text[plain_start..],
            matched: false,
        });
    }
    segments
}

fn match_len(haystack: &str, needle: &[char]) -> Option<usize> {
    let mut pos = 0;
    for (offset, ch) in haystack.char_indices() {
        if pos == needle.len() {
            return Some(offset);
        }
        for lower in ch.to_lowercase() {
            if needle.get(pos) != Some(&lower) {
                return None;
            }
            pos += 1;
        }
    }
    (pos == needle.len()).then_some(haystack.len())
}
