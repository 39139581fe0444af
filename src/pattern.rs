//! # Pattern Compilation and Matching Module
//!
//! ## Purpose
//! Turns the active keyword list into one compiled case-insensitive
//! alternation and applies it to element text, producing the distinct set of
//! matched keywords and their count.
//!
//! ## Input/Output Specification
//! - **Input**: Raw keyword strings (untrusted, may contain regex
//!   metacharacters), plain text blocks
//! - **Output**: Case-normalized matched-keyword sets with distinct counts
//! - **Guarantee**: Compilation never fails on metacharacters; every keyword
//!   matches only its literal form
//!
//! ## Key Features
//! - Literal escaping of every keyword before alternation
//! - Distinct-keyword counting (not occurrence counting)
//! - Display filtering back to the user's configured spelling
//! - NFC normalization of both keywords and scanned text

use crate::errors::{EngineError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;

/// Per-element match outcome, recomputed every scan cycle
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Matched keyword forms, uppercased for set membership
    pub matched: BTreeSet<String>,
    /// Number of distinct keywords found
    pub count: usize,
}

impl MatchResult {
    /// True when no keyword matched
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

/// Compiled matcher for one keyword set
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    /// Keywords in configured order with display casing preserved
    keywords: Vec<String>,
    pattern: Regex,
}

impl KeywordMatcher {
    /// Compile a keyword list into a matcher. Returns `None` when the list
    /// contains no usable keywords; downstream stages treat that as
    /// "match nothing".
    pub fn compile(keywords: &[String]) -> Result<Option<Self>> {
        let mut seen = BTreeSet::new();
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().nfc().collect::<String>())
            .filter(|k| !k.is_empty())
            .filter(|k| seen.insert(k.clone()))
            .collect();

        if keywords.is_empty() {
            return Ok(None);
        }

        let alternation = keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()
            .map_err(|e| EngineError::Pattern {
                reason: e.to_string(),
            })?;

        Ok(Some(Self { keywords, pattern }))
    }

    /// The configured keywords in display casing
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Scan a text block for keyword occurrences. Each call scans from the
    /// start of the text; no cursor state survives between calls.
    pub fn match_text(&self, text: &str) -> MatchResult {
        let normalized: String = text.nfc().collect();
        let mut matched = BTreeSet::new();
        for found in self.pattern.find_iter(&normalized) {
            matched.insert(found.as_str().to_uppercase());
        }
        let count = matched.len();
        MatchResult { matched, count }
    }

    /// Configured keywords (original casing) whose case-insensitive form is
    /// in the matched set. Tags always show the user's spelling, never the
    /// casing of the matched substring.
    pub fn display_keywords(&self, result: &MatchResult) -> Vec<String> {
        self.keywords
            .iter()
            .filter(|k| result.matched.contains(&k.to_uppercase()))
            .cloned()
            .collect()
    }
}
