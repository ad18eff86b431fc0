//! Query expansion: one query in, a bounded list of rewritten variants out.
//!
//! Every strategy is a pure table lookup, so expansion is deterministic and
//! cannot fail.
mod tables;

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tables::{ABBREVIATIONS, ACRONYMS, SYNONYMS, Table, language_table, lookup};

pub use tables::canonical_language;

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").expect("Invalid word regex pattern"));

pub const DEFAULT_MAX_VARIANTS: usize = 5;

/// Which strategy produced a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantOrigin {
    Original,
    Synonym,
    Acronym,
    LanguageSpecific,
    Abbreviation,
}

impl fmt::Display for VariantOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VariantOrigin::Original => "original",
            VariantOrigin::Synonym => "synonym",
            VariantOrigin::Acronym => "acronym",
            VariantOrigin::LanguageSpecific => "language_specific",
            VariantOrigin::Abbreviation => "abbreviation",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub text: String,
    pub origin: VariantOrigin,
    /// Shared by every variant of the same input query.
    pub source_query_id: String,
}

/// Stable id of a query text.
pub fn query_id(query: &str) -> String {
    let digest = Sha256::digest(query.trim().as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Rewrites that replace one word of `query` with an entry of `table`, in
/// word order, then table order.
fn rewrites(query: &str, table: Table) -> Vec<String> {
    let mut out = Vec::new();
    for word in WORD_PATTERN.find_iter(query) {
        let key = word.as_str().to_lowercase();
        for replacement in lookup(table, &key) {
            let mut text = String::with_capacity(query.len() + replacement.len());
            text.push_str(&query[..word.start()]);
            text.push_str(replacement);
            text.push_str(&query[word.end()..]);
            out.push(text);
        }
    }
    out
}

/// Table-driven query expander.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExpander;

impl QueryExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand `query` into at most `max_variants` variants, the original
    /// first.
    ///
    /// Strategies take turns in a fixed order (synonym, acronym, language
    /// rewrite, abbreviation), each adding at most one variant per round, until
    /// the cap is reached or every strategy is exhausted. Texts that differ
    /// only in case count as duplicates.
    pub fn expand(&self, query: &str, language_hint: Option<&str>, max_variants: usize) -> Vec<QueryVariant> {
        let original = query.trim();
        let source_query_id = query_id(original);
        let cap = max_variants.max(1);

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(original.to_lowercase());
        let mut variants = vec![QueryVariant {
            text: original.to_string(),
            origin: VariantOrigin::Original,
            source_query_id: source_query_id.clone(),
        }];

        let mut strategies: Vec<(VariantOrigin, std::vec::IntoIter<String>)> = vec![
            (VariantOrigin::Synonym, rewrites(original, SYNONYMS).into_iter()),
            (VariantOrigin::Acronym, rewrites(original, ACRONYMS).into_iter()),
        ];
        if let Some(table) = language_hint.and_then(language_table) {
            strategies.push((VariantOrigin::LanguageSpecific, rewrites(original, table).into_iter()));
        }
        strategies.push((VariantOrigin::Abbreviation, rewrites(original, ABBREVIATIONS).into_iter()));

        while variants.len() < cap {
            let mut progressed = false;
            for (origin, pending) in &mut strategies {
                if variants.len() >= cap {
                    break;
                }
                // next candidate of this strategy that is not a duplicate
                if let Some(text) = pending.by_ref().find(|t| seen.insert(t.to_lowercase())) {
                    variants.push(QueryVariant {
                        text,
                        origin: *origin,
                        source_query_id: source_query_id.clone(),
                    });
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(variants: &[QueryVariant]) -> Vec<&str> {
        variants.iter().map(|v| v.text.as_str()).collect()
    }

    #[test]
    fn test_jwt_auth_expands_acronym() {
        let variants = QueryExpander::new().expand("JWT auth", None, 3);
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].text, "JWT auth");
        assert_eq!(variants[0].origin, VariantOrigin::Original);
        assert!(
            variants
                .iter()
                .any(|v| v.origin == VariantOrigin::Acronym && v.text.contains("JSON Web Token"))
        );
    }

    #[test]
    fn test_round_robin_order() {
        let variants = QueryExpander::new().expand("JWT auth", None, 5);
        assert_eq!(
            texts(&variants),
            vec![
                "JWT auth",
                "JSON Web Token auth",
                "JWT authentication",
                "JWT authorization",
            ]
        );
    }

    #[test]
    fn test_language_hint_rewrites() {
        let expander = QueryExpander::new();
        let plain = expander.expand("parse function", None, 10);
        assert!(plain.iter().all(|v| v.origin != VariantOrigin::LanguageSpecific));

        let python = expander.expand("parse function", Some("py"), 10);
        let rewrite = python
            .iter()
            .find(|v| v.origin == VariantOrigin::LanguageSpecific)
            .unwrap();
        assert_eq!(rewrite.text, "parse def");
    }

    #[test]
    fn test_cap_and_determinism() {
        let expander = QueryExpander::new();
        let a = expander.expand("find user function", Some("rust"), 4);
        let b = expander.expand("find user function", Some("rust"), 4);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        // one per strategy in the first round
        let origins: Vec<VariantOrigin> = a.iter().map(|v| v.origin).collect();
        assert_eq!(
            origins,
            vec![
                VariantOrigin::Original,
                VariantOrigin::Synonym,
                VariantOrigin::LanguageSpecific,
                VariantOrigin::Synonym,
            ]
        );
    }

    #[test]
    fn test_duplicates_dropped_case_insensitively() {
        // "func" abbreviates to "function", go rewrites "function" back to "func"
        let variants = QueryExpander::new().expand("Func", Some("go"), 10);
        let mut lowered: Vec<String> = variants.iter().map(|v| v.text.to_lowercase()).collect();
        let before = lowered.len();
        lowered.sort();
        lowered.dedup();
        assert_eq!(lowered.len(), before);
    }

    #[test]
    fn test_no_expansion_and_zero_cap() {
        let expander = QueryExpander::new();
        let variants = expander.expand("zzz", None, 5);
        assert_eq!(texts(&variants), vec!["zzz"]);
        assert_eq!(expander.expand("JWT", None, 0).len(), 1);
        assert!(variants.iter().all(|v| v.source_query_id == query_id("zzz")));
    }
}
