//! Query classification.
//!
//! A pure function from the raw query string to a kind plus per-strategy
//! weight multipliers. Checked in order: path-shaped queries first, then
//! symbol casing conventions, then natural-language signals; anything else
//! is a plain keyword query with neutral multipliers.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::search::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Symbol,
    Path,
    NaturalLanguage,
    Keyword,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Symbol => "symbol",
            QueryKind::Path => "path",
            QueryKind::NaturalLanguage => "natural_language",
            QueryKind::Keyword => "keyword",
        }
    }
}

/// Classification outcome: the kind and a positive multiplier per strategy.
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: QueryKind,
    pub multipliers: HashMap<Strategy, f64>,
}

impl Classification {
    pub fn multiplier(&self, strategy: Strategy) -> f64 {
        self.multipliers.get(&strategy).copied().unwrap_or(1.0)
    }
}

const QUESTION_WORDS: &[&str] = &[
    "how", "what", "where", "why", "when", "which", "show", "explain", "find", "list",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "do", "does", "in", "on", "of", "to", "for",
    "with", "and", "or",
];

fn source_extension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\.(ts|tsx|js|jsx|mjs|cjs|py|rs|go|json|ya?ml|toml|md)$").unwrap()
    })
}

fn camel_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9]*([A-Z][a-zA-Z0-9]*)+$").unwrap())
}

fn pascal_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z][a-z0-9]+)+$").unwrap())
}

fn snake_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)+$").unwrap())
}

fn upper_snake_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]*(_[A-Z0-9]+)+$").unwrap())
}

/// Classify a raw query string.
pub fn classify(query: &str) -> Classification {
    let query = query.trim();

    if query.contains('/') || source_extension_re().is_match(query) {
        return with_multipliers(
            QueryKind::Path,
            &[(Strategy::Path, 2.0), (Strategy::Ast, 0.5)],
        );
    }

    if is_symbol_like(query) {
        return with_multipliers(
            QueryKind::Symbol,
            &[(Strategy::Ast, 1.5), (Strategy::Vector, 0.5)],
        );
    }

    if is_natural_language(query) {
        return with_multipliers(
            QueryKind::NaturalLanguage,
            &[
                (Strategy::Vector, 1.5),
                (Strategy::Path, 1.2),
                (Strategy::Ast, 0.7),
            ],
        );
    }

    with_multipliers(QueryKind::Keyword, &[])
}

fn is_symbol_like(query: &str) -> bool {
    camel_case_re().is_match(query)
        || pascal_case_re().is_match(query)
        || snake_case_re().is_match(query)
        || upper_snake_re().is_match(query)
}

fn is_natural_language(query: &str) -> bool {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if words.iter().any(|w| QUESTION_WORDS.contains(&w.as_str())) {
        return true;
    }
    words.len() >= 4 && words.iter().any(|w| STOP_WORDS.contains(&w.as_str()))
}

fn with_multipliers(kind: QueryKind, overrides: &[(Strategy, f64)]) -> Classification {
    let mut multipliers: HashMap<Strategy, f64> =
        Strategy::ALL.iter().map(|s| (*s, 1.0)).collect();
    for (strategy, value) in overrides {
        multipliers.insert(*strategy, *value);
    }
    Classification { kind, multipliers }
}
