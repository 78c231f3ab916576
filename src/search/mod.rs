//! Hybrid search over the store.
//!
//! Five independent strategies ([`strategies`]) retrieve candidates, the
//! classifier ([`classify`]) weighs them per query shape, and the fusion
//! layer ([`fusion`]) merges rankings with RRF and applies path/type
//! boosts. Every strategy returns [`SearchResult`]s with a strategy-local
//! score in `[0, 1]`.

pub mod classify;
pub mod fusion;
pub mod strategies;

use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::store::ChunkRecord;

/// One retrieval method over the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    Vector,
    Fts,
    Ast,
    Path,
    Dependency,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Vector,
        Strategy::Fts,
        Strategy::Ast,
        Strategy::Path,
        Strategy::Dependency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Vector => "vector",
            Strategy::Fts => "fts",
            Strategy::Ast => "ast",
            Strategy::Path => "path",
            Strategy::Dependency => "dependency",
        }
    }

    pub fn parse(s: &str) -> Result<Strategy> {
        match s.trim() {
            "vector" => Ok(Strategy::Vector),
            "fts" => Ok(Strategy::Fts),
            "ast" => Ok(Strategy::Ast),
            "path" => Ok(Strategy::Path),
            "dependency" => Ok(Strategy::Dependency),
            other => Err(CoreError::SearchFailed(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

/// A ranked code location. `score` is in `[0, 1]`; after fusion the top
/// result scores exactly 1.0 unless everything is zero.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub file_path: String,
    pub line_start: i64,
    pub line_end: i64,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub chunk_type: String,
    pub text: String,
    pub score: f64,
    pub language: String,
    pub exported: bool,
}

impl SearchResult {
    pub fn from_chunk(chunk: &ChunkRecord, score: f64) -> Self {
        Self {
            chunk_id: chunk.id,
            file_path: chunk.file_path.clone(),
            line_start: chunk.line_start,
            line_end: chunk.line_end,
            name: chunk.name.clone(),
            chunk_type: chunk.chunk_type.as_str().to_string(),
            text: chunk.text.clone(),
            score,
            language: chunk.language.clone(),
            exported: chunk.exported,
        }
    }
}

/// Optional per-strategy result filters.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub language: Option<String>,
}

/// Strip FTS5 operator characters from a raw query.
///
/// Operators are replaced with spaces; a `*` survives only as a trailing
/// prefix-search marker (directly after a word character). Underscores are
/// preserved, runs of whitespace collapse, and the result is trimmed. An
/// empty result means the FTS strategy short-circuits.
pub fn sanitize_fts_query(query: &str) -> String {
    let mut cleaned = String::with_capacity(query.len());
    for c in query.chars() {
        match c {
            '?' | '(' | ')' | '"' | ':' | '^' | '~' | '{' | '}' | '!' | '+' | '-' | '\\' => {
                cleaned.push(' ')
            }
            '*' => {
                let after_word = cleaned
                    .chars()
                    .last()
                    .map(|p| p.is_alphanumeric() || p == '_')
                    .unwrap_or(false);
                cleaned.push(if after_word { '*' } else { ' ' });
            }
            other => cleaned.push(other),
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_roundtrip() {
        for strategy in Strategy::ALL {
            assert_eq!(Strategy::parse(strategy.as_str()).unwrap(), strategy);
        }
        assert!(Strategy::parse("bm25").is_err());
    }

    #[test]
    fn test_sanitize_removes_operators() {
        assert_eq!(sanitize_fts_query("what? (is) \"this\""), "what is this");
        assert_eq!(sanitize_fts_query("a:b^c~d"), "a b c d");
        assert_eq!(sanitize_fts_query("x + y - z"), "x y z");
    }

    #[test]
    fn test_sanitize_preserves_trailing_star() {
        assert_eq!(sanitize_fts_query("index*"), "index*");
        assert_eq!(sanitize_fts_query("* index"), "index");
    }

    #[test]
    fn test_sanitize_preserves_underscores() {
        assert_eq!(sanitize_fts_query("compute_changes"), "compute_changes");
    }

    #[test]
    fn test_sanitize_collapses_whitespace() {
        assert_eq!(sanitize_fts_query("  a   b  "), "a b");
    }

    #[test]
    fn test_sanitize_idempotent() {
        for query in ["hello (world)", "a*", "-- ** ??", "snake_case query*"] {
            let once = sanitize_fts_query(query);
            assert_eq!(sanitize_fts_query(&once), once);
        }
    }

    #[test]
    fn test_sanitize_can_empty_out() {
        assert_eq!(sanitize_fts_query("()*+-"), "");
    }
}
