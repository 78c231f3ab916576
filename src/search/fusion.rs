//! Rank fusion and re-ranking.
//!
//! Per-strategy rankings merge with weighted Reciprocal Rank Fusion
//! (`score += weight · 1/(K + rank)`, K = 60), then the fused list passes
//! through the re-rank pipeline: path boosts, import/test/small-snippet
//! penalties, public-API boost, per-file diminishing returns, and a final
//! renormalization so the top score is exactly 1.0.

use std::collections::HashMap;

use crate::search::{SearchResult, Strategy};

/// RRF smoothing constant.
pub const RRF_K: f64 = 60.0;

/// One strategy's ranked output plus its effective weight.
#[derive(Debug, Clone)]
pub struct StrategyResults {
    pub strategy: Strategy,
    pub weight: f64,
    pub results: Vec<SearchResult>,
}

/// Weighted RRF merge across strategies.
///
/// The first-seen record for a chunk is kept as its representative. Results
/// come back sorted by fused score descending, truncated to `limit` when
/// given, and renormalized so the top score is 1.0 (zeros stay zero).
pub fn rrf_merge(inputs: &[StrategyResults], limit: Option<usize>) -> Vec<SearchResult> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    let mut representatives: HashMap<i64, SearchResult> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();

    for input in inputs {
        for (index, result) in input.results.iter().enumerate() {
            let rank = index as f64 + 1.0;
            *scores.entry(result.chunk_id).or_default() += input.weight / (RRF_K + rank);
            representatives.entry(result.chunk_id).or_insert_with(|| {
                order.push(result.chunk_id);
                result.clone()
            });
        }
    }

    let mut merged: Vec<SearchResult> = order
        .into_iter()
        .map(|chunk_id| {
            let mut result = representatives.remove(&chunk_id).unwrap();
            result.score = scores[&chunk_id];
            result
        })
        .collect();

    sort_by_score(&mut merged);
    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    renormalize(&mut merged);
    merged
}

/// The post-fusion re-rank pipeline (§ boosts and penalties), ending in a
/// sort, truncation to `limit`, and renormalization to `[0, 1]`.
pub fn rerank(mut results: Vec<SearchResult>, query: &str, limit: usize) -> Vec<SearchResult> {
    let terms = boost_terms(query);

    // Path boost.
    for result in &mut results {
        result.score *= path_boost_factor(&result.file_path, &terms);
    }

    // Imports fall behind real definitions.
    apply_gated_penalty(&mut results, 0.5, |r| r.chunk_type == "import");

    // Test files fall behind production code.
    apply_gated_penalty(&mut results, 0.65, |r| is_test_path(&r.file_path));

    // Tiny snippets carry little context.
    apply_gated_penalty(&mut results, 0.75, |r| r.line_end - r.line_start + 1 <= 3);

    // Public API surface gets a nudge.
    for result in &mut results {
        let text_exported = result
            .text
            .trim_start()
            .to_lowercase()
            .starts_with("export ");
        if result.exported || text_exported {
            result.score *= 1.12;
        }
    }

    // Diminishing returns per file.
    sort_by_score(&mut results);
    let mut per_file: HashMap<String, usize> = HashMap::new();
    for result in &mut results {
        let seen = per_file.entry(result.file_path.clone()).or_insert(0);
        *seen += 1;
        result.score *= match *seen {
            1 => 1.0,
            2 => 0.9,
            3 => 0.8,
            _ => 0.7,
        };
    }

    sort_by_score(&mut results);
    results.truncate(limit);
    renormalize(&mut results);
    results
}

/// Multiply `factor` into every result matching `predicate`, but only when
/// at least one non-matching result has positive score.
fn apply_gated_penalty<F>(results: &mut [SearchResult], factor: f64, predicate: F)
where
    F: Fn(&SearchResult) -> bool,
{
    let has_other = results.iter().any(|r| !predicate(r) && r.score > 0.0);
    if !has_other {
        return;
    }
    for result in results.iter_mut() {
        if predicate(result) {
            result.score *= factor;
        }
    }
}

/// Whitespace-split query tokens of length ≥ 2.
pub fn boost_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|token| token.len() >= 2)
        .map(|token| token.to_string())
        .collect()
}

/// Max boost over the term set: directory-segment exact 1.5×, filename
/// (sans extension) exact 1.4×, case-insensitive substring 1.2×, else 1.0×.
pub fn path_boost_factor(path: &str, terms: &[String]) -> f64 {
    let segments: Vec<&str> = path.split('/').collect();
    let Some((file_name, dirs)) = segments.split_last() else {
        return 1.0;
    };
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    let path_lower = path.to_lowercase();

    let mut best = 1.0f64;
    for term in terms {
        let factor = if dirs.iter().any(|segment| segment == term) {
            1.5
        } else if stem == term {
            1.4
        } else if path_lower.contains(&term.to_lowercase()) {
            1.2
        } else {
            1.0
        };
        best = best.max(factor);
    }
    best
}

/// True for paths under `tests`/`__tests__` directories or with
/// `*.test.*` / `*.spec.*` script extensions.
pub fn is_test_path(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    let Some((file_name, dirs)) = segments.split_last() else {
        return false;
    };
    if dirs
        .iter()
        .any(|segment| *segment == "tests" || *segment == "__tests__")
    {
        return true;
    }
    const SCRIPT_EXTS: &[&str] = &["js", "mjs", "cjs", "ts", "tsx", "jsx"];
    SCRIPT_EXTS.iter().any(|ext| {
        file_name.ends_with(&format!(".test.{}", ext))
            || file_name.ends_with(&format!(".spec.{}", ext))
    })
}

fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Scale so the top score is exactly 1.0; all-zero lists stay zero.
fn renormalize(results: &mut [SearchResult]) {
    let top = results.first().map(|r| r.score).unwrap_or(0.0);
    if top > 0.0 {
        for result in results.iter_mut() {
            result.score /= top;
        }
    }
}
