//! The five retrieval strategies.
//!
//! Each runs independently against the store and returns results with a
//! strategy-local score in `[0, 1]`:
//!
//! | Strategy | Backend | Score |
//! |----------|---------|-------|
//! | vector | KNN over `chunk_vectors` | `1 / (1 + distance)` |
//! | fts | FTS5 MATCH over `chunks_fts` | `1 / (1 + \|rank\|)` |
//! | ast | metadata lookup | 1.0 exact / 0.8 prefix / 0.5 contains |
//! | path | glob or keyword over file paths | 1.0 glob; 1.0/0.9/0.7 keyword |
//! | dependency | BFS over edges | `max(0, 1 − 0.2·depth)` |

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::embedding::Embedder;
use crate::error::{CoreError, Result};
use crate::search::{sanitize_fts_query, SearchFilters, SearchResult};
use crate::store::{ChunkQuery, ChunkRecord, ChunkType, NameMode, Store};

/// Structured query for the AST strategy.
#[derive(Debug, Clone, Default)]
pub struct AstQuery {
    pub name: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub parent: Option<String>,
    pub language: Option<String>,
    pub match_mode: MatchMode,
}

/// How the AST strategy matches names. `Fuzzy` is substring containment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Exact,
    Prefix,
    Fuzzy,
}

/// Traversal direction for the dependency strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow outgoing edges: what the start chunk imports.
    Imports,
    /// Follow incoming edges: what imports the start chunk.
    ImportedBy,
}

/// Semantic KNN search.
pub async fn vector(
    store: &Store,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>> {
    let query_vector = embedder.embed_single(query).await?;

    // Over-fetch when a filter will drop rows afterwards.
    let fetch = if filters.language.is_some() { k * 3 } else { k };
    let neighbors = store.knn_search(&query_vector, fetch).await?;
    if neighbors.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = neighbors.iter().map(|(id, _)| *id).collect();
    let by_id: HashMap<i64, ChunkRecord> = store
        .get_chunks_by_ids(&ids)
        .await?
        .into_iter()
        .map(|chunk| (chunk.id, chunk))
        .collect();

    let mut results = Vec::new();
    for (id, distance) in neighbors {
        let Some(chunk) = by_id.get(&id) else { continue };
        if let Some(language) = &filters.language {
            if &chunk.language != language {
                continue;
            }
        }
        results.push(SearchResult::from_chunk(chunk, 1.0 / (1.0 + distance)));
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(k);
    Ok(results)
}

/// Full-text search over chunk name/text/parent.
pub async fn fts(
    store: &Store,
    query: &str,
    k: usize,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>> {
    let sanitized = sanitize_fts_query(query);
    if sanitized.is_empty() {
        return Ok(Vec::new());
    }

    let fetch = if filters.language.is_some() { k * 3 } else { k };
    let hits = store.fts_search(&sanitized, fetch).await?;
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
    let by_id: HashMap<i64, ChunkRecord> = store
        .get_chunks_by_ids(&ids)
        .await?
        .into_iter()
        .map(|chunk| (chunk.id, chunk))
        .collect();

    let mut results = Vec::new();
    for (id, rank) in hits {
        let Some(chunk) = by_id.get(&id) else { continue };
        if let Some(language) = &filters.language {
            if &chunk.language != language {
                continue;
            }
        }
        // BM25 rank is lower-is-better (typically negative).
        results.push(SearchResult::from_chunk(chunk, 1.0 / (1.0 + rank.abs())));
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(k);
    Ok(results)
}

/// Symbol lookup over chunk metadata.
pub async fn ast(store: &Store, query: &AstQuery, k: usize) -> Result<Vec<SearchResult>> {
    let (name_mode, score) = match query.match_mode {
        MatchMode::Exact => (NameMode::Exact, 1.0),
        MatchMode::Prefix => (NameMode::Prefix, 0.8),
        MatchMode::Fuzzy => (NameMode::Contains, 0.5),
    };
    let chunk_query = ChunkQuery {
        name: query.name.clone(),
        name_mode: Some(name_mode),
        chunk_type: query.chunk_type,
        parent: query.parent.clone(),
        language: query.language.clone(),
    };
    let chunks = store.search_chunks(&chunk_query, k).await?;
    Ok(chunks
        .iter()
        .map(|chunk| SearchResult::from_chunk(chunk, score))
        .collect())
}

/// Path strategy: glob when the query carries glob metacharacters,
/// keyword scoring otherwise.
pub async fn path(store: &Store, query: &str, k: usize) -> Result<Vec<SearchResult>> {
    if query.contains(&['*', '?', '['][..]) {
        path_glob(store, query, k).await
    } else {
        path_keyword(store, query, k).await
    }
}

/// All chunks of files whose path matches the glob. Score 1.0.
pub async fn path_glob(store: &Store, pattern: &str, k: usize) -> Result<Vec<SearchResult>> {
    let regex = Regex::new(&glob_to_regex(pattern))
        .map_err(|e| CoreError::SearchFailed(format!("bad path pattern '{}': {}", pattern, e)))?;

    let matched: Vec<String> = store
        .all_file_paths()
        .await?
        .into_iter()
        .filter(|path| regex.is_match(path))
        .collect();

    let chunks = store.get_chunks_by_paths(&matched, k).await?;
    Ok(chunks
        .iter()
        .map(|chunk| SearchResult::from_chunk(chunk, 1.0))
        .collect())
}

/// Keyword scoring over stored paths: directory-segment exact 1.0, filename
/// (sans extension) exact 0.9, case-insensitive substring 0.7.
pub async fn path_keyword(store: &Store, term: &str, k: usize) -> Result<Vec<SearchResult>> {
    let mut scored: Vec<(String, f64)> = Vec::new();
    for path in store.all_file_paths().await? {
        if let Some(score) = path_keyword_score(&path, term) {
            scored.push((path, score));
        }
    }
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut results = Vec::new();
    for (path, score) in scored {
        if results.len() >= k {
            break;
        }
        let remaining = k - results.len();
        let chunks = store
            .get_chunks_by_paths(&[path.clone()], remaining)
            .await?;
        results.extend(
            chunks
                .iter()
                .map(|chunk| SearchResult::from_chunk(chunk, score)),
        );
    }
    Ok(results)
}

/// Score one path against a keyword; `None` when it does not match at all.
pub fn path_keyword_score(path: &str, term: &str) -> Option<f64> {
    let segments: Vec<&str> = path.split('/').collect();
    let (file_name, dirs) = segments.split_last()?;

    if dirs.iter().any(|segment| *segment == term) {
        return Some(1.0);
    }
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    if stem == term {
        return Some(0.9);
    }
    if path.to_lowercase().contains(&term.to_lowercase()) {
        return Some(0.7);
    }
    None
}

/// BFS over the dependency graph from `start_chunk`.
///
/// Neighbors found at depth level `d` (0-based) score `max(0, 1 − 0.2·d)`.
/// Chunks are returned in discovery order; cycles end via the visited set.
pub async fn dep_trace(
    store: &Store,
    start_chunk: i64,
    direction: Direction,
    depth: usize,
) -> Result<Vec<SearchResult>> {
    let mut visited: HashSet<i64> = HashSet::from([start_chunk]);
    let mut frontier = vec![start_chunk];
    let mut results = Vec::new();

    for level in 0..depth {
        if frontier.is_empty() {
            break;
        }
        let neighbors = match direction {
            Direction::Imports => store.outgoing_batch(&frontier).await?,
            Direction::ImportedBy => store.incoming_batch(&frontier).await?,
        };
        let fresh: Vec<i64> = neighbors
            .into_iter()
            .filter(|id| visited.insert(*id))
            .collect();
        if fresh.is_empty() {
            break;
        }

        let score = (1.0 - 0.2 * level as f64).max(0.0);
        let by_id: HashMap<i64, ChunkRecord> = store
            .get_chunks_by_ids(&fresh)
            .await?
            .into_iter()
            .map(|chunk| (chunk.id, chunk))
            .collect();
        for id in &fresh {
            if let Some(chunk) = by_id.get(id) {
                results.push(SearchResult::from_chunk(chunk, score));
            }
        }
        frontier = fresh;
    }

    Ok(results)
}

/// Translate a path glob into an anchored regex: `**` crosses segments,
/// `*` stays within one, `?` is a single non-separator character; all other
/// regex metacharacters are escaped.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            other => regex.push(other),
        }
    }
    regex.push('$');
    regex
}
