//! Core façade: the operations the CLI (or any embedding caller) consumes.
//!
//! Each operation reads config, acquires the store for its duration, and
//! releases it on every exit path. Strategy dispatch, classification, and
//! fusion are wired here; LLM steering stays outside the core behind the
//! [`QueryPlanner`] seam.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{self, ProjectConfig};
use crate::embedding::{identity_from_config, Embedder, EmbedderFactory};
use crate::error::{CoreError, Result};
use crate::indexer::{self, IndexOptions, IndexStats};
use crate::search::classify::{classify, Classification, QueryKind};
use crate::search::fusion::{self, StrategyResults};
use crate::search::strategies::{self, AstQuery, Direction, MatchMode};
use crate::search::{SearchFilters, SearchResult, Strategy};
use crate::store::{Store, StoreStats};

/// Options for [`query`].
#[derive(Clone)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    /// Explicit strategy set; `None` means the configured default.
    pub strategies: Option<Vec<Strategy>>,
    pub language: Option<String>,
    /// Classifier-driven weight multipliers (on by default).
    pub use_classifier: bool,
    /// Drop the vector strategy even if selected (`--no-vectors`).
    pub skip_vectors: bool,
    pub cancel: CancellationToken,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: None,
            strategies: None,
            language: None,
            use_classifier: true,
            skip_vectors: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// A search plan produced by a [`QueryPlanner`].
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub strategies: Vec<Strategy>,
    pub limit: Option<usize>,
    pub rationale: Option<String>,
}

/// Planner seam for `ask`: LLM adapters implement this outside the core.
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan(&self, query: &str) -> Result<SearchPlan>;
}

/// Default planner: no network, strategy set chosen by the classifier.
pub struct ClassifierPlanner;

#[async_trait]
impl QueryPlanner for ClassifierPlanner {
    async fn plan(&self, query: &str) -> Result<SearchPlan> {
        let classification = classify(query);
        let (strategies, rationale) = match classification.kind {
            QueryKind::Symbol => (
                vec![Strategy::Ast, Strategy::Fts],
                "symbol-shaped query: structured lookup first, full-text as backup",
            ),
            QueryKind::Path => (
                vec![Strategy::Path, Strategy::Fts],
                "path-shaped query: match stored paths, full-text as backup",
            ),
            QueryKind::NaturalLanguage => (
                vec![Strategy::Vector, Strategy::Fts, Strategy::Path],
                "natural-language query: semantic search leads",
            ),
            QueryKind::Keyword => (
                vec![Strategy::Fts, Strategy::Ast, Strategy::Path],
                "keyword query: balanced strategy mix",
            ),
        };
        Ok(SearchPlan {
            strategies,
            limit: None,
            rationale: Some(rationale.to_string()),
        })
    }
}

/// Outcome of [`ask`]: the plan that ran plus the ranked results.
#[derive(Debug)]
pub struct AskOutcome {
    pub plan: SearchPlan,
    pub results: Vec<SearchResult>,
}

/// Status report for `ctx status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub stats: StoreStats,
    pub db_size_bytes: u64,
    pub config: ProjectConfig,
}

/// Initialize the project state and build the full index.
pub async fn init(root: &Path, factory: &dyn EmbedderFactory) -> Result<IndexStats> {
    index(root, factory, IndexOptions::default()).await
}

/// Incrementally (re)index the project.
///
/// Ensures the state directory, config file, and `.gitignore` entry exist,
/// opens the store under both safety gates, and runs the pipeline.
pub async fn index(
    root: &Path,
    factory: &dyn EmbedderFactory,
    options: IndexOptions,
) -> Result<IndexStats> {
    std::fs::create_dir_all(config::state_dir(root))?;
    let project_config = config::ensure(root)?;
    ensure_gitignore_entry(root)?;

    let identity = identity_from_config(&project_config.embedder);
    let store = Store::open(
        &config::db_path(root),
        Some(project_config.embedder.dimensions),
        Some(&identity),
    )
    .await?;

    let embedder: Option<Arc<dyn Embedder>> = if options.skip_embedding {
        None
    } else {
        match factory.create(root, &project_config.embedder) {
            Ok(embedder) => Some(embedder),
            Err(err) => {
                store.close().await;
                return Err(err);
            }
        }
    };

    let result = indexer::run(root, &store, embedder.as_deref(), &options).await;
    store.close().await;

    if let Ok(stats) = &result {
        info!(
            files = stats.files_discovered,
            chunks = stats.chunks_created,
            vectors = stats.vectors_created,
            ms = stats.duration_ms,
            "index complete"
        );
    }
    result
}

/// Run a multi-strategy search and return the fused, re-ranked results.
pub async fn query(
    root: &Path,
    raw_query: &str,
    options: &QueryOptions,
    factory: &dyn EmbedderFactory,
) -> Result<Vec<SearchResult>> {
    let project_config = config::load(root)?;
    let db_path = config::db_path(root);
    if !db_path.exists() {
        return Err(CoreError::NotInitialized(root.to_path_buf()));
    }

    let store = Store::open(&db_path, Some(project_config.embedder.dimensions), None).await?;
    let result = query_inner(root, raw_query, options, factory, &project_config, &store).await;
    store.close().await;
    result
}

async fn query_inner(
    root: &Path,
    raw_query: &str,
    options: &QueryOptions,
    factory: &dyn EmbedderFactory,
    project_config: &ProjectConfig,
    store: &Store,
) -> Result<Vec<SearchResult>> {
    let raw_query = raw_query.trim();
    if raw_query.is_empty() {
        return Ok(Vec::new());
    }

    let limit = options
        .limit
        .unwrap_or(project_config.search.default_limit)
        .max(1);
    let fetch = limit * 3;

    let classification: Classification = if options.use_classifier {
        classify(raw_query)
    } else {
        Classification {
            kind: QueryKind::Keyword,
            multipliers: Strategy::ALL.iter().map(|s| (*s, 1.0)).collect(),
        }
    };
    debug!(kind = classification.kind.as_str(), "query classified");

    let explicit = options.strategies.is_some();
    let mut selected: Vec<Strategy> = match &options.strategies {
        Some(set) => set.clone(),
        None => project_config
            .search
            .strategies
            .iter()
            .map(|name| Strategy::parse(name))
            .collect::<Result<_>>()?,
    };
    // Natural-language queries pull in semantic search unless the caller
    // pinned the strategy set.
    if !explicit
        && classification.kind == QueryKind::NaturalLanguage
        && !selected.contains(&Strategy::Vector)
    {
        selected.push(Strategy::Vector);
    }
    if options.skip_vectors {
        selected.retain(|s| *s != Strategy::Vector);
    }

    let filters = SearchFilters {
        language: options.language.clone(),
    };

    let mut inputs: Vec<StrategyResults> = Vec::new();
    for strategy in selected {
        if options.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let weight =
            project_config.weight(strategy.as_str()) * classification.multiplier(strategy);
        let results = match strategy {
            Strategy::Vector => {
                match factory.create(root, &project_config.embedder) {
                    Ok(embedder) => {
                        strategies::vector(store, embedder.as_ref(), raw_query, fetch, &filters)
                            .await?
                    }
                    Err(err) if !explicit => {
                        // Auto-added vector search degrades gracefully when
                        // no embedder can be built.
                        warn!("vector strategy unavailable: {}", err);
                        Vec::new()
                    }
                    Err(err) => return Err(err),
                }
            }
            Strategy::Fts => strategies::fts(store, raw_query, fetch, &filters).await?,
            Strategy::Ast => ast_lookup(store, raw_query, &filters, fetch).await?,
            Strategy::Path => strategies::path(store, raw_query, fetch).await?,
            Strategy::Dependency => dependency_lookup(store, raw_query, fetch).await?,
        };
        inputs.push(StrategyResults {
            strategy,
            weight,
            results,
        });
    }

    let merged = fusion::rrf_merge(&inputs, Some(fetch));
    Ok(fusion::rerank(merged, raw_query, limit))
}

/// AST strategy dispatch for free-text queries: exact name match first,
/// then prefix, then containment.
async fn ast_lookup(
    store: &Store,
    raw_query: &str,
    filters: &SearchFilters,
    k: usize,
) -> Result<Vec<SearchResult>> {
    for match_mode in [MatchMode::Exact, MatchMode::Prefix, MatchMode::Fuzzy] {
        let query = AstQuery {
            name: Some(raw_query.to_string()),
            language: filters.language.clone(),
            match_mode,
            ..AstQuery::default()
        };
        let results = strategies::ast(store, &query, k).await?;
        if !results.is_empty() {
            return Ok(results);
        }
    }
    Ok(Vec::new())
}

/// Dependency strategy for free-text queries: seed from the best exact
/// symbol match, then trace what it imports.
async fn dependency_lookup(store: &Store, raw_query: &str, k: usize) -> Result<Vec<SearchResult>> {
    let seed_query = AstQuery {
        name: Some(raw_query.to_string()),
        match_mode: MatchMode::Exact,
        ..AstQuery::default()
    };
    let seeds = strategies::ast(store, &seed_query, 1).await?;
    let Some(seed) = seeds.first() else {
        return Ok(Vec::new());
    };
    let mut results =
        strategies::dep_trace(store, seed.chunk_id, Direction::Imports, 2).await?;
    results.truncate(k);
    Ok(results)
}

/// Planner-driven search (`ctx ask`): the caller supplies the planner, the
/// core supplies the executor.
pub async fn ask(
    root: &Path,
    raw_query: &str,
    options: &QueryOptions,
    planner: &dyn QueryPlanner,
    factory: &dyn EmbedderFactory,
) -> Result<AskOutcome> {
    let plan = planner.plan(raw_query).await?;
    let mut plan_options = options.clone();
    plan_options.strategies = Some(plan.strategies.clone());
    if plan.limit.is_some() {
        plan_options.limit = plan.limit;
    }
    // Planner strategies behave like auto-selected ones: vector degrades
    // gracefully without an embedder.
    let results = match query(root, raw_query, &plan_options, factory).await {
        Ok(found) => found,
        Err(CoreError::ConfigInvalid(msg)) if plan.strategies.contains(&Strategy::Vector) => {
            warn!("planned vector strategy unavailable ({}), retrying without", msg);
            plan_options.strategies = Some(
                plan.strategies
                    .iter()
                    .copied()
                    .filter(|s| *s != Strategy::Vector)
                    .collect(),
            );
            query(root, raw_query, &plan_options, factory).await?
        }
        Err(err) => return Err(err),
    };
    Ok(AskOutcome { plan, results })
}

/// Store statistics plus effective config.
pub async fn status(root: &Path) -> Result<StatusReport> {
    let project_config = config::load(root)?;
    let db_path = config::db_path(root);
    if !db_path.exists() {
        return Err(CoreError::NotInitialized(root.to_path_buf()));
    }

    let store = Store::open(&db_path, Some(project_config.embedder.dimensions), None).await?;
    let result = store.stats().await;
    store.close().await;
    let stats = result?;

    let db_size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    Ok(StatusReport {
        stats,
        db_size_bytes,
        config: project_config,
    })
}

/// Make sure `.gitignore` at the root carries the state directory entry.
fn ensure_gitignore_entry(root: &Path) -> Result<()> {
    let entry = format!("{}/", config::STATE_DIR);
    let gitignore = root.join(".gitignore");
    let current = std::fs::read_to_string(&gitignore).unwrap_or_default();
    let present = current
        .lines()
        .map(str::trim)
        .any(|line| line == entry || line == config::STATE_DIR);
    if present {
        return Ok(());
    }
    let mut updated = current;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&entry);
    updated.push('\n');
    std::fs::write(&gitignore, updated)?;
    Ok(())
}

/// Classifier multipliers exposed for callers that format diagnostics.
pub fn classify_query(raw_query: &str) -> (QueryKind, HashMap<Strategy, f64>) {
    let classification = classify(raw_query);
    (classification.kind, classification.multipliers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_gitignore_entry_appended_once() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "node_modules/\n").unwrap();

        ensure_gitignore_entry(tmp.path()).unwrap();
        ensure_gitignore_entry(tmp.path()).unwrap();

        let content = std::fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert_eq!(content.matches(".ctx/").count(), 1);
        assert!(content.starts_with("node_modules/"));
    }

    #[test]
    fn test_gitignore_created_when_missing() {
        let tmp = TempDir::new().unwrap();
        ensure_gitignore_entry(tmp.path()).unwrap();
        let content = std::fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert_eq!(content, ".ctx/\n");
    }

    #[tokio::test]
    async fn test_classifier_planner_shapes() {
        let planner = ClassifierPlanner;
        let symbol_plan = planner.plan("computeChanges").await.unwrap();
        assert_eq!(symbol_plan.strategies[0], Strategy::Ast);

        let nl_plan = planner.plan("how does indexing work").await.unwrap();
        assert_eq!(nl_plan.strategies[0], Strategy::Vector);

        let path_plan = planner.plan("src/indexer.ts").await.unwrap();
        assert_eq!(path_plan.strategies[0], Strategy::Path);
    }
}
