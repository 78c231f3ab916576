//! End-to-end scenarios through the library façade, using the deterministic
//! fake embedder.

mod common;

use common::{write_file, write_test_config, FakeFactory};
use tempfile::TempDir;

use ctx_engine::config;
use ctx_engine::engine::{self, QueryOptions};
use ctx_engine::error::CoreError;
use ctx_engine::indexer::IndexOptions;
use ctx_engine::search::strategies::{self, Direction};
use ctx_engine::search::Strategy;
use ctx_engine::store::{ChunkInput, ChunkType, Store};

const DIMS: usize = 16;

fn seed_auth_project(root: &std::path::Path) {
    write_test_config(root, DIMS);
    write_file(
        root,
        "src/a.ts",
        r#"export function validateToken(token: string): boolean {
    if (!token) {
        return false;
    }
    return token.length > 10 && token.startsWith("ey");
}
"#,
    );
    write_file(
        root,
        "src/b.ts",
        r#"import { validateToken } from "./a";

export function handler(token: string) {
    return validateToken(token);
}
"#,
    );
}

#[tokio::test]
async fn test_init_then_symbol_query_ranks_definition_first() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());

    let stats = engine::init(tmp.path(), &FakeFactory).await.unwrap();
    assert_eq!(stats.files_added, 2);
    assert!(stats.chunks_created >= 3);
    assert_eq!(stats.vectors_created, stats.chunks_created);

    let options = QueryOptions {
        strategies: Some(vec![Strategy::Fts, Strategy::Ast]),
        ..QueryOptions::default()
    };
    let results = engine::query(tmp.path(), "validateToken", &options, &FakeFactory)
        .await
        .unwrap();

    assert!(!results.is_empty());
    let top = &results[0];
    assert_eq!(top.file_path, "src/a.ts");
    assert_eq!(top.name.as_deref(), Some("validateToken"));
    assert!((top.score - 1.0).abs() < 1e-9);

    // The import chunk from src/b.ts, if retrieved, scores strictly below.
    for result in &results[1..] {
        if result.file_path == "src/b.ts" && result.chunk_type == "import" {
            assert!(result.score < top.score);
        }
    }
}

#[tokio::test]
async fn test_reindex_unchanged_tree_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());

    engine::init(tmp.path(), &FakeFactory).await.unwrap();
    let second = engine::index(tmp.path(), &FakeFactory, IndexOptions::default())
        .await
        .unwrap();

    assert_eq!(second.files_added, 0);
    assert_eq!(second.files_modified, 0);
    assert_eq!(second.files_deleted, 0);
    assert_eq!(second.files_unchanged, 2);
    assert_eq!(second.chunks_created, 0);
    assert_eq!(second.vectors_created, 0);
}

#[tokio::test]
async fn test_one_character_change_marks_only_that_file_modified() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());
    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    // Stable ids recorded before the edit.
    let store = Store::open(&config::db_path(tmp.path()), Some(DIMS), None)
        .await
        .unwrap();
    let before = store.get_file("src/b.ts").await.unwrap().unwrap();
    let chunks_before = store.get_chunks_by_file(before.id).await.unwrap();
    let edited_before = store.get_file("src/a.ts").await.unwrap().unwrap();
    let edited_chunks_before = store.get_chunks_by_file(edited_before.id).await.unwrap();
    store.close().await;

    // One character changes in src/a.ts; line layout stays identical.
    let edited = std::fs::read_to_string(tmp.path().join("src/a.ts"))
        .unwrap()
        .replace("token.length > 10", "token.length > 11");
    write_file(tmp.path(), "src/a.ts", &edited);

    let stats = engine::index(tmp.path(), &FakeFactory, IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.files_modified, 1);
    assert_eq!(stats.files_added, 0);
    assert_eq!(stats.files_deleted, 0);
    assert_eq!(stats.files_unchanged, 1);

    // Chunk ids with unchanged line ranges stay stable.
    let store = Store::open(&config::db_path(tmp.path()), Some(DIMS), None)
        .await
        .unwrap();
    let after = store.get_file("src/b.ts").await.unwrap().unwrap();
    let chunks_after = store.get_chunks_by_file(after.id).await.unwrap();
    store.close().await;

    let ids_before: Vec<&String> = chunks_before.iter().map(|c| &c.stable_id).collect();
    let ids_after: Vec<&String> = chunks_after.iter().map(|c| &c.stable_id).collect();
    assert_eq!(ids_before, ids_after);

    // The modified file's line layout did not shift, so its re-created
    // chunks keep the same stable ids (with new content hashes).
    let store = Store::open(&config::db_path(tmp.path()), Some(DIMS), None)
        .await
        .unwrap();
    let edited_after = store.get_file("src/a.ts").await.unwrap().unwrap();
    let edited_chunks_after = store.get_chunks_by_file(edited_after.id).await.unwrap();
    store.close().await;

    let stable_before: Vec<&String> =
        edited_chunks_before.iter().map(|c| &c.stable_id).collect();
    let stable_after: Vec<&String> =
        edited_chunks_after.iter().map(|c| &c.stable_id).collect();
    assert_eq!(stable_before, stable_after);
}

#[tokio::test]
async fn test_deleted_file_fully_removed() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());
    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    std::fs::remove_file(tmp.path().join("src/b.ts")).unwrap();
    let stats = engine::index(tmp.path(), &FakeFactory, IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.files_deleted, 1);

    let store = Store::open(&config::db_path(tmp.path()), Some(DIMS), None)
        .await
        .unwrap();
    assert!(store.get_file("src/b.ts").await.unwrap().is_none());
    let hits = store.fts_search("handler", 10).await.unwrap();
    assert!(hits.is_empty());
    store.close().await;
}

#[tokio::test]
async fn test_path_glob_and_keyword_ordering() {
    let tmp = TempDir::new().unwrap();
    write_test_config(tmp.path(), DIMS);
    write_file(tmp.path(), "src/indexer/incremental.ts", "export function incremental() { return 1; }\n");
    write_file(tmp.path(), "src/indexer/chunker.ts", "export function chunkerMain() { return 2; }\n");
    write_file(tmp.path(), "src/indexer.ts", "export function indexerEntry() { return 3; }\n");
    write_file(tmp.path(), "src/reindexer_util.ts", "export function reindex() { return 4; }\n");
    write_file(tmp.path(), "src/search.ts", "export function searchMain() { return 5; }\n");

    engine::init(tmp.path(), &FakeFactory).await.unwrap();
    let store = Store::open(&config::db_path(tmp.path()), Some(DIMS), None)
        .await
        .unwrap();

    // Glob mode: exactly the chunks from matching files.
    let glob_results = strategies::path(&store, "src/indexer/*", 50).await.unwrap();
    assert!(!glob_results.is_empty());
    assert!(glob_results.iter().all(|r| {
        r.file_path == "src/indexer/incremental.ts" || r.file_path == "src/indexer/chunker.ts"
    }));
    assert!(glob_results.iter().all(|r| r.score == 1.0));

    // Keyword mode: directory hits (1.0) first, then filename (0.9),
    // then substring (0.7).
    let keyword_results = strategies::path(&store, "indexer", 50).await.unwrap();
    let score_for = |path: &str| {
        keyword_results
            .iter()
            .find(|r| r.file_path == path)
            .map(|r| r.score)
    };
    assert_eq!(score_for("src/indexer/incremental.ts"), Some(1.0));
    assert_eq!(score_for("src/indexer/chunker.ts"), Some(1.0));
    assert_eq!(score_for("src/indexer.ts"), Some(0.9));
    assert_eq!(score_for("src/reindexer_util.ts"), Some(0.7));
    assert_eq!(score_for("src/search.ts"), None);

    let mut last = f64::INFINITY;
    for result in &keyword_results {
        assert!(result.score <= last);
        last = result.score;
    }
    store.close().await;
}

#[tokio::test]
async fn test_dependency_trace_bfs() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(&tmp.path().join("index.db"), Some(4), None)
        .await
        .unwrap();
    let file_id = store
        .upsert_file("src/chain.ts", "typescript", "h", 10)
        .await
        .unwrap();

    let mk = |name: &str, line: i64| ChunkInput {
        stable_id: format!("s-{}", name),
        content_hash: format!("c-{}", name),
        chunk_type: ChunkType::Function,
        name: Some(name.to_string()),
        parent: None,
        line_start: line,
        line_end: line + 1,
        text: format!("function {}() {{}}", name),
        imports: Vec::new(),
        exported: false,
    };
    let ids = store
        .insert_chunks(file_id, &[mk("a", 1), mk("b", 3), mk("c", 5), mk("d", 7)])
        .await
        .unwrap();
    let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);

    // D → C → B → A
    store.insert_dep(d, c, "imports").await.unwrap();
    store.insert_dep(c, b, "imports").await.unwrap();
    store.insert_dep(b, a, "imports").await.unwrap();

    let one_hop = strategies::dep_trace(&store, d, Direction::Imports, 1)
        .await
        .unwrap();
    assert_eq!(one_hop.len(), 1);
    assert_eq!(one_hop[0].name.as_deref(), Some("c"));
    assert_eq!(one_hop[0].score, 1.0);

    let three_hops = strategies::dep_trace(&store, d, Direction::Imports, 3)
        .await
        .unwrap();
    let names: Vec<&str> = three_hops.iter().filter_map(|r| r.name.as_deref()).collect();
    assert_eq!(names, vec!["c", "b", "a"]);
    let scores: Vec<f64> = three_hops.iter().map(|r| r.score).collect();
    assert!(scores[0] > scores[1] && scores[1] > scores[2]);

    let reverse = strategies::dep_trace(&store, a, Direction::ImportedBy, 2)
        .await
        .unwrap();
    let names: Vec<&str> = reverse.iter().filter_map(|r| r.name.as_deref()).collect();
    assert_eq!(names, vec!["b", "c"]);
    store.close().await;
}

#[tokio::test]
async fn test_dependency_trace_tolerates_cycles() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(&tmp.path().join("index.db"), Some(4), None)
        .await
        .unwrap();
    let file_id = store
        .upsert_file("src/cycle.ts", "typescript", "h", 10)
        .await
        .unwrap();
    let mk = |name: &str, line: i64| ChunkInput {
        stable_id: format!("s-{}", name),
        content_hash: format!("c-{}", name),
        chunk_type: ChunkType::Function,
        name: Some(name.to_string()),
        parent: None,
        line_start: line,
        line_end: line + 1,
        text: "x".to_string(),
        imports: Vec::new(),
        exported: false,
    };
    let ids = store
        .insert_chunks(file_id, &[mk("x", 1), mk("y", 3)])
        .await
        .unwrap();
    store.insert_dep(ids[0], ids[1], "imports").await.unwrap();
    store.insert_dep(ids[1], ids[0], "imports").await.unwrap();

    let traced = strategies::dep_trace(&store, ids[0], Direction::Imports, 10)
        .await
        .unwrap();
    // Only y is newly discovered; the cycle back to x terminates.
    assert_eq!(traced.len(), 1);
    assert_eq!(traced[0].name.as_deref(), Some("y"));
    store.close().await;
}

#[tokio::test]
async fn test_fusion_prefers_function_over_import_chunk() {
    let tmp = TempDir::new().unwrap();
    write_test_config(tmp.path(), DIMS);
    write_file(
        tmp.path(),
        "src/indexer/chunker.ts",
        &format!(
            "export function chunkIndexerNodes(nodes: string[]) {{\n{}\n}}\n",
            (0..40)
                .map(|i| format!("    const step{} = nodes.length + {}; // indexer step", i, i))
                .collect::<Vec<_>>()
                .join("\n")
        ),
    );
    write_file(
        tmp.path(),
        "src/handler.ts",
        "import { chunkIndexerNodes } from \"./indexer/chunker\";\n\nexport function h(n: string[]) { return chunkIndexerNodes(n); }\n",
    );

    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    let options = QueryOptions {
        strategies: Some(vec![Strategy::Fts, Strategy::Path]),
        ..QueryOptions::default()
    };
    let results = engine::query(tmp.path(), "indexer", &options, &FakeFactory)
        .await
        .unwrap();

    assert!(!results.is_empty());
    let top = &results[0];
    assert_eq!(top.chunk_type, "function");
    assert_eq!(top.file_path, "src/indexer/chunker.ts");

    if let Some(import_result) = results.iter().find(|r| r.chunk_type == "import") {
        assert!(import_result.score < top.score);
    }
}

#[tokio::test]
async fn test_vector_strategy_finds_semantic_match() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());
    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    let options = QueryOptions {
        strategies: Some(vec![Strategy::Vector]),
        ..QueryOptions::default()
    };
    let results = engine::query(tmp.path(), "validateToken token", &options, &FakeFactory)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().any(|r| r.file_path == "src/a.ts"));
    for result in &results {
        assert!(result.score >= 0.0 && result.score <= 1.0);
    }
}

#[tokio::test]
async fn test_skip_embedding_leaves_fts_usable() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());

    let options = IndexOptions {
        skip_embedding: true,
        ..IndexOptions::default()
    };
    let stats = engine::index(tmp.path(), &FakeFactory, options).await.unwrap();
    assert!(stats.chunks_created > 0);
    assert_eq!(stats.vectors_created, 0);

    let query_options = QueryOptions {
        strategies: Some(vec![Strategy::Fts]),
        ..QueryOptions::default()
    };
    let results = engine::query(tmp.path(), "validateToken", &query_options, &FakeFactory)
        .await
        .unwrap();
    assert!(!results.is_empty());
}

#[tokio::test]
async fn test_query_on_uninitialized_root_fails() {
    let tmp = TempDir::new().unwrap();
    match engine::query(tmp.path(), "anything", &QueryOptions::default(), &FakeFactory).await {
        Err(CoreError::NotInitialized(_)) => {}
        other => panic!("expected NotInitialized, got {:?}", other),
    }
}

#[tokio::test]
async fn test_natural_language_query_auto_adds_vector() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());
    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    // Default strategy set + natural-language query: vector joins in, the
    // query succeeds, and results stay bounded.
    let results = engine::query(
        tmp.path(),
        "how does the token validation work",
        &QueryOptions::default(),
        &FakeFactory,
    )
    .await
    .unwrap();
    for result in &results {
        assert!(result.score >= 0.0 && result.score <= 1.0);
    }
}

#[tokio::test]
async fn test_ask_with_classifier_planner() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());
    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    let outcome = engine::ask(
        tmp.path(),
        "validateToken",
        &QueryOptions::default(),
        &ctx_engine::ClassifierPlanner,
        &FakeFactory,
    )
    .await
    .unwrap();

    assert_eq!(outcome.plan.strategies[0], Strategy::Ast);
    assert!(!outcome.results.is_empty());
    assert_eq!(outcome.results[0].name.as_deref(), Some("validateToken"));
}

#[tokio::test]
async fn test_status_reports_counts() {
    let tmp = TempDir::new().unwrap();
    seed_auth_project(tmp.path());
    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    let report = engine::status(tmp.path()).await.unwrap();
    assert_eq!(report.stats.files, 2);
    assert!(report.stats.chunks >= 3);
    assert_eq!(report.stats.vectors, report.stats.chunks);
    assert!(report.db_size_bytes > 0);
    assert_eq!(report.config.embedder.dimensions, DIMS);
    assert!(report
        .stats
        .by_language
        .iter()
        .any(|(language, count)| language == "typescript" && *count == 2));
}

#[tokio::test]
async fn test_language_filter_restricts_results() {
    let tmp = TempDir::new().unwrap();
    write_test_config(tmp.path(), DIMS);
    write_file(tmp.path(), "src/auth.ts", "export function checkAuth() { return true; }\n");
    write_file(tmp.path(), "src/auth.py", "def check_auth():\n    return True\n");
    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    let options = QueryOptions {
        strategies: Some(vec![Strategy::Fts]),
        language: Some("python".to_string()),
        ..QueryOptions::default()
    };
    let results = engine::query(tmp.path(), "auth", &options, &FakeFactory)
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.language == "python"));
}

#[tokio::test]
async fn test_init_writes_config_and_gitignore() {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "src/a.ts", "export const a = 1;\n");
    write_test_config(tmp.path(), DIMS);

    engine::init(tmp.path(), &FakeFactory).await.unwrap();

    assert!(config::config_path(tmp.path()).exists());
    assert!(config::db_path(tmp.path()).exists());
    let gitignore = std::fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|line| line.trim() == ".ctx/"));
}
