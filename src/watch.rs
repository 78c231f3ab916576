//! Filesystem watcher with debounced re-indexing.
//!
//! Watches the project root recursively, coalesces change bursts within the
//! configured debounce window, and runs an incremental index when the burst
//! settles. Events under the state directory and paths matching
//! `watch.ignored` globs are filtered out so the engine's own writes never
//! trigger a cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config;
use crate::embedding::EmbedderFactory;
use crate::engine;
use crate::error::{CoreError, Result};
use crate::indexer::IndexOptions;

/// Run the watch loop. Returns only on watcher failure or a failed index.
pub async fn run(
    root: &Path,
    factory: &dyn EmbedderFactory,
    debounce_override: Option<u64>,
    init_first: bool,
) -> Result<()> {
    let project_config = config::ensure(root)?;
    let debounce = Duration::from_millis(
        debounce_override.unwrap_or(project_config.watch.debounce_ms),
    );
    let ignored = build_ignored_set(&project_config.watch.ignored)?;
    let state_dir = config::state_dir(root);

    if init_first {
        let stats = engine::index(root, factory, IndexOptions::default()).await?;
        println!(
            "watch: initial index complete ({} files, {} chunks)",
            stats.files_discovered, stats.chunks_created
        );
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = tx.send(event);
    })
    .map_err(|e| CoreError::WatcherFailed(e.to_string()))?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| CoreError::WatcherFailed(e.to_string()))?;

    println!(
        "watching {} (debounce {}ms, ctrl-c to stop)",
        root.display(),
        debounce.as_millis()
    );

    loop {
        // Block for the first event of a burst.
        let first = rx
            .recv()
            .await
            .ok_or_else(|| CoreError::WatcherFailed("event channel closed".to_string()))?;
        let mut relevant = event_is_relevant(first, &state_dir, &ignored)?;

        // Coalesce the rest of the burst until the window stays quiet.
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(event)) => {
                    relevant |= event_is_relevant(event, &state_dir, &ignored)?;
                }
                Ok(None) => {
                    return Err(CoreError::WatcherFailed("event channel closed".to_string()))
                }
                Err(_) => break, // window elapsed
            }
        }

        if !relevant {
            continue;
        }

        info!("changes settled, re-indexing");
        let stats = engine::index(root, factory, IndexOptions::default()).await?;
        if stats.files_added + stats.files_modified + stats.files_deleted > 0 {
            println!(
                "watch: +{} ~{} -{} files, {} chunks",
                stats.files_added, stats.files_modified, stats.files_deleted, stats.chunks_created
            );
        }
    }
}

/// Whether an event should trigger re-indexing.
fn event_is_relevant(
    event: notify::Result<Event>,
    state_dir: &PathBuf,
    ignored: &GlobSet,
) -> Result<bool> {
    let event = event.map_err(|e| CoreError::WatcherFailed(e.to_string()))?;
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
        _ => return Ok(false),
    }
    let relevant = event.paths.iter().any(|path| {
        if path.starts_with(state_dir) {
            return false;
        }
        let matched = ignored.is_match(path);
        if matched {
            debug!("ignoring change in {}", path.display());
        }
        !matched
    });
    Ok(relevant)
}

fn build_ignored_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            CoreError::ConfigInvalid(format!("bad watch.ignored pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CoreError::ConfigInvalid(format!("watch.ignored: {}", e)))
}
