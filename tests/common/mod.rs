//! Shared test fixtures: a deterministic in-process embedder and its
//! factory, plus project scaffolding helpers.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use ctx_engine::config::EmbedderConfig;
use ctx_engine::embedding::{l2_normalize, Embedder, EmbedderFactory, Progress};
use ctx_engine::error::Result;

/// Deterministic embedder: tokens hash into buckets, vectors are
/// L2-normalized. Similar texts share buckets and score close.
pub struct FakeEmbedder {
    dims: usize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if token.is_empty() {
                continue;
            }
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in token.to_lowercase().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash as usize) % self.dims] += 1.0;
        }
        l2_normalize(&mut vector);
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn name(&self) -> &str {
        "fake-test-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        texts: &[String],
        progress: Option<Progress<'_>>,
    ) -> Result<Vec<Vec<f32>>> {
        let vectors = texts.iter().map(|t| self.vector_for(t)).collect();
        if let Some(report) = progress {
            report(texts.len(), texts.len());
        }
        Ok(vectors)
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }
}

/// Factory handing out [`FakeEmbedder`]s sized to the configured dimension.
pub struct FakeFactory;

impl EmbedderFactory for FakeFactory {
    fn create(&self, _root: &Path, config: &EmbedderConfig) -> Result<Arc<dyn Embedder>> {
        Ok(Arc::new(FakeEmbedder::new(config.dimensions)))
    }
}

/// Write a file under `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Write a `.ctx/config.json` with a small vector dimension so tests stay
/// fast, keeping every other default.
pub fn write_test_config(root: &Path, dims: usize) {
    write_file(
        root,
        ".ctx/config.json",
        &format!(
            r#"{{"embedder": {{"provider": "local", "model": "fake", "dimensions": {}}}}}"#,
            dims
        ),
    );
}
