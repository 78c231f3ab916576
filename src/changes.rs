//! Change detection between a discovered tree and the store.
//!
//! Every discovered file is hashed (full-content SHA-256) and compared with
//! the stored hash: absent → added, different → modified, equal → unchanged.
//! Stored paths missing from discovery are deleted. All four lists come back
//! lexicographically sorted.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::discovery::DiscoveredFile;
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    /// Content hashes for added + modified paths.
    pub hashes: HashMap<String, String>,
    pub duration: Duration,
}

impl ChangeSet {
    pub fn has_work(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }
}

/// Diff `discovered` against the store's file table.
pub async fn compute_changes(discovered: &[DiscoveredFile], store: &Store) -> Result<ChangeSet> {
    let started = Instant::now();

    let stored: HashMap<String, String> = store
        .all_files()
        .await?
        .into_iter()
        .map(|f| (f.path, f.hash))
        .collect();

    let mut changes = ChangeSet::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(discovered.len());

    for file in discovered {
        seen.insert(file.rel_path.as_str());
        let bytes = match std::fs::read(&file.abs_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("skipping {}: read failed: {}", file.rel_path, err);
                continue;
            }
        };
        let hash = sha256_hex(&bytes);

        match stored.get(&file.rel_path) {
            None => {
                changes.hashes.insert(file.rel_path.clone(), hash);
                changes.added.push(file.rel_path.clone());
            }
            Some(stored_hash) if stored_hash != &hash => {
                changes.hashes.insert(file.rel_path.clone(), hash);
                changes.modified.push(file.rel_path.clone());
            }
            Some(_) => changes.unchanged.push(file.rel_path.clone()),
        }
    }

    for path in stored.keys() {
        if !seen.contains(path.as_str()) {
            changes.deleted.push(path.clone());
        }
    }

    changes.added.sort();
    changes.modified.sort();
    changes.deleted.sort();
    changes.unchanged.sort();
    changes.duration = started.elapsed();
    Ok(changes)
}

/// Full-content SHA-256 as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_value() {
        // sha256("") is a fixed constant.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hex_differs_on_one_byte() {
        assert_ne!(sha256_hex(b"const a = 1;"), sha256_hex(b"const a = 2;"));
    }
}
