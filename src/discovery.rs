//! Project file discovery.
//!
//! Walks a project root, prunes ignored directories whole, classifies the
//! remaining files by extension, and returns a deterministic (path-sorted)
//! listing. The ignore matcher combines a built-in list, `.gitignore` and
//! `.ctxignore` at the root (gitignore semantics), and any extra patterns
//! passed by the caller.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CoreError, Result};

/// Always-ignored patterns: version control, build artifacts, lock files,
/// binary media.
const BUILTIN_IGNORES: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    ".ctx/",
    "node_modules/",
    "target/",
    "dist/",
    "build/",
    "out/",
    "coverage/",
    "__pycache__/",
    ".venv/",
    "venv/",
    ".next/",
    ".cache/",
    "*.lock",
    "package-lock.json",
    "*.min.js",
    "*.map",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.svg",
    "*.webp",
    "*.pdf",
    "*.zip",
    "*.gz",
    "*.tar",
    "*.woff",
    "*.woff2",
    "*.ttf",
    "*.eot",
    "*.mp3",
    "*.mp4",
    "*.wasm",
    "*.so",
    "*.dylib",
    "*.dll",
    ".DS_Store",
];

/// A file found by discovery, classified by language.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Project-relative path with forward slashes.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub language: String,
    pub size: u64,
    /// Unix seconds.
    pub last_modified: i64,
}

/// Walk `root` and return every indexable file, sorted by relative path.
pub fn discover(
    root: &Path,
    extra_ignore: &[String],
    follow_symlinks: bool,
) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        return Err(CoreError::NotInitialized(root.to_path_buf()));
    }

    let matcher = build_matcher(root, extra_ignore)?;
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(follow_symlinks)
        .into_iter()
        .filter_entry(|entry| {
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) if rel.as_os_str().is_empty() => return true, // the root itself
                Ok(rel) => rel,
                Err(_) => return true,
            };
            !matcher
                .matched(rel, entry.file_type().is_dir())
                .is_ignore()
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let Some(language) = classify_language(&rel) else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("skipping {}: stat failed: {}", rel.display(), err);
                continue;
            }
        };
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(DiscoveredFile {
            rel_path: rel.to_string_lossy().replace('\\', "/"),
            abs_path: entry.path().to_path_buf(),
            language: language.to_string(),
            size: metadata.len(),
            last_modified,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Build the combined ignore matcher for a project root.
fn build_matcher(root: &Path, extra_ignore: &[String]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);

    for pattern in BUILTIN_IGNORES {
        builder
            .add_line(None, pattern)
            .map_err(|e| CoreError::ConfigInvalid(format!("bad built-in ignore pattern: {}", e)))?;
    }

    // Parse errors inside user ignore files are not fatal; gitignore
    // semantics skip the offending line.
    for name in [".gitignore", ".ctxignore"] {
        let path = root.join(name);
        if path.is_file() {
            if let Some(err) = builder.add(&path) {
                debug!("ignoring malformed pattern in {}: {}", path.display(), err);
            }
        }
    }

    for pattern in extra_ignore {
        if let Err(err) = builder.add_line(None, pattern) {
            debug!("ignoring malformed extra ignore pattern '{}': {}", pattern, err);
        }
    }

    builder
        .build()
        .map_err(|e| CoreError::ConfigInvalid(format!("failed to build ignore matcher: {}", e)))
}

/// Map a relative path to its language tag, or `None` to skip the file.
///
/// Dotfiles with no further dot (`.env`) use the bare name as the map key.
pub fn classify_language(rel: &Path) -> Option<&'static str> {
    let file_name = rel.file_name()?.to_str()?;

    let key = match rel.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_string(),
        // Dotfiles like `.env` have no extension in path terms; use the name.
        None if file_name.starts_with('.') && !file_name[1..].contains('.') => {
            file_name[1..].to_string()
        }
        None => return None,
    };

    language_for_key(&key.to_lowercase())
}

fn language_for_key(key: &str) -> Option<&'static str> {
    match key {
        "ts" | "mts" | "cts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "py" => Some("python"),
        "rs" => Some("rust"),
        "go" => Some("go"),
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        "md" | "markdown" => Some("markdown"),
        "env" => Some("env"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_discover_sorted_and_classified() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "src/b.ts", "export const b = 1;");
        touch(tmp.path(), "src/a.ts", "export const a = 1;");
        touch(tmp.path(), "main.py", "x = 1");

        let files = discover(tmp.path(), &[], true).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["main.py", "src/a.ts", "src/b.ts"]);
        assert_eq!(files[0].language, "python");
        assert_eq!(files[1].language, "typescript");
    }

    #[test]
    fn test_unknown_extension_skipped() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "binary.exe", "");
        touch(tmp.path(), "code.rs", "fn main() {}");

        let files = discover(tmp.path(), &[], true).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "code.rs");
        assert_eq!(files[0].language, "rust");
    }

    #[test]
    fn test_builtin_ignores_prune_directories() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "node_modules/pkg/index.js", "x");
        touch(tmp.path(), ".git/config.json", "{}");
        touch(tmp.path(), "src/ok.js", "x");

        let files = discover(tmp.path(), &[], true).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/ok.js"]);
    }

    #[test]
    fn test_gitignore_and_ctxignore_respected() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".gitignore", "generated/\n# a comment\n\n*.tmp.ts\n");
        touch(tmp.path(), ".ctxignore", "fixtures/\n");
        touch(tmp.path(), "generated/gen.ts", "x");
        touch(tmp.path(), "fixtures/fix.ts", "x");
        touch(tmp.path(), "thing.tmp.ts", "x");
        touch(tmp.path(), "keep.ts", "x");

        let files = discover(tmp.path(), &[], true).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.ts"]);
    }

    #[test]
    fn test_extra_ignore_patterns() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "skip_me.ts", "x");
        touch(tmp.path(), "keep.ts", "x");

        let files = discover(tmp.path(), &["skip_me.ts".to_string()], true).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.ts"]);
    }

    #[test]
    fn test_dotfile_language_key() {
        assert_eq!(classify_language(Path::new(".env")), Some("env"));
        assert_eq!(classify_language(Path::new(".env.local")), None);
        assert_eq!(classify_language(Path::new("tsconfig.json")), Some("json"));
        assert_eq!(classify_language(Path::new("no_extension")), None);
    }

    #[test]
    fn test_state_dir_never_discovered() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".ctx/config.json", "{}");
        touch(tmp.path(), "a.ts", "x");

        let files = discover(tmp.path(), &[], true).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "a.ts");
    }
}
