//! Logical chunking of parsed declarations.
//!
//! Turns a file's [`AstNode`] stream into size-bounded [`ChunkInput`]s:
//!
//! - all imports collapse into one synthetic chunk spanning their extremes,
//! - a class chunk is suppressed when its methods are emitted individually,
//! - oversized nodes split into contiguous line-bounded sub-chunks,
//! - adjacent small chunks of the same mergeable type are combined,
//! - every non-import chunk carries the file's import text for embedding
//!   context.
//!
//! Chunks get two hashes: a stable id from `path:line_start:line_end` (chunk
//! identity across re-indexes) and a content hash of the text.

use sha2::{Digest, Sha256};

use crate::parser::{AstNode, NodeType};
use crate::store::{ChunkInput, ChunkType};

/// Default token bound per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 500;

/// Chunks at or below this estimate are candidates for the merge pass.
const SMALL_CHUNK_TOKENS: usize = 50;

/// Estimated token count: whitespace-separated words × 1.3, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3).ceil() as usize
}

/// Stable chunk identity: `sha256("path:line_start:line_end")[..16]`.
pub fn stable_chunk_id(file_path: &str, line_start: i64, line_end: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", file_path, line_start, line_end).as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(16);
    hex
}

/// Content hash: `sha256(text)[..16]`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(16);
    hex
}

/// Convert parsed nodes into chunks for one file.
pub fn chunk_nodes(nodes: &[AstNode], file_path: &str, max_tokens: usize) -> Vec<ChunkInput> {
    if nodes.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&AstNode> = nodes.iter().collect();
    sorted.sort_by_key(|n| n.line_start);

    let imports: Vec<&AstNode> = sorted
        .iter()
        .copied()
        .filter(|n| n.node_type == NodeType::Import)
        .collect();
    let import_texts: Vec<String> = imports.iter().map(|n| n.text.clone()).collect();

    // Classes whose methods are emitted individually are suppressed.
    let method_parents: Vec<&str> = sorted
        .iter()
        .filter(|n| n.node_type == NodeType::Method)
        .filter_map(|n| n.parent.as_deref())
        .collect();

    let mut chunks: Vec<ChunkInput> = Vec::new();

    if !imports.is_empty() {
        let line_start = imports.iter().map(|n| n.line_start).min().unwrap();
        let line_end = imports.iter().map(|n| n.line_end).max().unwrap();
        let text = import_texts.join("\n");
        chunks.push(make_chunk(
            file_path,
            ChunkType::Import,
            None,
            None,
            line_start,
            line_end,
            text,
            false,
        ));
    }

    for node in &sorted {
        let chunk_type = match node.node_type {
            NodeType::Import => continue,
            NodeType::Function => ChunkType::Function,
            NodeType::Class => {
                if node
                    .name
                    .as_deref()
                    .map(|name| method_parents.contains(&name))
                    .unwrap_or(false)
                {
                    continue;
                }
                ChunkType::Class
            }
            NodeType::Method => ChunkType::Method,
            NodeType::Type => ChunkType::Type,
            NodeType::Constant => ChunkType::Constant,
            // Bare export wrappers are stored as constants.
            NodeType::Export => ChunkType::Constant,
        };

        if estimate_tokens(&node.text) <= max_tokens {
            chunks.push(make_chunk(
                file_path,
                chunk_type,
                node.name.clone(),
                node.parent.clone(),
                node.line_start,
                node.line_end,
                node.text.clone(),
                node.exported,
            ));
        } else {
            split_node(node, chunk_type, file_path, max_tokens, &mut chunks);
        }
    }

    chunks.sort_by_key(|c| (c.line_start, c.line_end));
    let mut chunks = merge_small_chunks(chunks, file_path, max_tokens);

    for chunk in &mut chunks {
        if chunk.chunk_type != ChunkType::Import {
            chunk.imports = import_texts.clone();
        }
    }

    chunks
}

/// Split an oversized node into contiguous line-range sub-chunks.
///
/// Lines accumulate until the next line would push the estimate to the bound
/// and the accumulator already holds more than one line. Sub-chunks inherit
/// the node's type, name, parent, and exported flag; their union covers the
/// node's full range.
fn split_node(
    node: &AstNode,
    chunk_type: ChunkType,
    file_path: &str,
    max_tokens: usize,
    out: &mut Vec<ChunkInput>,
) {
    let lines: Vec<&str> = node.text.lines().collect();
    let mut buffer: Vec<&str> = Vec::new();
    let mut buffer_start = node.line_start;
    let mut next_line = node.line_start;

    for line in &lines {
        if !buffer.is_empty() {
            let candidate = format!("{}\n{}", buffer.join("\n"), line);
            if estimate_tokens(&candidate) >= max_tokens && buffer.len() > 1 {
                out.push(make_chunk(
                    file_path,
                    chunk_type,
                    node.name.clone(),
                    node.parent.clone(),
                    buffer_start,
                    next_line - 1,
                    buffer.join("\n"),
                    node.exported,
                ));
                buffer.clear();
                buffer_start = next_line;
            }
        }
        buffer.push(line);
        next_line += 1;
    }

    if !buffer.is_empty() {
        out.push(make_chunk(
            file_path,
            chunk_type,
            node.name.clone(),
            node.parent.clone(),
            buffer_start,
            node.line_end,
            buffer.join("\n"),
            node.exported,
        ));
    }
}

/// Combine adjacent small chunks of the same mergeable type.
fn merge_small_chunks(
    chunks: Vec<ChunkInput>,
    file_path: &str,
    max_tokens: usize,
) -> Vec<ChunkInput> {
    let mut merged: Vec<ChunkInput> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let can_merge = match merged.last() {
            Some(prev) => {
                prev.chunk_type == chunk.chunk_type
                    && is_mergeable(chunk.chunk_type)
                    && estimate_tokens(&prev.text) < SMALL_CHUNK_TOKENS
                    && estimate_tokens(&chunk.text) < SMALL_CHUNK_TOKENS
                    && estimate_tokens(&format!("{}\n{}", prev.text, chunk.text)) <= max_tokens
            }
            None => false,
        };

        if can_merge {
            let prev = merged.last_mut().unwrap();
            prev.text = format!("{}\n{}", prev.text, chunk.text);
            prev.line_end = chunk.line_end;
            if prev.name.is_none() {
                prev.name = chunk.name;
            }
            prev.exported = prev.exported || chunk.exported;
            prev.stable_id = stable_chunk_id(file_path, prev.line_start, prev.line_end);
            prev.content_hash = content_hash(&prev.text);
        } else {
            merged.push(chunk);
        }
    }

    merged
}

/// Semantically distinct chunk types never merge.
fn is_mergeable(chunk_type: ChunkType) -> bool {
    !matches!(
        chunk_type,
        ChunkType::Function
            | ChunkType::Method
            | ChunkType::Class
            | ChunkType::Type
            | ChunkType::Import
    )
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    file_path: &str,
    chunk_type: ChunkType,
    name: Option<String>,
    parent: Option<String>,
    line_start: i64,
    line_end: i64,
    text: String,
    exported: bool,
) -> ChunkInput {
    ChunkInput {
        stable_id: stable_chunk_id(file_path, line_start, line_end),
        content_hash: content_hash(&text),
        chunk_type,
        name,
        parent,
        line_start,
        line_end,
        text,
        imports: Vec::new(),
        exported,
    }
}
