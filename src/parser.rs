//! Syntax-aware source parsing.
//!
//! Wraps tree-sitter grammars behind one uniform interface: a file parses
//! into a flat stream of [`AstNode`]s (functions, classes, methods, imports,
//! types, constants). Languages without a loaded grammar and unreadable or
//! unparseable files yield an empty stream — the indexer tolerates both.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;
use tree_sitter::{Language, Node, Parser};

/// Kind of declaration a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Function,
    Class,
    Method,
    Import,
    Export,
    Type,
    Constant,
}

/// A declaration extracted from a source file. Lines are 1-based inclusive;
/// `text` is the exact source span.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub node_type: NodeType,
    pub name: Option<String>,
    /// Enclosing scope name (class for methods, impl type in Rust).
    pub parent: Option<String>,
    pub line_start: i64,
    pub line_end: i64,
    pub language: String,
    pub text: String,
    pub params: Option<String>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub exported: bool,
}

/// Parser with per-language grammar cache.
pub struct SourceParser {
    parsers: HashMap<&'static str, Parser>,
}

impl SourceParser {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Parse a file from disk. Unreadable files yield an empty stream.
    pub fn parse_file(&mut self, abs_path: &Path, language: &str) -> Vec<AstNode> {
        let source = match std::fs::read_to_string(abs_path) {
            Ok(source) => source,
            Err(err) => {
                debug!("unreadable file {}: {}", abs_path.display(), err);
                return Vec::new();
            }
        };
        self.parse_source(&source, language)
    }

    /// Parse a source string for the given language tag.
    pub fn parse_source(&mut self, source: &str, language: &str) -> Vec<AstNode> {
        let Some(tag) = canonical_tag(language) else {
            return Vec::new();
        };
        let parser = match self.parser_for(tag) {
            Some(parser) => parser,
            None => return Vec::new(),
        };
        let Some(tree) = parser.parse(source, None) else {
            debug!("tree-sitter produced no tree for a {} file", language);
            return Vec::new();
        };

        let root = tree.root_node();
        let mut nodes = Vec::new();
        match tag {
            "typescript" | "tsx" | "javascript" => {
                extract_js_family(root, source, language, &mut nodes)
            }
            "python" => extract_python(root, source, language, &mut nodes),
            "rust" => extract_rust(root, source, language, &mut nodes),
            "go" => extract_go(root, source, language, &mut nodes),
            _ => {}
        }
        nodes
    }

    fn parser_for(&mut self, tag: &'static str) -> Option<&mut Parser> {
        if !self.parsers.contains_key(tag) {
            let language: Language = match tag {
                "typescript" => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                "tsx" => tree_sitter_typescript::LANGUAGE_TSX.into(),
                "javascript" => tree_sitter_javascript::LANGUAGE.into(),
                "python" => tree_sitter_python::LANGUAGE.into(),
                "rust" => tree_sitter_rust::LANGUAGE.into(),
                "go" => tree_sitter_go::LANGUAGE.into(),
                _ => return None,
            };
            let mut parser = Parser::new();
            if parser.set_language(&language).is_err() {
                return None;
            }
            self.parsers.insert(tag, parser);
        }
        self.parsers.get_mut(tag)
    }
}

impl Default for SourceParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Grammar key for a language tag; `None` for languages without a grammar.
fn canonical_tag(language: &str) -> Option<&'static str> {
    match language {
        "typescript" => Some("typescript"),
        "tsx" => Some("tsx"),
        "javascript" => Some("javascript"),
        "python" => Some("python"),
        "rust" => Some("rust"),
        "go" => Some("go"),
        _ => None,
    }
}

fn text_of(node: Node, source: &str) -> String {
    source[node.byte_range()].to_string()
}

fn field_text(node: Node, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field).map(|n| text_of(n, source))
}

fn first_child_of_kind(node: Node, kinds: &[&str], source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            return Some(text_of(child, source));
        }
    }
    None
}

/// Comment block directly above the node, if any.
fn preceding_comment(node: Node, source: &str) -> Option<String> {
    let prev = node.prev_sibling()?;
    if prev.kind().contains("comment") && prev.end_position().row + 1 >= node.start_position().row {
        Some(text_of(prev, source))
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn push_node(
    out: &mut Vec<AstNode>,
    node: Node,
    source: &str,
    language: &str,
    node_type: NodeType,
    name: Option<String>,
    parent: Option<String>,
    exported: bool,
    params: Option<String>,
    return_type: Option<String>,
    docstring: Option<String>,
) {
    out.push(AstNode {
        node_type,
        name,
        parent,
        line_start: node.start_position().row as i64 + 1,
        line_end: node.end_position().row as i64 + 1,
        language: language.to_string(),
        text: text_of(node, source),
        params,
        return_type,
        docstring,
        exported,
    });
}

// ---- JavaScript / TypeScript ----

fn extract_js_family(root: Node, source: &str, language: &str, out: &mut Vec<AstNode>) {
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        js_statement(child, source, language, out, false);
    }
}

fn js_statement(node: Node, source: &str, language: &str, out: &mut Vec<AstNode>, exported: bool) {
    match node.kind() {
        "import_statement" => {
            push_node(
                out, node, source, language, NodeType::Import, None, None, false, None, None, None,
            );
        }
        "export_statement" => {
            // Unwrap the inner declaration; bare re-exports stay `export`.
            let mut cursor = node.walk();
            let mut unwrapped = false;
            for child in node.children(&mut cursor) {
                if is_js_declaration(child.kind()) {
                    js_statement(child, source, language, out, true);
                    unwrapped = true;
                }
            }
            if !unwrapped {
                push_node(
                    out, node, source, language, NodeType::Export, None, None, true, None, None,
                    None,
                );
            }
        }
        "function_declaration" | "generator_function_declaration" => {
            let name = field_text(node, "name", source);
            let params = field_text(node, "parameters", source);
            let return_type = field_text(node, "return_type", source)
                .map(|t| t.trim_start_matches(':').trim().to_string());
            let docstring = preceding_comment(node, source);
            push_node(
                out,
                node,
                source,
                language,
                NodeType::Function,
                name,
                None,
                exported,
                params,
                return_type,
                docstring,
            );
        }
        "class_declaration" | "abstract_class_declaration" => {
            let class_name = field_text(node, "name", source);
            let docstring = preceding_comment(node, source);
            push_node(
                out,
                node,
                source,
                language,
                NodeType::Class,
                class_name.clone(),
                None,
                exported,
                None,
                None,
                docstring,
            );
            if let Some(body) = node.child_by_field_name("body") {
                let mut cursor = body.walk();
                for member in body.children(&mut cursor) {
                    if member.kind() == "method_definition" {
                        let name = field_text(member, "name", source);
                        let params = field_text(member, "parameters", source);
                        let return_type = field_text(member, "return_type", source)
                            .map(|t| t.trim_start_matches(':').trim().to_string());
                        push_node(
                            out,
                            member,
                            source,
                            language,
                            NodeType::Method,
                            name,
                            class_name.clone(),
                            exported,
                            params,
                            return_type,
                            None,
                        );
                    }
                }
            }
        }
        "interface_declaration" | "type_alias_declaration" | "enum_declaration" => {
            let name = field_text(node, "name", source);
            let docstring = preceding_comment(node, source);
            push_node(
                out,
                node,
                source,
                language,
                NodeType::Type,
                name,
                None,
                exported,
                None,
                None,
                docstring,
            );
        }
        "lexical_declaration" | "variable_declaration" => {
            let name = declarator_name(node, source);
            push_node(
                out,
                node,
                source,
                language,
                NodeType::Constant,
                name,
                None,
                exported,
                None,
                None,
                None,
            );
        }
        _ => {}
    }
}

fn is_js_declaration(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "generator_function_declaration"
            | "class_declaration"
            | "abstract_class_declaration"
            | "interface_declaration"
            | "type_alias_declaration"
            | "enum_declaration"
            | "lexical_declaration"
            | "variable_declaration"
    )
}

fn declarator_name(node: Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "variable_declarator" {
            return field_text(child, "name", source);
        }
    }
    None
}

// ---- Python ----

fn extract_python(root: Node, source: &str, language: &str, out: &mut Vec<AstNode>) {
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        python_statement(child, source, language, out);
    }
}

fn python_statement(node: Node, source: &str, language: &str, out: &mut Vec<AstNode>) {
    match node.kind() {
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            push_node(
                out, node, source, language, NodeType::Import, None, None, false, None, None, None,
            );
        }
        "decorated_definition" => {
            // The decorated span keeps the decorator lines; dispatch on the
            // inner definition for type and name.
            if let Some(inner) = node.child_by_field_name("definition") {
                match inner.kind() {
                    "function_definition" => emit_python_function(node, inner, source, language, out, None),
                    "class_definition" => emit_python_class(node, inner, source, language, out),
                    _ => {}
                }
            }
        }
        "function_definition" => emit_python_function(node, node, source, language, out, None),
        "class_definition" => emit_python_class(node, node, source, language, out),
        "expression_statement" => {
            let Some(assignment) = node.named_child(0).filter(|c| c.kind() == "assignment") else {
                return;
            };
            let name = assignment
                .child_by_field_name("left")
                .filter(|left| left.kind() == "identifier")
                .map(|left| text_of(left, source));
            if name.is_some() {
                push_node(
                    out,
                    node,
                    source,
                    language,
                    NodeType::Constant,
                    name,
                    None,
                    false,
                    None,
                    None,
                    None,
                );
            }
        }
        _ => {}
    }
}

fn emit_python_function(
    span: Node,
    def: Node,
    source: &str,
    language: &str,
    out: &mut Vec<AstNode>,
    parent: Option<String>,
) {
    let name = field_text(def, "name", source);
    let params = field_text(def, "parameters", source);
    let return_type = field_text(def, "return_type", source);
    let docstring = python_docstring(def, source);
    let node_type = if parent.is_some() {
        NodeType::Method
    } else {
        NodeType::Function
    };
    push_node(
        out, span, source, language, node_type, name, parent, false, params, return_type,
        docstring,
    );
}

fn emit_python_class(span: Node, def: Node, source: &str, language: &str, out: &mut Vec<AstNode>) {
    let class_name = field_text(def, "name", source);
    let docstring = python_docstring(def, source);
    push_node(
        out,
        span,
        source,
        language,
        NodeType::Class,
        class_name.clone(),
        None,
        false,
        None,
        None,
        docstring,
    );
    if let Some(body) = def.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            match member.kind() {
                "function_definition" => emit_python_function(
                    member,
                    member,
                    source,
                    language,
                    out,
                    class_name.clone(),
                ),
                "decorated_definition" => {
                    if let Some(inner) = member
                        .child_by_field_name("definition")
                        .filter(|inner| inner.kind() == "function_definition")
                    {
                        emit_python_function(
                            member,
                            inner,
                            source,
                            language,
                            out,
                            class_name.clone(),
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

/// First statement of the body when it is a bare string literal.
fn python_docstring(def: Node, source: &str) -> Option<String> {
    let body = def.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0).filter(|c| c.kind() == "string")?;
    Some(text_of(string, source))
}

// ---- Rust ----

fn extract_rust(root: Node, source: &str, language: &str, out: &mut Vec<AstNode>) {
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "use_declaration" => {
                push_node(
                    out, child, source, language, NodeType::Import, None, None, false, None, None,
                    None,
                );
            }
            "function_item" => {
                emit_rust_function(child, source, language, out, None);
            }
            "impl_item" => {
                let parent = field_text(child, "type", source);
                if let Some(body) = child.child_by_field_name("body") {
                    let mut body_cursor = body.walk();
                    for member in body.children(&mut body_cursor) {
                        if member.kind() == "function_item" {
                            emit_rust_function(member, source, language, out, parent.clone());
                        }
                    }
                }
            }
            "struct_item" | "enum_item" | "trait_item" | "type_item" | "union_item" => {
                let name = field_text(child, "name", source);
                let docstring = preceding_comment(child, source);
                push_node(
                    out,
                    child,
                    source,
                    language,
                    NodeType::Type,
                    name,
                    None,
                    rust_is_pub(child, source),
                    None,
                    None,
                    docstring,
                );
            }
            "const_item" | "static_item" => {
                let name = field_text(child, "name", source);
                push_node(
                    out,
                    child,
                    source,
                    language,
                    NodeType::Constant,
                    name,
                    None,
                    rust_is_pub(child, source),
                    None,
                    None,
                    None,
                );
            }
            _ => {}
        }
    }
}

fn emit_rust_function(
    node: Node,
    source: &str,
    language: &str,
    out: &mut Vec<AstNode>,
    parent: Option<String>,
) {
    let name = field_text(node, "name", source);
    let params = field_text(node, "parameters", source);
    let return_type = field_text(node, "return_type", source);
    let docstring = preceding_comment(node, source);
    let node_type = if parent.is_some() {
        NodeType::Method
    } else {
        NodeType::Function
    };
    push_node(
        out,
        node,
        source,
        language,
        node_type,
        name,
        parent,
        rust_is_pub(node, source),
        params,
        return_type,
        docstring,
    );
}

fn rust_is_pub(node: Node, source: &str) -> bool {
    first_child_of_kind(node, &["visibility_modifier"], source).is_some()
        || text_of(node, source).starts_with("pub ")
}

// ---- Go ----

fn extract_go(root: Node, source: &str, language: &str, out: &mut Vec<AstNode>) {
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "import_declaration" => {
                push_node(
                    out, child, source, language, NodeType::Import, None, None, false, None, None,
                    None,
                );
            }
            "function_declaration" => {
                let name = field_text(child, "name", source);
                let exported = go_is_exported(&name);
                let params = field_text(child, "parameters", source);
                let return_type = field_text(child, "result", source);
                let docstring = preceding_comment(child, source);
                push_node(
                    out,
                    child,
                    source,
                    language,
                    NodeType::Function,
                    name,
                    None,
                    exported,
                    params,
                    return_type,
                    docstring,
                );
            }
            "method_declaration" => {
                let name = field_text(child, "name", source);
                let exported = go_is_exported(&name);
                let parent = go_receiver_type(child, source);
                let params = field_text(child, "parameters", source);
                let return_type = field_text(child, "result", source);
                push_node(
                    out,
                    child,
                    source,
                    language,
                    NodeType::Method,
                    name,
                    parent,
                    exported,
                    params,
                    return_type,
                    None,
                );
            }
            "type_declaration" => {
                let name = go_type_name(child, source);
                let exported = go_is_exported(&name);
                push_node(
                    out,
                    child,
                    source,
                    language,
                    NodeType::Type,
                    name,
                    None,
                    exported,
                    None,
                    None,
                    preceding_comment(child, source),
                );
            }
            "const_declaration" | "var_declaration" => {
                let name = go_spec_name(child, source);
                let exported = go_is_exported(&name);
                push_node(
                    out,
                    child,
                    source,
                    language,
                    NodeType::Constant,
                    name,
                    None,
                    exported,
                    None,
                    None,
                    None,
                );
            }
            _ => {}
        }
    }
}

fn go_is_exported(name: &Option<String>) -> bool {
    name.as_deref()
        .and_then(|n| n.chars().next())
        .map(|c| c.is_uppercase())
        .unwrap_or(false)
}

fn go_receiver_type(node: Node, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let mut cursor = receiver.walk();
    for child in receiver.children(&mut cursor) {
        if child.kind() == "parameter_declaration" {
            return child
                .child_by_field_name("type")
                .map(|t| text_of(t, source).trim_start_matches('*').to_string());
        }
    }
    None
}

fn go_type_name(node: Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "type_spec" {
            return field_text(child, "name", source);
        }
    }
    None
}

fn go_spec_name(node: Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "const_spec" || child.kind() == "var_spec" {
            return field_text(child, "name", source);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typescript_function_and_export() {
        let source = r#"
import { thing } from "./thing";

export function validateToken(token: string): boolean {
    return token.length > 0;
}

function internal() {}
"#;
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "typescript");

        let import = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Import)
            .unwrap();
        assert!(import.text.contains("./thing"));

        let exported = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("validateToken"))
            .unwrap();
        assert_eq!(exported.node_type, NodeType::Function);
        assert!(exported.exported);
        assert_eq!(exported.params.as_deref(), Some("(token: string)"));
        assert_eq!(exported.return_type.as_deref(), Some("boolean"));

        let internal = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("internal"))
            .unwrap();
        assert!(!internal.exported);
    }

    #[test]
    fn test_typescript_class_methods_carry_parent() {
        let source = r#"
export class Indexer {
    run(): void {}
    stop(): void {}
}
"#;
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "typescript");

        let class = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Class)
            .unwrap();
        assert_eq!(class.name.as_deref(), Some("Indexer"));
        assert!(class.exported);

        let methods: Vec<_> = nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Method)
            .collect();
        assert_eq!(methods.len(), 2);
        for method in methods {
            assert_eq!(method.parent.as_deref(), Some("Indexer"));
        }
    }

    #[test]
    fn test_typescript_interface_and_const() {
        let source = r#"
interface User { id: number; }
type Alias = string;
const MAX_RETRIES = 5;
"#;
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "typescript");

        let types: Vec<_> = nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Type)
            .collect();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].name.as_deref(), Some("User"));

        let constant = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Constant)
            .unwrap();
        assert_eq!(constant.name.as_deref(), Some("MAX_RETRIES"));
    }

    #[test]
    fn test_js_docstring_is_preceding_comment() {
        let source = r#"
/** Adds two numbers. */
function add(a, b) { return a + b; }
"#;
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "javascript");
        let function = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("add"))
            .unwrap();
        assert!(function.docstring.as_deref().unwrap().contains("Adds two"));
    }

    #[test]
    fn test_python_class_function_docstring() {
        let source = r#"
import os

class Engine:
    """Does the work."""

    def run(self):
        return 1

def helper():
    """Helps."""
    return 2

LIMIT = 10
"#;
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "python");

        let class = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Class)
            .unwrap();
        assert_eq!(class.name.as_deref(), Some("Engine"));
        assert!(class.docstring.as_deref().unwrap().contains("Does the work"));

        let method = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Method)
            .unwrap();
        assert_eq!(method.name.as_deref(), Some("run"));
        assert_eq!(method.parent.as_deref(), Some("Engine"));

        let helper = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("helper"))
            .unwrap();
        assert_eq!(helper.node_type, NodeType::Function);

        let constant = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Constant)
            .unwrap();
        assert_eq!(constant.name.as_deref(), Some("LIMIT"));
    }

    #[test]
    fn test_rust_items() {
        let source = r#"
use std::collections::HashMap;

pub struct Config { pub key: String }

impl Config {
    pub fn load() -> Self { todo!() }
}

pub fn standalone() -> i32 { 42 }

const DEFAULT: i32 = 1;
"#;
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "rust");

        assert!(nodes.iter().any(|n| n.node_type == NodeType::Import));

        let config = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Type)
            .unwrap();
        assert_eq!(config.name.as_deref(), Some("Config"));
        assert!(config.exported);

        let load = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("load"))
            .unwrap();
        assert_eq!(load.node_type, NodeType::Method);
        assert_eq!(load.parent.as_deref(), Some("Config"));

        let standalone = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("standalone"))
            .unwrap();
        assert_eq!(standalone.node_type, NodeType::Function);
        assert!(standalone.exported);

        let constant = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Constant)
            .unwrap();
        assert!(!constant.exported);
    }

    #[test]
    fn test_go_items() {
        let source = r#"
package main

import "fmt"

type Server struct{}

func (s *Server) Start() error { return nil }

func helper() {}

const MaxConns = 8
"#;
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "go");

        let server = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Type)
            .unwrap();
        assert_eq!(server.name.as_deref(), Some("Server"));
        assert!(server.exported);

        let start = nodes
            .iter()
            .find(|n| n.node_type == NodeType::Method)
            .unwrap();
        assert_eq!(start.name.as_deref(), Some("Start"));
        assert_eq!(start.parent.as_deref(), Some("Server"));

        let helper = nodes
            .iter()
            .find(|n| n.name.as_deref() == Some("helper"))
            .unwrap();
        assert!(!helper.exported);
    }

    #[test]
    fn test_unknown_language_returns_empty() {
        let mut parser = SourceParser::new();
        assert!(parser.parse_source("{}", "json").is_empty());
        assert!(parser.parse_source("anything", "markdown").is_empty());
    }

    #[test]
    fn test_lines_are_one_based_inclusive() {
        let source = "fn first() {}\n\nfn second() {\n    let x = 1;\n}\n";
        let mut parser = SourceParser::new();
        let nodes = parser.parse_source(source, "rust");
        assert_eq!(nodes[0].line_start, 1);
        assert_eq!(nodes[0].line_end, 1);
        assert_eq!(nodes[1].line_start, 3);
        assert_eq!(nodes[1].line_end, 5);
    }
}
