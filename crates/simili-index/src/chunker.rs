//! AST chunking via tree-sitter: one chunk per function-shaped unit.
//!
//! Units are function declarations, methods, function values bound to a
//! name, class components and substantial anonymous functions. Emitted units
//! are not descended into, so chunks never overlap.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::error::{IndexError, Result};
use crate::languages::Lang;

const ANONYMOUS: &str = "<anonymous>";

/// Call wrappers that keep the name of the variable they are assigned to.
const NAME_PRESERVING_WRAPPERS: &[&str] = &[
    "memo",
    "forwardRef",
    "observer",
    "React.memo",
    "React.forwardRef",
];

const JSX_KINDS: &[&str] = &["jsx_element", "jsx_self_closing_element", "jsx_fragment"];

/// Semantic role of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Component,
    Hook,
    Function,
    Other,
}

impl ChunkKind {
    pub const ALL: [Self; 4] = [Self::Component, Self::Hook, Self::Function, Self::Other];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Hook => "hook",
            Self::Function => "function",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| IndexError::Other(format!("unknown chunk kind: {s}")))
    }
}

/// 1-indexed source location, end inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Span {
    #[must_use]
    pub fn contains_line(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Facts extracted during chunking. Used for ranking and display only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFacts {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub props: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub exported: bool,
}

/// One semantic unit of source code.
#[derive(Debug, Clone)]
pub struct CodeChunk {
    pub id: String,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub file_path: String,
    pub language: Lang,
    /// Enclosing containers, outermost first, joined with `" > "`.
    pub scope: String,
    pub span: Span,
    pub content_hash: String,
    /// Normalized text; this is what gets hashed and embedded.
    pub text: String,
    pub facts: ChunkFacts,
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Minimum unit size in non-whitespace characters (default: 50).
    pub min_size: usize,
    /// Normalized text is truncated to this many characters (default: 6000).
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 50,
            max_chars: 6000,
        }
    }
}

/// Parse a source file and extract its function-shaped units in source order.
///
/// # Errors
///
/// Returns `IndexError::Parse` if no grammar is available or the file does
/// not parse cleanly.
pub fn chunk_file(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Result<Vec<CodeChunk>> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| IndexError::Parse(format!("no grammar for {}", lang.id())))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {file_path}")))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(IndexError::Parse(format!("syntax errors in {file_path}")));
    }

    let mut walker = Walker {
        source,
        file_path,
        lang,
        config,
        scope: Vec::new(),
        occurrences: HashMap::new(),
        output: Vec::new(),
    };
    walker.visit_children(root);
    Ok(walker.output)
}

/// A matched unit before size filtering.
struct Unit<'t> {
    /// Node whose span becomes the chunk span.
    anchor: Node<'t>,
    /// The function (or class) node itself.
    body: Node<'t>,
    name: Option<String>,
    class_component: bool,
}

struct Walker<'a> {
    source: &'a str,
    file_path: &'a str,
    lang: Lang,
    config: &'a ChunkerConfig,
    scope: Vec<String>,
    occurrences: HashMap<(String, String), u64>,
    output: Vec<CodeChunk>,
}

impl Walker<'_> {
    fn visit_children(&mut self, parent: Node<'_>) {
        for child in named_children(parent) {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        if let Some(unit) = self.match_unit(node) {
            self.emit(&unit);
            return;
        }

        if self.lang.scope_kinds().contains(&node.kind()) {
            let name = node
                .child_by_field_name("name")
                .or_else(|| node.child_by_field_name("type"))
                .map_or_else(|| node.kind().to_owned(), |n| self.text(n).to_owned());
            self.scope.push(name);
            self.visit_children(node);
            self.scope.pop();
            return;
        }

        self.visit_children(node);
    }

    fn match_unit<'t>(&self, node: Node<'t>) -> Option<Unit<'t>> {
        let kind = node.kind();

        if self.lang.declaration_kinds().contains(&kind) {
            return Some(Unit {
                anchor: node,
                body: node,
                name: self.field_text(node, "name"),
                class_component: false,
            });
        }

        if self.lang.has_ui_roles()
            && let Some(unit) = self.match_js_binding(node)
        {
            return Some(unit);
        }

        if self.lang.function_value_kinds().contains(&kind) {
            return Some(Unit {
                anchor: node,
                body: node,
                name: self.field_text(node, "name"),
                class_component: false,
            });
        }

        None
    }

    /// Function values bound to a name: `const X = () => …`, `key: function() …`,
    /// `obj.x = function() …`, class fields, and class components.
    fn match_js_binding<'t>(&self, node: Node<'t>) -> Option<Unit<'t>> {
        match node.kind() {
            "lexical_declaration" | "variable_declaration" => {
                let mut declarators =
                    named_children(node).filter(|c| c.kind() == "variable_declarator");
                let first = declarators.next()?;
                if declarators.next().is_some() {
                    return None;
                }
                self.match_declarator(first).map(|unit| Unit {
                    anchor: node,
                    ..unit
                })
            }
            "variable_declarator" => self.match_declarator(node),
            "pair" => {
                let body = self.unwrap_function_value(node.child_by_field_name("value")?)?;
                let key = self.text(node.child_by_field_name("key")?);
                Some(Unit {
                    anchor: node,
                    body,
                    name: Some(key.trim_matches(['"', '\'', '`']).to_owned()),
                    class_component: false,
                })
            }
            "assignment_expression" => {
                let body = self.unwrap_function_value(node.child_by_field_name("right")?)?;
                let left = node.child_by_field_name("left")?;
                let name = match left.kind() {
                    "member_expression" => self.field_text(left, "property"),
                    "identifier" => Some(self.text(left).to_owned()),
                    _ => None,
                };
                Some(Unit {
                    anchor: node,
                    body,
                    name,
                    class_component: false,
                })
            }
            "public_field_definition" | "field_definition" => {
                let body = self.unwrap_function_value(node.child_by_field_name("value")?)?;
                let name = self
                    .field_text(node, "name")
                    .or_else(|| self.field_text(node, "property"));
                Some(Unit {
                    anchor: node,
                    body,
                    name,
                    class_component: false,
                })
            }
            "class_declaration" | "class" if self.extends_component(node) => Some(Unit {
                anchor: node,
                body: node,
                name: self.field_text(node, "name"),
                class_component: true,
            }),
            _ => None,
        }
    }

    fn match_declarator<'t>(&self, declarator: Node<'t>) -> Option<Unit<'t>> {
        let name = declarator.child_by_field_name("name")?;
        if name.kind() != "identifier" {
            return None;
        }
        let body = self.unwrap_function_value(declarator.child_by_field_name("value")?)?;
        Some(Unit {
            anchor: declarator,
            body,
            name: Some(self.text(name).to_owned()),
            class_component: false,
        })
    }

    /// Resolve `fn`, `(fn)`, `memo(fn)` and `memo(forwardRef(fn))` to `fn`.
    fn unwrap_function_value<'t>(&self, node: Node<'t>) -> Option<Node<'t>> {
        if self.lang.function_value_kinds().contains(&node.kind()) {
            return Some(node);
        }
        match node.kind() {
            "parenthesized_expression" => self.unwrap_function_value(node.named_child(0)?),
            "call_expression" => {
                let callee = self.text(node.child_by_field_name("function")?);
                if !NAME_PRESERVING_WRAPPERS.contains(&callee) {
                    return None;
                }
                let args = node.child_by_field_name("arguments")?;
                self.unwrap_function_value(args.named_child(0)?)
            }
            _ => None,
        }
    }

    fn extends_component(&self, class: Node<'_>) -> bool {
        named_children(class)
            .find(|c| c.kind() == "class_heritage")
            .is_some_and(|heritage| {
                let text = self.text(heritage);
                text.contains("Component") || text.contains("PureComponent")
            })
    }

    fn emit(&mut self, unit: &Unit<'_>) {
        let scope = self.scope.join(" > ");
        let label = unit.name.as_deref().unwrap_or(ANONYMOUS);
        let ordinal = {
            let n = self
                .occurrences
                .entry((scope.clone(), label.to_owned()))
                .or_insert(0);
            let current = *n;
            *n += 1;
            current
        };

        let raw = &self.source[self.line_aligned_start(unit.anchor)..unit.anchor.end_byte()];
        let text = normalize_text(raw, self.config.max_chars);
        if non_ws_len(&text) < self.config.min_size {
            return;
        }

        let start = unit.anchor.start_position();
        let end = unit.anchor.end_position();
        let span = Span {
            start_line: start.row + 1,
            start_column: start.column + 1,
            end_line: end.row + 1,
            end_column: end.column.max(1),
        };

        let chunk = CodeChunk {
            id: chunk_id(self.file_path, &scope, label, ordinal),
            kind: self.classify(unit),
            name: unit.name.clone(),
            file_path: self.file_path.to_owned(),
            language: self.lang,
            scope,
            span,
            content_hash: blake3_hex(&text),
            text,
            facts: self.facts(unit),
        };
        tracing::trace!(id = %chunk.id, kind = %chunk.kind, name = ?chunk.name, "chunk");
        self.output.push(chunk);
    }

    fn classify(&self, unit: &Unit<'_>) -> ChunkKind {
        if !self.lang.has_ui_roles() {
            return if unit.name.is_some() {
                ChunkKind::Function
            } else {
                ChunkKind::Other
            };
        }
        if unit.class_component {
            return ChunkKind::Component;
        }
        match unit.name.as_deref() {
            Some(name) if is_hook_name(name) => ChunkKind::Hook,
            Some(name) if is_pascal_case(name) && contains_jsx(unit.body) => ChunkKind::Component,
            Some(_) => ChunkKind::Function,
            None if contains_jsx(unit.body) => ChunkKind::Component,
            None => ChunkKind::Other,
        }
    }

    fn facts(&self, unit: &Unit<'_>) -> ChunkFacts {
        let mut facts = ChunkFacts {
            is_async: self.is_async(unit.body),
            exported: self.is_exported(unit),
            ..ChunkFacts::default()
        };

        let params = unit
            .body
            .child_by_field_name("parameters")
            .or_else(|| unit.body.child_by_field_name("parameter"));
        if let Some(params) = params {
            if params.kind() == "identifier" {
                facts.params.push(self.text(params).to_owned());
            } else {
                for (i, param) in named_children(params).enumerate() {
                    if let Some(name) = self.param_name(param) {
                        facts.params.push(name);
                    }
                    if i == 0 && self.lang.has_ui_roles() {
                        self.collect_props(param, &mut facts.props);
                    }
                }
            }
        }

        if self.lang.has_ui_roles() {
            self.collect_hooks(unit.body, &mut facts.hooks);
        }
        facts
    }

    fn param_name(&self, param: Node<'_>) -> Option<String> {
        match param.kind() {
            "identifier" | "self_parameter" | "self" => Some(self.text(param).to_owned()),
            "object_pattern" | "array_pattern" | "comment" => None,
            _ => ["pattern", "name", "left"]
                .iter()
                .find_map(|field| param.child_by_field_name(field))
                .or_else(|| named_children(param).find(|c| c.kind() == "identifier"))
                .and_then(|inner| self.param_name(inner)),
        }
    }

    fn collect_props(&self, param: Node<'_>, props: &mut Vec<String>) {
        let pattern = match param.kind() {
            "object_pattern" => param,
            _ => match ["pattern", "left"]
                .iter()
                .find_map(|field| param.child_by_field_name(field))
            {
                Some(inner) => return self.collect_props(inner, props),
                None => return,
            },
        };

        for prop in named_children(pattern) {
            let name = match prop.kind() {
                "shorthand_property_identifier_pattern" => Some(self.text(prop).to_owned()),
                "pair_pattern" => self.field_text(prop, "key"),
                "object_assignment_pattern" => self.field_text(prop, "left"),
                "rest_pattern" => Some(self.text(prop).to_owned()),
                _ => None,
            };
            if let Some(name) = name {
                props.push(name);
            }
        }
    }

    fn collect_hooks(&self, node: Node<'_>, hooks: &mut Vec<String>) {
        if node.kind() == "call_expression"
            && let Some(callee) = node.child_by_field_name("function")
        {
            let name = match callee.kind() {
                "identifier" => Some(self.text(callee)),
                "member_expression" => callee.child_by_field_name("property").map(|p| self.text(p)),
                _ => None,
            };
            if let Some(name) = name
                && is_hook_name(name)
                && !hooks.iter().any(|h| h == name)
            {
                hooks.push(name.to_owned());
            }
        }
        for child in named_children(node) {
            self.collect_hooks(child, hooks);
        }
    }

    fn is_async(&self, body: Node<'_>) -> bool {
        children(body).any(|c| {
            c.kind() == "async" || (c.kind() == "function_modifiers" && self.text(c).contains("async"))
        })
    }

    fn is_exported(&self, unit: &Unit<'_>) -> bool {
        match self.lang {
            Lang::JavaScript | Lang::TypeScript | Lang::Tsx => {
                let mut current = unit.anchor.parent();
                while let Some(node) = current {
                    match node.kind() {
                        "export_statement" => return true,
                        "lexical_declaration" | "variable_declaration" => {
                            current = node.parent();
                        }
                        _ => return false,
                    }
                }
                false
            }
            Lang::Rust => named_children(unit.body).any(|c| c.kind() == "visibility_modifier"),
            Lang::Go => unit
                .name
                .as_deref()
                .and_then(|n| n.chars().next())
                .is_some_and(char::is_uppercase),
            Lang::Python => unit.name.as_deref().is_some_and(|n| !n.starts_with('_')),
        }
    }

    /// Start at the beginning of the anchor's line when only indentation
    /// precedes it, so dedenting keeps the body's relative indentation.
    fn line_aligned_start(&self, node: Node<'_>) -> usize {
        let start = node.start_byte();
        let line_start = self.source[..start].rfind('\n').map_or(0, |i| i + 1);
        if self.source[line_start..start].trim().is_empty() {
            line_start
        } else {
            start
        }
    }

    fn text(&self, node: Node<'_>) -> &str {
        &self.source[node.byte_range()]
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|n| self.text(n).to_owned())
    }
}

fn named_children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..count).filter_map(move |i| node.named_child(i))
}

fn children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    let count = u32::try_from(node.child_count()).unwrap_or(u32::MAX);
    (0..count).filter_map(move |i| node.child(i))
}

fn contains_jsx(node: Node<'_>) -> bool {
    JSX_KINDS.contains(&node.kind()) || named_children(node).any(contains_jsx)
}

/// `useThing`, `use2D`; not `user` or `use`.
#[must_use]
pub fn is_hook_name(name: &str) -> bool {
    name.strip_prefix("use")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// `UserCard`, not `userCard` or `MAX_SIZE`.
#[must_use]
pub fn is_pascal_case(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name.chars().any(|c| c.is_ascii_lowercase())
}

/// Stable chunk id: file path plus a hash of scope, name and the ordinal of
/// that (scope, name) pair within the file. Independent of line positions.
#[must_use]
pub fn chunk_id(file_path: &str, scope: &str, label: &str, ordinal: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(scope.as_bytes());
    hasher.update(&[0]);
    hasher.update(label.as_bytes());
    hasher.update(&[0]);
    hasher.update(&ordinal.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{file_path}#{}", &hex.as_str()[..16])
}

/// Prefix shared by every chunk id of `file_path`.
#[must_use]
pub fn id_prefix(file_path: &str) -> String {
    format!("{file_path}#")
}

/// Drop blank lines and trailing whitespace, remove the indentation shared by
/// all lines, then cap the length at `max_chars` characters.
#[must_use]
pub fn normalize_text(raw: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();

    let indent = lines.iter().map(|l| leading_indent(l)).min().unwrap_or(0);

    let mut text = String::with_capacity(raw.len());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            text.push('\n');
        }
        text.push_str(&line[indent..]);
    }

    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
    }
    text
}

fn leading_indent(line: &str) -> usize {
    line.bytes().take_while(|b| *b == b' ' || *b == b'\t').count()
}

pub(crate) fn non_ws_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}
