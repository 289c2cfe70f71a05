//! Language detection and tree-sitter grammar registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Rust,
    Go,
}

impl Lang {
    /// Identifier stored in chunk metadata.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Python => "python",
            Self::Rust => "rust",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Whether hook/component roles apply (the React family of languages).
    #[must_use]
    pub fn has_ui_roles(self) -> bool {
        matches!(self, Self::JavaScript | Self::TypeScript | Self::Tsx)
    }

    /// Declarations that form a chunk on their own.
    #[must_use]
    pub fn declaration_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript | Self::TypeScript | Self::Tsx => &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
            ],
            Self::Python => &["function_definition"],
            Self::Rust => &["function_item"],
            Self::Go => &["function_declaration", "method_declaration"],
        }
    }

    /// Function-valued expressions: chunked under the name they are bound
    /// to, or anonymously when they appear elsewhere.
    #[must_use]
    pub fn function_value_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript | Self::TypeScript | Self::Tsx => &[
                "arrow_function",
                "function_expression",
                "function",
                "generator_function",
            ],
            Self::Go => &["func_literal"],
            Self::Python | Self::Rust => &[],
        }
    }

    /// Containers whose name becomes part of the scope path of nested chunks.
    #[must_use]
    pub fn scope_kinds(self) -> &'static [&'static str] {
        match self {
            Self::JavaScript | Self::TypeScript | Self::Tsx => &[
                "class_declaration",
                "abstract_class_declaration",
                "class",
                "internal_module",
                "module",
            ],
            Self::Python => &["class_definition"],
            Self::Rust => &["impl_item", "trait_item", "mod_item"],
            Self::Go => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "py" | "pyi" => Some(Lang::Python),
        "rs" => Some(Lang::Rust),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Check if a file should be indexed (has a supported language with grammar).
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).and_then(Lang::grammar).is_some()
}
