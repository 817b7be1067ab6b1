//! Source language detection by file extension.

use std::path::Path;

/// A detected source language. Languages with a tree-sitter grammar
/// (`chunker::get_extractor`) get full entity/relation extraction; the rest
/// are still indexable but fall back to the fallback/light-tier parse path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    C,
    Cpp,
    CSharp,
    Java,
    Go,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Shell,
    Html,
    Css,
    Json,
    Yaml,
    Toml,
    Markdown,
    Sql,
    GraphQl,
    Other,
    Unknown,
}

impl Language {
    /// Detects a language from a file's extension (and a few bare
    /// filenames, e.g. `Dockerfile`).
    pub fn from_path(path: &Path) -> Self {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.eq_ignore_ascii_case("dockerfile") {
                return Language::Other;
            }
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("rs") => Language::Rust,
            Some("py" | "pyw" | "pyi") => Language::Python,
            Some("js" | "mjs" | "cjs" | "jsx") => Language::JavaScript,
            Some("ts" | "mts" | "cts" | "tsx") => Language::TypeScript,
            Some("c" | "h") => Language::C,
            Some("cpp" | "cc" | "cxx" | "hpp" | "hxx") => Language::Cpp,
            Some("cs" | "csx") => Language::CSharp,
            Some("java") => Language::Java,
            Some("kt" | "kts") => Language::Kotlin,
            Some("go") => Language::Go,
            Some("rb" | "rake") => Language::Ruby,
            Some("php") => Language::Php,
            Some("swift") => Language::Swift,
            Some("sh" | "bash" | "zsh" | "fish" | "ps1" | "psm1" | "psd1") => Language::Shell,
            Some("html" | "htm" | "vue" | "svelte") => Language::Html,
            Some("css" | "scss" | "sass" | "less") => Language::Css,
            Some("json" | "jsonc" | "json5") => Language::Json,
            Some("yaml" | "yml") => Language::Yaml,
            Some("toml") => Language::Toml,
            Some("md" | "markdown" | "rst") => Language::Markdown,
            Some("sql") => Language::Sql,
            Some("graphql" | "gql" | "proto") => Language::GraphQl,
            Some(_) => Language::Other,
            None => Language::Unknown,
        }
    }

    /// Human-readable name, used in log output and statistics.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "Rust",
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::C => "C",
            Language::Cpp => "C++",
            Language::CSharp => "C#",
            Language::Java => "Java",
            Language::Go => "Go",
            Language::Ruby => "Ruby",
            Language::Php => "PHP",
            Language::Swift => "Swift",
            Language::Kotlin => "Kotlin",
            Language::Shell => "Shell",
            Language::Html => "HTML",
            Language::Css => "CSS",
            Language::Json => "JSON",
            Language::Yaml => "YAML",
            Language::Toml => "TOML",
            Language::Markdown => "Markdown",
            Language::Sql => "SQL",
            Language::GraphQl => "GraphQL",
            Language::Other => "Other",
            Language::Unknown => "Unknown",
        }
    }

    /// Whether the file walker should include files of this language at all.
    /// Only genuinely unrecognized extensions are excluded; everything else
    /// at least gets the light-tier single `file` entity (spec §4.10).
    pub fn is_indexable(&self) -> bool {
        !matches!(self, Language::Unknown)
    }

    /// Whether the tree-sitter chunker has a grammar for this language
    /// (`chunker::grammar::GrammarManager::get_grammar`).
    pub fn has_grammar(&self) -> bool {
        matches!(
            self,
            Language::Rust
                | Language::Python
                | Language::JavaScript
                | Language::TypeScript
                | Language::C
                | Language::Cpp
                | Language::CSharp
                | Language::Go
                | Language::Java
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn detects_common_languages() {
        assert_eq!(Language::from_path(&PathBuf::from("a.rs")), Language::Rust);
        assert_eq!(Language::from_path(&PathBuf::from("a.py")), Language::Python);
        assert_eq!(Language::from_path(&PathBuf::from("a.tsx")), Language::TypeScript);
    }

    #[test]
    fn unknown_extension_is_not_indexable() {
        let lang = Language::from_path(&PathBuf::from("a.xyz123"));
        assert!(lang.is_indexable());
        assert_eq!(lang, Language::Other);
    }

    #[test]
    fn no_extension_is_unknown_and_not_indexable() {
        let lang = Language::from_path(&PathBuf::from("Makefile"));
        assert_eq!(lang, Language::Unknown);
        assert!(!lang.is_indexable());
    }
}
