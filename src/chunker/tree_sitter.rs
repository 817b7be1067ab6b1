//! Thin wrapper around a single tree-sitter parse call. Grammar lookup and
//! caching live in `grammar.rs`; this module only turns a grammar + source
//! into a `Tree`.

use anyhow::{anyhow, Result};
use tree_sitter::{Language as TsLanguage, Parser, Tree};

pub fn parse(language: &TsLanguage, content: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| anyhow!("failed to set tree-sitter language: {e}"))?;
    parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("tree-sitter parser produced no tree"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_rust_source() {
        let language: TsLanguage = tree_sitter_rust::LANGUAGE.into();
        let tree = parse(&language, "fn main() {}").unwrap();
        assert_eq!(tree.root_node().kind(), "source_file");
    }
}
