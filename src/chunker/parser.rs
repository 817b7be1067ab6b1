//! Recursive tree-sitter node walk that turns definition nodes into
//! `Chunk`s, tracking a breadcrumb trail (e.g. `["File: a.rs", "Impl: Foo",
//! "Method: bar"]`) as it descends.

use super::extractor::LanguageExtractor;
use super::Chunk;
use std::path::Path;
use tree_sitter::Node;

pub fn walk(
    root: Node,
    source: &str,
    extractor: &dyn LanguageExtractor,
    path: &Path,
) -> Vec<Chunk> {
    let bytes = source.as_bytes();
    let path_str = path.display().to_string();
    let mut breadcrumbs = vec![format!("File: {}", path_str)];
    let mut chunks = Vec::new();

    visit(
        root,
        bytes,
        extractor,
        &path_str,
        &mut breadcrumbs,
        &mut chunks,
    );

    chunks
}

fn visit(
    node: Node,
    bytes: &[u8],
    extractor: &dyn LanguageExtractor,
    path_str: &str,
    breadcrumbs: &mut Vec<String>,
    out: &mut Vec<Chunk>,
) {
    if extractor.is_definition(node) {
        if let Some(chunk) = build_chunk(node, bytes, extractor, path_str, breadcrumbs) {
            let label = extractor.build_label(node, bytes);
            out.push(chunk);

            if let Some(label) = label {
                breadcrumbs.push(label);
                for i in 0..node.named_child_count() {
                    if let Some(child) = node.named_child(i) {
                        visit(child, bytes, extractor, path_str, breadcrumbs, out);
                    }
                }
                breadcrumbs.pop();
                return;
            }
        }
    }

    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            visit(child, bytes, extractor, path_str, breadcrumbs, out);
        }
    }
}

fn build_chunk(
    node: Node,
    bytes: &[u8],
    extractor: &dyn LanguageExtractor,
    path_str: &str,
    breadcrumbs: &[String],
) -> Option<Chunk> {
    let content = node.utf8_text(bytes).ok()?.to_string();
    let start_line = node.start_position().row;
    let end_line = node.end_position().row;
    let kind = extractor.classify(node);

    let mut chunk = Chunk::new(content, start_line, end_line, kind, path_str.to_string());
    chunk.context = breadcrumbs.to_vec();
    chunk.signature = extractor.extract_signature(node, bytes);
    chunk.docstring = extractor.extract_docstring(node, bytes);

    Some(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::extractor::get_extractor;
    use crate::chunker::ChunkKind;
    use crate::file::Language;
    use tree_sitter::Parser;

    fn parse_rust(content: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        let language: tree_sitter::Language = tree_sitter_rust::LANGUAGE.into();
        parser.set_language(&language).unwrap();
        parser.parse(content, None).unwrap()
    }

    #[test]
    fn walks_function_and_nested_impl_method() {
        let content = "fn free() {}\nimpl Foo {\n    fn bar(&self) {}\n}\n";
        let tree = parse_rust(content);
        let extractor = get_extractor(Language::Rust).unwrap();
        let chunks = walk(tree.root_node(), content, extractor.as_ref(), Path::new("f.rs"));

        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Function));
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Impl));
        let method = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Method)
            .expect("method chunk");
        assert!(method.context.iter().any(|c| c.starts_with("Impl:")));
    }
}
