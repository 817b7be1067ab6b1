//! Orchestrates grammar lookup, tree-sitter parsing, the definition walk,
//! fallback windowing and deduplication into a single `Chunker`
//! implementation.

use super::dedup::dedup_chunks;
use super::extractor::get_extractor;
use super::fallback::chunk_by_lines;
use super::grammar::GrammarManager;
use super::parser::walk;
use super::tree_sitter::parse;
use super::{Chunk, ChunkKind, Chunker};
use crate::file::Language;
use anyhow::Result;
use std::path::Path;

/// Tree-sitter backed chunker that splits source along definition
/// boundaries (functions, classes, impls, ...), falling back to fixed-size
/// line windows for languages without a grammar or files where the grammar
/// pass finds nothing.
pub struct SemanticChunker {
    grammars: GrammarManager,
    min_chunk_size: usize,
    max_chunk_size: usize,
    context_lines: usize,
}

impl SemanticChunker {
    pub fn new(min_chunk_size: usize, max_chunk_size: usize, context_lines: usize) -> Self {
        Self {
            grammars: GrammarManager::new(),
            min_chunk_size,
            max_chunk_size,
            context_lines,
        }
    }

    /// Chunk `content`, already known to be written in `language`.
    pub fn chunk_semantic(
        &self,
        language: Language,
        path: &Path,
        content: &str,
    ) -> Result<Vec<Chunk>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks = match (self.grammars.get_grammar(language), get_extractor(language)) {
            (Some(grammar), Some(extractor)) => {
                let tree = parse(&grammar, content)?;
                let found = walk(tree.root_node(), content, extractor.as_ref(), path);
                if found.is_empty() {
                    chunk_by_lines(path, content, self.min_chunk_size, self.max_chunk_size)
                } else {
                    self.enforce_size_bounds(found)
                }
            }
            _ => chunk_by_lines(path, content, self.min_chunk_size, self.max_chunk_size),
        };

        Ok(dedup_chunks(self.attach_context_window(chunks, content)))
    }

    /// Split any definition chunk longer than `max_chunk_size` lines into
    /// fixed windows, keeping the original breadcrumb and signature.
    fn enforce_size_bounds(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut out = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.line_count() <= self.max_chunk_size {
                out.push(chunk);
                continue;
            }

            let lines: Vec<&str> = chunk.content.lines().collect();
            let mut offset = 0;
            let mut split_index = 0;
            while offset < lines.len() {
                let end = (offset + self.max_chunk_size).min(lines.len());
                let body = lines[offset..end].join("\n");
                let mut part = Chunk::new(
                    body,
                    chunk.start_line + offset,
                    chunk.start_line + end.saturating_sub(1),
                    chunk.kind,
                    chunk.path.clone(),
                );
                part.context = chunk.context.clone();
                part.signature = chunk.signature.clone();
                part.is_complete = false;
                part.split_index = Some(split_index);
                out.push(part);
                split_index += 1;
                offset = end;
            }
        }
        out
    }

    /// Fill in the before/after source snippets carried alongside each
    /// chunk for extra retrieval context.
    fn attach_context_window(&self, mut chunks: Vec<Chunk>, content: &str) -> Vec<Chunk> {
        if self.context_lines == 0 {
            return chunks;
        }

        let lines: Vec<&str> = content.lines().collect();
        for chunk in &mut chunks {
            if chunk.start_line > 0 {
                let from = chunk.start_line.saturating_sub(self.context_lines);
                chunk.context_prev = Some(lines[from..chunk.start_line].join("\n"));
            }
            let after_start = chunk.end_line + 1;
            if after_start < lines.len() {
                let to = (after_start + self.context_lines).min(lines.len());
                chunk.context_next = Some(lines[after_start..to].join("\n"));
            }
        }
        chunks
    }
}

impl Chunker for SemanticChunker {
    fn chunk_file(&self, path: &Path, content: &str) -> Result<Vec<Chunk>> {
        let language = Language::from_path(path);
        self.chunk_semantic(language, path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_rust_function() {
        let chunker = SemanticChunker::new(1, 2000, 2);
        let content = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let chunks = chunker
            .chunk_semantic(Language::Rust, Path::new("lib.rs"), content)
            .unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].kind, ChunkKind::Function);
    }

    #[test]
    fn falls_back_for_ungrammared_language() {
        let chunker = SemanticChunker::new(1, 10, 0);
        let content = (0..30)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker
            .chunk_semantic(Language::Markdown, Path::new("notes.md"), &content)
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Block));
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        let chunker = SemanticChunker::new(1, 2000, 2);
        let chunks = chunker
            .chunk_semantic(Language::Rust, Path::new("empty.rs"), "")
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_file_dispatches_by_extension() {
        let chunker = SemanticChunker::new(1, 2000, 1);
        let chunks = chunker
            .chunk_file(Path::new("lib.rs"), "fn f() {}\n")
            .unwrap();
        assert!(!chunks.is_empty());
    }
}
