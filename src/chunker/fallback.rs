//! Fixed-window fallback chunking, used when a file's language has no
//! tree-sitter grammar or the grammar pass finds no definitions worth
//! splitting on.

use super::{Chunk, ChunkKind};
use std::path::Path;

pub fn chunk_by_lines(
    path: &Path,
    content: &str,
    min_chunk_size: usize,
    max_chunk_size: usize,
) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let path_str = path.display().to_string();
    let max_chunk_size = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let mut end = (start + max_chunk_size).min(lines.len());

        // avoid leaving a sliver smaller than min_chunk_size dangling at the
        // tail; fold it into the previous window instead
        if lines.len() - end < min_chunk_size && end < lines.len() {
            end = lines.len();
        }

        let body = lines[start..end].join("\n");
        let mut chunk = Chunk::new(
            body,
            start,
            end.saturating_sub(1),
            ChunkKind::Block,
            path_str.clone(),
        );
        chunk.context.push(format!("File: {}", path_str));
        chunks.push(chunk);

        if end >= lines.len() {
            break;
        }
        start = end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_windows_of_max_size() {
        let content = (0..25)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_by_lines(Path::new("notes.md"), &content, 2, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start_line, 0);
        assert_eq!(chunks[0].end_line, 9);
    }

    #[test]
    fn merges_small_trailing_window() {
        let content = (0..11)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_by_lines(Path::new("notes.md"), &content, 5, 10);
        // the trailing single line is smaller than min_chunk_size, so it
        // folds into the first window instead of its own tiny chunk
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_line, 10);
    }

    #[test]
    fn empty_content_has_no_chunks() {
        assert!(chunk_by_lines(Path::new("empty.md"), "", 1, 10).is_empty());
    }
}
