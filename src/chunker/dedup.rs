//! Hash-based deduplication for chunk lists. Identical content (e.g. a
//! macro-generated impl appearing in both its definition and an expansion
//! pass) collapses to the first occurrence.

use super::Chunk;
use std::collections::HashSet;

pub fn dedup_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::with_capacity(chunks.len());
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.hash.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::ChunkKind;
    use super::*;

    #[test]
    fn drops_exact_duplicates() {
        let a = Chunk::new("fn a() {}".into(), 0, 0, ChunkKind::Function, "f.rs".into());
        let b = Chunk::new("fn a() {}".into(), 10, 10, ChunkKind::Function, "f.rs".into());
        let c = Chunk::new("fn b() {}".into(), 20, 20, ChunkKind::Function, "f.rs".into());

        let result = dedup_chunks(vec![a, b, c]);
        assert_eq!(result.len(), 2);
    }
}
