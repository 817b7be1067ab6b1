//! ChunkCoordinator (spec §4.5): turns parsed entities/relations into the
//! three chunk kinds the store understands, formats their embeddable text
//! per the fixed templates, and batches embedder calls.
//!
//! Grounded on the teacher's `embed::batch::BatchEmbedder::prepare_text`
//! (same idea — build a deterministic string per item, then embed in
//! batches) and `embed::cache::EmbeddingCache` (moka, memory-bounded). This
//! module adds its own persistent on-disk cache (heed, mirroring
//! `vectordb::adapter`'s stack) keyed by `hash(text)` rather than by
//! `Chunk::hash`, since the same entity can produce several differently
//! formatted texts (metadata vs. implementation vs. relation).

use std::path::{Path, PathBuf};

use anyhow::Result;
use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};

use crate::embed::EmbeddingService;
use crate::parser::{Entity, Relation};
use crate::state::FileState;
use crate::vectordb::{ChunkType, Point, PointPayload};

/// Metrics accumulated across one `coordinate` call (feeds spec §6.4's
/// `PipelineResult.{total_tokens,total_cost_estimate,embedding_requests}`).
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub total_tokens: usize,
    /// Always 0.0: embeddings are produced locally via fastembed/ONNX, not
    /// a metered API, so there is nothing to estimate a dollar cost for.
    pub total_cost_estimate: f64,
    pub embedding_requests: usize,
    pub embeddings_reused: usize,
}

impl CoordinatorStats {
    fn merge(&mut self, other: CoordinatorStats) {
        self.total_tokens += other.total_tokens;
        self.embedding_requests += other.embedding_requests;
        self.embeddings_reused += other.embeddings_reused;
    }
}

/// One item pending embedding: the deterministic text plus enough context
/// to reassemble a `Point` once its vector comes back.
struct PendingChunk {
    text: String,
    id: String,
    content_hash: Option<String>,
    payload: PointPayload,
}

/// Persistent on-disk embedding cache, keyed by `hash(text)` (spec §4.5).
/// A thin heed wrapper, same idiom as `vectordb::adapter`'s storage.
pub struct EmbeddingCacheStore {
    env: Env,
    db: Database<Str, SerdeBincode<Vec<f32>>>,
}

impl EmbeddingCacheStore {
    pub fn open(cache_dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(512 * 1024 * 1024)
                .max_dbs(1)
                .open(&cache_dir)?
        };
        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, Some("embeddings"))?;
        wtxn.commit()?;
        Ok(Self { env, db })
    }

    fn get(&self, hash: &str) -> Result<Option<Vec<f32>>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, hash)?)
    }

    fn put_many(&self, items: &[(String, Vec<f32>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut wtxn = self.env.write_txn()?;
        for (hash, vector) in items {
            self.db.put(&mut wtxn, hash, vector)?;
        }
        wtxn.commit()?;
        Ok(())
    }
}

pub fn text_hash(text: &str) -> String {
    FileState::hash_bytes(text.as_bytes())
}

/// Metadata-chunk text (spec §4.5): `"<type>: <name> | <observations>
/// [| Description: <docstring>][| Signature: <signature>]"`.
pub fn format_metadata_text(entity: &Entity) -> String {
    let mut text = format!(
        "{}: {} | {}",
        entity.entity_type,
        entity.name,
        entity.observations.join(", ")
    );
    if let Some(doc) = &entity.docstring {
        if !doc.is_empty() {
            text.push_str(&format!(" | Description: {doc}"));
        }
    }
    if let Some(sig) = &entity.signature {
        if !sig.is_empty() {
            text.push_str(&format!(" | Signature: {sig}"));
        }
    }
    text
}

/// Relation-chunk text (spec §4.5): `"Relation: <from> <type> <to>
/// [| Context: <context>]"`.
pub fn format_relation_text(relation: &Relation) -> String {
    let mut text = format!(
        "Relation: {} {} {}",
        relation.from_entity, relation.relation_type, relation.to_entity
    );
    if let Some(ctx) = &relation.context {
        if !ctx.is_empty() {
            text.push_str(&format!(" | Context: {ctx}"));
        }
    }
    text
}

/// Implementation-chunk text is the raw code body (spec §4.5), unchanged.
pub fn format_implementation_text(entity: &Entity) -> &str {
    &entity.content
}

/// Coordinates chunk construction and embedding for one file's parse
/// output (spec §4.5). Does not touch the vector store — that is the
/// reconciler's job, which lets this stay a pure text/embedding concern.
pub struct ChunkCoordinator {
    cache: Option<EmbeddingCacheStore>,
}

impl ChunkCoordinator {
    pub fn new() -> Self {
        Self { cache: None }
    }

    pub fn with_cache_dir(cache_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            cache: Some(EmbeddingCacheStore::open(cache_dir)?),
        })
    }

    /// Builds metadata/implementation/relation chunks for one file's
    /// entities and relations, embeds their text (batched per chunk type,
    /// cache-checked first), and returns ready-to-upsert points.
    pub fn coordinate(
        &self,
        embedder: &mut EmbeddingService,
        entities: &[Entity],
        relations: &[Relation],
    ) -> Result<(Vec<Point>, CoordinatorStats)> {
        let mut pending = Vec::new();

        for entity in entities {
            let Some(file_path) = entity.file_path.clone() else {
                continue;
            };
            let metadata_text = format_metadata_text(entity);
            pending.push(PendingChunk {
                text: metadata_text,
                id: Point::stable_id(&file_path, &entity.name, ChunkType::Metadata),
                content_hash: Some(entity.content_hash.clone()),
                payload: PointPayload::Entity {
                    entity_name: entity.name.clone(),
                    entity_type: entity.entity_type,
                    chunk_type: ChunkType::Metadata,
                    file_path: file_path.clone(),
                    content_hash: Some(entity.content_hash.clone()),
                    has_implementation: entity.entity_type.eligible_for_implementation_chunk(),
                    line_number: Some(entity.line_number),
                    end_line_number: entity.end_line_number,
                    signature: entity.signature.clone(),
                    docstring: entity.docstring.clone(),
                    metadata: entity.metadata.clone(),
                },
            });

            if entity.entity_type.eligible_for_implementation_chunk() && !entity.content.is_empty() {
                pending.push(PendingChunk {
                    text: format_implementation_text(entity).to_string(),
                    id: Point::stable_id(&file_path, &entity.name, ChunkType::Implementation),
                    content_hash: Some(entity.content_hash.clone()),
                    payload: PointPayload::Entity {
                        entity_name: entity.name.clone(),
                        entity_type: entity.entity_type,
                        chunk_type: ChunkType::Implementation,
                        file_path: file_path.clone(),
                        content_hash: Some(entity.content_hash.clone()),
                        has_implementation: true,
                        line_number: Some(entity.line_number),
                        end_line_number: entity.end_line_number,
                        signature: entity.signature.clone(),
                        docstring: entity.docstring.clone(),
                        metadata: entity.metadata.clone(),
                    },
                });
            }
        }

        for (idx, relation) in relations.iter().enumerate() {
            let text = format_relation_text(relation);
            let file_path = entities
                .iter()
                .find(|e| e.name == relation.from_entity)
                .and_then(|e| e.file_path.clone());
            let id = format!(
                "rel::{}::{}::{}::{idx}",
                relation.from_entity, relation.relation_type, relation.to_entity
            )
            .to_lowercase();
            pending.push(PendingChunk {
                text,
                id,
                content_hash: None,
                payload: PointPayload::Relation {
                    entity_name: relation.from_entity.clone(),
                    relation_target: relation.to_entity.clone(),
                    relation_type: relation.relation_type.clone(),
                    file_path,
                    context: relation.context.clone(),
                    confidence: relation.confidence,
                    metadata: relation.metadata.clone(),
                },
            });
        }

        let mut stats = CoordinatorStats::default();
        let mut points = Vec::with_capacity(pending.len());

        // Batch by chunk type: relations get the large target (spec §4.5
        // "largest homogeneous group"), metadata/implementation use the
        // smaller batch ceiling to stay under embedder token limits.
        let (relation_chunks, other_chunks): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|c| matches!(c.payload, PointPayload::Relation { .. }));

        self.embed_group(
            embedder,
            relation_chunks,
            crate::constants::RELATION_EMBED_BATCH_TARGET,
            &mut points,
            &mut stats,
        )?;
        self.embed_group(
            embedder,
            other_chunks,
            crate::constants::DEFAULT_MAX_BATCH_SIZE,
            &mut points,
            &mut stats,
        )?;

        Ok((points, stats))
    }

    fn embed_group(
        &self,
        embedder: &mut EmbeddingService,
        chunks: Vec<PendingChunk>,
        batch_size: usize,
        points: &mut Vec<Point>,
        stats: &mut CoordinatorStats,
    ) -> Result<()> {
        for batch in chunks.chunks(batch_size.max(1)) {
            let mut to_embed = Vec::new();
            let mut to_embed_idx = Vec::new();
            let mut vectors: Vec<Option<Vec<f32>>> = vec![None; batch.len()];

            for (i, chunk) in batch.iter().enumerate() {
                let hash = text_hash(&chunk.text);
                if let Some(cache) = &self.cache {
                    if let Some(cached) = cache.get(&hash)? {
                        vectors[i] = Some(cached);
                        stats.embeddings_reused += 1;
                        continue;
                    }
                }
                to_embed.push(chunk.text.clone());
                to_embed_idx.push(i);
            }

            if !to_embed.is_empty() {
                stats.embedding_requests += 1;
                let embedded = embedder.embed_queries_batch(&to_embed)?;
                let mut to_cache = Vec::with_capacity(embedded.len());
                for (j, vector) in embedded.into_iter().enumerate() {
                    let i = to_embed_idx[j];
                    to_cache.push((text_hash(&batch[i].text), vector.clone()));
                    vectors[i] = Some(vector);
                }
                if let Some(cache) = &self.cache {
                    cache.put_many(&to_cache)?;
                }
            }

            for (i, chunk) in batch.iter().enumerate() {
                stats.total_tokens += chunk.text.split_whitespace().count();
                let Some(vector) = vectors[i].take() else {
                    continue;
                };
                points.push(Point {
                    id: chunk.id.clone(),
                    content: chunk.text.clone(),
                    vector,
                    payload: chunk.payload.clone(),
                });
                let _ = &chunk.content_hash;
            }
        }
        Ok(())
    }
}

impl Default for ChunkCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Default on-disk location for the embedding cache, nested under the
/// teacher's `.codesearch.db` root.
pub fn default_cache_dir(project_root: &Path) -> PathBuf {
    project_root.join(crate::constants::DB_DIR_NAME).join("embedding_cache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::EntityType;

    fn sample_entity(name: &str) -> Entity {
        Entity {
            name: name.to_string(),
            entity_type: EntityType::Function,
            observations: vec!["pure function".to_string()],
            file_path: Some("/proj/foo.py".to_string()),
            line_number: 10,
            end_line_number: Some(12),
            signature: Some(format!("def {name}(x)")),
            docstring: Some("Adds one.".to_string()),
            complexity_score: None,
            metadata: serde_json::Map::new(),
            content: format!("def {name}(x):\n    return x + 1\n"),
            content_hash: "abc123".to_string(),
        }
    }

    #[test]
    fn metadata_text_matches_template() {
        let entity = sample_entity("add_one");
        let text = format_metadata_text(&entity);
        assert_eq!(
            text,
            "function: add_one | pure function | Description: Adds one. | Signature: def add_one(x)"
        );
    }

    #[test]
    fn metadata_text_omits_missing_optional_fields() {
        let mut entity = sample_entity("add_one");
        entity.docstring = None;
        entity.signature = None;
        let text = format_metadata_text(&entity);
        assert_eq!(text, "function: add_one | pure function");
    }

    #[test]
    fn relation_text_matches_template() {
        let relation = Relation {
            from_entity: "main".to_string(),
            to_entity: "add_one".to_string(),
            relation_type: "calls".to_string(),
            context: Some("line 5".to_string()),
            confidence: Some(0.9),
            metadata: serde_json::Map::new(),
        };
        let text = format_relation_text(&relation);
        assert_eq!(text, "Relation: main calls add_one | Context: line 5");
    }

    #[test]
    fn implementation_text_is_raw_content() {
        let entity = sample_entity("add_one");
        assert_eq!(format_implementation_text(&entity), entity.content.as_str());
    }

    #[test]
    fn text_hash_is_stable() {
        assert_eq!(text_hash("hello"), text_hash("hello"));
        assert_ne!(text_hash("hello"), text_hash("world"));
    }
}
