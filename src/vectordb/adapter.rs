//! VectorStoreAdapter (spec §4.6): the boundary the Reconciler assumes of
//! its point-store collaborator — `upsert`/`delete`/`scroll`/`count` plus
//! the dedup (`check_content_exists`) and orphan-cleanup (`scroll` +
//! `update_file_paths`) primitives layered on top.
//!
//! Backed by the teacher's arroy+heed stack (`vectordb::store::VectorStore`
//! is the single-collection local-search sibling of this module; this
//! adapter is a multi-collection generalization living under the same
//! `.codesearch.db` root per SPEC_FULL.md §6).
//!
//! Replaces the source's `hasattr`-style payload inspection (spec §9) with
//! a tagged `PointPayload` enum; the manual-entry predicate (§4.8) becomes
//! a pattern match on `PointPayload::Manual`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use arroy::distances::Cosine;
use arroy::{Database as ArroyDatabase, Writer as ArroyWriter};
use dashmap::DashMap;
use heed::byteorder::BigEndian;
use heed::types::{SerdeBincode, Str, U32};
use heed::{Database, Env, EnvOpenOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::parser::EntityType;

/// Point kind (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Metadata,
    Implementation,
    Relation,
}

/// Tagged replacement for the source's dynamic-field-inspection payload
/// shape (spec §9). The flat wire shape (§6.3) is reconstructed by the
/// serializer; callers match on the variant instead of probing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointPayload {
    /// A metadata or implementation chunk backing one entity.
    Entity {
        entity_name: String,
        entity_type: EntityType,
        chunk_type: ChunkType,
        file_path: String,
        content_hash: Option<String>,
        has_implementation: bool,
        line_number: Option<usize>,
        end_line_number: Option<usize>,
        signature: Option<String>,
        docstring: Option<String>,
        #[serde(default)]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    /// A relation chunk (spec §3.2, §3.3).
    Relation {
        entity_name: String,
        relation_target: String,
        relation_type: String,
        file_path: Option<String>,
        context: Option<String>,
        confidence: Option<f32>,
        #[serde(default)]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    /// A point inserted by out-of-band tooling (spec §4.8, GLOSSARY).
    Manual {
        entity_name: String,
        entity_type: EntityType,
        #[serde(default)]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
}

impl PointPayload {
    /// The manual-entry predicate of spec §4.8, expressed as a pattern
    /// match instead of a `hasattr` probe (spec §9).
    pub fn is_manual(&self) -> bool {
        matches!(self, PointPayload::Manual { .. })
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            PointPayload::Entity { file_path, .. } => Some(file_path.as_str()),
            PointPayload::Relation { file_path, .. } => file_path.as_deref(),
            PointPayload::Manual { .. } => None,
        }
    }

    fn set_file_path_prefix(&mut self, old_prefix: &str, new_prefix: &str) -> bool {
        match self {
            PointPayload::Entity { file_path, .. } => {
                if let Some(rest) = file_path.strip_prefix(old_prefix) {
                    *file_path = format!("{new_prefix}{rest}");
                    true
                } else {
                    false
                }
            }
            PointPayload::Relation { file_path, .. } => {
                if let Some(fp) = file_path {
                    if let Some(rest) = fp.strip_prefix(old_prefix) {
                        *fp = format!("{new_prefix}{rest}");
                        return true;
                    }
                }
                false
            }
            PointPayload::Manual { .. } => false,
        }
    }

    pub fn chunk_type(&self) -> Option<ChunkType> {
        match self {
            PointPayload::Entity { chunk_type, .. } => Some(*chunk_type),
            PointPayload::Relation { .. } => Some(ChunkType::Relation),
            PointPayload::Manual { .. } => None,
        }
    }

    pub fn entity_name(&self) -> &str {
        match self {
            PointPayload::Entity { entity_name, .. } => entity_name,
            PointPayload::Relation { entity_name, .. } => entity_name,
            PointPayload::Manual { entity_name, .. } => entity_name,
        }
    }

    pub fn content_hash(&self) -> Option<&str> {
        match self {
            PointPayload::Entity { content_hash, .. } => content_hash.as_deref(),
            _ => None,
        }
    }
}

/// A persisted vector-store point (spec §3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    /// Stable string id: a function of `file_path::entity_name::chunk_type`.
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl Point {
    /// Builds the stable id spec §3.3 requires (`file_path::entity_name::chunk_type`).
    pub fn stable_id(file_path: &str, entity_name: &str, chunk_type: ChunkType) -> String {
        format!("{file_path}::{entity_name}::{chunk_type:?}").to_lowercase()
    }
}

/// Record actually persisted in the `points` database: everything about a
/// `Point` except its vector, which lives in a separate table so it can be
/// fetched without going through the (lazily rebuilt) arroy index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    content: String,
    payload: PointPayload,
}

/// Filter accepted by `scroll`/`count` (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct ScrollFilter {
    pub file_path: Option<String>,
    pub file_path_prefix: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub exclude_relations: bool,
}

impl ScrollFilter {
    pub fn by_file(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    fn matches(&self, record: &StoredRecord) -> bool {
        if let Some(want) = &self.file_path {
            if record.payload.file_path() != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.file_path_prefix {
            match record.payload.file_path() {
                Some(fp) if fp.starts_with(prefix.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(ct) = self.chunk_type {
            if record.payload.chunk_type() != Some(ct) {
                return false;
            }
        }
        if self.exclude_relations && matches!(record.payload, PointPayload::Relation { .. }) {
            return false;
        }
        true
    }
}

/// One page of `scroll` results (spec §4.6 "adapter handles cursor pagination").
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<Point>,
    /// Present iff more matching points remain beyond this page.
    pub next_cursor: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaRecord {
    dim: usize,
    next_id: u32,
    /// Set whenever the arroy index needs rebuilding before a similarity search.
    dirty: bool,
}

struct CollectionEnv {
    env: Env,
    points: Database<U32<BigEndian>, SerdeBincode<StoredRecord>>,
    raw_vectors: Database<U32<BigEndian>, SerdeBincode<Vec<f32>>>,
    ann_vectors: ArroyDatabase<Cosine>,
    id_index: Database<Str, U32<BigEndian>>,
    content_index: Database<Str, U32<BigEndian>>,
    meta: Database<Str, SerdeBincode<MetaRecord>>,
}

/// The contract the Reconciler assumes of its point-store collaborator
/// (spec §4.6). The core only ever talks to this trait; a local
/// arroy+heed-backed implementation is provided below, but the Reconciler
/// does not care whether the adapter wraps a caching layer or a remote
/// service.
pub trait VectorStoreAdapter: Send + Sync {
    fn collection_exists(&self, collection: &str) -> Result<bool>;
    fn ensure_collection(&self, collection: &str, dim: usize) -> Result<()>;
    fn upsert_points(&self, collection: &str, points: Vec<Point>) -> Result<usize>;
    fn delete_points(&self, collection: &str, ids: &[String]) -> Result<usize>;
    fn scroll(
        &self,
        collection: &str,
        filter: &ScrollFilter,
        limit: usize,
        with_payload: bool,
        with_vectors: bool,
        cursor: Option<u32>,
    ) -> Result<ScrollPage>;
    fn count(&self, collection: &str, filter: &ScrollFilter) -> Result<usize>;
    fn check_content_exists(&self, collection: &str, content_hash: &str) -> Result<bool>;
    fn update_file_paths(&self, collection: &str, renames: &[(String, String)]) -> Result<usize>;
    fn clear_collection(&self, collection: &str, preserve_manual: bool) -> Result<usize>;
    fn find_entities_for_file(&self, collection: &str, abs_path: &str) -> Result<Vec<Point>>;

    /// Approximate nearest-neighbor search, honoring the "no ranking beyond
    /// proxying" non-goal (spec §1) — raw `(point, score)` pairs, nothing more.
    fn search_similar(&self, collection: &str, query: &[f32], limit: usize) -> Result<Vec<(Point, f32)>>;

    /// Convenience wrapper that drains every page (spec §4.6 "adapter
    /// handles cursor pagination" — most callers just want everything).
    fn scroll_all(&self, collection: &str, filter: &ScrollFilter, with_payload: bool, with_vectors: bool) -> Result<Vec<Point>> {
        let mut out = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.scroll(collection, filter, 1000, with_payload, with_vectors, cursor)?;
            let done = page.next_cursor.is_none();
            out.extend(page.points);
            if done {
                break;
            }
            cursor = page.next_cursor;
        }
        Ok(out)
    }
}

/// Local arroy+heed backed implementation, one LMDB environment per
/// collection under `<root>/<collection>/` (root defaults to the
/// teacher's `.codesearch.db`, per SPEC_FULL.md §6's "carried side-by-side"
/// note).
pub struct LocalVectorStore {
    root: PathBuf,
    collections: DashMap<String, std::sync::Arc<CollectionEnv>>,
}

const KEY_META: &str = "__meta__";

impl LocalVectorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collections: DashMap::new(),
        }
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn open(&self, collection: &str, dim: usize) -> Result<std::sync::Arc<CollectionEnv>> {
        if let Some(existing) = self.collections.get(collection) {
            return Ok(existing.clone());
        }

        let dir = self.collection_dir(collection);
        std::fs::create_dir_all(&dir)?;

        let map_size_mb = std::env::var("CODESEARCH_LMDB_MAP_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(crate::constants::DEFAULT_LMDB_MAP_SIZE_MB);

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(10)
                .open(&dir)?
        };

        let mut wtxn = env.write_txn()?;
        let points = env.create_database(&mut wtxn, Some("points"))?;
        let raw_vectors = env.create_database(&mut wtxn, Some("raw_vectors"))?;
        let ann_vectors: ArroyDatabase<Cosine> = env.create_database(&mut wtxn, Some("ann_vectors"))?;
        let id_index = env.create_database(&mut wtxn, Some("id_index"))?;
        let content_index = env.create_database(&mut wtxn, Some("content_index"))?;
        let meta: Database<Str, SerdeBincode<MetaRecord>> =
            env.create_database(&mut wtxn, Some("meta"))?;

        if meta.get(&wtxn, KEY_META)?.is_none() {
            meta.put(
                &mut wtxn,
                KEY_META,
                &MetaRecord {
                    dim,
                    next_id: 0,
                    dirty: false,
                },
            )?;
        }
        wtxn.commit()?;

        let handle = std::sync::Arc::new(CollectionEnv {
            env,
            points,
            raw_vectors,
            ann_vectors,
            id_index,
            content_index,
            meta,
        });
        self.collections.insert(collection.to_string(), handle.clone());
        Ok(handle)
    }

    fn try_open_existing(&self, collection: &str) -> Result<Option<std::sync::Arc<CollectionEnv>>> {
        if let Some(existing) = self.collections.get(collection) {
            return Ok(Some(existing.clone()));
        }
        let dir = self.collection_dir(collection);
        if !dir.exists() {
            return Ok(None);
        }
        // dim is irrelevant for opening an existing env; meta carries the real one.
        Ok(Some(self.open(collection, 0)?))
    }
}

impl VectorStoreAdapter for LocalVectorStore {
    fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collection_dir(collection).exists())
    }

    fn ensure_collection(&self, collection: &str, dim: usize) -> Result<()> {
        self.open(collection, dim)?;
        Ok(())
    }

    fn upsert_points(&self, collection: &str, points: Vec<Point>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let dim = points[0].vector.len();
        let handle = self.open(collection, dim)?;

        let mut wtxn = handle.env.write_txn()?;
        let mut meta = handle
            .meta
            .get(&wtxn, KEY_META)?
            .unwrap_or(MetaRecord { dim, next_id: 0, dirty: false });

        let writer = ArroyWriter::new(handle.ann_vectors, 0, meta.dim.max(dim));

        let mut upserted = 0;
        for point in points {
            if point.vector.len() != meta.dim {
                return Err(anyhow!(
                    "embedding dimension mismatch: collection expects {}, got {}",
                    meta.dim,
                    point.vector.len()
                ));
            }

            let item_id = match handle.id_index.get(&wtxn, &point.id)? {
                Some(existing) => existing,
                None => {
                    let id = meta.next_id;
                    meta.next_id += 1;
                    id
                }
            };

            handle.id_index.put(&mut wtxn, &point.id, &item_id)?;
            handle.raw_vectors.put(&mut wtxn, &item_id, &point.vector)?;
            writer.add_item(&mut wtxn, item_id, &point.vector)?;

            if let Some(hash) = point.payload.content_hash() {
                handle.content_index.put(&mut wtxn, hash, &item_id)?;
            }

            handle.points.put(
                &mut wtxn,
                &item_id,
                &StoredRecord {
                    id: point.id,
                    content: point.content,
                    payload: point.payload,
                },
            )?;
            upserted += 1;
        }

        meta.dirty = true;
        handle.meta.put(&mut wtxn, KEY_META, &meta)?;
        wtxn.commit()?;

        Ok(upserted)
    }

    fn delete_points(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let Some(handle) = self.try_open_existing(collection)? else {
            return Ok(0);
        };
        let mut wtxn = handle.env.write_txn()?;
        let mut deleted = 0;

        let writer = {
            let meta = handle.meta.get(&wtxn, KEY_META)?;
            meta.map(|m| ArroyWriter::<Cosine>::new(handle.ann_vectors, 0, m.dim))
        };

        for id in ids {
            // Unknown IDs are not errors (spec §4.6 "idempotent").
            let Some(item_id) = handle.id_index.get(&wtxn, id)? else {
                continue;
            };
            handle.id_index.delete(&mut wtxn, id)?;
            handle.raw_vectors.delete(&mut wtxn, &item_id)?;
            if let Some(record) = handle.points.get(&wtxn, &item_id)? {
                if let Some(hash) = record.payload.content_hash() {
                    handle.content_index.delete(&mut wtxn, hash)?;
                }
            }
            handle.points.delete(&mut wtxn, &item_id)?;
            if let Some(writer) = &writer {
                let _ = writer.del_item(&mut wtxn, item_id);
            }
            deleted += 1;
        }

        if deleted > 0 {
            if let Some(mut meta) = handle.meta.get(&wtxn, KEY_META)? {
                meta.dirty = true;
                handle.meta.put(&mut wtxn, KEY_META, &meta)?;
            }
        }
        wtxn.commit()?;
        Ok(deleted)
    }

    fn scroll(
        &self,
        collection: &str,
        filter: &ScrollFilter,
        limit: usize,
        with_payload: bool,
        with_vectors: bool,
        cursor: Option<u32>,
    ) -> Result<ScrollPage> {
        let Some(handle) = self.try_open_existing(collection)? else {
            return Ok(ScrollPage::default());
        };
        let rtxn = handle.env.read_txn()?;

        let mut points = Vec::new();
        let mut next_cursor = None;
        let start = cursor.unwrap_or(0);

        for result in handle.points.iter(&rtxn)? {
            let (item_id, record) = result?;
            if item_id < start {
                continue;
            }
            if !filter.matches(&record) {
                continue;
            }
            if points.len() == limit {
                next_cursor = Some(item_id);
                break;
            }

            let vector = if with_vectors {
                handle.raw_vectors.get(&rtxn, &item_id)?.unwrap_or_default()
            } else {
                Vec::new()
            };

            points.push(Point {
                id: record.id,
                content: record.content,
                vector,
                payload: if with_payload {
                    record.payload
                } else {
                    continue_with_minimal_payload(record.payload)
                },
            });
        }

        Ok(ScrollPage { points, next_cursor })
    }

    fn count(&self, collection: &str, filter: &ScrollFilter) -> Result<usize> {
        let Some(handle) = self.try_open_existing(collection)? else {
            return Ok(0);
        };
        let rtxn = handle.env.read_txn()?;
        let mut n = 0;
        for result in handle.points.iter(&rtxn)? {
            let (_, record) = result?;
            if filter.matches(&record) {
                n += 1;
            }
        }
        Ok(n)
    }

    fn check_content_exists(&self, collection: &str, content_hash: &str) -> Result<bool> {
        let Some(handle) = self.try_open_existing(collection)? else {
            return Ok(false);
        };
        let rtxn = handle.env.read_txn()?;
        Ok(handle.content_index.get(&rtxn, content_hash)?.is_some())
    }

    fn update_file_paths(&self, collection: &str, renames: &[(String, String)]) -> Result<usize> {
        let Some(handle) = self.try_open_existing(collection)? else {
            return Ok(0);
        };
        let mut wtxn = handle.env.write_txn()?;
        let mut updated = 0;

        let item_ids: Vec<u32> = handle
            .points
            .iter(&wtxn)?
            .map(|r| r.map(|(id, _)| id))
            .collect::<heed::Result<_>>()?;

        for item_id in item_ids {
            let Some(mut record) = handle.points.get(&wtxn, &item_id)? else {
                continue;
            };
            let mut changed = false;
            for (old_abs, new_abs) in renames {
                if record.payload.set_file_path_prefix(old_abs, new_abs) {
                    changed = true;
                    break;
                }
            }
            if changed {
                handle.points.put(&mut wtxn, &item_id, &record)?;
                updated += 1;
            }
        }

        wtxn.commit()?;
        Ok(updated)
    }

    fn clear_collection(&self, collection: &str, preserve_manual: bool) -> Result<usize> {
        let Some(handle) = self.try_open_existing(collection)? else {
            return Ok(0);
        };
        let mut wtxn = handle.env.write_txn()?;

        if !preserve_manual {
            let deleted = handle.points.len(&wtxn)? as usize;
            handle.points.clear(&mut wtxn)?;
            handle.raw_vectors.clear(&mut wtxn)?;
            handle.ann_vectors.clear(&mut wtxn)?;
            handle.id_index.clear(&mut wtxn)?;
            handle.content_index.clear(&mut wtxn)?;
            wtxn.commit()?;
            return Ok(deleted);
        }

        let to_delete: Vec<(u32, String)> = handle
            .points
            .iter(&wtxn)?
            .filter_map(|r| match r {
                Ok((item_id, record)) if !record.payload.is_manual() => Some(Ok((item_id, record.id))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<heed::Result<_>>()?;

        let mut deleted = 0;
        for (item_id, id) in &to_delete {
            handle.id_index.delete(&mut wtxn, id)?;
            handle.raw_vectors.delete(&mut wtxn, item_id)?;
            handle.points.delete(&mut wtxn, item_id)?;
            deleted += 1;
        }
        wtxn.commit()?;
        Ok(deleted)
    }

    fn find_entities_for_file(&self, collection: &str, abs_path: &str) -> Result<Vec<Point>> {
        self.scroll_all(collection, &ScrollFilter::by_file(abs_path), true, false)
    }
}

/// Payload with the same shape but metadata maps cleared — used for
/// `with_payload=false` scroll calls where callers only need identity and
/// file path, not the full map (keeps the contract honest about the flag
/// while still letting filters inspect `file_path`/`chunk_type`).
fn continue_with_minimal_payload(payload: PointPayload) -> PointPayload {
    match payload {
        PointPayload::Entity {
            entity_name,
            entity_type,
            chunk_type,
            file_path,
            content_hash,
            has_implementation,
            line_number,
            end_line_number,
            signature,
            docstring,
            ..
        } => PointPayload::Entity {
            entity_name,
            entity_type,
            chunk_type,
            file_path,
            content_hash,
            has_implementation,
            line_number,
            end_line_number,
            signature,
            docstring,
            metadata: serde_json::Map::new(),
        },
        PointPayload::Relation {
            entity_name,
            relation_target,
            relation_type,
            file_path,
            context,
            confidence,
            ..
        } => PointPayload::Relation {
            entity_name,
            relation_target,
            relation_type,
            file_path,
            context,
            confidence,
            metadata: serde_json::Map::new(),
        },
        PointPayload::Manual { entity_name, entity_type, .. } => PointPayload::Manual {
            entity_name,
            entity_type,
            metadata: serde_json::Map::new(),
        },
    }
}

/// Rebuilds the ANN index for a collection and runs an approximate
/// similarity search, honoring the "no ranking beyond proxying" non-goal
/// (spec §1) — this returns raw (id, score) pairs, nothing more.
pub fn search_similar(
    store: &LocalVectorStore,
    collection: &str,
    query: &[f32],
    limit: usize,
) -> Result<Vec<(Point, f32)>> {
    let Some(handle) = store.try_open_existing(collection)? else {
        return Ok(Vec::new());
    };

    {
        let mut wtxn = handle.env.write_txn()?;
        if let Some(mut meta) = handle.meta.get(&wtxn, KEY_META)? {
            if meta.dirty {
                let writer = ArroyWriter::<Cosine>::new(handle.ann_vectors, 0, meta.dim);
                let mut rng = StdRng::seed_from_u64(rand::random());
                writer.builder(&mut rng).build(&mut wtxn)?;
                meta.dirty = false;
                handle.meta.put(&mut wtxn, KEY_META, &meta)?;
            }
        }
        wtxn.commit()?;
    }

    let rtxn = handle.env.read_txn()?;
    let reader = arroy::Reader::open(&rtxn, 0, handle.ann_vectors)?;
    let results = reader.nns(limit).by_vector(&rtxn, query)?;

    let mut out = Vec::with_capacity(results.len());
    for (item_id, distance) in results {
        if let Some(record) = handle.points.get(&rtxn, &item_id)? {
            out.push((
                Point {
                    id: record.id,
                    content: record.content,
                    vector: Vec::new(),
                    payload: record.payload,
                },
                1.0 - distance,
            ));
        }
    }
    Ok(out)
}

/// Default root directory for collections, nested under the teacher's
/// `.codesearch.db` (spec SPEC_FULL.md §6 "carried side-by-side").
pub fn default_root(project_root: &Path) -> PathBuf {
    project_root.join(crate::constants::DB_DIR_NAME).join("collections")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entity_point(id: &str, file_path: &str, name: &str, hash: &str, vec: Vec<f32>) -> Point {
        Point {
            id: id.to_string(),
            content: format!("content for {name}"),
            vector: vec,
            payload: PointPayload::Entity {
                entity_name: name.to_string(),
                entity_type: EntityType::Function,
                chunk_type: ChunkType::Metadata,
                file_path: file_path.to_string(),
                content_hash: Some(hash.to_string()),
                has_implementation: true,
                line_number: Some(1),
                end_line_number: Some(2),
                signature: None,
                docstring: None,
                metadata: serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn ensure_collection_then_exists() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        assert!(!store.collection_exists("proj").unwrap());
        store.ensure_collection("proj", 4).unwrap();
        assert!(store.collection_exists("proj").unwrap());
    }

    #[test]
    fn upsert_then_count_and_scroll() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        store.ensure_collection("proj", 3).unwrap();

        let points = vec![
            entity_point("p1", "/proj/foo.py", "add", "h1", vec![1.0, 0.0, 0.0]),
            entity_point("p2", "/proj/bar.py", "main", "h2", vec![0.0, 1.0, 0.0]),
        ];
        let n = store.upsert_points("proj", points).unwrap();
        assert_eq!(n, 2);

        let count = store.count("proj", &ScrollFilter::default()).unwrap();
        assert_eq!(count, 2);

        let page = store
            .scroll("proj", &ScrollFilter::by_file("/proj/foo.py"), 10, true, false, None)
            .unwrap();
        assert_eq!(page.points.len(), 1);
        assert_eq!(page.points[0].payload.entity_name(), "add");
    }

    #[test]
    fn check_content_exists_roundtrip() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        store.ensure_collection("proj", 3).unwrap();
        store
            .upsert_points("proj", vec![entity_point("p1", "/proj/foo.py", "add", "deadbeef", vec![1.0, 0.0, 0.0])])
            .unwrap();

        assert!(store.check_content_exists("proj", "deadbeef").unwrap());
        assert!(!store.check_content_exists("proj", "nope").unwrap());
    }

    #[test]
    fn delete_points_is_idempotent_for_unknown_ids() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        store.ensure_collection("proj", 3).unwrap();
        store
            .upsert_points("proj", vec![entity_point("p1", "/proj/foo.py", "add", "h1", vec![1.0, 0.0, 0.0])])
            .unwrap();

        let deleted = store.delete_points("proj", &["p1".to_string(), "unknown".to_string()]).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count("proj", &ScrollFilter::default()).unwrap(), 0);
    }

    #[test]
    fn update_file_paths_rewrites_prefix_preserving_ids() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        store.ensure_collection("proj", 3).unwrap();
        store
            .upsert_points("proj", vec![entity_point("p1", "/proj/old.py", "add", "h1", vec![1.0, 0.0, 0.0])])
            .unwrap();

        let updated = store
            .update_file_paths("proj", &[("/proj/old.py".to_string(), "/proj/new.py".to_string())])
            .unwrap();
        assert_eq!(updated, 1);

        let points = store.find_entities_for_file("proj", "/proj/new.py").unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, "p1");
    }

    #[test]
    fn clear_collection_preserves_manual_entries() {
        let dir = tempdir().unwrap();
        let store = LocalVectorStore::new(dir.path());
        store.ensure_collection("proj", 3).unwrap();

        let manual = Point {
            id: "manual-1".to_string(),
            content: "manual note".to_string(),
            vector: vec![0.0, 0.0, 1.0],
            payload: PointPayload::Manual {
                entity_name: "note".to_string(),
                entity_type: EntityType::Generic,
                metadata: serde_json::Map::new(),
            },
        };
        store
            .upsert_points(
                "proj",
                vec![entity_point("p1", "/proj/foo.py", "add", "h1", vec![1.0, 0.0, 0.0]), manual],
            )
            .unwrap();

        let deleted = store.clear_collection("proj", true).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count("proj", &ScrollFilter::default()).unwrap(), 1);
    }
}
