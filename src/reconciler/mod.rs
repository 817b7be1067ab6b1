//! Reconciler (spec §4.3): the core orchestrator wiring `StateStore`,
//! `ChangeDetector`, `ParserRegistry`, `ChunkCoordinator` and
//! `VectorStoreAdapter` into the project/file/incremental indexing entry
//! points. Replaces the teacher's `index::index`/`index::manager` pipeline
//! bodies (kept alongside, unmodified, as the backing implementation for
//! the CLI/MCP/server surfaces the distillation treats as external
//! collaborators — see SPEC_FULL.md §10.5 and DESIGN.md).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::change::ChangeDetector;
use crate::coordinator::ChunkCoordinator;
use crate::embed::{EmbeddingService, ModelType};
use crate::file::{FileWalker, Language};
use crate::parser::{Entity, ParserRegistry, Relation};
use crate::state::{FileState, StateStore, Statistics, UpdateOptions};
use crate::vectordb::{ChunkType, Point, PointPayload, ScrollFilter, VectorStoreAdapter};

/// Which entry point produced a `PipelineResult` (spec §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOperation {
    Full,
    Incremental,
    SingleFile,
    BatchFiles,
}

/// Outcome of one pipeline run (spec §6.4), returned by every entry point.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub operation: PipelineOperation,
    pub files_processed: usize,
    pub files_failed: usize,
    pub entities_created: usize,
    pub relations_created: usize,
    pub implementation_chunks_created: usize,
    pub processing_time: f64,
    pub total_tokens: usize,
    pub total_cost_estimate: f64,
    pub embedding_requests: usize,
    pub processed_files: Vec<String>,
    pub failed_files: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PipelineResult {
    fn empty(operation: PipelineOperation) -> Self {
        Self {
            success: true,
            operation,
            files_processed: 0,
            files_failed: 0,
            entities_created: 0,
            relations_created: 0,
            implementation_chunks_created: 0,
            processing_time: 0.0,
            total_tokens: 0,
            total_cost_estimate: 0.0,
            embedding_requests: 0,
            processed_files: Vec::new(),
            failed_files: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Options accepted by `IndexProject` (spec §4.3.1).
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Reserved per spec.md's `includeTests?`: when `false`, files under a
    /// `test`/`tests`/`__tests__` directory or named `test_*`/`*_test.*`
    /// are skipped. Defaults to including everything.
    pub include_tests: bool,
    pub dry_run: bool,
    /// Forces full re-index even if a ledger already exists.
    pub force_full: bool,
}

/// Per-batch content/endpoint context driving the orphan filter and the
/// store-existence dedup (spec §3.6, §4.3.1 step 8, §4.4).
struct GitMetaContext {
    /// Every entity name known so far this run (store ∪ current batches).
    known_names: HashSet<String>,
    /// Every entity file_path known so far this run, used by
    /// `resolve_module_name`'s path-based rules.
    known_paths: HashSet<String>,
}

impl GitMetaContext {
    fn from_store(store: &dyn VectorStoreAdapter, collection: &str) -> Result<Self> {
        let mut known_names = HashSet::new();
        let mut known_paths = HashSet::new();
        if store.collection_exists(collection)? {
            let filter = ScrollFilter {
                exclude_relations: true,
                ..Default::default()
            };
            for point in store.scroll_all(collection, &filter, true, false)? {
                known_names.insert(point.payload.entity_name().to_string());
                if let Some(path) = point.payload.file_path() {
                    known_paths.insert(path.to_string());
                }
            }
        }
        Ok(Self {
            known_names,
            known_paths,
        })
    }

    fn observe_batch(&mut self, entities: &[Entity]) {
        for entity in entities {
            self.known_names.insert(entity.name.clone());
            if let Some(path) = &entity.file_path {
                self.known_paths.insert(path.clone());
            }
        }
    }

    /// Pre-storage orphan filter (spec §4.4): drop `calls`/`imports`
    /// relations whose target does not resolve against what's known so far.
    fn filter_orphan_relations(&self, relations: Vec<Relation>) -> Vec<Relation> {
        relations
            .into_iter()
            .filter(|r| match r.relation_type.as_str() {
                "calls" => self.known_names.contains(&r.to_entity),
                "imports" => resolve_module_name(&r.to_entity, &self.known_names, &self.known_paths),
                _ => true,
            })
            .collect()
    }
}

/// `resolveModuleName` (spec §4.4): does `target` resolve against the known
/// entity names/paths via exact match, relative import, absolute dotted
/// path, or package-level bare name?
fn resolve_module_name(target: &str, names: &HashSet<String>, paths: &HashSet<String>) -> bool {
    if names.contains(target) {
        return true;
    }

    if let Some(rel) = target.strip_prefix('.') {
        let segments: Vec<&str> = rel.split('.').filter(|s| !s.is_empty()).collect();
        if !segments.is_empty() {
            let suffix_fwd = format!("/{}.py", segments.join("/"));
            let suffix_back = format!("\\{}.py", segments.join("\\"));
            if paths.iter().any(|p| p.ends_with(&suffix_fwd) || p.ends_with(&suffix_back)) {
                return true;
            }
        }
    }

    if target.contains('.') {
        let segments: Vec<&str> = target.split('.').collect();
        if let Some(last) = segments.last() {
            let terminal = format!("{last}.py");
            if paths.iter().any(|p| {
                p.ends_with(&terminal)
                    && segments
                        .iter()
                        .all(|seg| p.contains(&format!("/{seg}")) || p.contains(&format!("\\{seg}")))
            }) {
                return true;
            }
        }
    }

    let as_dir = format!("/{target}/");
    let as_suffix = format!("/{target}");
    paths.iter().any(|p| p.contains(&as_dir) || p.ends_with(&as_suffix))
}

/// Post-storage orphan-relation cleanup (spec §4.4): scroll every relation
/// chunk and delete the ones whose endpoints no longer resolve.
fn cleanup_orphan_relations(store: &dyn VectorStoreAdapter, collection: &str) -> Result<usize> {
    let entity_filter = ScrollFilter {
        exclude_relations: true,
        ..Default::default()
    };
    let entities = store.scroll_all(collection, &entity_filter, true, false)?;
    let names: HashSet<String> = entities.iter().map(|p| p.payload.entity_name().to_string()).collect();
    let paths: HashSet<String> = entities
        .iter()
        .filter_map(|p| p.payload.file_path().map(|s| s.to_string()))
        .collect();

    let relation_filter = ScrollFilter {
        chunk_type: Some(ChunkType::Relation),
        ..Default::default()
    };
    let relations = store.scroll_all(collection, &relation_filter, true, false)?;

    let mut to_delete = Vec::new();
    for point in relations {
        let PointPayload::Relation {
            entity_name,
            relation_target,
            relation_type,
            ..
        } = &point.payload
        else {
            continue;
        };
        let from_ok = names.contains(entity_name);
        let to_ok = match relation_type.as_str() {
            "calls" => names.contains(relation_target),
            "imports" => resolve_module_name(relation_target, &names, &paths),
            _ => true,
        };
        if !from_ok || !to_ok {
            to_delete.push(point.id);
        }
    }

    if to_delete.is_empty() {
        return Ok(0);
    }
    Ok(store.delete_points(collection, &to_delete)?)
}

/// Best-effort resident-memory read (Linux `/proc/self/status`); `None`
/// elsewhere or if the read fails (spec §5 "memory discipline" is
/// advisory, never load-bearing).
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// Adaptive batch-size state machine (spec §4.3.1 step 3).
struct BatchSizer {
    current: usize,
    max: usize,
    min: usize,
    consecutive_successes: usize,
}

impl BatchSizer {
    fn new() -> Self {
        Self {
            current: crate::constants::DEFAULT_INITIAL_BATCH_SIZE,
            max: crate::constants::DEFAULT_MAX_BATCH_SIZE,
            min: crate::constants::MIN_BATCH_SIZE,
            consecutive_successes: 0,
        }
    }

    fn size(&self) -> usize {
        self.current
    }

    fn record_batch(&mut self, fully_successful: bool) {
        if !fully_successful {
            self.consecutive_successes = 0;
            return;
        }
        self.consecutive_successes += 1;
        if self.consecutive_successes >= 2 {
            self.current = (self.current * 2).min(self.max);
            self.consecutive_successes = 0;
        }
        if let Some(rss) = resident_memory_bytes() {
            if rss > crate::constants::DEFAULT_MEMORY_SOFT_CAP_BYTES {
                self.current = (self.current / 2).max(self.min);
                debug!("memory high-water ({rss} bytes): halving batch size to {}", self.current);
            }
        }
    }
}

/// Signature-hash side table (spec §4.11): `content_hash -> {entity_name,
/// entity_type, file_path}`, written best-effort next to the ledger.
#[derive(Debug, Clone, Serialize, Default)]
struct SignatureEntry {
    entity_name: String,
    entity_type: String,
    file_path: String,
}

fn write_signature_table(state_dir: &Path, collection: &str, entities: &[Entity]) {
    let path = state_dir.join(format!("{collection}{}", crate::constants::SIGNATURE_TABLE_SUFFIX));
    let mut table: HashMap<String, SignatureEntry> = std::fs::read_to_string(&path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    for entity in entities {
        let Some(file_path) = &entity.file_path else {
            continue;
        };
        table.insert(
            entity.content_hash.clone(),
            SignatureEntry {
                entity_name: entity.name.clone(),
                entity_type: entity.entity_type.as_str().to_string(),
                file_path: file_path.clone(),
            },
        );
    }

    if let Err(e) = std::fs::create_dir_all(state_dir) {
        warn!("signature table: could not create state dir: {e}");
        return;
    }
    match serde_json::to_string(&table) {
        Ok(body) => {
            if let Err(e) = std::fs::write(&path, body) {
                warn!("signature table write failed (non-fatal): {e}");
            }
        }
        Err(e) => warn!("signature table serialization failed (non-fatal): {e}"),
    }
}

fn is_test_path(path: &Path) -> bool {
    let components_match = path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("test") | Some("tests") | Some("__tests__")
        )
    });
    let name_match = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.starts_with("test_") || s.ends_with("_test"))
        .unwrap_or(false);
    components_match || name_match
}

/// One file's outcome, threaded through the batch loop.
struct FileParseOutcome {
    rel_path: String,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    state: FileState,
}

/// Drives one pipeline run against a single collection (spec §4.3).
pub struct Reconciler {
    project_root: PathBuf,
    state_store: StateStore,
    change_detector: ChangeDetector,
    parser_registry: ParserRegistry,
    coordinator: ChunkCoordinator,
    store: Arc<dyn VectorStoreAdapter>,
    embedder: EmbeddingService,
}

impl Reconciler {
    pub fn new(project_root: impl Into<PathBuf>, store: Arc<dyn VectorStoreAdapter>) -> Result<Self> {
        Self::with_model(project_root, store, ModelType::default())
    }

    pub fn with_model(
        project_root: impl Into<PathBuf>,
        store: Arc<dyn VectorStoreAdapter>,
        model_type: ModelType,
    ) -> Result<Self> {
        let project_root = project_root.into();
        let cache_dir = crate::coordinator::default_cache_dir(&project_root);
        let embedder = EmbeddingService::with_cache_dir(model_type, None)?;
        Ok(Self {
            state_store: StateStore::new(&project_root, None),
            change_detector: ChangeDetector::new(&project_root),
            parser_registry: ParserRegistry::new(),
            coordinator: ChunkCoordinator::with_cache_dir(cache_dir)?,
            store,
            embedder,
            project_root,
        })
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(crate::constants::STATE_DIR_NAME)
    }

    /// `IndexProject(collection, includeTests?)` (spec §4.3.1): full mode if
    /// no ledger exists yet, incremental (hash-diff) otherwise.
    pub fn index_project(&mut self, collection: &str, options: &IndexOptions) -> Result<PipelineResult> {
        let ledger = self.state_store.load(collection);
        let is_full = options.force_full || ledger.files.is_empty();

        let (files, deleted): (Vec<PathBuf>, Vec<String>) = if is_full {
            let walker = FileWalker::new(&self.project_root);
            let (infos, _stats) = walker.walk()?;
            (infos.into_iter().map(|f| f.path).collect(), Vec::new())
        } else {
            let walker = FileWalker::new(&self.project_root);
            let (infos, _stats) = walker.walk()?;
            let candidates: Vec<PathBuf> = infos.into_iter().map(|f| f.path).collect();
            let changeset = self.change_detector.detect_via_hash(&candidates, &ledger.files);
            (changeset.files_to_index(), changeset.deleted_files)
        };

        let files: Vec<PathBuf> = if options.include_tests {
            files
        } else {
            files.into_iter().filter(|p| !is_test_path(p)).collect()
        };

        let operation = if is_full {
            PipelineOperation::Full
        } else {
            PipelineOperation::Incremental
        };

        self.run_pipeline(collection, operation, files, &deleted, options.dry_run)
    }

    /// `IndexFiles(paths, collection)` (spec §4.3.3): caller-supplied file
    /// list, same batch machinery as `IndexProject`.
    pub fn index_files(&mut self, paths: &[PathBuf], collection: &str, dry_run: bool) -> Result<PipelineResult> {
        let files: Vec<PathBuf> = paths.iter().map(|p| self.to_absolute(p)).collect();
        self.run_pipeline(collection, PipelineOperation::BatchFiles, files, &[], dry_run)
    }

    /// `IndexSingleFile(path, collection)` (spec §4.3.2): parses, checks
    /// whether every entity is already content-identical in the store, and
    /// short-circuits if so.
    pub fn index_single_file(&mut self, path: &Path, collection: &str, dry_run: bool) -> Result<PipelineResult> {
        let abs = self.to_absolute(path);
        self.run_pipeline(collection, PipelineOperation::SingleFile, vec![abs], &[], dry_run)
    }

    /// `IndexIncremental(collection, sinceCommit?)` (spec §4.3.4): git-aware
    /// when possible, falling back to hash diff. Order: renames, then
    /// deletions, then adds/modifies, then the ledger/commit marker.
    pub fn index_incremental(
        &mut self,
        collection: &str,
        since_commit: Option<&str>,
        dry_run: bool,
    ) -> Result<PipelineResult> {
        let ledger = self.state_store.load(collection);

        let changeset = if self.change_detector.is_git_repo() {
            match since_commit.or(ledger.last_indexed_commit.as_deref()) {
                Some(sha) => self.change_detector.detect_changes(sha)?,
                None => {
                    let walker = FileWalker::new(&self.project_root);
                    let (infos, _) = walker.walk()?;
                    let candidates: Vec<PathBuf> = infos.into_iter().map(|f| f.path).collect();
                    self.change_detector.detect_via_hash(&candidates, &ledger.files)
                }
            }
        } else {
            let walker = FileWalker::new(&self.project_root);
            let (infos, _) = walker.walk()?;
            let candidates: Vec<PathBuf> = infos.into_iter().map(|f| f.path).collect();
            self.change_detector.detect_via_hash(&candidates, &ledger.files)
        };

        if !changeset.renamed_files.is_empty() {
            let renames: Vec<(String, String)> = changeset
                .renamed_files
                .iter()
                .map(|(old, new)| {
                    (
                        self.project_root.join(old).to_string_lossy().to_string(),
                        self.project_root.join(new).to_string_lossy().to_string(),
                    )
                })
                .collect();
            if !dry_run {
                let updated = self.store.update_file_paths(collection, &renames)?;
                debug!("rename handling updated {updated} points across {} renames", renames.len());
            }
        }

        if !changeset.deleted_files.is_empty() && !dry_run {
            self.delete_files(collection, &changeset.deleted_files)?;
        }

        let files = changeset.files_to_index();
        let mut result = self.run_pipeline(
            collection,
            PipelineOperation::Incremental,
            files,
            &changeset.deleted_files,
            dry_run,
        )?;

        if result.success && !dry_run {
            if let Some(commit) = &changeset.base_commit {
                if let Err(e) = self.state_store.set_last_indexed_commit(collection, commit) {
                    result.warnings.push(format!("failed to persist commit marker: {e}"));
                }
            }
        }

        Ok(result)
    }

    /// `ClearCollection(collection, preserve_manual)` (spec §6.4, §4.8).
    pub fn clear_collection(&self, collection: &str, preserve_manual: bool) -> Result<usize> {
        self.store.clear_collection(collection, preserve_manual)
    }

    /// `SearchSimilar(collection, query_vector, limit)` — a pure proxy to
    /// the adapter's ANN search; no ranking/reranking happens here (spec §1
    /// non-goal).
    pub fn search_similar(&self, collection: &str, query: &[f32], limit: usize) -> Result<Vec<(Point, f32)>> {
        self.store.search_similar(collection, query, limit)
    }

    fn to_absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    fn relative_str(&self, abs: &Path) -> String {
        abs.strip_prefix(&self.project_root)
            .unwrap_or(abs)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// `DeleteFile` (spec §4.3.6/§4.7): caller-supplied absolute paths, as
    /// produced by the watcher's coalescer for confirmed deletions.
    pub fn delete_paths(&self, collection: &str, paths: &[PathBuf]) -> Result<usize> {
        let relative: Vec<String> = paths.iter().map(|p| self.relative_str(p)).collect();
        self.delete_files(collection, &relative)
    }

    /// `DeleteFile` (spec §4.3.6): resolve each relative path, find its
    /// points by exact `file_path` match, delete by id, then run
    /// post-storage orphan cleanup.
    fn delete_files(&self, collection: &str, relative_paths: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for rel in relative_paths {
            let abs = self.project_root.join(rel).to_string_lossy().to_string();
            let points = self.store.find_entities_for_file(collection, &abs)?;
            if points.is_empty() {
                continue;
            }
            let ids: Vec<String> = points.into_iter().map(|p| p.id).collect();
            deleted += self.store.delete_points(collection, &ids)?;
        }
        if deleted > 0 {
            let cleaned = cleanup_orphan_relations(self.store.as_ref(), collection)?;
            debug!("post-deletion orphan cleanup removed {cleaned} relation chunks");
        }
        Ok(deleted)
    }

    /// The shared batch loop behind `IndexProject`/`IndexFiles`/
    /// `IndexSingleFile`/`IndexIncremental`'s add/modify side (spec
    /// §4.3.1 steps 2-12).
    fn run_pipeline(
        &mut self,
        collection: &str,
        operation: PipelineOperation,
        files: Vec<PathBuf>,
        deleted_files: &[String],
        dry_run: bool,
    ) -> Result<PipelineResult> {
        let start = Instant::now();
        let mut result = PipelineResult::empty(operation);

        if !deleted_files.is_empty() && !dry_run && !matches!(operation, PipelineOperation::Incremental) {
            // IndexIncremental already ran deletions before calling in; other
            // entry points (e.g. a full re-walk noticing removed files) run
            // them here.
            match self.delete_files(collection, deleted_files) {
                Ok(n) => debug!("deleted {n} points for {} removed files", deleted_files.len()),
                Err(e) => result.warnings.push(format!("deletion step failed: {e}")),
            }
        }

        if files.is_empty() {
            result.processing_time = start.elapsed().as_secs_f64();
            return Ok(result);
        }

        if !dry_run && self.embedder.dimensions() > 0 && !self.store.collection_exists(collection)? {
            // Step 1: pre-create with known dimension; skip is impossible
            // here since fastembed always knows its own output size.
            self.store.ensure_collection(collection, self.embedder.dimensions())?;
        }

        let mut meta = GitMetaContext::from_store(self.store.as_ref(), collection)?;
        let mut sizer = BatchSizer::new();
        let mut pre_captured_state: HashMap<String, FileState> = HashMap::new();
        let mut all_new_entities: Vec<Entity> = Vec::new();

        let mut remaining = files;
        while !remaining.is_empty() {
            if crate::constants::is_shutdown_requested() {
                result.warnings.push("shutdown requested; stopping before next batch".to_string());
                break;
            }

            let batch_size = sizer.size();
            let batch: Vec<PathBuf> = remaining.drain(..batch_size.min(remaining.len())).collect();

            let outcomes = self.parse_batch(&batch, &mut result);
            let batch_fully_successful = outcomes.len() == batch.len();
            sizer.record_batch(batch_fully_successful);

            if outcomes.is_empty() {
                continue;
            }

            let mut batch_entities: Vec<Entity> = Vec::new();
            let mut batch_relations: Vec<Relation> = Vec::new();
            for outcome in &outcomes {
                batch_entities.extend(outcome.entities.iter().cloned());
                batch_relations.extend(outcome.relations.iter().cloned());
            }

            meta.observe_batch(&batch_entities);
            let filtered_relations = meta.filter_orphan_relations(batch_relations);

            // Git+Meta dedup (spec §4.3.1 step 8, §4.5): entities whose
            // content already exists in the store are skipped for
            // embedding but still counted as processed.
            let mut to_embed = Vec::with_capacity(batch_entities.len());
            for entity in batch_entities {
                let already_stored = !dry_run
                    && self
                        .store
                        .check_content_exists(collection, &entity.content_hash)
                        .unwrap_or(false);
                if already_stored {
                    result.entities_created += 1;
                } else {
                    to_embed.push(entity);
                }
            }

            if !dry_run && (!to_embed.is_empty() || !filtered_relations.is_empty()) {
                let (points, stats) = self.coordinator.coordinate(&mut self.embedder, &to_embed, &filtered_relations)?;
                match self.store.upsert_points(collection, points) {
                    Ok(_) => {
                        result.total_tokens += stats.total_tokens;
                        result.embedding_requests += stats.embedding_requests;
                    }
                    Err(e) => {
                        // Store failures are fatal for the batch (spec §4.3.7):
                        // no ledger update, so the next run re-detects these
                        // files as changed.
                        result.success = false;
                        result.errors.push(format!("store upsert failed: {e}"));
                        result.processing_time = start.elapsed().as_secs_f64();
                        return Ok(result);
                    }
                }
            }

            result.entities_created += to_embed.len();
            result.relations_created += filtered_relations.len();
            result.implementation_chunks_created += to_embed
                .iter()
                .filter(|e| e.entity_type.eligible_for_implementation_chunk())
                .count();

            for outcome in outcomes {
                result.processed_files.push(outcome.rel_path.clone());
                pre_captured_state.insert(outcome.rel_path, outcome.state);
            }
            all_new_entities.extend(to_embed);
        }

        result.files_processed = result.processed_files.len();
        result.files_failed = result.failed_files.len();

        if !dry_run && result.success {
            let update_options = UpdateOptions {
                full_rebuild: matches!(operation, PipelineOperation::Full),
            };
            if let Err(e) = self
                .state_store
                .update(collection, pre_captured_state, deleted_files, &update_options)
            {
                result.warnings.push(format!("ledger update failed: {e}"));
            }

            if let Err(e) = cleanup_orphan_relations(self.store.as_ref(), collection) {
                result.warnings.push(format!("orphan cleanup failed: {e}"));
            }

            write_signature_table(&self.state_dir(), collection, &all_new_entities);

            let stats = Statistics {
                files_processed: result.files_processed,
                total_tracked: self.state_store.load(collection).files.len(),
                entities_created: result.entities_created,
                relations_created: result.relations_created,
                implementation_chunks_created: result.implementation_chunks_created,
                processing_time: start.elapsed().as_secs_f64(),
                timestamp: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64(),
            };
            if let Err(e) = self.state_store.set_statistics(collection, stats) {
                result.warnings.push(format!("statistics persist failed: {e}"));
            }
        }

        result.processing_time = start.elapsed().as_secs_f64();
        info!(
            "{:?} pipeline: {} processed, {} failed, {} entities, {} relations ({:.2}s)",
            operation,
            result.files_processed,
            result.files_failed,
            result.entities_created,
            result.relations_created,
            result.processing_time
        );
        Ok(result)
    }

    /// Parses each file in `batch`, recording per-file errors without
    /// aborting the batch (spec §4.3.7).
    fn parse_batch(&mut self, batch: &[PathBuf], result: &mut PipelineResult) -> Vec<FileParseOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for path in batch {
            match self.parse_one_file(path) {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => {
                    result.files_failed += 1;
                    result.failed_files.push(self.relative_str(path));
                    result.errors.push(format!("{}: {e}", path.display()));
                }
            }
        }
        outcomes
    }

    fn parse_one_file(&mut self, path: &Path) -> Result<Option<FileParseOutcome>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                anyhow::bail!("read failed: {e}");
            }
        };
        let state = FileState::from_path(path)?;
        let language = Language::from_path(path);
        let parse_result = self.parser_registry.parse_file(path, &content, language);

        Ok(Some(FileParseOutcome {
            rel_path: self.relative_str(path),
            entities: parse_result.entities,
            relations: parse_result.relations,
            state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectordb::adapter::LocalVectorStore;
    use std::fs;
    use tempfile::tempdir;

    fn new_reconciler(dir: &Path) -> Reconciler {
        let store = Arc::new(LocalVectorStore::new(dir.join(".codesearch.db/collections")));
        Reconciler::with_model(dir, store, ModelType::default()).unwrap()
    }

    // These tests avoid real embedding (no model download in CI): they
    // exercise the pieces of the pipeline that don't require it.

    #[test]
    fn resolve_module_name_handles_all_four_rules() {
        let mut names = HashSet::new();
        names.insert("helper".to_string());
        let mut paths = HashSet::new();
        paths.insert("/proj/foo/bar.py".to_string());
        paths.insert("/proj/pkg/mod.py".to_string());

        assert!(resolve_module_name("helper", &names, &paths)); // exact
        assert!(resolve_module_name(".foo.bar", &names, &paths)); // relative
        assert!(resolve_module_name("x.foo.bar", &names, &paths)); // absolute dotted
        assert!(resolve_module_name("pkg", &names, &paths)); // package bare name
        assert!(!resolve_module_name("nonexistent", &names, &paths));
    }

    #[test]
    fn batch_sizer_doubles_every_two_successes_and_caps_at_max() {
        let mut sizer = BatchSizer::new();
        assert_eq!(sizer.size(), 25);
        sizer.record_batch(true);
        assert_eq!(sizer.size(), 25);
        sizer.record_batch(true);
        assert_eq!(sizer.size(), 50);
        sizer.record_batch(true);
        sizer.record_batch(true);
        assert_eq!(sizer.size(), 100);
        sizer.record_batch(true);
        sizer.record_batch(true);
        assert_eq!(sizer.size(), 100); // capped
    }

    #[test]
    fn batch_sizer_resets_streak_on_failure() {
        let mut sizer = BatchSizer::new();
        sizer.record_batch(true);
        sizer.record_batch(false);
        sizer.record_batch(true);
        assert_eq!(sizer.size(), 25);
    }

    #[test]
    fn clear_collection_delegates_to_store() {
        let dir = tempdir().unwrap();
        let reconciler = new_reconciler(dir.path());
        let deleted = reconciler.clear_collection("default", true).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn is_test_path_matches_directory_and_filename_conventions() {
        assert!(is_test_path(Path::new("src/tests/foo.py")));
        assert!(is_test_path(Path::new("src/test_foo.py")));
        assert!(is_test_path(Path::new("src/foo_test.go")));
        assert!(!is_test_path(Path::new("src/foo.py")));
    }

    #[test]
    fn delete_files_is_a_noop_on_empty_collection() {
        let dir = tempdir().unwrap();
        let reconciler = new_reconciler(dir.path());
        let deleted = reconciler.delete_files("default", &["gone.py".to_string()]).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn index_project_with_no_files_returns_empty_success() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap(); // avoid walking itself oddly
        let mut reconciler = new_reconciler(dir.path());
        let result = reconciler
            .index_project("default", &IndexOptions::default())
            .unwrap();
        assert!(result.success);
        assert_eq!(result.files_processed, 0);
    }

    #[test]
    fn dry_run_index_files_does_not_touch_the_ledger() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let mut reconciler = new_reconciler(dir.path());
        let result = reconciler
            .index_files(&[PathBuf::from("a.py")], "default", true)
            .unwrap();
        assert!(result.success);
        let ledger = reconciler.state_store.load("default");
        assert!(ledger.files.is_empty());
    }
}
