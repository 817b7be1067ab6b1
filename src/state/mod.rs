//! Durable per-collection file-hash ledger (spec §3.4, §4.1, §6.1).
//!
//! The ledger maps a workspace-relative path to `{hash, size, mtime}` plus a
//! handful of reserved `_`-prefixed keys (`_statistics`, `_last_indexed_commit`,
//! `_last_indexed_time`). It is the only durable record of which files the
//! core has successfully committed to the vector store — never a superset
//! (spec §3.4 invariant).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{LEGACY_STATE_HOME_DIR, STATE_DIR_NAME};

const KEY_STATISTICS: &str = "_statistics";
const KEY_LAST_COMMIT: &str = "_last_indexed_commit";
const KEY_LAST_TIME: &str = "_last_indexed_time";

/// One ledger entry (spec §3.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    /// Lowercase hex SHA-256 of the file's bytes.
    pub hash: String,
    pub size: u64,
    /// POSIX seconds, fractional (distinct from the teacher's integer `FileMeta::mtime`).
    pub mtime: f64,
}

impl FileState {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let hash = Self::hash_bytes(&bytes);
        let metadata = fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Ok(Self {
            hash,
            size: bytes.len() as u64,
            mtime,
        })
    }

    pub fn hash_bytes(bytes: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// Reserved `_statistics` shape (spec §6.1, supplemented from `indexer.py`'s
/// accumulator — see DESIGN.md).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default)]
    pub files_processed: usize,
    #[serde(default)]
    pub total_tracked: usize,
    #[serde(default)]
    pub entities_created: usize,
    #[serde(default)]
    pub relations_created: usize,
    #[serde(default)]
    pub implementation_chunks_created: usize,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub timestamp: f64,
}

/// The full ledger for one collection: tracked files plus reserved metadata.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub files: HashMap<String, FileState>,
    pub statistics: Option<Statistics>,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_time: Option<f64>,
}

impl Ledger {
    fn from_json(value: Value) -> Self {
        let mut ledger = Ledger::default();
        let Value::Object(map) = value else {
            return ledger;
        };
        for (key, val) in map {
            match key.as_str() {
                KEY_STATISTICS => {
                    ledger.statistics = serde_json::from_value(val).ok();
                }
                KEY_LAST_COMMIT => {
                    ledger.last_indexed_commit = val.as_str().map(|s| s.to_string());
                }
                KEY_LAST_TIME => {
                    ledger.last_indexed_time = val.as_f64();
                }
                _ if key.starts_with('_') => {
                    // Unknown reserved key from a newer version: ignore rather than
                    // misinterpret as a file path.
                }
                _ => {
                    if let Ok(state) = serde_json::from_value::<FileState>(val) {
                        ledger.files.insert(key, state);
                    }
                }
            }
        }
        ledger
    }

    fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.files.len() + 3);
        for (path, state) in &self.files {
            map.insert(path.clone(), serde_json::to_value(state).unwrap());
        }
        if let Some(stats) = &self.statistics {
            map.insert(KEY_STATISTICS.to_string(), serde_json::to_value(stats).unwrap());
        }
        if let Some(commit) = &self.last_indexed_commit {
            map.insert(KEY_LAST_COMMIT.to_string(), Value::String(commit.clone()));
        }
        if let Some(time) = self.last_indexed_time {
            map.insert(
                KEY_LAST_TIME.to_string(),
                serde_json::Number::from_f64(time)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

/// Options for `StateStore::update` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Replace the whole file map instead of merging into it.
    pub full_rebuild: bool,
}

/// Durable, atomic, per-collection JSON ledger.
pub struct StateStore {
    /// `<project>/.claude-indexer` unless overridden by configuration.
    state_dir: PathBuf,
    project_root: PathBuf,
}

impl StateStore {
    pub fn new(project_root: impl Into<PathBuf>, state_dir_override: Option<PathBuf>) -> Self {
        let project_root = project_root.into();
        let state_dir = state_dir_override.unwrap_or_else(|| project_root.join(STATE_DIR_NAME));
        Self {
            state_dir,
            project_root,
        }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.state_dir.join(format!("{collection}.json"))
    }

    fn legacy_home_path(&self, collection: &str) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        Some(home.join(LEGACY_STATE_HOME_DIR).join(format!("{collection}.json")))
    }

    /// Load a collection's ledger. A missing file yields an empty ledger; a
    /// corrupted JSON file yields an empty ledger plus a logged warning
    /// (spec §4.1, §7 "Corrupted ledger JSON").
    pub fn load(&self, collection: &str) -> Ledger {
        let path = self.collection_path(collection);

        if !path.exists() {
            if let Some(legacy) = self.legacy_home_path(collection) {
                if legacy.exists() {
                    tracing::info!(
                        "migrating legacy state file {} -> {}",
                        legacy.display(),
                        path.display()
                    );
                    if let Err(e) = self.migrate_legacy(&legacy, &path) {
                        tracing::warn!("legacy state migration failed: {e}");
                    }
                }
            }
        }

        if !path.exists() {
            return Ledger::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(value) => Ledger::from_json(value),
                Err(e) => {
                    tracing::warn!(
                        "corrupted ledger at {}: {e}; treating as empty (full re-index will occur)",
                        path.display()
                    );
                    Ledger::default()
                }
            },
            Err(e) => {
                tracing::warn!("failed to read ledger {}: {e}", path.display());
                Ledger::default()
            }
        }
    }

    fn migrate_legacy(&self, legacy: &Path, target: &Path) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(legacy, target)?;
        Ok(())
    }

    /// Atomic save: temp file + rename, never leaving a partial file on disk
    /// (spec §4.1, P2).
    pub fn save(&self, collection: &str, ledger: &Ledger) -> io::Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        let path = self.collection_path(collection);
        let tmp_path = path.with_extension("json.tmp");

        let body = serde_json::to_string_pretty(&ledger.to_json())
            .expect("ledger JSON serialization is infallible");

        let write_result = fs::write(&tmp_path, body).and_then(|_| fs::rename(&tmp_path, &path));

        if write_result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }

        write_result
    }

    /// Merge (or, if `full_rebuild`, replace) the ledger with new file states
    /// and unconditionally remove deleted paths (spec §4.1 `Update`).
    pub fn update(
        &self,
        collection: &str,
        new_files: HashMap<String, FileState>,
        deleted_files: &[String],
        options: &UpdateOptions,
    ) -> io::Result<Ledger> {
        let mut ledger = if options.full_rebuild {
            let previous = self.load(collection);
            Ledger {
                files: HashMap::new(),
                statistics: previous.statistics,
                last_indexed_commit: previous.last_indexed_commit,
                last_indexed_time: previous.last_indexed_time,
            }
        } else {
            self.load(collection)
        };

        for path in deleted_files {
            ledger.files.remove(path);
        }
        for (path, state) in new_files {
            ledger.files.insert(path, state);
        }

        self.save(collection, &ledger)?;
        Ok(ledger)
    }

    pub fn set_last_indexed_commit(&self, collection: &str, sha: &str) -> io::Result<()> {
        let mut ledger = self.load(collection);
        ledger.last_indexed_commit = Some(sha.to_string());
        ledger.last_indexed_time = Some(now_secs());
        self.save(collection, &ledger)
    }

    pub fn set_statistics(&self, collection: &str, statistics: Statistics) -> io::Result<()> {
        let mut ledger = self.load(collection);
        ledger.statistics = Some(statistics);
        self.save(collection, &ledger)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_ledger_loads_empty() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path(), None);
        let ledger = store.load("default");
        assert!(ledger.files.is_empty());
    }

    #[test]
    fn corrupted_ledger_loads_empty_with_warning() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(STATE_DIR_NAME)).unwrap();
        fs::write(
            dir.path().join(STATE_DIR_NAME).join("default.json"),
            "{ not json",
        )
        .unwrap();
        let store = StateStore::new(dir.path(), None);
        let ledger = store.load("default");
        assert!(ledger.files.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path(), None);

        let mut files = HashMap::new();
        files.insert(
            "foo.py".to_string(),
            FileState {
                hash: "a".repeat(64),
                size: 10,
                mtime: 123.456,
            },
        );

        let ledger = store
            .update("default", files, &[], &UpdateOptions::default())
            .unwrap();
        assert_eq!(ledger.files.len(), 1);

        let reloaded = store.load("default");
        assert_eq!(reloaded.files.get("foo.py").unwrap().hash, "a".repeat(64));
    }

    #[test]
    fn update_removes_deleted_and_merges_new() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path(), None);

        let mut first = HashMap::new();
        first.insert(
            "a.py".to_string(),
            FileState {
                hash: "1".repeat(64),
                size: 1,
                mtime: 1.0,
            },
        );
        first.insert(
            "b.py".to_string(),
            FileState {
                hash: "2".repeat(64),
                size: 2,
                mtime: 2.0,
            },
        );
        store
            .update("default", first, &[], &UpdateOptions::default())
            .unwrap();

        let mut second = HashMap::new();
        second.insert(
            "c.py".to_string(),
            FileState {
                hash: "3".repeat(64),
                size: 3,
                mtime: 3.0,
            },
        );
        let ledger = store
            .update(
                "default",
                second,
                &["a.py".to_string()],
                &UpdateOptions::default(),
            )
            .unwrap();

        assert!(!ledger.files.contains_key("a.py"));
        assert!(ledger.files.contains_key("b.py"));
        assert!(ledger.files.contains_key("c.py"));
    }

    #[test]
    fn full_rebuild_replaces_file_map_but_keeps_commit_marker() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path(), None);

        let mut first = HashMap::new();
        first.insert(
            "a.py".to_string(),
            FileState {
                hash: "1".repeat(64),
                size: 1,
                mtime: 1.0,
            },
        );
        store
            .update("default", first, &[], &UpdateOptions::default())
            .unwrap();
        store.set_last_indexed_commit("default", "deadbeef").unwrap();

        let mut second = HashMap::new();
        second.insert(
            "b.py".to_string(),
            FileState {
                hash: "2".repeat(64),
                size: 2,
                mtime: 2.0,
            },
        );
        let ledger = store
            .update(
                "default",
                second,
                &[],
                &UpdateOptions { full_rebuild: true },
            )
            .unwrap();

        assert!(!ledger.files.contains_key("a.py"));
        assert!(ledger.files.contains_key("b.py"));
        assert_eq!(ledger.last_indexed_commit.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn statistics_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path(), None);
        store
            .set_statistics(
                "default",
                Statistics {
                    files_processed: 3,
                    entities_created: 5,
                    ..Default::default()
                },
            )
            .unwrap();

        let ledger = store.load("default");
        let stats = ledger.statistics.unwrap();
        assert_eq!(stats.files_processed, 3);
        assert_eq!(stats.entities_created, 5);
    }

    #[test]
    fn reserved_keys_are_not_treated_as_files() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join(STATE_DIR_NAME);
        fs::create_dir_all(&state_dir).unwrap();
        fs::write(
            state_dir.join("default.json"),
            r#"{"_statistics": {"files_processed": 1}, "_last_indexed_commit": "abc", "foo.py": {"hash": "a", "size": 1, "mtime": 1.0}}"#,
        )
        .unwrap();

        let store = StateStore::new(dir.path(), None);
        let ledger = store.load("default");
        assert_eq!(ledger.files.len(), 1);
        assert!(ledger.files.contains_key("foo.py"));
        assert_eq!(ledger.last_indexed_commit.as_deref(), Some("abc"));
    }
}
