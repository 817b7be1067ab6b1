use anyhow::{anyhow, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::cache::normalize_path;
use crate::reconciler::Reconciler;

/// Normalize a path from notify events to a consistent format.
/// Strips UNC prefix (`\\?\`) and converts backslashes to forward slashes
/// so paths match the format used by FileMetaStore and VectorStore.
fn normalize_event_path(path: &Path) -> PathBuf {
    PathBuf::from(normalize_path(path))
}

/// File extensions that should trigger re-indexing (whitelist approach)
/// This includes code files and configuration files
const INDEXABLE_EXTENSIONS: &[&str] = &[
    // Rust
    "rs",
    // JavaScript/TypeScript
    "js",
    "mjs",
    "cjs",
    "jsx",
    "ts",
    "mts",
    "cts",
    "tsx",
    // Python
    "py",
    "pyw",
    "pyi",
    // C/C++
    "c",
    "h",
    "cpp",
    "cc",
    "cxx",
    "hpp",
    "hxx",
    // C#
    "cs",
    "csx",
    // Java/Kotlin
    "java",
    "kt",
    "kts",
    // Go
    "go",
    // Ruby
    "rb",
    "rake",
    // PHP
    "php",
    // Swift
    "swift",
    // Shell/Scripts
    "sh",
    "bash",
    "zsh",
    "fish",
    "ps1",
    "psm1",
    "psd1",
    // Web
    "html",
    "htm",
    "css",
    "scss",
    "sass",
    "less",
    "vue",
    "svelte",
    // Config/Data
    "json",
    "jsonc",
    "json5",
    "yaml",
    "yml",
    "toml",
    "xml",
    "ini",
    "conf",
    "config",
    // .NET
    "csproj",
    "sln",
    "props",
    "targets",
    "razor",
    "cshtml",
    // SQL
    "sql",
    // Markdown/Docs
    "md",
    "markdown",
    "rst",
    // Other
    "graphql",
    "gql",
    "proto",
    "dockerfile",
];

/// Directories that should always be ignored
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".codesearch.db",
    "node_modules",
    "target",
    ".venv",
    "venv",
    "__pycache__",
    ".cache",
    "dist",
    "build",
    "out",
    "bin",
    "obj",
    ".vs",
    ".idea",
    ".vscode",
    "packages",
    ".nuget",
];

/// Types of file system events we care about
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)] // Renamed variant reserved for future rename detection
pub enum FileEvent {
    /// File was created or modified
    Modified(PathBuf),
    /// File was deleted
    Deleted(PathBuf),
    /// File was renamed (from, to)
    Renamed(PathBuf, PathBuf),
}

/// File watcher for incremental indexing
///
/// Uses notify-debouncer-full for efficient debounced file watching.
/// Improvements over osgrep:
/// 1. Native Rust implementation (faster than Node.js chokidar)
/// 2. Built-in debouncing (configurable)
/// 3. Batched events for efficient processing
pub struct FileWatcher {
    root: PathBuf,
    debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    receiver: Option<Receiver<DebounceEventResult>>,
}

impl FileWatcher {
    /// Create a new file watcher for the given root directory
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            debouncer: None,
            receiver: None,
        }
    }

    /// Start watching for file changes
    pub fn start(&mut self, debounce_ms: u64) -> Result<()> {
        let (tx, rx) = channel();

        let debouncer = new_debouncer(
            Duration::from_millis(debounce_ms),
            None, // No tick rate
            tx,
        )
        .map_err(|e| anyhow!("Failed to create file watcher: {}", e))?;

        self.receiver = Some(rx);
        self.debouncer = Some(debouncer);

        // Start watching the root directory
        if let Some(ref mut debouncer) = self.debouncer {
            debouncer
                .watcher()
                .watch(&self.root, RecursiveMode::Recursive)
                .map_err(|e| anyhow!("Failed to watch directory: {}", e))?;

            // Also watch with the cache (for file ID tracking)
            debouncer
                .cache()
                .add_root(&self.root, RecursiveMode::Recursive);
        }

        Ok(())
    }

    /// Check if the watcher is currently started (collecting events)
    pub fn is_started(&self) -> bool {
        self.debouncer.is_some()
    }

    /// Stop watching
    pub fn stop(&mut self) {
        if let Some(ref mut debouncer) = self.debouncer {
            let _ = debouncer.watcher().unwatch(&self.root);
        }
        self.debouncer = None;
        self.receiver = None;
    }

    /// Check if a path is in an ignored directory (.git, node_modules, etc.)
    fn is_in_ignored_dir(&self, path: &Path) -> bool {
        for component in path.components() {
            if let Some(name) = component.as_os_str().to_str() {
                if IGNORED_DIRS.contains(&name) {
                    return true;
                }
            }
        }
        false
    }

    /// Check if a path should be watched (whitelist approach)
    /// Only returns true for indexable code/config files
    fn is_watchable(&self, path: &Path) -> bool {
        // Check if path is in an ignored directory
        if self.is_in_ignored_dir(path) {
            return false;
        }

        // Must be a file with an indexable extension
        if let Some(ext) = path.extension() {
            if let Some(ext_str) = ext.to_str() {
                return INDEXABLE_EXTENSIONS.contains(&ext_str.to_lowercase().as_str());
            }
        }

        // Special case: Dockerfile (no extension)
        if let Some(name) = path.file_name() {
            let name_str = name.to_string_lossy().to_lowercase();
            if name_str == "dockerfile" || name_str == "makefile" || name_str == "cmakelists.txt" {
                return true;
            }
        }

        false
    }

    /// Poll for file events (non-blocking)
    /// Returns a batch of deduplicated events
    pub fn poll_events(&self) -> Vec<FileEvent> {
        let Some(ref receiver) = self.receiver else {
            return vec![];
        };

        let mut events = Vec::new();
        let mut seen_paths = HashSet::new();

        // Drain all available events
        while let Ok(result) = receiver.try_recv() {
            match result {
                Ok(debounced_events) => {
                    for event in debounced_events {
                        for raw_path in &event.paths {
                            // Normalize path: strip UNC prefix, convert backslashes
                            let path = normalize_event_path(raw_path);

                            // Skip ignored directories
                            if self.is_in_ignored_dir(&path) || seen_paths.contains(&path) {
                                continue;
                            }
                            seen_paths.insert(path.clone());

                            // Convert to our event type
                            use notify::EventKind;
                            match event.kind {
                                EventKind::Create(_) | EventKind::Modify(_) => {
                                    // For creates/modifies, only process indexable files
                                    if self.is_watchable(&path) && raw_path.exists() {
                                        events.push(FileEvent::Modified(path));
                                    }
                                }
                                EventKind::Remove(_) => {
                                    // For removals, don't filter by extension - directory
                                    // deletions on Windows may only report the directory
                                    // path (no file extension), not individual files
                                    events.push(FileEvent::Deleted(path));
                                }
                                _ => {}
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!("File watch error: {:?}", error);
                    }
                }
            }
        }

        events
    }

    /// Block and wait for events (with timeout)
    pub fn wait_for_events(&self, timeout: Duration) -> Vec<FileEvent> {
        let Some(ref receiver) = self.receiver else {
            return vec![];
        };

        let mut events = Vec::new();
        let mut seen_paths = HashSet::new();

        // Wait for first event
        match receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.process_debounce_result(result, &mut events, &mut seen_paths);
            }
            Err(_) => return events, // Timeout or disconnected
        }

        // Drain any additional events that came in
        while let Ok(result) = receiver.try_recv() {
            self.process_debounce_result(result, &mut events, &mut seen_paths);
        }

        events
    }

    fn process_debounce_result(
        &self,
        result: DebounceEventResult,
        events: &mut Vec<FileEvent>,
        seen_paths: &mut HashSet<PathBuf>,
    ) {
        match result {
            Ok(debounced_events) => {
                for event in debounced_events {
                    for raw_path in &event.paths {
                        // Normalize path: strip UNC prefix, convert backslashes
                        let path = normalize_event_path(raw_path);

                        // Skip ignored directories and duplicates
                        if self.is_in_ignored_dir(&path) || seen_paths.contains(&path) {
                            continue;
                        }
                        seen_paths.insert(path.clone());

                        use notify::EventKind;
                        match event.kind {
                            EventKind::Create(_) | EventKind::Modify(_) => {
                                // For creates/modifies, only process indexable files
                                if self.is_watchable(&path) && raw_path.exists() {
                                    events.push(FileEvent::Modified(path));
                                }
                            }
                            EventKind::Remove(_) => {
                                // For removals, don't filter by extension - directory
                                // deletions on Windows may only report the directory
                                // path (no file extension), not individual files
                                events.push(FileEvent::Deleted(path));
                            }
                            _ => {}
                        }
                    }
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!("File watch error: {:?}", error);
                }
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Rejects paths the watcher should never consider at all: the ledger
/// directory itself and anything `FileWalker` would always exclude. Cheaper
/// than the full `is_indexable_path` check because it doesn't touch the
/// filesystem, so it's safe to run on paths that may no longer exist.
fn is_path_considered(path: &Path) -> bool {
    for component in path.components() {
        let Some(name) = component.as_os_str().to_str() else {
            continue;
        };
        if name == crate::constants::STATE_DIR_NAME || crate::constants::ALWAYS_EXCLUDED.contains(&name) {
            return false;
        }
    }
    true
}

/// What the coalescer last heard about a pending path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    /// Last raw event implied the path exists (create/modify/rename-to).
    Upsert,
    /// Last raw event implied the path is gone. `second_chance` marks
    /// whether it has already been given one extra debounce interval to
    /// reappear (atomic-save races delete-then-recreate under the hood).
    Remove { second_chance: bool },
}

struct PendingEntry {
    kind: PendingKind,
    last_seen: Instant,
}

/// Debounced coalescer wired directly to the reconciler (spec §4.7).
///
/// Generalizes `FileWatcher`'s raw-event plumbing: instead of delegating
/// debouncing to `notify-debouncer-full`, it keeps its own `pending` map and
/// classifies each drained batch against the filesystem, including the
/// second-chance recheck for paths that look deleted and the periodic trim
/// of long-idle entries (§4.7 steps 3-6).
pub struct Watcher {
    debounce: Duration,
    _notify_watcher: RecommendedWatcher,
    raw_rx: Receiver<notify::Result<Event>>,
    pending: HashMap<PathBuf, PendingEntry>,
}

impl Watcher {
    /// `debounce_seconds <= 0.0` falls back to the spec default (2.0s).
    pub fn new(root: &Path, debounce_seconds: f64) -> Result<Self> {
        let (tx, rx) = channel();
        let mut notify_watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| anyhow!("failed to create watcher: {e}"))?;
        notify_watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| anyhow!("failed to watch {}: {e}", root.display()))?;

        let debounce_seconds = if debounce_seconds > 0.0 {
            debounce_seconds
        } else {
            crate::constants::DEFAULT_DEBOUNCE_SECONDS
        };

        Ok(Self {
            debounce: Duration::from_secs_f64(debounce_seconds),
            _notify_watcher: notify_watcher,
            raw_rx: rx,
            pending: HashMap::new(),
        })
    }

    /// Runs the coalesce/dispatch loop in the foreground until `cancel`
    /// fires. The background tick the spec describes is folded into this
    /// single loop's sleep interval, since `Watcher::run` already only ever
    /// executes on its own thread.
    pub fn run(mut self, reconciler: &Mutex<Reconciler>, collection: &str, cancel: &CancellationToken) -> Result<()> {
        let tick_interval = (self.debounce / 10).max(Duration::from_millis(100));
        let mut last_trim = Instant::now();

        loop {
            if cancel.is_cancelled() {
                self.dispatch_ready(reconciler, collection, true)?;
                return Ok(());
            }

            self.drain_raw_events();
            self.dispatch_ready(reconciler, collection, false)?;

            if last_trim.elapsed() >= Duration::from_secs(60) {
                self.trim_stale();
                last_trim = Instant::now();
            }

            std::thread::sleep(tick_interval);
        }
    }

    /// Step 2-3: filter and fold raw notify events into `pending`.
    fn drain_raw_events(&mut self) {
        while let Ok(result) = self.raw_rx.try_recv() {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("watcher error: {e}");
                    continue;
                }
            };

            use notify::EventKind;
            let now = Instant::now();
            for raw_path in &event.paths {
                let path = normalize_event_path(raw_path);
                if !is_path_considered(&path) {
                    continue;
                }

                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => {
                        self.pending.insert(path, PendingEntry { kind: PendingKind::Upsert, last_seen: now });
                    }
                    EventKind::Remove(_) => {
                        self.pending.insert(
                            path,
                            PendingEntry { kind: PendingKind::Remove { second_chance: false }, last_seen: now },
                        );
                    }
                    _ => {}
                }
            }
        }
    }

    /// Step 4-5: drain entries whose debounce window elapsed (or all of
    /// them, if `force` — the cooperative-shutdown final flush) and dispatch
    /// `IndexFiles`/`DeleteFile` against the reconciler.
    fn dispatch_ready(&mut self, reconciler: &Mutex<Reconciler>, collection: &str, force: bool) -> Result<()> {
        let mut ready_upserts = Vec::new();
        let mut ready_deletes = Vec::new();
        let mut still_pending = HashMap::new();

        for (path, entry) in self.pending.drain() {
            let age = entry.last_seen.elapsed();
            if !force && age < self.debounce {
                still_pending.insert(path, entry);
                continue;
            }

            match entry.kind {
                PendingKind::Upsert => {
                    if !force && !path.exists() {
                        // Vanished again before we got to it; treat like a
                        // fresh removal rather than dropping it silently.
                        still_pending.insert(
                            path,
                            PendingEntry { kind: PendingKind::Remove { second_chance: false }, last_seen: Instant::now() },
                        );
                    } else if path.exists() && crate::file::is_indexable_path(&path) {
                        ready_upserts.push(path);
                    }
                }
                PendingKind::Remove { second_chance } => {
                    if path.exists() {
                        // Atomic-save race: the file came back.
                        if crate::file::is_indexable_path(&path) {
                            ready_upserts.push(path);
                        }
                    } else if second_chance || force {
                        ready_deletes.push(path);
                    } else {
                        still_pending.insert(
                            path,
                            PendingEntry { kind: PendingKind::Remove { second_chance: true }, last_seen: Instant::now() },
                        );
                    }
                }
            }
        }

        self.pending = still_pending;

        if ready_upserts.is_empty() && ready_deletes.is_empty() {
            return Ok(());
        }

        let mut reconciler = reconciler.lock().map_err(|_| anyhow!("reconciler lock poisoned"))?;
        if !ready_deletes.is_empty() {
            match reconciler.delete_paths(collection, &ready_deletes) {
                Ok(n) => tracing::debug!("watcher deleted {n} points for {} removed files", ready_deletes.len()),
                Err(e) => tracing::warn!("watcher deletion dispatch failed: {e}"),
            }
        }
        if !ready_upserts.is_empty() {
            match reconciler.index_files(&ready_upserts, collection, false) {
                Ok(result) => tracing::debug!(
                    "watcher indexed {} file(s), {} entities, {} relations",
                    result.files_processed,
                    result.entities_created,
                    result.relations_created
                ),
                Err(e) => tracing::warn!("watcher index dispatch failed: {e}"),
            }
        }

        Ok(())
    }

    /// Step 6: drop entries idle more than 5 minutes with no recent event,
    /// so a long-running watcher can't accumulate unbounded state from
    /// paths that never settle (e.g. a tool that touches a lockfile
    /// every few seconds without ever satisfying the debounce window).
    fn trim_stale(&mut self) {
        let cutoff = Duration::from_secs(5 * 60);
        self.pending.retain(|_, entry| entry.last_seen.elapsed() < cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_is_watchable() {
        let watcher = FileWatcher::new(PathBuf::from("/tmp"));

        // Should NOT watch (ignored dirs)
        assert!(!watcher.is_watchable(Path::new("/tmp/.git/config")));
        assert!(!watcher.is_watchable(Path::new("/tmp/node_modules/foo/index.js")));
        assert!(!watcher.is_watchable(Path::new("/tmp/target/debug/main")));
        assert!(!watcher.is_watchable(Path::new("/tmp/.codesearch.db/data")));

        // Should NOT watch (non-indexable extensions)
        assert!(!watcher.is_watchable(Path::new("/tmp/Cargo.lock")));
        assert!(!watcher.is_watchable(Path::new("/tmp/debug.log")));
        assert!(!watcher.is_watchable(Path::new("/tmp/image.png")));
        assert!(!watcher.is_watchable(Path::new("/tmp/data.bin")));

        // SHOULD watch (code files)
        assert!(watcher.is_watchable(Path::new("/tmp/src/main.rs")));
        assert!(watcher.is_watchable(Path::new("/tmp/src/lib.ts")));
        assert!(watcher.is_watchable(Path::new("/tmp/Program.cs")));
        assert!(watcher.is_watchable(Path::new("/tmp/app.py")));

        // SHOULD watch (config files)
        assert!(watcher.is_watchable(Path::new("/tmp/config.json")));
        assert!(watcher.is_watchable(Path::new("/tmp/settings.yaml")));
        assert!(watcher.is_watchable(Path::new("/tmp/Cargo.toml")));
        assert!(watcher.is_watchable(Path::new("/tmp/appsettings.xml")));

        // SHOULD watch (special files)
        assert!(watcher.is_watchable(Path::new("/tmp/Dockerfile")));
        assert!(watcher.is_watchable(Path::new("/tmp/Makefile")));
    }

    #[test]
    #[ignore] // Requires actual filesystem events
    fn test_file_watcher() {
        let dir = tempdir().unwrap();
        let mut watcher = FileWatcher::new(dir.path().to_path_buf());

        watcher.start(100).unwrap();

        // Create a file
        let test_file = dir.path().join("test.rs");
        fs::write(&test_file, "fn main() {}").unwrap();

        // Wait for events
        std::thread::sleep(Duration::from_millis(200));
        let events = watcher.poll_events();

        assert!(!events.is_empty());
    }

    #[test]
    fn test_is_path_considered() {
        assert!(!is_path_considered(Path::new("/repo/.git/HEAD")));
        assert!(!is_path_considered(Path::new("/repo/node_modules/pkg/index.js")));
        assert!(!is_path_considered(Path::new("/repo/.claude-indexer/default.json")));
        assert!(is_path_considered(Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn test_coalescer_new_and_second_chance_classification() {
        let dir = tempdir().unwrap();
        let watcher = Watcher::new(dir.path(), 0.0).unwrap();
        assert_eq!(watcher.debounce, Duration::from_secs_f64(crate::constants::DEFAULT_DEBOUNCE_SECONDS));

        // A path that is still missing after its first dispatch tick moves
        // into the second-chance state rather than being deleted outright.
        let mut pending = HashMap::new();
        pending.insert(
            dir.path().join("gone.rs"),
            PendingEntry { kind: PendingKind::Remove { second_chance: false }, last_seen: Instant::now() - Duration::from_secs(10) },
        );
        let mut watcher = watcher;
        watcher.debounce = Duration::from_millis(1);
        watcher.pending = pending;

        let mut ready_deletes = Vec::new();
        let mut ready_upserts = Vec::new();
        let mut still_pending = HashMap::new();
        for (path, entry) in watcher.pending.drain() {
            match entry.kind {
                PendingKind::Remove { second_chance: false } if !path.exists() => {
                    still_pending.insert(path, PendingEntry { kind: PendingKind::Remove { second_chance: true }, last_seen: Instant::now() });
                }
                PendingKind::Remove { second_chance: true } if !path.exists() => ready_deletes.push(path),
                _ => ready_upserts.push(path),
            }
        }
        assert!(ready_deletes.is_empty());
        assert_eq!(still_pending.len(), 1);
    }

    #[test]
    fn test_trim_stale_drops_long_idle_entries() {
        let dir = tempdir().unwrap();
        let mut watcher = Watcher::new(dir.path(), 1.0).unwrap();
        watcher.pending.insert(
            PathBuf::from("/repo/stuck.rs"),
            PendingEntry { kind: PendingKind::Upsert, last_seen: Instant::now() - Duration::from_secs(6 * 60) },
        );
        watcher.pending.insert(
            PathBuf::from("/repo/fresh.rs"),
            PendingEntry { kind: PendingKind::Upsert, last_seen: Instant::now() },
        );
        watcher.trim_stale();
        assert_eq!(watcher.pending.len(), 1);
        assert!(watcher.pending.contains_key(Path::new("/repo/fresh.rs")));
    }
}
