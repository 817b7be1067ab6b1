//! Central constants for codesearch configuration
//!
//! All string literals for paths, filenames, and configuration should be defined here
//! to avoid duplication and ensure consistency across the codebase.

/// Name of the database directory in project roots
pub const DB_DIR_NAME: &str = ".codesearch.db";

/// Name of the global config directory in user home
pub const CONFIG_DIR_NAME: &str = ".codesearch";

/// Name of the file metadata database
pub const FILE_META_DB_NAME: &str = "file_meta.json";

/// Name of fastembed cache directory (inside .codesearch.db)
pub const FASTEMBED_CACHE_DIR: &str = "fastembed_cache";

/// Name of the repos configuration file
pub const REPOS_CONFIG_FILE: &str = "repos.json";

/// File watcher debounce time in milliseconds
pub const DEFAULT_FSW_DEBOUNCE_MS: u64 = 2000;

/// Lock file name to indicate an active writer instance
/// This prevents multiple processes from writing to the same database
pub const WRITER_LOCK_FILE: &str = ".writer.lock";

/// Name of the durable per-collection state (ledger) directory in project roots.
/// Kept distinct from `DB_DIR_NAME` — the ledger tracks file hashes, the
/// vector store holds embeddings.
pub const STATE_DIR_NAME: &str = ".claude-indexer";

/// Name of the legacy global-home state directory an older version of this
/// tool may have used, consulted once for migration (see `state::StateStore::load`).
pub const LEGACY_STATE_HOME_DIR: &str = ".claude-indexer";

/// Suffix for the best-effort signature-hash side table written alongside a
/// collection's ledger (see spec §4.11).
pub const SIGNATURE_TABLE_SUFFIX: &str = ".signatures.json";

/// Project-local ignore file consulted by file selection (spec §4.9), in
/// addition to `.codesearchignore`/`.osgrepignore`.
pub const CLAUDE_IGNORE_FILE: &str = ".claudeignore";

/// Default debounce window for the watcher's coalescer, in seconds (spec §4.7).
pub const DEFAULT_DEBOUNCE_SECONDS: f64 = 2.0;

/// How long an event with no matching file may sit in the coalescer before
/// a second-chance recheck (spec §4.7 step 4).
pub const SECOND_CHANCE_SECONDS: f64 = 2.0;

/// Coalescer entries with no activity for this long are dropped to bound memory
/// (spec §4.7 step 6).
pub const COALESCER_TRIM_SECONDS: f64 = 300.0;

/// Soft resident-memory cap in bytes before the reconciler halves its batch size
/// (spec §5 "Memory discipline"), default 2 GiB.
pub const DEFAULT_MEMORY_SOFT_CAP_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Adaptive batch sizing defaults (spec §4.3.1 step 3).
pub const DEFAULT_INITIAL_BATCH_SIZE: usize = 25;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const MIN_BATCH_SIZE: usize = 2;

/// Target embedder call size for relation chunks, the largest homogeneous
/// group (spec §4.5 "Batching contract").
pub const RELATION_EMBED_BATCH_TARGET: usize = 500;

/// Default file-size cap for indexing, in bytes (spec §4.9), 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024;

/// Set by the Ctrl-C handler in `main` on the first interrupt; checked by
/// long-running loops (indexing, watching) as a cooperative cancellation
/// signal alongside `CancellationToken`.
pub static SHUTDOWN_REQUESTED: std::sync::atomic::AtomicBool =
    std::sync::atomic::AtomicBool::new(false);

/// Convenience accessor for `SHUTDOWN_REQUESTED`.
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(std::sync::atomic::Ordering::SeqCst)
}

/// Default ONNX Runtime arena-reset interval, in files processed, used to
/// bound memory growth during long embedding runs.
pub const DEFAULT_ARENA_RESET_INTERVAL: usize = 500;

/// Default embedding-cache memory budget, in megabytes.
pub const DEFAULT_CACHE_MAX_MEMORY_MB: usize = 256;

/// Default entry-count cap for the query embedding cache (bounded by count,
/// not memory, since queries are short-lived compared to chunk corpora).
pub const DEFAULT_QUERY_CACHE_CAPACITY: u64 = 1000;

/// Default LMDB map size for the vector store environment, in megabytes.
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 10 * 1024;

/// Environment variables recognized by the configuration loader (spec §6.2).
pub const RECOGNIZED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "VOYAGE_API_KEY",
    "QDRANT_API_KEY",
    "QDRANT_URL",
    "EMBEDDING_PROVIDER",
    "VOYAGE_MODEL",
    "CLAUDE_INDEXER_DEBUG",
    "CLAUDE_INDEXER_VERBOSE",
    "CLAUDE_INDEXER_COLLECTION",
];

/// Directories and files that should always be excluded from indexing
/// These are added to both .gitignore and .codesearchignore automatically
pub const ALWAYS_EXCLUDED: &[&str] = &[
    // Codesearch databases
    ".codesearch",
    ".codesearch.db",
    ".codesearch.dbs",
    // Fastembed cache
    "fastembed_cache",
    // Version control
    ".git",
    ".svn",
    ".hg",
    // Build artifacts
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    // Python
    "__pycache__",
    ".pytest_cache",
    ".tox",
    "venv",
    ".venv",
    // Ruby
    "vendor",
    ".bundle",
    // Java
    ".gradle",
    ".m2",
    // IDE
    ".idea",
    ".vscode",
    ".vs",
    // Other
    "coverage",
    ".nyc_output",
    ".cache",
];
