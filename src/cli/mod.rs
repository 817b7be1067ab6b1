use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigLoader;
use crate::embed::ModelType;
use crate::reconciler::{IndexOptions, PipelineResult, Reconciler};
use crate::search::SearchOptions;
use crate::vectordb::adapter::LocalVectorStore;
use crate::vectordb::{ScrollFilter, VectorStoreAdapter};

/// Index subcommands
#[derive(Subcommand, Debug)]
pub enum IndexCommands {
    /// Add a repository to the index (creates local or global index)
    Add {
        /// Path to add (defaults to current directory)
        path: Option<PathBuf>,

        /// Create global index instead of local
        #[arg(short = 'g', long)]
        global: bool,
    },

    /// Remove the index (local or global, auto-detected)
    #[command(visible_alias = "rm")]
    Remove {
        /// Path to remove (defaults to current directory)
        path: Option<PathBuf>,
    },

    /// Show index status (local or global)
    List,
}

/// Fast, local semantic code search powered by Rust
#[derive(Parser, Debug)]
#[command(name = "codesearch")]
#[command(author, version = env!("CARGO_PKG_VERSION_FULL"), about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub loglevel: String,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Override default store name
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Embedding model to use (e.g., bge-small, minilm-l6-q, jina-code)
    /// Available: minilm-l6, minilm-l6-q, minilm-l12, minilm-l12-q, paraphrase-minilm,
    ///            bge-small, bge-small-q, bge-base, nomic-v1, nomic-v1.5, nomic-v1.5-q,
    ///            jina-code, e5-multilingual, mxbai-large, modernbert-large
    #[arg(long, global = true)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the codebase using natural language
    Search {
        /// Search query (e.g., "where do we handle authentication?")
        query: String,

        /// Maximum total results to return
        #[arg(short = 'm', long, default_value = "25")]
        max_results: usize,

        /// Maximum matches to show per file
        #[arg(long, default_value = "1")]
        per_file: usize,

        /// Show full chunk content instead of snippets
        #[arg(short, long)]
        content: bool,

        /// Show relevance scores
        #[arg(long)]
        scores: bool,

        /// Show file paths only (like grep -l)
        #[arg(long)]
        compact: bool,

        /// Force re-index changed files before searching
        #[arg(short, long)]
        sync: bool,

        /// Output JSON for agents
        #[arg(long)]
        json: bool,

        /// Path to search in (defaults to current directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Use vector-only search (disable hybrid FTS)
        #[arg(long)]
        vector_only: bool,

        /// RRF k parameter for score fusion (default 20)
        #[arg(long, default_value = "20")]
        rrf_k: f32,

        /// Enable neural reranking for better accuracy (uses Jina Reranker)
        #[arg(long)]
        rerank: bool,

        /// Number of top results to rerank (default 50)
        #[arg(long, default_value = "50")]
        rerank_top: usize,

        /// Filter results to files under this path (e.g., "src/")
        #[arg(long)]
        filter_path: Option<String>,
    },

    /// Index the repository or manage global index registry
    Index {
        /// Path to index (defaults to current directory), or use "list" to show status
        path: Option<PathBuf>,

        /// Show what would be indexed without actually indexing
        #[arg(long)]
        dry_run: bool,

        /// Force full re-index
        #[arg(short = 'f', long, alias = "full")]
        force: bool,

        /// Add a repository to the index (creates local or global index)
        #[arg(long)]
        add: bool,

        /// Create global index instead of local (only with --add)
        #[arg(short = 'g', long)]
        global: bool,

        /// Remove the index (local or global, auto-detected)
        #[arg(long, visible_alias = "rm")]
        remove: bool,

        /// Show index status (local or global)
        #[arg(long)]
        list: bool,
    },

    /// Run a background server with live file watching
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "4444")]
        port: u16,

        /// Path to serve (defaults to current directory)
        path: Option<PathBuf>,
    },

    /// Show statistics about the vector database
    Stats {
        /// Path to show stats for (defaults to current directory)
        path: Option<PathBuf>,
    },

    /// Clear the vector database
    Clear {
        /// Path to clear (defaults to current directory)
        path: Option<PathBuf>,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Check installation health
    Doctor,

    /// Download embedding models
    Setup {
        /// Model to download (defaults to mxbai-embed-xsmall-v1)
        #[arg(long)]
        model: Option<String>,
    },

    /// Start MCP server for Claude Code integration
    Mcp {
        /// Path to project (defaults to current directory)
        path: Option<PathBuf>,
    },
}

pub async fn run(cancel_token: CancellationToken) -> Result<()> {
    let cli = Cli::parse();

    // Parse model from CLI flag
    let model_type = cli.model.as_ref().and_then(|m| ModelType::from_str(m));
    if cli.model.is_some() && model_type.is_none() {
        eprintln!(
            "Unknown model: '{}'. Available models:",
            cli.model.as_ref().unwrap()
        );
        eprintln!("  minilm-l6, minilm-l6-q, minilm-l12, minilm-l12-q, paraphrase-minilm");
        eprintln!("  bge-small, bge-small-q, bge-base, nomic-v1, nomic-v1.5, nomic-v1.5-q");
        eprintln!("  jina-code, e5-multilingual, mxbai-large, modernbert-large");
        std::process::exit(1);
    }

    // Set quiet mode if requested
    if cli.quiet {
        crate::output::set_quiet(true);
    }

    // Parse loglevel from CLI
    let log_level = crate::logger::LogLevel::from_str(&cli.loglevel)
        .unwrap_or(crate::logger::LogLevel::Info);

    match cli.command {
        Commands::Search {
            query,
            max_results,
            per_file,
            content,
            scores,
            compact,
            sync,
            json,
            path,
            vector_only,
            rrf_k,
            rerank,
            rerank_top,
            filter_path,
        } => {
            // Auto-enable quiet mode for JSON output
            if json {
                crate::output::set_quiet(true);
            }
            let options = SearchOptions {
                max_results,
                per_file: if per_file == 0 { None } else { Some(per_file) },
                content_lines: if content { 3 } else { 0 },
                show_scores: scores,
                compact,
                sync,
                json,
                filter_path,
                model_override: model_type.map(|mt| format!("{:?}", mt)),
                vector_only,
                rrf_k: if rrf_k == 60.0 {
                    None
                } else {
                    Some(rrf_k as usize)
                },
                rerank,
                rerank_top: if rerank_top == 50 {
                    None
                } else {
                    Some(rerank_top)
                },
            };

            crate::search::search(&query, path, options).await
        }
        Commands::Index {
            path,
            dry_run,
            force,
            add,
            global,
            remove,
            list,
        } => {
            // Check if path is "list", "add", or "rm"/"remove" as special cases (backward compatibility)
            let path_str = path.as_ref().and_then(|p| p.to_str());
            let is_list_cmd = path_str.map(|s| s == "list").unwrap_or(false);
            let is_add_cmd = path_str.map(|s| s == "add").unwrap_or(false);
            let is_rm_cmd = path_str
                .map(|s| s == "rm" || s == "remove")
                .unwrap_or(false);

            if add || is_add_cmd {
                // Clear path if it's "add" to avoid treating it as a directory
                let effective_path = if is_add_cmd { None } else { path };
                crate::index::add_to_index(effective_path, global, cancel_token.clone()).await
            } else if remove || is_rm_cmd {
                // Clear path if it's "rm"/"remove" to avoid treating it as a directory
                let effective_path = if is_rm_cmd { None } else { path };
                crate::index::remove_from_index(effective_path).await
            } else if list || is_list_cmd {
                crate::index::list_index_status().await
            } else {
                // For 'codesearch index .' or 'codesearch index <path>', run the
                // reconciler directly against the project's collection.
                run_index(path, dry_run, force, model_type).await
            }
        }
        Commands::Stats { path } => run_stats(path).await,
        Commands::Serve { port, path } => {
            // Discover database path and initialize logger with file output
            // NOTE: For Serve, tracing is NOT initialized in main.rs — init_logger
            // is the first and only call to set the global subscriber
            let effective_path = path.as_ref().cloned().unwrap_or_else(|| std::env::current_dir().unwrap());
            if let Ok(Some(db_info)) = crate::db_discovery::find_best_database(Some(&effective_path)) {
                if let Err(e) = crate::logger::init_logger(&db_info.db_path, log_level, cli.quiet) {
                    eprintln!("Warning: Failed to initialize file logger: {}", e);
                }
            }
            crate::server::serve(port, path).await
        }
        Commands::Clear { path, yes } => run_clear(path, yes).await,
        Commands::Doctor => crate::cli::doctor::run().await,
        Commands::Setup { model } => crate::cli::setup::run(model).await,
        Commands::Mcp { path } => {
            // Discover database path and initialize logger with file output
            // NOTE: For MCP, tracing is NOT initialized in main.rs — init_logger
            // is the first and only call to set the global subscriber
            let effective_path = path.as_ref().cloned().unwrap_or_else(|| std::env::current_dir().unwrap());
            if let Ok(Some(db_info)) = crate::db_discovery::find_best_database(Some(&effective_path)) {
                if let Err(e) = crate::logger::init_logger(&db_info.db_path, log_level, cli.quiet) {
                    eprintln!("Warning: Failed to initialize file logger: {}", e);
                }
            }
            crate::mcp::run_mcp_server(path, cancel_token).await
        }
    }
}

/// Resolves the collection name for a project root via the config loader
/// (spec §6.2), falling back to the built-in `"default"`.
fn resolve_collection(project_root: &Path) -> String {
    let config = ConfigLoader::new(project_root).load(&[]);
    config.get_str("collection").unwrap_or("default").to_string()
}

fn print_pipeline_result(result: &PipelineResult) {
    use colored::Colorize;

    println!(
        "\n{}",
        if result.success {
            "Indexing complete".green().bold()
        } else {
            "Indexing finished with errors".red().bold()
        }
    );
    println!("  Files processed: {}", result.files_processed);
    if result.files_failed > 0 {
        println!("  Files failed:    {}", result.files_failed);
    }
    println!("  Entities:        {}", result.entities_created);
    println!("  Relations:       {}", result.relations_created);
    println!(
        "  Implementation chunks: {}",
        result.implementation_chunks_created
    );
    println!("  Embedding requests: {}", result.embedding_requests);
    println!("  Time:            {:.2}s", result.processing_time);

    for warning in &result.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    for error in &result.errors {
        println!("  {} {}", "error:".red(), error);
    }
}

async fn run_index(
    path: Option<PathBuf>,
    dry_run: bool,
    force: bool,
    model: Option<ModelType>,
) -> Result<()> {
    use colored::Colorize;

    let (db_path, project_path) = crate::index::get_db_path_smart(path, false, force)?;
    let model_type = model.unwrap_or_default();
    let collection = resolve_collection(&project_path);

    println!("{}", "Codesearch Indexer".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Project:    {}", project_path.display());
    println!("Database:   {}", db_path.display());
    println!("Collection: {}", collection);
    println!(
        "Model:      {} ({} dims)",
        model_type.name(),
        model_type.dimensions()
    );
    if dry_run {
        println!("\n{}", "DRY RUN MODE".bright_yellow());
    }

    let store: Arc<dyn VectorStoreAdapter> = Arc::new(LocalVectorStore::new(db_path));
    let mut reconciler = Reconciler::with_model(project_path, store, model_type)?;
    let options = IndexOptions {
        include_tests: false,
        dry_run,
        force_full: force,
    };

    let result = reconciler.index_project(&collection, &options)?;
    print_pipeline_result(&result);

    if !result.success {
        anyhow::bail!("indexing failed: {}", result.errors.join("; "));
    }
    Ok(())
}

async fn run_stats(path: Option<PathBuf>) -> Result<()> {
    use colored::Colorize;

    let effective_path = path
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let db_info = crate::db_discovery::find_best_database(Some(&effective_path))?;
    let Some(db_info) = db_info else {
        println!("{}", "No database found!".red());
        println!("   Run {} first", "codesearch index".bright_cyan());
        return Ok(());
    };

    let collection = resolve_collection(&db_info.project_path);
    let store = LocalVectorStore::new(db_info.db_path.clone());

    println!("{}", "Database Statistics".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Database:   {}", db_info.db_path.display());
    println!("Project:    {}", db_info.project_path.display());
    println!("Collection: {}", collection);

    if !store.collection_exists(&collection)? {
        println!("\n{}", "Collection has not been indexed yet.".yellow());
        return Ok(());
    }

    let total = store.count(&collection, &ScrollFilter::default())?;
    let entities = store.count(
        &collection,
        &ScrollFilter {
            exclude_relations: true,
            ..Default::default()
        },
    )?;

    println!("\n{}", "Vector Store:".bright_green());
    println!("   Entities:  {}", entities);
    println!("   Relations: {}", total.saturating_sub(entities));
    println!("   Total points: {}", total);

    Ok(())
}

async fn run_clear(path: Option<PathBuf>, yes: bool) -> Result<()> {
    use colored::Colorize;

    let effective_path = path
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let db_info = crate::db_discovery::find_best_database(Some(&effective_path))?;
    let Some(db_info) = db_info else {
        println!("{}", "No database found!".red());
        return Ok(());
    };

    let collection = resolve_collection(&db_info.project_path);

    println!("{}", "Clear Database".bright_yellow().bold());
    println!("{}", "=".repeat(60));
    println!("Database:   {}", db_info.db_path.display());
    println!("Project:    {}", db_info.project_path.display());
    println!("Collection: {}", collection);

    if !yes {
        println!("\n{}", "This will delete all indexed data!".yellow());
        print!("Are you sure? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Cancelled.".dimmed());
            return Ok(());
        }
    }

    let store = LocalVectorStore::new(db_info.db_path.clone());
    let deleted = store.clear_collection(&collection, false)?;
    println!("{} ({} points removed)", "Database cleared!".green(), deleted);

    Ok(())
}

mod doctor;
mod setup;
