//! Parser registry adapter (spec §4.1 data flow step 3, §4.10, §4.11).
//!
//! Wraps the teacher's tree-sitter chunker (`crate::chunker::SemanticChunker`)
//! behind the `{entities, relations, metadata_chunks, implementation_chunks,
//! errors}` contract the reconciler expects. The chunker itself — the
//! language parsers — is the pluggable, external collaborator per spec §1;
//! this module is the adapter layer the core actually owns.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::chunker::{Chunk, ChunkKind, SemanticChunker};
use crate::file::Language;

/// Entity type (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    File,
    Class,
    Function,
    Method,
    Variable,
    Documentation,
    TextChunk,
    Generic,
}

impl EntityType {
    fn from_chunk_kind(kind: ChunkKind) -> Self {
        match kind {
            ChunkKind::Function => EntityType::Function,
            ChunkKind::Method => EntityType::Method,
            ChunkKind::Class
            | ChunkKind::Struct
            | ChunkKind::Enum
            | ChunkKind::Trait
            | ChunkKind::Interface
            | ChunkKind::Impl => EntityType::Class,
            ChunkKind::TypeAlias | ChunkKind::Const | ChunkKind::Static => EntityType::Variable,
            ChunkKind::Block => EntityType::TextChunk,
            ChunkKind::Mod | ChunkKind::Anchor | ChunkKind::Other => EntityType::Generic,
        }
    }

    /// Entity types eligible for implementation chunks (spec §9 "exact set
    /// of entity types... fixed to {function, method, class}").
    pub fn eligible_for_implementation_chunk(self) -> bool {
        matches!(self, EntityType::Function | EntityType::Method | EntityType::Class)
    }

    /// Lowercase label used in the metadata-chunk text template (spec §4.5).
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Class => "class",
            EntityType::Function => "function",
            EntityType::Method => "method",
            EntityType::Variable => "variable",
            EntityType::Documentation => "documentation",
            EntityType::TextChunk => "text_chunk",
            EntityType::Generic => "generic",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, addressable unit discovered in a file (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: EntityType,
    pub observations: Vec<String>,
    pub file_path: Option<String>,
    pub line_number: usize,
    pub end_line_number: Option<usize>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub complexity_score: Option<f32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Content body, kept alongside the entity for implementation-chunk text
    /// and content-hash dedup (spec §4.5 "computed from the file bytes").
    #[serde(skip)]
    pub content: String,
    #[serde(skip)]
    pub content_hash: String,
}

/// A directed, typed edge between entities (spec §3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    pub context: Option<String>,
    pub confidence: Option<f32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Processing depth selected per file (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTier {
    Light,
    Standard,
    Deep,
}

/// Output of parsing one file (spec §2 data flow step 3).
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub errors: Vec<String>,
    pub tier: Option<FileTier>,
}

/// Generated-code / type-stub markers that downgrade a file to the `light`
/// tier (spec §4.10).
const GENERATED_MARKERS: &[&str] = &[
    "@generated",
    "do not edit",
    "autogenerated",
    "auto-generated",
    "code generated by",
];

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+)|use\s+([\w:]+)|import\s*\{[^}]*\}\s*from\s*['"]([^'"]+)['"]|import\s+['"]([^'"]+)['"]|#include\s*[<"]([^>"]+)[>"])"#,
        )
        .expect("static import regex is valid")
    })
}

/// Wraps the teacher's `SemanticChunker` to produce entities/relations in
/// the shape the reconciler consumes.
pub struct ParserRegistry {
    chunker: SemanticChunker,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            chunker: SemanticChunker::new(100, 2000, 10),
        }
    }

    /// Select the processing tier for a file (spec §4.10).
    pub fn categorize(path: &Path, content: &str, language: Language) -> FileTier {
        if !language.is_indexable() {
            return FileTier::Light;
        }
        if content.len() > crate::constants::DEFAULT_MAX_FILE_SIZE_BYTES as usize / 2 {
            return FileTier::Light;
        }
        let head: String = content.chars().take(400).collect::<String>().to_lowercase();
        if GENERATED_MARKERS.iter().any(|m| head.contains(m)) {
            return FileTier::Light;
        }
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".d.ts") || n.ends_with(".pb.go") || n.ends_with("_pb2.py"))
            .unwrap_or(false)
        {
            return FileTier::Light;
        }
        FileTier::Standard
    }

    /// Parse one file, producing entities and relations. Never returns a
    /// hard error: parse failures are recorded in `ParseResult::errors` and
    /// the fallback extractor is tried so partial results still surface
    /// (spec §4.3.7, §7 "Parse syntactic error").
    pub fn parse_file(&mut self, path: &Path, content: &str, language: Language) -> ParseResult {
        let rel_display = path.to_string_lossy().to_string();
        let tier = Self::categorize(path, content, language);

        if tier == FileTier::Light {
            let file_entity = file_entity(path, content);
            return ParseResult {
                entities: vec![file_entity],
                relations: Vec::new(),
                errors: Vec::new(),
                tier: Some(tier),
            };
        }

        let chunk_result = self.chunker.chunk_semantic(language, path, content);

        let mut result = ParseResult {
            tier: Some(tier),
            ..Default::default()
        };

        let chunks = match chunk_result {
            Ok(chunks) => chunks,
            Err(e) => {
                result.errors.push(format!("{rel_display}: {e}"));
                Vec::new()
            }
        };

        if chunks.is_empty() && result.errors.is_empty() {
            // No syntax error but nothing extracted either — still attempt
            // the fallback so a lone file entity isn't the only signal.
        }

        if chunks.is_empty() {
            let fallback = fallback_parse(path, content);
            if fallback.is_empty() {
                result.errors.push(format!("{rel_display}: no entities extracted"));
            }
            result.entities = fallback;
        } else {
            result.entities = chunks_to_entities(&chunks);
        }

        result.entities.push(file_entity(path, content));
        result.relations = extract_relations(path, content, &result.entities);

        result
    }
}

fn file_entity(path: &Path, content: &str) -> Entity {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    let line_count = content.lines().count();
    Entity {
        name,
        entity_type: EntityType::File,
        observations: vec![format!("{} lines", line_count)],
        file_path: Some(path.to_string_lossy().to_string()),
        line_number: 1,
        end_line_number: Some(line_count.max(1)),
        signature: None,
        docstring: None,
        complexity_score: None,
        metadata: serde_json::Map::new(),
        content: content.to_string(),
        content_hash: crate::state::FileState::hash_bytes(content.as_bytes()),
    }
}

fn chunks_to_entities(chunks: &[Chunk]) -> Vec<Entity> {
    chunks
        .iter()
        .map(|chunk| {
            let entity_type = EntityType::from_chunk_kind(chunk.kind);
            let mut observations = Vec::new();
            if let Some(sig) = &chunk.signature {
                observations.push(sig.clone());
            }
            observations.push(format!("{:?}", chunk.kind));

            Entity {
                name: entity_name(chunk),
                entity_type,
                observations,
                file_path: Some(chunk.path.clone()),
                line_number: chunk.start_line + 1,
                end_line_number: Some(chunk.end_line + 1),
                signature: chunk.signature.clone(),
                docstring: chunk.docstring.clone(),
                complexity_score: None,
                metadata: serde_json::Map::new(),
                content: chunk.content.clone(),
                content_hash: chunk.hash.clone(),
            }
        })
        .collect()
}

/// Best-effort name for a chunk: prefer the last context breadcrumb (e.g.
/// `"Function: add"` → `"add"`), fall back to a line-anchored placeholder.
fn entity_name(chunk: &Chunk) -> String {
    if let Some(last) = chunk.context.last() {
        if let Some((_, name)) = last.split_once(": ") {
            return name.to_string();
        }
        return last.clone();
    }
    if let Some(sig) = &chunk.signature {
        return sig.clone();
    }
    format!("{:?}@{}:{}", chunk.kind, chunk.path, chunk.start_line + 1)
}

/// Fallback parser (spec §4.3.7, GLOSSARY): lossy heuristic symbol
/// extraction used when the primary parser produces nothing.
fn fallback_parse(path: &Path, content: &str) -> Vec<Entity> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:pub\s+)?(?:fn|def|function|class|struct|enum|interface|impl)\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static fallback regex is valid")
    });

    let path_str = path.to_string_lossy().to_string();
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            re.captures(line).map(|caps| Entity {
                name: caps[1].to_string(),
                entity_type: EntityType::Generic,
                observations: vec!["recovered by fallback parser".to_string()],
                file_path: Some(path_str.clone()),
                line_number: idx + 1,
                end_line_number: None,
                signature: Some(line.trim().to_string()),
                docstring: None,
                complexity_score: None,
                metadata: serde_json::Map::new(),
                content: line.to_string(),
                content_hash: crate::state::FileState::hash_bytes(line.as_bytes()),
            })
        })
        .collect()
}

/// Heuristic `contains` (from chunk hierarchy breadcrumbs) and `imports`
/// (regex over raw source) relation extraction (spec §3.2, §4.4).
fn extract_relations(path: &Path, content: &str, entities: &[Entity]) -> Vec<Relation> {
    let mut relations = Vec::new();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let known_names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();

    for entity in entities {
        if entity.entity_type == EntityType::File {
            continue;
        }
        relations.push(Relation {
            from_entity: file_name.clone(),
            to_entity: entity.name.clone(),
            relation_type: "contains".to_string(),
            context: None,
            confidence: Some(1.0),
            metadata: serde_json::Map::new(),
        });
    }

    for caps in import_regex().captures_iter(content) {
        let target = caps
            .iter()
            .skip(1)
            .find_map(|m| m.map(|m| m.as_str().to_string()));
        if let Some(target) = target {
            if !known_names.contains(target.as_str()) {
                relations.push(Relation {
                    from_entity: file_name.clone(),
                    to_entity: target,
                    relation_type: "imports".to_string(),
                    context: None,
                    confidence: Some(0.8),
                    metadata: serde_json::Map::new(),
                });
            }
        }
    }

    relations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn categorize_flags_generated_files_as_light() {
        let content = "// Code generated by protoc-gen-go. DO NOT EDIT.\npackage foo";
        let tier = ParserRegistry::categorize(&PathBuf::from("foo.pb.go"), content, Language::Go);
        assert_eq!(tier, FileTier::Light);
    }

    #[test]
    fn categorize_is_standard_for_ordinary_source() {
        let content = "fn add(a: i32, b: i32) -> i32 { a + b }";
        let tier = ParserRegistry::categorize(&PathBuf::from("foo.rs"), content, Language::Rust);
        assert_eq!(tier, FileTier::Standard);
    }

    #[test]
    fn parse_file_light_tier_produces_single_file_entity() {
        let mut registry = ParserRegistry::new();
        let content = "// @generated\nsome content";
        let result = registry.parse_file(&PathBuf::from("gen.rs"), content, Language::Rust);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].entity_type, EntityType::File);
        assert!(result.relations.is_empty());
    }

    #[test]
    fn fallback_parse_recovers_top_level_symbols() {
        let content = "def foo():\n    pass\n\nclass Bar:\n    pass\n";
        let entities = fallback_parse(&PathBuf::from("x.py"), content);
        let names: Vec<_> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"foo"));
        assert!(names.contains(&"Bar"));
    }

    #[test]
    fn extract_relations_finds_python_imports() {
        let content = "from foo import add\n\ndef main():\n    pass\n";
        let entities = vec![Entity {
            name: "main".to_string(),
            entity_type: EntityType::Function,
            observations: vec![],
            file_path: Some("bar.py".to_string()),
            line_number: 3,
            end_line_number: Some(4),
            signature: None,
            docstring: None,
            complexity_score: None,
            metadata: serde_json::Map::new(),
            content: String::new(),
            content_hash: String::new(),
        }];
        let relations = extract_relations(&PathBuf::from("bar.py"), content, &entities);
        assert!(relations
            .iter()
            .any(|r| r.relation_type == "imports" && r.to_entity == "foo"));
        assert!(relations
            .iter()
            .any(|r| r.relation_type == "contains" && r.to_entity == "main"));
    }
}
