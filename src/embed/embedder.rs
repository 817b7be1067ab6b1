//! Thin wrapper around `fastembed::TextEmbedding`, the ONNX-backed text
//! embedding models this crate ships with. All model selection funnels
//! through `ModelType`; callers never touch `fastembed` types directly.

use std::path::Path;

use anyhow::{Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

/// Supported embedding models, keyed by the short name persisted in
/// `metadata.json` (`model_short_name`) and accepted on the CLI's `--model`
/// flag. Dimensions are fixed per model and drive the vector store's
/// collection dimension at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    MiniLmL6,
    MiniLmL6Q,
    MiniLmL12,
    MiniLmL12Q,
    ParaphraseMiniLm,
    BgeSmall,
    BgeSmallQ,
    BgeBase,
    NomicV1,
    NomicV15,
    NomicV15Q,
    JinaCode,
    E5Multilingual,
    MxbaiLarge,
    ModernBertLarge,
}

impl ModelType {
    /// Parses a CLI/metadata short name into a `ModelType`. Returns `None`
    /// for anything unrecognized rather than falling back silently, so
    /// callers can warn the user about a typo.
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "minilm-l6" => Self::MiniLmL6,
            "minilm-l6-q" => Self::MiniLmL6Q,
            "minilm-l12" => Self::MiniLmL12,
            "minilm-l12-q" => Self::MiniLmL12Q,
            "paraphrase-minilm" => Self::ParaphraseMiniLm,
            "bge-small" => Self::BgeSmall,
            "bge-small-q" => Self::BgeSmallQ,
            "bge-base" => Self::BgeBase,
            "nomic-v1" => Self::NomicV1,
            "nomic-v1.5" => Self::NomicV15,
            "nomic-v1.5-q" => Self::NomicV15Q,
            "jina-code" => Self::JinaCode,
            "e5-multilingual" => Self::E5Multilingual,
            "mxbai-large" => Self::MxbaiLarge,
            "modernbert-large" => Self::ModernBertLarge,
            _ => return None,
        })
    }

    /// Alias for [`ModelType::from_str`] kept for call sites that read more
    /// naturally as `ModelType::parse(...)`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::from_str(s)
    }

    /// The short name used in metadata and on the CLI.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::MiniLmL6 => "minilm-l6",
            Self::MiniLmL6Q => "minilm-l6-q",
            Self::MiniLmL12 => "minilm-l12",
            Self::MiniLmL12Q => "minilm-l12-q",
            Self::ParaphraseMiniLm => "paraphrase-minilm",
            Self::BgeSmall => "bge-small",
            Self::BgeSmallQ => "bge-small-q",
            Self::BgeBase => "bge-base",
            Self::NomicV1 => "nomic-v1",
            Self::NomicV15 => "nomic-v1.5",
            Self::NomicV15Q => "nomic-v1.5-q",
            Self::JinaCode => "jina-code",
            Self::E5Multilingual => "e5-multilingual",
            Self::MxbaiLarge => "mxbai-large",
            Self::ModernBertLarge => "modernbert-large",
        }
    }

    /// A human-readable name for logs and CLI help.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MiniLmL6 => "all-MiniLM-L6-v2",
            Self::MiniLmL6Q => "all-MiniLM-L6-v2 (quantized)",
            Self::MiniLmL12 => "all-MiniLM-L12-v2",
            Self::MiniLmL12Q => "all-MiniLM-L12-v2 (quantized)",
            Self::ParaphraseMiniLm => "paraphrase-multilingual-MiniLM-L12-v2",
            Self::BgeSmall => "BAAI/bge-small-en-v1.5",
            Self::BgeSmallQ => "BAAI/bge-small-en-v1.5 (quantized)",
            Self::BgeBase => "BAAI/bge-base-en-v1.5",
            Self::NomicV1 => "nomic-embed-text-v1",
            Self::NomicV15 => "nomic-embed-text-v1.5",
            Self::NomicV15Q => "nomic-embed-text-v1.5 (quantized)",
            Self::JinaCode => "jinaai/jina-embeddings-v2-base-code",
            Self::E5Multilingual => "intfloat/multilingual-e5-small",
            Self::MxbaiLarge => "mixedbread-ai/mxbai-embed-large-v1",
            Self::ModernBertLarge => "nomic-ai/modernbert-embed-large",
        }
    }

    /// Output vector dimension, fixed per model.
    pub fn dimensions(&self) -> usize {
        match self {
            Self::MiniLmL6 | Self::MiniLmL6Q => 384,
            Self::MiniLmL12 | Self::MiniLmL12Q => 384,
            Self::ParaphraseMiniLm => 384,
            Self::BgeSmall | Self::BgeSmallQ => 384,
            Self::BgeBase => 768,
            Self::NomicV1 | Self::NomicV15 | Self::NomicV15Q => 768,
            Self::JinaCode => 768,
            Self::E5Multilingual => 384,
            Self::MxbaiLarge => 1024,
            Self::ModernBertLarge => 1024,
        }
    }

    fn to_fastembed(self) -> EmbeddingModel {
        match self {
            Self::MiniLmL6 => EmbeddingModel::AllMiniLML6V2,
            Self::MiniLmL6Q => EmbeddingModel::AllMiniLML6V2Q,
            Self::MiniLmL12 => EmbeddingModel::AllMiniLML12V2,
            Self::MiniLmL12Q => EmbeddingModel::AllMiniLML12V2Q,
            Self::ParaphraseMiniLm => EmbeddingModel::ParaphraseMLMiniLML12V2,
            Self::BgeSmall => EmbeddingModel::BGESmallENV15,
            Self::BgeSmallQ => EmbeddingModel::BGESmallENV15Q,
            Self::BgeBase => EmbeddingModel::BGEBaseENV15,
            Self::NomicV1 => EmbeddingModel::NomicEmbedTextV1,
            Self::NomicV15 => EmbeddingModel::NomicEmbedTextV15,
            Self::NomicV15Q => EmbeddingModel::NomicEmbedTextV15Q,
            Self::JinaCode => EmbeddingModel::JinaEmbeddingsV2BaseCode,
            Self::E5Multilingual => EmbeddingModel::MultilingualE5Small,
            Self::MxbaiLarge => EmbeddingModel::MxbaiEmbedLargeV1,
            Self::ModernBertLarge => EmbeddingModel::ModernBertEmbedLarge,
        }
    }
}

impl Default for ModelType {
    fn default() -> Self {
        Self::MiniLmL6Q
    }
}

/// Wraps a loaded `fastembed::TextEmbedding` model and the `ModelType` it
/// was built from. All ONNX Runtime state lives behind this one struct so
/// the rest of the crate never sees `fastembed` types.
pub struct FastEmbedder {
    model: TextEmbedding,
    model_type: ModelType,
}

impl FastEmbedder {
    /// Loads the default model, honoring `FASTEMBED_CACHE_DIR` if set.
    pub fn new() -> Result<Self> {
        Self::with_cache_dir(ModelType::default(), None)
    }

    /// Loads `model_type`, downloading/caching weights under `cache_dir`
    /// (falling back to the `FASTEMBED_CACHE_DIR` env var, then fastembed's
    /// own default cache location, when `cache_dir` is `None`).
    pub fn with_cache_dir(model_type: ModelType, cache_dir: Option<&Path>) -> Result<Self> {
        let mut options = InitOptions::new(model_type.to_fastembed()).with_show_download_progress(false);

        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir.to_path_buf());
        } else if let Ok(dir) = std::env::var("FASTEMBED_CACHE_DIR") {
            options = options.with_cache_dir(std::path::PathBuf::from(dir));
        }

        let model = TextEmbedding::try_new(options)
            .with_context(|| format!("failed to load embedding model {}", model_type.name()))?;

        Ok(Self { model, model_type })
    }

    /// Embeds a batch of documents in one ONNX Runtime call.
    pub fn embed_batch(&mut self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts, None)
            .context("fastembed batch embedding failed")
    }

    /// Embeds a single piece of text (a query or a one-off chunk).
    pub fn embed_one(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text.to_string()])?;
        embeddings
            .pop()
            .ok_or_else(|| anyhow::anyhow!("fastembed returned no embedding for single input"))
    }

    /// Output vector dimension of the loaded model.
    pub fn dimensions(&self) -> usize {
        self.model_type.dimensions()
    }

    /// Human-readable model name, for logs and stored metadata.
    pub fn model_name(&self) -> &str {
        self.model_type.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_type_from_str_roundtrips_through_short_name() {
        for model in [
            ModelType::MiniLmL6,
            ModelType::MiniLmL6Q,
            ModelType::BgeSmall,
            ModelType::BgeBase,
            ModelType::NomicV15,
            ModelType::JinaCode,
            ModelType::MxbaiLarge,
            ModelType::ModernBertLarge,
        ] {
            let short = model.short_name();
            assert_eq!(ModelType::from_str(short), Some(model));
            assert_eq!(ModelType::parse(short), Some(model));
        }
    }

    #[test]
    fn unknown_model_name_is_none() {
        assert_eq!(ModelType::from_str("does-not-exist"), None);
    }

    #[test]
    fn default_model_is_384_dimensional_minilm() {
        let model = ModelType::default();
        assert_eq!(model.dimensions(), 384);
        assert_eq!(model.short_name(), "minilm-l6-q");
    }

    #[test]
    fn dimension_table_matches_known_model_families() {
        assert_eq!(ModelType::BgeBase.dimensions(), 768);
        assert_eq!(ModelType::MxbaiLarge.dimensions(), 1024);
        assert_eq!(ModelType::E5Multilingual.dimensions(), 384);
    }
}
