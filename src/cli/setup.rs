use anyhow::Result;

use crate::embed::{FastEmbedder, ModelType};

/// Downloads (and sanity-checks) the embedding model's ONNX weights so the
/// first `codesearch index` run doesn't pay the download cost mid-indexing.
pub async fn run(model: Option<String>) -> Result<()> {
    let model_type = match model.as_deref() {
        Some(name) => ModelType::parse(name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown model '{}'. Run with no --model to use the default ({})",
                name,
                ModelType::default().short_name()
            )
        })?,
        None => ModelType::default(),
    };

    println!(
        "📦 Downloading {} ({})...",
        model_type.name(),
        model_type.short_name()
    );

    // Loading the model triggers fastembed's hf-hub download path if the
    // weights aren't already cached.
    let mut embedder = FastEmbedder::with_cache_dir(model_type, None)?;

    // One throwaway embedding call confirms the ONNX session actually runs,
    // not just that the files landed on disk.
    embedder.embed_one("codesearch setup sanity check")?;

    println!(
        "✅ {} ready ({} dimensions)",
        model_type.name(),
        model_type.dimensions()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_model_name() {
        let err = ModelType::parse("not-a-real-model");
        assert!(err.is_none());
    }
}
