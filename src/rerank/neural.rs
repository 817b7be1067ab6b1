//! Cross-encoder reranking via `fastembed::TextRerank`. Runs after RRF
//! fusion has already pooled vector and FTS candidates into a single
//! ranked list; the neural score and the RRF score are blended so one bad
//! cross-encoder call can't fully override fusion ranking.

use anyhow::{Context, Result};
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

/// Weight given to the cross-encoder score in the blend; the remainder
/// goes to the caller's RRF score.
const NEURAL_WEIGHT: f32 = 0.8;

/// Wraps a loaded `fastembed::TextRerank` model (Jina Reranker v1 Turbo).
pub struct NeuralReranker {
    model: TextRerank,
}

impl NeuralReranker {
    /// Loads the reranker model, honoring `FASTEMBED_CACHE_DIR` if set.
    pub fn new() -> Result<Self> {
        let mut options = RerankInitOptions::new(RerankerModel::JINARerankerV1TurboEn)
            .with_show_download_progress(false);

        if let Ok(dir) = std::env::var("FASTEMBED_CACHE_DIR") {
            options = options.with_cache_dir(std::path::PathBuf::from(dir));
        }

        let model =
            TextRerank::try_new(options).context("failed to load neural reranker model")?;

        Ok(Self { model })
    }

    /// Reranks `documents` against `query`, blends each cross-encoder score
    /// with the matching entry in `rrf_scores` (same index), and returns
    /// `(original_index, blended_score)` pairs sorted by blended score
    /// descending.
    pub fn rerank_and_blend(
        &mut self,
        query: &str,
        documents: &[String],
        rrf_scores: &[f32],
    ) -> Result<Vec<(usize, f32)>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let doc_refs: Vec<&str> = documents.iter().map(|d| d.as_str()).collect();
        let results = self
            .model
            .rerank(query, doc_refs, false, None)
            .context("neural reranking failed")?;

        let mut blended: Vec<(usize, f32)> = results
            .into_iter()
            .map(|r| {
                let rrf = rrf_scores.get(r.index).copied().unwrap_or(0.0);
                (r.index, Self::blend(r.score, rrf))
            })
            .collect();

        blended.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(blended)
    }

    fn blend(neural_score: f32, rrf_score: f32) -> f32 {
        NEURAL_WEIGHT * neural_score + (1.0 - NEURAL_WEIGHT) * rrf_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_favors_neural_score() {
        let blended = NeuralReranker::blend(1.0, 0.0);
        assert!((blended - NEURAL_WEIGHT).abs() < 0.0001);
    }
}
