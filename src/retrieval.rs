//! Vector similarity retrieval with a similarity floor.
//!
//! Ranks stored chunks against a query vector by cosine similarity
//! (`1 - cosine_distance`) and keeps only those at or above the configured
//! threshold. An empty result is a normal outcome — "no grounding
//! available" — never an error.

use std::sync::Arc;

use crate::error::EngineError;
use crate::models::Chunk;
use crate::store::Store;

/// A retrieved chunk with its similarity score, closest first.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub similarity: f64,
}

pub struct RetrievalEngine {
    store: Arc<dyn Store>,
    dims: usize,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn Store>, dims: usize) -> Self {
        Self { store, dims }
    }

    /// Return at most `top_k` chunks with similarity >= `threshold`, in
    /// descending similarity order.
    ///
    /// The query vector must have the configured dimensionality; a mismatch
    /// (on either side of the comparison) is a fatal
    /// [`EngineError::DimensionMismatch`], not a per-query miss.
    pub async fn retrieve(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f64,
    ) -> Result<Vec<RetrievedChunk>, EngineError> {
        if query.len() != self.dims {
            return Err(EngineError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let ranked = self.store.knn_search(query, top_k as i64).await?;

        // Rows arrive by ascending distance, so the mapped list is already
        // in descending similarity order and truncating the sub-threshold
        // tail is the whole floor filter.
        let results: Vec<RetrievedChunk> = ranked
            .into_iter()
            .map(|r| RetrievedChunk {
                similarity: 1.0 - r.distance,
                chunk: r.chunk,
            })
            .filter(|r| r.similarity >= threshold)
            .collect();

        tracing::debug!(results = results.len(), top_k, threshold, "retrieval done");
        Ok(results)
    }
}
