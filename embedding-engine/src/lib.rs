pub mod assets;
pub mod engine;
pub mod ranker;

pub use assets::ModelAssets;
pub use engine::EmbeddingEngine;
pub use ranker::{average_similarity, cosine_similarity, recency, score, score_at};

use async_trait::async_trait;
use mindfeed_core::CoreError;

/// Turns post text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Loads model assets. Missing assets surface as `EmbeddingError::ModelNotFound`.
    async fn ensure_ready(&self) -> Result<(), CoreError>;

    /// Blank input is rejected with `EmbeddingError::EmptyInput`.
    async fn encode(&self, text: &str) -> Result<Vec<f32>, CoreError>;

    /// Vector length, once known.
    fn dimension(&self) -> Option<usize>;
}
